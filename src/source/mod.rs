// src/source/mod.rs
pub mod memory;
pub mod normalize;

use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cursor::Cursor;
use crate::filters::{FilterCriteria, PriceBounds, SortMode};
use crate::listing::{GeoPoint, SourceKind};

/// Source-native record as returned by the remote query service.
pub type RawRecord = serde_json::Value;

/// Remote filters forwarded with every page query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryFilters {
    pub text: Option<String>,
    pub categories: BTreeSet<String>,
    pub price: PriceBounds,
    pub location_text: Option<String>,
    pub near: Option<GeoPoint>,
    pub radius_km: Option<f64>,
    pub min_rating: Option<f32>,
    pub sort: SortMode,
    pub verified_only: bool,
    pub offer_subtype: Option<String>,
}

impl QueryFilters {
    pub fn from_criteria(criteria: &FilterCriteria, kind: SourceKind) -> Self {
        let text = criteria.text.trim();
        Self {
            text: (!text.is_empty()).then(|| text.to_string()),
            categories: criteria.categories.clone(),
            price: criteria.price,
            location_text: criteria.location_text.clone(),
            near: criteria.coordinates,
            radius_km: criteria.radius_km,
            min_rating: criteria.min_rating,
            sort: criteria.sort,
            verified_only: criteria.verified_only,
            offer_subtype: match kind {
                SourceKind::Offer => criteria.listing_type.offer_subtype().map(str::to_string),
                SourceKind::Request => None,
            },
        }
    }
}

/// One paginated query against one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageRequest {
    pub source: SourceKind,
    pub cursor_created_at: Option<DateTime<Utc>>,
    pub cursor_id: Option<String>,
    pub limit: usize,
    pub filters: QueryFilters,
}

impl PageRequest {
    pub fn new(
        source: SourceKind,
        cursor: Option<&Cursor>,
        limit: usize,
        filters: QueryFilters,
    ) -> Self {
        Self {
            source,
            cursor_created_at: cursor.map(|c| c.created_at),
            cursor_id: cursor.map(|c| c.id.clone()),
            limit,
            filters,
        }
    }

    pub fn cursor(&self) -> Option<Cursor> {
        match (self.cursor_created_at, &self.cursor_id) {
            (Some(ts), Some(id)) => Some(Cursor::new(ts, id.clone())),
            _ => None,
        }
    }

    /// Stable call signature: source name plus a digest of every parameter.
    pub fn signature(&self) -> String {
        use sha2::{Digest, Sha256};
        let body = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&body);
        let mut out = String::with_capacity(self.source.as_str().len() + 17);
        out.push_str(self.source.as_str());
        out.push(':');
        for b in digest.iter().take(8) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }
}

/// Paginated query capability. Implementations return records in their own
/// server-side order, strictly after the request cursor, at most `limit` long.
#[async_trait::async_trait]
pub trait QuerySource: Send + Sync + 'static {
    async fn query_page(&self, request: &PageRequest) -> Result<Vec<RawRecord>>;
    fn name(&self) -> &'static str;
}
