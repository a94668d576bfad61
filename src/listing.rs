//! # Listing
//! Unified feed entity produced from both offer and request records.
//!
//! Feed order is `created_at` descending with ties broken by `id` ascending.
//! The same pair doubles as the pagination cursor of each source.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;

/// Which remote source a listing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Provider-posted listing (service or product available for booking).
    Offer,
    /// Customer-posted listing (job seeking a provider).
    Request,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::Offer, SourceKind::Request];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Offer => "offer",
            SourceKind::Request => "request",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price shape of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PriceInfo {
    Fixed { amount: f64 },
    Budget { min: Option<f64>, max: Option<f64> },
    QuoteRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub point: Option<GeoPoint>,
    pub display: Option<String>,
}

/// Display fields of the posting party. Never an ownership edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub id: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub rating: Option<f32>,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub source_kind: SourceKind,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub price: PriceInfo,
    pub location: Option<Location>,
    /// Kilometres, only present when the source ran a geo-filtered query.
    pub distance_from_viewer: Option<f64>,
    pub owner: Option<OwnerRef>,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    /// Offer subtype such as `service` or `product`.
    #[serde(default)]
    pub subtype: Option<String>,
}

impl Listing {
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.id.clone())
    }

    pub fn key(&self) -> (SourceKind, &str) {
        (self.source_kind, self.id.as_str())
    }
}

/// Feed order: newest first, ties by `id` ascending.
pub fn feed_order(a: &Listing, b: &Listing) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn listing(kind: SourceKind, id: &str, ts: i64) -> Listing {
        Listing {
            id: id.to_string(),
            source_kind: kind,
            title: format!("{kind} {id}"),
            description: String::new(),
            created_at: Utc.timestamp_opt(ts, 0).single().unwrap_or_default(),
            price: PriceInfo::QuoteRequired,
            location: None,
            distance_from_viewer: None,
            owner: None,
            photos: Vec::new(),
            category_id: None,
            subtype: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::listing;
    use super::*;

    #[test]
    fn feed_order_newest_first_then_id() {
        let mut v = vec![
            listing(SourceKind::Offer, "b", 100),
            listing(SourceKind::Request, "a", 100),
            listing(SourceKind::Offer, "c", 200),
        ];
        v.sort_by(feed_order);
        let ids: Vec<_> = v.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
