//! Filter criteria value object and its pure transitions.
//!
//! [`FilterCriteria`] is immutable from the outside: every change goes through
//! [`FilterCriteria::apply`], which returns a new value. The stateful handle
//! that owns the current value lives in [`intent`].

pub mod intent;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::listing::{GeoPoint, Listing, PriceInfo, SourceKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    Relevance,
    #[default]
    Newest,
    Price,
    Distance,
}

/// Which sources a query runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum ListingType {
    #[default]
    All,
    Offer,
    Request,
    /// Offers of one subtype only, e.g. `service` or `product`.
    OfferSubtype(String),
}

impl ListingType {
    pub fn enabled_sources(&self) -> Vec<SourceKind> {
        match self {
            ListingType::All => SourceKind::ALL.to_vec(),
            ListingType::Offer | ListingType::OfferSubtype(_) => vec![SourceKind::Offer],
            ListingType::Request => vec![SourceKind::Request],
        }
    }

    pub fn offer_subtype(&self) -> Option<&str> {
        match self {
            ListingType::OfferSubtype(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PriceBounds {
    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    fn contains(&self, v: f64) -> bool {
        self.min.map_or(true, |m| v >= m) && self.max.map_or(true, |m| v <= m)
    }

    /// Whether a listing's price is compatible with these bounds.
    /// Quote-required listings always pass; budget ranges pass when they overlap.
    pub fn admits(&self, price: &PriceInfo) -> bool {
        if self.is_unbounded() {
            return true;
        }
        match price {
            PriceInfo::QuoteRequired => true,
            PriceInfo::Fixed { amount } => self.contains(*amount),
            PriceInfo::Budget { min: None, max: None } => true,
            PriceInfo::Budget { min, max } => {
                let lo = min.unwrap_or(f64::NEG_INFINITY);
                let hi = max.unwrap_or(f64::INFINITY);
                self.min.map_or(true, |m| hi >= m) && self.max.map_or(true, |m| lo <= m)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    List,
    Map,
}

/// Snapshot of query intent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub price: PriceBounds,
    #[serde(default)]
    pub location_text: Option<String>,
    #[serde(default)]
    pub radius_km: Option<f64>,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
    #[serde(default)]
    pub min_rating: Option<f32>,
    #[serde(default)]
    pub sort: SortMode,
    #[serde(default)]
    pub verified_only: bool,
    #[serde(default)]
    pub listing_type: ListingType,
}

/// A single transition over [`FilterCriteria`].
#[derive(Debug, Clone, PartialEq)]
pub enum FilterAction {
    SetListingType(ListingType),
    ToggleCategory(String),
    SetPriceBounds(PriceBounds),
    SetSort(SortMode),
    ToggleVerified,
    SetCoordinates(Option<GeoPoint>),
    SetText(String),
    SetLocationText(Option<String>),
    SetRadius(Option<f64>),
    SetMinRating(Option<f32>),
    /// Back to defaults, optionally keeping a caller-supplied listing type.
    Reset(Option<ListingType>),
    ReplaceAll(FilterCriteria),
}

impl FilterCriteria {
    pub fn for_listing_type(listing_type: ListingType) -> Self {
        Self {
            listing_type,
            ..Self::default()
        }
    }

    /// Snapshot-eligible: no text, categories, location text or price bounds.
    pub fn is_clean(&self) -> bool {
        self.text.trim().is_empty()
            && self.categories.is_empty()
            && self
                .location_text
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
            && self.price.is_unbounded()
    }

    /// Client-side guard run after normalization.
    pub fn admits(&self, listing: &Listing) -> bool {
        self.price.admits(&listing.price)
    }

    pub fn apply(&self, action: FilterAction) -> FilterCriteria {
        let mut next = self.clone();
        match action {
            FilterAction::SetListingType(t) => next.listing_type = t,
            FilterAction::ToggleCategory(id) => {
                if !next.categories.remove(&id) {
                    next.categories.insert(id);
                }
            }
            FilterAction::SetPriceBounds(mut b) => {
                if let (Some(lo), Some(hi)) = (b.min, b.max) {
                    if lo > hi {
                        b = PriceBounds {
                            min: Some(hi),
                            max: Some(lo),
                        };
                    }
                }
                next.price = b;
            }
            FilterAction::SetSort(s) => next.sort = s,
            FilterAction::ToggleVerified => next.verified_only = !next.verified_only,
            FilterAction::SetCoordinates(p) => next.coordinates = p,
            FilterAction::SetText(t) => next.text = t,
            FilterAction::SetLocationText(t) => {
                next.location_text = t.filter(|s| !s.trim().is_empty())
            }
            FilterAction::SetRadius(r) => next.radius_km = r.filter(|r| *r > 0.0),
            FilterAction::SetMinRating(r) => next.min_rating = r,
            FilterAction::Reset(listing_type) => {
                next = FilterCriteria::for_listing_type(listing_type.unwrap_or_default());
            }
            FilterAction::ReplaceAll(c) => next = c,
        }
        next
    }
}
