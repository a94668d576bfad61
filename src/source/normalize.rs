// src/source/normalize.rs
//! Raw offer/request records → [`Listing`].
//!
//! Records come from two schemas that disagree on naming and on types
//! (photos as array or JSON string, coordinates as string or number,
//! timestamps as RFC 3339 or unix seconds/millis). Nothing here panics: a
//! record without a usable `id` or `created_at` is skipped, every other
//! missing or malformed field falls back to a safe default.

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::Value;

use crate::cursor::Cursor;
use crate::listing::{GeoPoint, Listing, Location, OwnerRef, PriceInfo, SourceKind};

const MAX_TITLE_CHARS: usize = 200;
const MAX_DESCRIPTION_CHARS: usize = 1500;

/// Normalize text: decode entities, strip tags, collapse whitespace, cap length.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Option<Regex>> = OnceCell::new();
    if let Some(re) = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").ok()) {
        out = re.replace_all(&out, "").to_string();
    }

    static RE_WS: OnceCell<Option<Regex>> = OnceCell::new();
    if let Some(re) = RE_WS.get_or_init(|| Regex::new(r"\s+").ok()) {
        out = re.replace_all(&out, " ").to_string();
    }
    let mut out = out.trim().to_string();

    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }
    out
}

/// First non-empty string (or number rendered as string) under any of `keys`.
fn string_field(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match v.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Finite number stored either as a JSON number or a numeric string.
fn number_field(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|k| match v.get(*k)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|x| x.is_finite())
}

fn bool_field(v: &Value, keys: &[&str]) -> bool {
    keys.iter().any(|k| match v.get(*k) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.as_str(), "true" | "1" | "yes"),
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    })
}

/// RFC 3339 string, or unix seconds / milliseconds as number or string.
fn timestamp_field(v: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter().find_map(|k| match v.get(*k)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.trim().parse::<i64>().ok().and_then(from_unix)),
        Value::Number(n) => n.as_i64().and_then(from_unix),
        _ => None,
    })
}

fn from_unix(raw: i64) -> Option<DateTime<Utc>> {
    // Anything past ~2286 in seconds is treated as milliseconds.
    if raw.abs() >= 10_000_000_000 {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

/// Photos as an array of strings, a JSON-encoded array, or a single URL.
fn photos_field(v: &Value, keys: &[&str]) -> Vec<String> {
    fn from_array(items: &[Value]) -> Vec<String> {
        items
            .iter()
            .filter_map(|x| x.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    for k in keys {
        match v.get(*k) {
            Some(Value::Array(items)) => return from_array(items),
            Some(Value::String(s)) => {
                let s = s.trim();
                if s.starts_with('[') {
                    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(s) {
                        return from_array(&items);
                    }
                    return Vec::new();
                }
                if !s.is_empty() {
                    return vec![s.to_string()];
                }
            }
            _ => {}
        }
    }
    Vec::new()
}

fn location(v: &Value) -> Option<Location> {
    let lat = number_field(v, &["latitude", "lat"]);
    let lng = number_field(v, &["longitude", "lng", "lon"]);
    let point = match (lat, lng) {
        (Some(lat), Some(lng))
            if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) =>
        {
            Some(GeoPoint { lat, lng })
        }
        _ => None,
    };
    let display = string_field(v, &["location_text", "location", "city", "address"]);
    if point.is_none() && display.is_none() {
        None
    } else {
        Some(Location { point, display })
    }
}

/// Owner from a nested object under one of `nested`, else from flat `<prefix>_id` fields.
fn owner(v: &Value, nested: &[&str], prefix: &str) -> Option<OwnerRef> {
    let obj = nested.iter().find_map(|k| v.get(*k).filter(|o| o.is_object()));
    match obj {
        Some(o) => Some(OwnerRef {
            id: string_field(o, &["id", "user_id"])?,
            display_name: string_field(o, &["display_name", "name", "full_name"]),
            avatar_url: string_field(o, &["avatar_url", "avatar"]),
            rating: number_field(o, &["rating", "average_rating"]).map(|r| r as f32),
            verified: bool_field(o, &["verified", "is_verified"]),
        }),
        None => {
            let key = |suffix: &str| format!("{prefix}_{suffix}");
            let id = string_field(v, &[key("id").as_str()])?;
            Some(OwnerRef {
                id,
                display_name: string_field(v, &[key("name").as_str()]),
                avatar_url: string_field(v, &[key("avatar_url").as_str()]),
                rating: number_field(v, &[key("rating").as_str()]).map(|r| r as f32),
                verified: bool_field(v, &[key("verified").as_str()]),
            })
        }
    }
}

fn offer_price(v: &Value) -> PriceInfo {
    let kind = string_field(v, &["price_type", "pricing_type"])
        .unwrap_or_default()
        .to_ascii_lowercase();
    if matches!(kind.as_str(), "quote" | "quote_based" | "on_request") {
        return PriceInfo::QuoteRequired;
    }
    let min = number_field(v, &["price_min", "min_price"]);
    let max = number_field(v, &["price_max", "max_price"]);
    match number_field(v, &["price", "base_price"]) {
        Some(amount) if kind != "range" => PriceInfo::Fixed { amount },
        _ if min.is_some() || max.is_some() => PriceInfo::Budget { min, max },
        Some(amount) => PriceInfo::Fixed { amount },
        None => PriceInfo::QuoteRequired,
    }
}

fn request_price(v: &Value) -> PriceInfo {
    let kind = string_field(v, &["pricing_type", "price_type"])
        .unwrap_or_default()
        .to_ascii_lowercase();
    let fixed = number_field(v, &["fixed_price", "price"]);
    let min = number_field(v, &["budget_min"]);
    let max = number_field(v, &["budget_max"]);
    match kind.as_str() {
        "quote_based" | "quote" => PriceInfo::QuoteRequired,
        "fixed" => fixed
            .map(|amount| PriceInfo::Fixed { amount })
            .unwrap_or(PriceInfo::QuoteRequired),
        "budget" | "range" | "hourly" if min.is_some() || max.is_some() => {
            PriceInfo::Budget { min, max }
        }
        _ => match (fixed, min, max) {
            (Some(amount), _, _) => PriceInfo::Fixed { amount },
            (None, None, None) => PriceInfo::QuoteRequired,
            (None, min, max) => PriceInfo::Budget { min, max },
        },
    }
}

/// Cursor position of a raw record, if it carries a usable id and timestamp.
pub fn cursor_of(v: &Value) -> Option<Cursor> {
    let id = string_field(v, &["id"])?;
    let created_at = timestamp_field(v, &["created_at", "createdAt", "inserted_at"])?;
    Some(Cursor::new(created_at, id))
}

/// Converts one raw record. `None` when the record cannot be placed in the feed.
pub fn normalize(kind: SourceKind, v: &Value) -> Option<Listing> {
    if !v.is_object() {
        return None;
    }
    let Cursor { created_at, id } = cursor_of(v)?;

    let title = string_field(v, &["title", "name"])
        .map(|t| normalize_text(&t, MAX_TITLE_CHARS))
        .unwrap_or_default();
    let description = string_field(v, &["description", "details", "body"])
        .map(|d| normalize_text(&d, MAX_DESCRIPTION_CHARS))
        .unwrap_or_default();

    let (price, owner, subtype) = match kind {
        SourceKind::Offer => (
            offer_price(v),
            owner(v, &["provider", "owner", "profile"], "provider"),
            string_field(v, &["subtype", "offer_type", "type"]),
        ),
        SourceKind::Request => (
            request_price(v),
            owner(v, &["customer", "posted_by", "profile"], "customer"),
            None,
        ),
    };

    Some(Listing {
        id,
        source_kind: kind,
        title,
        description,
        created_at,
        price,
        location: location(v),
        distance_from_viewer: number_field(v, &["distance_km", "distance"])
            .filter(|d| *d >= 0.0),
        owner,
        photos: photos_field(v, &["photos", "images", "photo_urls"]),
        category_id: string_field(v, &["category_id", "category"]),
        subtype,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_text_decodes_and_collapses() {
        let s = "  <b>Garden&nbsp;&nbsp;help</b>\n\n needed ";
        assert_eq!(normalize_text(s, 100), "Garden help needed");
        assert_eq!(normalize_text("abcdef", 3), "abc");
    }

    #[test]
    fn offer_with_string_coordinates_and_json_photos() {
        let rec = json!({
            "id": "o1",
            "title": "Deep cleaning",
            "created_at": "2025-03-01T10:00:00Z",
            "price": "45.5",
            "latitude": "52.52",
            "longitude": 13.405,
            "location": "Berlin",
            "photos": "[\"a.jpg\", \"\", \"b.jpg\"]",
            "provider": {"id": "p1", "name": "Ana", "verified": true, "rating": "4.5"}
        });
        let l = normalize(SourceKind::Offer, &rec).unwrap();
        assert_eq!(l.price, PriceInfo::Fixed { amount: 45.5 });
        assert_eq!(l.photos, vec!["a.jpg".to_string(), "b.jpg".to_string()]);
        let loc = l.location.unwrap();
        assert_eq!(loc.point, Some(GeoPoint { lat: 52.52, lng: 13.405 }));
        assert_eq!(loc.display.as_deref(), Some("Berlin"));
        let owner = l.owner.unwrap();
        assert!(owner.verified);
        assert_eq!(owner.rating, Some(4.5));
    }

    #[test]
    fn request_quote_based_with_null_prices() {
        let rec = json!({
            "id": 17,
            "title": "Fix roof",
            "created_at": 1_740_000_000,
            "pricing_type": "quote_based",
            "fixed_price": null,
            "budget_min": null,
            "budget_max": null,
            "photos": null,
            "customer_id": "c9"
        });
        let l = normalize(SourceKind::Request, &rec).unwrap();
        assert_eq!(l.id, "17");
        assert_eq!(l.price, PriceInfo::QuoteRequired);
        assert!(l.photos.is_empty());
        assert_eq!(l.owner.unwrap().id, "c9");
    }

    #[test]
    fn request_budget_and_fixed() {
        let budget = json!({"id": "r1", "created_at": "2025-01-01T00:00:00Z",
            "pricing_type": "budget", "budget_min": 100, "budget_max": "300"});
        assert_eq!(
            normalize(SourceKind::Request, &budget).unwrap().price,
            PriceInfo::Budget { min: Some(100.0), max: Some(300.0) }
        );
        let fixed = json!({"id": "r2", "created_at": "2025-01-01T00:00:00Z",
            "pricing_type": "fixed", "fixed_price": 600});
        assert_eq!(
            normalize(SourceKind::Request, &fixed).unwrap().price,
            PriceInfo::Fixed { amount: 600.0 }
        );
    }

    #[test]
    fn malformed_fields_fall_back_to_defaults() {
        let rec = json!({
            "id": "x",
            "created_at": 1_740_000_000_000i64,
            "title": 42,
            "latitude": "north",
            "longitude": 10,
            "photos": "[not json",
            "distance_km": -3,
            "provider": "oops"
        });
        let l = normalize(SourceKind::Offer, &rec).unwrap();
        assert_eq!(l.title, "42");
        assert!(l.location.is_none());
        assert!(l.photos.is_empty());
        assert!(l.distance_from_viewer.is_none());
        assert!(l.owner.is_none());
        assert_eq!(l.created_at.timestamp(), 1_740_000_000);
    }

    #[test]
    fn records_without_identity_are_skipped() {
        assert!(normalize(SourceKind::Offer, &json!({"title": "no id"})).is_none());
        assert!(normalize(SourceKind::Offer, &json!({"id": "a", "created_at": "yesterday"})).is_none());
        assert!(normalize(SourceKind::Request, &json!("string record")).is_none());
        assert!(normalize(SourceKind::Request, &Value::Null).is_none());
    }
}
