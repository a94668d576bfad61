//! Per-source pagination cursors.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::listing::SourceKind;

/// Position of the last record received from one source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl Cursor {
    pub fn new(created_at: DateTime<Utc>, id: impl Into<String>) -> Self {
        Self {
            created_at,
            id: id.into(),
        }
    }

    /// Compares positions in feed order. `Greater` means further down the feed
    /// (older, or same instant with a larger id).
    pub fn feed_cmp(&self, other: &Cursor) -> Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }

    /// True when `self` sits strictly further down the feed than `other`.
    pub fn is_past(&self, other: &Cursor) -> bool {
        self.feed_cmp(other) == Ordering::Greater
    }
}

/// One cursor per source. `None` means start of feed. Never shared across sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursors {
    #[serde(default)]
    pub offer: Option<Cursor>,
    #[serde(default, rename = "job")]
    pub request: Option<Cursor>,
}

impl Cursors {
    pub fn get(&self, kind: SourceKind) -> Option<&Cursor> {
        match kind {
            SourceKind::Offer => self.offer.as_ref(),
            SourceKind::Request => self.request.as_ref(),
        }
    }

    fn slot(&mut self, kind: SourceKind) -> &mut Option<Cursor> {
        match kind {
            SourceKind::Offer => &mut self.offer,
            SourceKind::Request => &mut self.request,
        }
    }

    /// Moves the cursor of `kind` to `next` unless that would move it backwards.
    pub fn advance(&mut self, kind: SourceKind, next: Cursor) {
        let slot = self.slot(kind);
        if let Some(current) = slot.as_ref() {
            if !next.is_past(current) {
                if next != *current {
                    tracing::debug!(
                        target: "feed",
                        kind = %kind,
                        current = %current.id,
                        rejected = %next.id,
                        "ignoring cursor that would move backwards"
                    );
                }
                return;
            }
        }
        *slot = Some(next);
    }

    /// Applies every cursor of `other` on top of `self` via [`Cursors::advance`].
    pub fn merged(mut self, other: &Cursors) -> Cursors {
        for kind in SourceKind::ALL {
            if let Some(c) = other.get(kind) {
                self.advance(kind, c.clone());
            }
        }
        self
    }

    pub fn is_start(&self) -> bool {
        self.offer.is_none() && self.request.is_none()
    }
}
