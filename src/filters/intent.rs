//! Filter intent: owns the current [`FilterCriteria`] and view mode.
//!
//! Actions never fetch. Observers (the orchestrator) subscribe to the watch
//! channel and react to changes. Clones of a [`FilterIntent`] share the same
//! state, so handing the handle around does not create new action identities.

use std::sync::Arc;

use tokio::sync::watch;

use super::{FilterAction, FilterCriteria, ListingType, PriceBounds, SortMode, ViewMode};
use crate::listing::GeoPoint;

#[derive(Debug, Clone)]
pub struct FilterIntent {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    criteria: watch::Sender<FilterCriteria>,
    view_mode: watch::Sender<ViewMode>,
}

impl Default for FilterIntent {
    fn default() -> Self {
        Self::new(FilterCriteria::default())
    }
}

impl FilterIntent {
    pub fn new(initial: FilterCriteria) -> Self {
        Self {
            inner: Arc::new(Inner {
                criteria: watch::Sender::new(initial),
                view_mode: watch::Sender::new(ViewMode::default()),
            }),
        }
    }

    /// Current criteria (cloned).
    pub fn criteria(&self) -> FilterCriteria {
        self.inner.criteria.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FilterCriteria> {
        self.inner.criteria.subscribe()
    }

    /// Applies `action`. Subscribers are only notified when the value changed.
    /// Returns whether it did.
    pub fn dispatch(&self, action: FilterAction) -> bool {
        let changed = self.inner.criteria.send_if_modified(|current| {
            let next = current.apply(action);
            if next == *current {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::trace!(target: "feed", "filter criteria changed");
        }
        changed
    }

    pub fn set_listing_type(&self, t: ListingType) -> bool {
        self.dispatch(FilterAction::SetListingType(t))
    }

    pub fn toggle_category(&self, id: impl Into<String>) -> bool {
        self.dispatch(FilterAction::ToggleCategory(id.into()))
    }

    pub fn set_price_bounds(&self, min: Option<f64>, max: Option<f64>) -> bool {
        self.dispatch(FilterAction::SetPriceBounds(PriceBounds { min, max }))
    }

    pub fn set_sort(&self, sort: SortMode) -> bool {
        self.dispatch(FilterAction::SetSort(sort))
    }

    pub fn toggle_verified(&self) -> bool {
        self.dispatch(FilterAction::ToggleVerified)
    }

    pub fn set_coordinates(&self, point: Option<GeoPoint>) -> bool {
        self.dispatch(FilterAction::SetCoordinates(point))
    }

    pub fn set_text(&self, text: impl Into<String>) -> bool {
        self.dispatch(FilterAction::SetText(text.into()))
    }

    pub fn set_location_text(&self, text: Option<String>) -> bool {
        self.dispatch(FilterAction::SetLocationText(text))
    }

    pub fn set_radius(&self, km: Option<f64>) -> bool {
        self.dispatch(FilterAction::SetRadius(km))
    }

    pub fn set_min_rating(&self, rating: Option<f32>) -> bool {
        self.dispatch(FilterAction::SetMinRating(rating))
    }

    /// Restores defaults; `listing_type` overrides the global default type.
    pub fn reset(&self, listing_type: Option<ListingType>) -> bool {
        self.dispatch(FilterAction::Reset(listing_type))
    }

    pub fn replace_all(&self, criteria: FilterCriteria) -> bool {
        self.dispatch(FilterAction::ReplaceAll(criteria))
    }

    pub fn view_mode(&self) -> ViewMode {
        *self.inner.view_mode.borrow()
    }

    /// View mode is observable but never part of the query.
    pub fn set_view_mode(&self, mode: ViewMode) {
        self.inner.view_mode.send_if_modified(|m| {
            if *m == mode {
                false
            } else {
                *m = mode;
                true
            }
        });
    }

    pub fn subscribe_view_mode(&self) -> watch::Receiver<ViewMode> {
        self.inner.view_mode.subscribe()
    }
}
