//! Outputs exposed to the UI layer.

use serde::Serialize;

use crate::error::FeedError;
use crate::listing::Listing;

/// Orchestrator state. `Paginating` is only entered from `Hydrated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedPhase {
    #[default]
    Idle,
    SnapshotServed,
    LiveLoading,
    Hydrated,
    Paginating,
}

impl FeedPhase {
    /// States a failed fetch may fall back to.
    pub fn is_stable(self) -> bool {
        matches!(
            self,
            FeedPhase::Idle | FeedPhase::SnapshotServed | FeedPhase::Hydrated
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedView {
    pub listings: Vec<Listing>,
    pub loading: bool,
    pub loading_more: bool,
    pub has_more: bool,
    pub error: Option<FeedError>,
    /// New criteria are loading while the previous content stays on screen.
    pub is_transitioning: bool,
    /// The latest reset result is committed and can be painted.
    pub visual_commit_ready: bool,
    /// Bumped on every wholesale replacement of `listings`, never on appends.
    pub listings_changed_trigger: u64,
    pub phase: FeedPhase,
}
