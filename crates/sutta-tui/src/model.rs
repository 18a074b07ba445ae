use sutta_core::{Segment, StoreState};

/// What the segment table shows for one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    Pending,
    Translating,
    Translated,
    /// The last single-segment attempt failed.
    Failed,
}

impl SegmentStatus {
    pub fn of(state: &StoreState, segment: &Segment, failed: bool) -> Self {
        if state.is_translating(segment.id) {
            Self::Translating
        } else if segment.is_translated() {
            Self::Translated
        } else if failed {
            Self::Failed
        } else {
            Self::Pending
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "—",
            Self::Translating => "Translating...",
            Self::Translated => "Translated",
            Self::Failed => "Failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Translating)
    }
}
