use sutta_core::{BatchOutcome, SegmentId, SegmentOutcome, TranslateEvent};

/// Events flowing from the backend tasks to the TUI.
///
/// Segment state itself is observed through the store; these carry only what
/// the store does not record.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// A single-segment translation reported progress.
    Segment { id: SegmentId, event: TranslateEvent },
    /// A single-segment translation ended.
    SegmentFinished { id: SegmentId, outcome: SegmentOutcome },
    /// A batch run returned.
    BatchFinished(BatchOutcome),
}
