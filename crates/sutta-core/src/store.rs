//! Shared state for one document: segments, selection, in-flight set and
//! batch progress.
//!
//! The store is built on a [`tokio::sync::watch`] channel. Every operation is
//! one `send_modify`/`send_if_modified` call, so a subscriber only ever sees
//! the state before or after a whole operation. In particular
//! [`TranslationStore::write_translation`] marks the segment translated and
//! drops it from the translating set in the same step.
//!
//! Operations that change nothing (re-selecting a selected id, rewriting an
//! identical translation, selecting past the cap) do not notify subscribers
//! and do not bump the revision.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::watch;

use crate::document::{Document, Segment, SegmentId, Translation};

/// Default cap on the selection set.
pub const MAX_SELECTION: usize = 20;

/// Lifecycle of the current (or last) batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPhase {
    #[default]
    Idle,
    Running,
    Cancelling,
    Settled,
}

impl BatchPhase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Running => "Translating...",
            Self::Cancelling => "Cancelling...",
            Self::Settled => "Done",
        }
    }

    /// Whether a batch is in flight (the batch trigger should be disabled).
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Running | Self::Cancelling)
    }
}

/// Running counters of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Text streamed so far by a single-segment translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPreview {
    pub segment_id: SegmentId,
    pub text: String,
}

/// Snapshot of everything the store holds.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    document_id: Option<String>,
    title: Option<String>,
    segments: Vec<Segment>,
    positions: HashMap<SegmentId, usize>,
    selection: BTreeSet<SegmentId>,
    translating: BTreeSet<SegmentId>,
    batch_phase: BatchPhase,
    batch_progress: BatchProgress,
    preview: Option<StreamPreview>,
    notice: Option<String>,
    revision: u64,
}

impl StoreState {
    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Segments in document order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.positions.get(&id).map(|&i| &self.segments[i])
    }

    pub fn contains(&self, id: SegmentId) -> bool {
        self.positions.contains_key(&id)
    }

    pub fn is_translated(&self, id: SegmentId) -> bool {
        self.segment(id).is_some_and(Segment::is_translated)
    }

    pub fn is_translating(&self, id: SegmentId) -> bool {
        self.translating.contains(&id)
    }

    pub fn is_selected(&self, id: SegmentId) -> bool {
        self.selection.contains(&id)
    }

    pub fn selection(&self) -> &BTreeSet<SegmentId> {
        &self.selection
    }

    pub fn translating(&self) -> &BTreeSet<SegmentId> {
        &self.translating
    }

    pub fn batch_phase(&self) -> BatchPhase {
        self.batch_phase
    }

    pub fn batch_progress(&self) -> BatchProgress {
        self.batch_progress
    }

    pub fn preview(&self) -> Option<&StreamPreview> {
        self.preview.as_ref()
    }

    /// Last user-facing message (batch summary or single-segment error).
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Incremented by every operation that changed something.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn translated_count(&self) -> usize {
        self.segments.iter().filter(|s| s.is_translated()).count()
    }

    /// The ids from `ids` that exist and are not yet translated, in the order
    /// given, without duplicates.
    pub fn untranslated(&self, ids: &[SegmentId]) -> Vec<SegmentId> {
        let mut seen = BTreeSet::new();
        ids.iter()
            .copied()
            .filter(|&id| self.contains(id) && !self.is_translated(id) && seen.insert(id))
            .collect()
    }

    /// Like [`untranslated`](Self::untranslated) but keeps translated ids.
    pub fn known(&self, ids: &[SegmentId]) -> Vec<SegmentId> {
        let mut seen = BTreeSet::new();
        ids.iter()
            .copied()
            .filter(|&id| self.contains(id) && seen.insert(id))
            .collect()
    }

    /// Export the current segments as a document.
    pub fn to_document(&self) -> Option<Document> {
        Some(Document {
            id: self.document_id.clone()?,
            title: self.title.clone(),
            segments: self.segments.clone(),
        })
    }
}

/// The shared, observable state store.
///
/// One instance is created per session and shared by `Arc` between the
/// controllers (writers) and the rendering layer (reader).
#[derive(Debug)]
pub struct TranslationStore {
    state: watch::Sender<StoreState>,
    max_selection: usize,
}

impl Default for TranslationStore {
    fn default() -> Self {
        Self::new(MAX_SELECTION)
    }
}

impl TranslationStore {
    pub fn new(max_selection: usize) -> Self {
        let (state, _) = watch::channel(StoreState::default());
        Self {
            state,
            max_selection,
        }
    }

    /// Receive a notification after every change.
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    /// Clone the current state.
    pub fn snapshot(&self) -> StoreState {
        self.state.borrow().clone()
    }

    /// Run `f` against the current state without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        f(&self.state.borrow())
    }

    pub fn max_selection(&self) -> usize {
        self.max_selection
    }

    /// Apply `f`; notify and bump the revision only if it reports a change.
    fn update(&self, f: impl FnOnce(&mut StoreState) -> bool) -> bool {
        self.state.send_if_modified(|state| {
            let changed = f(state);
            if changed {
                state.revision += 1;
            }
            changed
        })
    }

    /// Switch to another document. Replaces every segment and clears the
    /// selection, the translating set, batch progress and any preview.
    pub fn load_document(&self, document: Document) {
        self.update(|state| {
            let revision = state.revision;
            let positions = document
                .segments
                .iter()
                .enumerate()
                .map(|(i, seg)| (seg.id, i))
                .collect();
            *state = StoreState {
                document_id: Some(document.id),
                title: document.title,
                segments: document.segments,
                positions,
                revision,
                ..StoreState::default()
            };
            true
        });
    }

    pub fn mark_translating(&self, id: SegmentId) -> bool {
        self.update(|state| state.translating.insert(id))
    }

    pub fn unmark_translating(&self, id: SegmentId) -> bool {
        self.update(|state| state.translating.remove(&id))
    }

    /// Remove every id in `ids` from the translating set.
    pub fn unmark_all(&self, ids: &[SegmentId]) -> bool {
        self.update(|state| {
            let before = state.translating.len();
            for id in ids {
                state.translating.remove(id);
            }
            state.translating.len() != before
        })
    }

    /// Attach a translation to a segment, mark it translated and drop it
    /// from the translating set, as one observable step.
    ///
    /// Returns `false` if the segment is not part of the current document.
    /// Writing the same translation twice leaves the state unchanged.
    pub fn write_translation(&self, id: SegmentId, translation: Translation) -> bool {
        let mut known = false;
        self.update(|state| {
            let Some(&pos) = state.positions.get(&id) else {
                return false;
            };
            known = true;
            let segment = &mut state.segments[pos];
            let mut changed = false;
            if segment.translation.as_ref() != Some(&translation) {
                segment.translation = Some(translation);
                changed = true;
            }
            changed |= state.translating.remove(&id);
            changed
        });
        known
    }

    /// Add `id` to the selection. No-op (returns `false`) when the id is
    /// unknown, already selected, or the selection is full.
    pub fn select(&self, id: SegmentId) -> bool {
        let cap = self.max_selection;
        self.update(|state| {
            if !state.contains(id) || state.selection.len() >= cap {
                return false;
            }
            state.selection.insert(id)
        })
    }

    pub fn deselect(&self, id: SegmentId) -> bool {
        self.update(|state| state.selection.remove(&id))
    }

    /// Select `id` if unselected, deselect it otherwise. Returns whether the
    /// id is selected afterwards.
    pub fn toggle_selection(&self, id: SegmentId) -> bool {
        if self.read(|state| state.is_selected(id)) {
            self.deselect(id);
            false
        } else {
            self.select(id)
        }
    }

    pub fn clear_selection(&self) -> bool {
        self.update(|state| {
            let had = !state.selection.is_empty();
            state.selection.clear();
            had
        })
    }

    /// Enter `Running`: mark every id translating and reset the counters.
    pub fn begin_batch(&self, ids: &[SegmentId]) {
        self.update(|state| {
            state.translating.extend(ids.iter().copied());
            state.batch_phase = BatchPhase::Running;
            state.batch_progress = BatchProgress {
                total: ids.len(),
                ..BatchProgress::default()
            };
            state.notice = None;
            true
        });
    }

    pub fn set_batch_progress(&self, progress: BatchProgress) -> bool {
        self.update(|state| {
            let changed = state.batch_progress != progress;
            state.batch_progress = progress;
            changed
        })
    }

    /// `Running -> Cancelling`. Ignored in any other phase.
    pub fn mark_cancelling(&self) -> bool {
        self.update(|state| {
            if state.batch_phase != BatchPhase::Running {
                return false;
            }
            state.batch_phase = BatchPhase::Cancelling;
            true
        })
    }

    /// Enter `Settled`: clear the selection, release any of `ids` still
    /// marked translating, record the final counters and the summary.
    pub fn settle_batch(&self, ids: &[SegmentId], progress: BatchProgress, summary: String) {
        self.update(|state| {
            state.selection.clear();
            for id in ids {
                state.translating.remove(id);
            }
            state.batch_phase = BatchPhase::Settled;
            state.batch_progress = progress;
            state.notice = Some(summary);
            true
        });
    }

    /// Start a fresh token preview for `id`.
    pub fn reset_preview(&self, id: SegmentId) {
        self.update(|state| {
            state.preview = Some(StreamPreview {
                segment_id: id,
                text: String::new(),
            });
            true
        });
    }

    /// Append streamed text to the preview for `id`, returning the text
    /// accumulated so far.
    pub fn append_preview(&self, id: SegmentId, text: &str) -> String {
        let mut accumulated = String::new();
        self.update(|state| {
            if state.preview.as_ref().map(|p| p.segment_id) != Some(id) {
                state.preview = Some(StreamPreview {
                    segment_id: id,
                    text: String::new(),
                });
            }
            if let Some(preview) = state.preview.as_mut() {
                preview.text.push_str(text);
                accumulated = preview.text.clone();
            }
            true
        });
        accumulated
    }

    pub fn set_notice(&self, notice: impl Into<String>) {
        let notice = notice.into();
        self.update(|state| {
            state.notice = Some(notice);
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(n: u64) -> Document {
        Document {
            id: "sn56.11".into(),
            title: Some("Dhammacakkappavattana Sutta".into()),
            segments: (1..=n).map(|i| Segment::new(i, format!("segment {i}"))).collect(),
        }
    }

    fn store_with(n: u64) -> TranslationStore {
        let store = TranslationStore::default();
        store.load_document(doc(n));
        store
    }

    fn translation(text: &str) -> Translation {
        serde_json::from_value(serde_json::json!({
            "sentences": [{"original": "", "translation": text}]
        }))
        .unwrap()
    }

    #[test]
    fn selection_is_capped() {
        let store = store_with(30);
        for i in 1..=20 {
            assert!(store.select(SegmentId(i)));
        }
        let revision = store.read(|s| s.revision());
        assert!(!store.select(SegmentId(21)));
        store.read(|s| {
            assert_eq!(s.selection().len(), 20);
            assert!(!s.is_selected(SegmentId(21)));
            assert_eq!(s.revision(), revision);
        });
        // Freeing a slot makes room again
        store.deselect(SegmentId(1));
        assert!(store.select(SegmentId(21)));
    }

    #[test]
    fn select_rejects_unknown_ids() {
        let store = store_with(3);
        assert!(!store.select(SegmentId(99)));
        assert!(store.read(|s| s.selection().is_empty()));
    }

    #[test]
    fn toggle_selection_flips() {
        let store = store_with(3);
        assert!(store.toggle_selection(SegmentId(2)));
        assert!(store.read(|s| s.is_selected(SegmentId(2))));
        assert!(!store.toggle_selection(SegmentId(2)));
        assert!(!store.read(|s| s.is_selected(SegmentId(2))));
    }

    #[test]
    fn write_translation_is_atomic() {
        let store = store_with(3);
        let mut rx = store.subscribe();
        store.mark_translating(SegmentId(2));
        rx.mark_unchanged();

        store.write_translation(SegmentId(2), translation("Thus have I heard."));
        assert!(rx.has_changed().unwrap());
        let state = rx.borrow_and_update();
        assert!(state.is_translated(SegmentId(2)));
        assert!(!state.is_translating(SegmentId(2)));
    }

    #[test]
    fn write_translation_is_idempotent() {
        let store = store_with(8);
        store.write_translation(SegmentId(7), translation("Homage"));
        let once = store.snapshot();
        assert!(store.write_translation(SegmentId(7), translation("Homage")));
        let twice = store.snapshot();
        assert_eq!(once.segments(), twice.segments());
        assert_eq!(once.translating(), twice.translating());
        assert_eq!(once.revision(), twice.revision());
    }

    #[test]
    fn write_translation_unknown_segment() {
        let store = store_with(2);
        assert!(!store.write_translation(SegmentId(40), translation("x")));
    }

    #[test]
    fn untranslated_filters_and_dedups() {
        let store = store_with(5);
        store.write_translation(SegmentId(2), translation("done"));
        let ids: Vec<SegmentId> = [3, 2, 1, 3, 9, 5].into_iter().map(SegmentId).collect();
        assert_eq!(
            store.read(|s| s.untranslated(&ids)),
            vec![SegmentId(3), SegmentId(1), SegmentId(5)]
        );
    }

    #[test]
    fn load_document_resets_everything() {
        let store = store_with(5);
        store.select(SegmentId(1));
        store.begin_batch(&[SegmentId(1), SegmentId(2)]);
        store.load_document(doc(2));
        store.read(|s| {
            assert!(s.selection().is_empty());
            assert!(s.translating().is_empty());
            assert_eq!(s.batch_phase(), BatchPhase::Idle);
            assert_eq!(s.segments().len(), 2);
            assert!(s.revision() > 0);
        });
    }

    #[test]
    fn batch_lifecycle() {
        let store = store_with(4);
        store.select(SegmentId(1));
        store.select(SegmentId(2));
        let ids = [SegmentId(1), SegmentId(2)];
        store.begin_batch(&ids);
        store.read(|s| {
            assert_eq!(s.batch_phase(), BatchPhase::Running);
            assert_eq!(s.translating().len(), 2);
            assert_eq!(s.batch_progress().total, 2);
        });

        assert!(store.mark_cancelling());
        assert!(!store.mark_cancelling());

        let progress = BatchProgress {
            total: 2,
            completed: 1,
            succeeded: 1,
            failed: 0,
        };
        store.settle_batch(&ids, progress, "cancelled".into());
        store.read(|s| {
            assert_eq!(s.batch_phase(), BatchPhase::Settled);
            assert!(s.selection().is_empty());
            assert!(s.translating().is_empty());
            assert_eq!(s.batch_progress(), progress);
            assert_eq!(s.notice(), Some("cancelled"));
        });
    }

    #[test]
    fn preview_accumulates_tokens() {
        let store = store_with(2);
        store.reset_preview(SegmentId(1));
        assert_eq!(store.append_preview(SegmentId(1), "Evaṃ "), "Evaṃ ");
        assert_eq!(store.append_preview(SegmentId(1), "me sutaṃ"), "Evaṃ me sutaṃ");
        // A different segment starts over
        assert_eq!(store.append_preview(SegmentId(2), "Thus"), "Thus");
    }

    #[test]
    fn to_document_round_trips() {
        let store = store_with(2);
        store.write_translation(SegmentId(1), translation("Thus"));
        let exported = store.read(|s| s.to_document()).unwrap();
        assert_eq!(exported.id, "sn56.11");
        assert!(exported.segments[0].is_translated());
        assert!(!exported.segments[1].is_translated());
    }
}
