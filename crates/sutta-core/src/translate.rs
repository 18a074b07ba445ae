//! Streaming translation of a single segment.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{SegmentBackend, SegmentRequest};
use crate::document::{SegmentId, Translation};
use crate::events::StreamEvent;
use crate::sse::SseFrame;
use crate::store::TranslationStore;

/// Lifecycle callbacks of a single-segment translation.
#[derive(Debug, Clone, PartialEq)]
pub enum TranslateEvent {
    Started,
    /// Text generated so far (all tokens, not just the latest).
    Token { accumulated: String },
    /// The structured result arrived and was written to the store.
    Translation(Translation),
    Completed,
    Error(String),
}

/// How a call to [`SegmentTranslator::translate`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    Translated,
    Failed(String),
    Cancelled,
    /// The stream closed cleanly without a translation.
    NoResult,
}

/// Removes the segment from the translating set when dropped, so every exit
/// path (success, error, cancellation, a dropped future) clears the mark.
struct TranslatingMark<'a> {
    store: &'a TranslationStore,
    id: SegmentId,
}

impl<'a> TranslatingMark<'a> {
    fn new(store: &'a TranslationStore, id: SegmentId) -> Self {
        store.mark_translating(id);
        Self { store, id }
    }
}

impl Drop for TranslatingMark<'_> {
    fn drop(&mut self) {
        self.store.unmark_translating(self.id);
    }
}

#[derive(Default)]
struct StreamState {
    translated: bool,
    completed: bool,
    error: Option<String>,
}

/// Translates one segment at a time over the streaming endpoint.
pub struct SegmentTranslator<B> {
    backend: B,
    store: Arc<TranslationStore>,
}

impl<B: SegmentBackend> SegmentTranslator<B> {
    pub fn new(backend: B, store: Arc<TranslationStore>) -> Self {
        Self { backend, store }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Stream a translation for `id`, reporting progress through `on_event`.
    ///
    /// The segment is marked translating for the duration of the call. Tokens
    /// accumulate in the store's preview; a complete translation is written to
    /// the store as soon as it arrives, before the stream ends. Errors are
    /// reported through `on_event` and the return value, never raised.
    pub async fn translate(
        &self,
        id: SegmentId,
        cancel: &CancellationToken,
        mut on_event: impl FnMut(TranslateEvent) + Send,
    ) -> SegmentOutcome {
        let Some(document_id) = self.store.read(|s| s.document_id().map(str::to_string)) else {
            let message = "no document loaded".to_string();
            on_event(TranslateEvent::Error(message.clone()));
            return SegmentOutcome::Failed(message);
        };
        if !self.store.read(|s| s.contains(id)) {
            let message = format!("segment {id} is not part of {document_id}");
            on_event(TranslateEvent::Error(message.clone()));
            return SegmentOutcome::Failed(message);
        }

        let _mark = TranslatingMark::new(&self.store, id);
        self.store.reset_preview(id);
        let request = SegmentRequest {
            document_id,
            segment_id: id,
        };

        let mut state = StreamState::default();
        let result = {
            let mut on_frame =
                |frame: SseFrame| self.handle_frame(id, &frame, &mut state, &mut on_event);
            self.backend
                .stream_segment(&request, cancel, &mut on_frame)
                .await
        };

        if cancel.is_cancelled() {
            log::debug!("translation of segment {id} cancelled");
            return SegmentOutcome::Cancelled;
        }
        if let Err(err) = result {
            let message = err.to_string();
            log::warn!("translation of segment {id} failed: {message}");
            self.store.set_notice(format!("Segment {id}: {message}"));
            on_event(TranslateEvent::Error(message.clone()));
            return SegmentOutcome::Failed(message);
        }
        if !state.completed {
            on_event(TranslateEvent::Completed);
        }
        match (state.translated, state.error) {
            (true, _) => SegmentOutcome::Translated,
            (false, Some(message)) => SegmentOutcome::Failed(message),
            (false, None) => SegmentOutcome::NoResult,
        }
    }

    fn handle_frame(
        &self,
        id: SegmentId,
        frame: &SseFrame,
        state: &mut StreamState,
        on_event: &mut impl FnMut(TranslateEvent),
    ) {
        let event = match StreamEvent::decode(frame) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("skipping frame: {err}");
                return;
            }
        };
        match event {
            StreamEvent::Start { .. } => on_event(TranslateEvent::Started),
            StreamEvent::Token { text } => {
                let accumulated = self.store.append_preview(id, &text);
                on_event(TranslateEvent::Token { accumulated });
            }
            StreamEvent::Translation { translation } => {
                self.accept(id, translation, state, on_event);
            }
            StreamEvent::SegmentComplete {
                id: completed,
                translation,
            } if completed == id => {
                self.accept(id, translation, state, on_event);
            }
            StreamEvent::SegmentComplete { id: other, .. } => {
                log::warn!("ignoring result for segment {other} while translating {id}");
            }
            StreamEvent::Done { .. } => {
                if !state.completed {
                    state.completed = true;
                    on_event(TranslateEvent::Completed);
                }
            }
            StreamEvent::Error { message, .. } => {
                self.store.set_notice(format!("Segment {id}: {message}"));
                state.error = Some(message.clone());
                on_event(TranslateEvent::Error(message));
            }
            StreamEvent::ParseComplete => log::debug!("segment {id}: output parsed"),
            StreamEvent::FallbackStart { reason } => {
                log::info!("segment {id}: server fell back: {reason}");
            }
        }
    }

    fn accept(
        &self,
        id: SegmentId,
        translation: Translation,
        state: &mut StreamState,
        on_event: &mut impl FnMut(TranslateEvent),
    ) {
        self.store.write_translation(id, translation.clone());
        state.translated = true;
        on_event(TranslateEvent::Translation(translation));
    }
}
