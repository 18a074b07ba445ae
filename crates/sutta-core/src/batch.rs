//! Batch translation of many segments over sequential streaming requests.
//!
//! A batch run filters its input down to untranslated segments, splits them
//! into sub-batches of at most `sub_batch_size` ids (order preserved) and
//! sends the sub-batches one at a time. Each sub-batch's event stream is
//! reconciled into the [`TranslationStore`] as it arrives: a finished segment
//! is written (and leaves the translating set) the moment its
//! `segment_complete` frame is parsed.
//!
//! Cancellation is checked before every sub-batch. The token is also handed
//! to the streaming request, which abandons its stream at the next read; the
//! remaining ids of that sub-batch are released without being counted as
//! failures.
//!
//! Every run ends with exactly one [`BatchSummary`], stored as the store's
//! notice. Nothing in a run returns an error to the caller.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{BatchBackend, BatchRequest};
use crate::client::ClientError;
use crate::document::SegmentId;
use crate::events::StreamEvent;
use crate::sse::SseFrame;
use crate::store::{BatchProgress, TranslationStore};

/// Default number of segments per request.
pub const SUB_BATCH_SIZE: usize = 3;

/// Split `ids` into consecutive groups of at most `size`, preserving order.
pub fn partition(ids: &[SegmentId], size: usize) -> Vec<Vec<SegmentId>> {
    ids.chunks(size.max(1)).map(<[SegmentId]>::to_vec).collect()
}

/// Final report of one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cancelled {
            write!(f, "Batch translation cancelled, {} done", self.completed)
        } else if self.failed > 0 {
            write!(f, "{} success, {} failed", self.succeeded, self.failed)
        } else {
            write!(f, "{} segments translated", self.succeeded)
        }
    }
}

/// What a call to [`BatchOrchestrator::run_batch`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing to translate; no state was touched.
    Skipped,
    /// Another batch was already running; no state was touched.
    Rejected,
    Settled(BatchSummary),
}

/// Per-run bookkeeping.
#[derive(Debug)]
struct BatchJob {
    total: usize,
    completed: usize,
    succeeded: usize,
    failed: usize,
    cancelled: bool,
    resolved: HashSet<SegmentId>,
    /// `error` frames without a segment id seen on the open stream.
    stray_errors: usize,
}

impl BatchJob {
    fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            succeeded: 0,
            failed: 0,
            cancelled: false,
            resolved: HashSet::with_capacity(total),
            stray_errors: 0,
        }
    }

    /// Record a terminal result for `id`; false if it already had one.
    fn resolve(&mut self, id: SegmentId) -> bool {
        self.resolved.insert(id)
    }

    fn unresolved(&self, ids: &[SegmentId]) -> Vec<SegmentId> {
        ids.iter()
            .copied()
            .filter(|id| !self.resolved.contains(id))
            .collect()
    }

    fn progress(&self) -> BatchProgress {
        BatchProgress {
            total: self.total,
            completed: self.completed,
            succeeded: self.succeeded,
            failed: self.failed,
        }
    }

    fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.total,
            completed: self.completed,
            succeeded: self.succeeded,
            failed: self.failed,
            cancelled: self.cancelled,
        }
    }
}

/// Ends a run however it ends: drops its cancel token, then clears the
/// running flag.
struct RunGuard<'a> {
    running: &'a AtomicBool,
    cancel: &'a Mutex<Option<CancellationToken>>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        match self.cancel.lock() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        self.running.store(false, Ordering::Release);
    }
}

/// Drives batch runs against a [`BatchBackend`].
pub struct BatchOrchestrator<B> {
    backend: B,
    store: Arc<TranslationStore>,
    sub_batch_size: usize,
    sub_batch_timeout: Option<Duration>,
    force: bool,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl<B: BatchBackend> BatchOrchestrator<B> {
    pub fn new(backend: B, store: Arc<TranslationStore>) -> Self {
        Self {
            backend,
            store,
            sub_batch_size: SUB_BATCH_SIZE,
            sub_batch_timeout: None,
            force: false,
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    pub fn with_sub_batch_size(mut self, size: usize) -> Self {
        self.sub_batch_size = size.max(1);
        self
    }

    /// Give up on a sub-batch stream after `timeout`, failing it like a
    /// transport error. No timeout by default.
    pub fn with_sub_batch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.sub_batch_timeout = timeout;
        self
    }

    /// Retranslate segments that already have a translation.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn store(&self) -> &Arc<TranslationStore> {
        &self.store
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the current run to stop. Takes effect before the next sub-batch
    /// and at the next read boundary of the open stream. A run started by
    /// [`spawn_batch`](Self::spawn_batch) can be cancelled as soon as that
    /// call returns. Returns `false` when idle.
    pub fn cancel(&self) -> bool {
        let token = match self.cancel.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match token {
            Some(token) => {
                token.cancel();
                self.store.mark_cancelling();
                log::info!("batch translation cancel requested");
                true
            }
            None => false,
        }
    }

    /// Claim the orchestrator for a new run and publish its cancel token.
    /// `None` when a run is already active.
    fn begin(&self) -> Option<CancellationToken> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("batch translation already running; ignoring new request");
            return None;
        }
        let token = CancellationToken::new();
        match self.cancel.lock() {
            Ok(mut slot) => *slot = Some(token.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(token.clone()),
        }
        Some(token)
    }

    /// Translate the untranslated segments among `ids`.
    ///
    /// Already translated (unless forced) and unknown ids are dropped
    /// silently. Only one run may be active per orchestrator; a concurrent
    /// call is rejected.
    pub async fn run_batch(&self, ids: &[SegmentId]) -> BatchOutcome {
        match self.begin() {
            Some(cancel) => self.run(ids, cancel).await,
            None => BatchOutcome::Rejected,
        }
    }

    async fn run(&self, ids: &[SegmentId], cancel: CancellationToken) -> BatchOutcome {
        let _run = RunGuard {
            running: &self.running,
            cancel: &self.cancel,
        };

        let (document_id, pending) = self.store.read(|state| {
            (
                state.document_id().map(str::to_string),
                if self.force {
                    state.known(ids)
                } else {
                    state.untranslated(ids)
                },
            )
        });
        let Some(document_id) = document_id else {
            return BatchOutcome::Skipped;
        };
        if pending.is_empty() {
            log::debug!("batch translation: nothing to translate");
            return BatchOutcome::Skipped;
        }

        let sub_batches = partition(&pending, self.sub_batch_size);
        log::info!(
            "batch translation of {} segments in {} requests",
            pending.len(),
            sub_batches.len()
        );
        self.store.begin_batch(&pending);

        let mut job = BatchJob::new(pending.len());
        for (index, chunk) in sub_batches.iter().enumerate() {
            if cancel.is_cancelled() {
                job.cancelled = true;
                break;
            }
            log::debug!(
                "sub-batch {}/{}: {:?}",
                index + 1,
                sub_batches.len(),
                chunk
            );
            let request = BatchRequest {
                document_id: document_id.clone(),
                segment_ids: chunk.clone(),
                force: self.force,
            };
            let result = self.dispatch(&request, &cancel, &mut job).await;
            let stray_errors = std::mem::take(&mut job.stray_errors);

            let unresolved = job.unresolved(chunk);
            if cancel.is_cancelled() {
                // Abandoned mid-stream or failed because of the cancel;
                // neither counts as a failure.
                if let Err(err) = &result {
                    log::debug!("sub-batch {} ended by cancel: {err}", index + 1);
                }
                self.store.unmark_all(chunk);
                job.cancelled = true;
                break;
            }
            match result {
                Ok(()) => {
                    // Each id-less error fails one segment left without a
                    // result, in request order.
                    let (failed, released) =
                        unresolved.split_at(stray_errors.min(unresolved.len()));
                    if !released.is_empty() {
                        log::warn!(
                            "stream closed without a result for segments {:?}",
                            released
                        );
                    }
                    self.store.unmark_all(&unresolved);
                    if !failed.is_empty() {
                        for &id in failed {
                            job.resolve(id);
                        }
                        job.failed += failed.len();
                        job.completed += failed.len();
                        self.store.set_batch_progress(job.progress());
                    }
                }
                Err(err) => {
                    // A failed request fails its whole sub-batch, even ids
                    // that already reported a result on this stream.
                    log::warn!("sub-batch {} failed: {err}", index + 1);
                    for &id in &unresolved {
                        job.resolve(id);
                    }
                    job.failed += chunk.len();
                    job.completed += unresolved.len();
                    self.store.unmark_all(chunk);
                    self.store.set_batch_progress(job.progress());
                }
            }
        }

        let summary = job.summary();
        log::info!("{summary}");
        self.store
            .settle_batch(&pending, job.progress(), summary.to_string());
        BatchOutcome::Settled(summary)
    }

    /// Send one sub-batch and reconcile its frames as they arrive.
    async fn dispatch(
        &self,
        request: &BatchRequest,
        cancel: &CancellationToken,
        job: &mut BatchJob,
    ) -> Result<(), ClientError> {
        let chunk = request.segment_ids.as_slice();
        let mut on_frame = |frame: SseFrame| self.handle_frame(&frame, chunk, job);
        let stream = self.backend.stream_batch(request, cancel, &mut on_frame);
        match self.sub_batch_timeout {
            Some(limit) => tokio::time::timeout(limit, stream)
                .await
                .unwrap_or(Err(ClientError::Timeout(limit))),
            None => stream.await,
        }
    }

    fn handle_frame(&self, frame: &SseFrame, chunk: &[SegmentId], job: &mut BatchJob) {
        let event = match StreamEvent::decode(frame) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("skipping frame: {err}");
                return;
            }
        };

        match event {
            StreamEvent::Start { ids } => {
                log::debug!("server started segments {:?}", ids);
            }
            StreamEvent::Token { text } => {
                log::trace!("token: {text:?}");
            }
            StreamEvent::ParseComplete => {
                log::debug!("batch output parsed");
            }
            StreamEvent::SegmentComplete { id, translation } => {
                if !chunk.contains(&id) {
                    log::warn!("ignoring segment_complete for {id}, not part of this request");
                    return;
                }
                if !self.store.write_translation(id, translation) {
                    log::warn!("segment_complete for unknown segment {id}");
                    return;
                }
                if job.resolve(id) {
                    job.succeeded += 1;
                    job.completed += 1;
                    self.store.set_batch_progress(job.progress());
                } else {
                    log::debug!("segment_complete for {id} already settled");
                }
            }
            StreamEvent::Translation { .. } => {
                log::warn!("ignoring single-segment `translation` event in batch stream");
            }
            StreamEvent::FallbackStart { reason } => {
                log::info!("server fell back: {reason}");
            }
            StreamEvent::Done { ids, completed } => {
                log::debug!("server done: {} requested, {} completed", ids.len(), completed.len());
            }
            StreamEvent::Error { message, id } => {
                match id {
                    Some(id) if chunk.contains(&id) => {
                        log::warn!("segment {id} failed: {message}");
                        self.store.unmark_translating(id);
                        if job.resolve(id) {
                            job.failed += 1;
                            job.completed += 1;
                            self.store.set_batch_progress(job.progress());
                        }
                    }
                    Some(id) => {
                        log::warn!("ignoring error for {id}, not part of this request: {message}");
                    }
                    None => {
                        // Settled against the request once its stream ends
                        log::warn!("batch stream error: {message}");
                        job.stray_errors += 1;
                    }
                }
            }
        }
    }
}

impl<B: BatchBackend + 'static> BatchOrchestrator<B> {
    /// Run a batch on a background task.
    ///
    /// The run is claimed before the task starts, so [`cancel`](Self::cancel)
    /// reaches it immediately and a second spawn is rejected.
    pub fn spawn_batch(self: &Arc<Self>, ids: Vec<SegmentId>) -> JoinHandle<BatchOutcome> {
        let begun = self.begin();
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            match begun {
                Some(cancel) => orchestrator.run(&ids, cancel).await,
                None => BatchOutcome::Rejected,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Segment};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    fn ids(raw: &[u64]) -> Vec<SegmentId> {
        raw.iter().copied().map(SegmentId).collect()
    }

    fn store_with(n: u64) -> Arc<TranslationStore> {
        let store = Arc::new(TranslationStore::default());
        store.load_document(Document {
            id: "mn10".into(),
            title: None,
            segments: (1..=n).map(|i| Segment::new(i, format!("pāḷi {i}"))).collect(),
        });
        store
    }

    fn complete(id: u64) -> SseFrame {
        SseFrame::new(
            "segment_complete",
            json!({
                "segment_id": id.to_string(),
                "translation": {"sentences": [{"original": "", "translation": format!("t{id}")}]}
            }),
        )
    }

    fn failed(id: u64) -> SseFrame {
        SseFrame::new(
            "error",
            json!({"error": "model refused", "segment_id": id.to_string()}),
        )
    }

    /// One scripted response per request.
    enum Reply {
        Frames(Vec<SseFrame>),
        FramesThenFail(Vec<SseFrame>),
        /// Emit the frames, then fire the given token and yield so that
        /// whoever waits on it runs before the request returns.
        FramesThenSignal(Vec<SseFrame>, CancellationToken),
        /// Hold the stream open until the request's own token fires.
        Stall,
    }

    struct FakeBackend {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<BatchRequest>>,
        store: Arc<TranslationStore>,
        /// Segments seen in the translating set while each request was open.
        in_flight: Mutex<Vec<Vec<SegmentId>>>,
        open: AtomicUsize,
        peak_open: AtomicUsize,
    }

    impl FakeBackend {
        fn new(store: &Arc<TranslationStore>, replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
                store: Arc::clone(store),
                in_flight: Mutex::new(Vec::new()),
                open: AtomicUsize::new(0),
                peak_open: AtomicUsize::new(0),
            }
        }

        fn requests(&self) -> Vec<Vec<SegmentId>> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.segment_ids.clone())
                .collect()
        }
    }

    impl BatchBackend for FakeBackend {
        async fn stream_batch<'a>(
            &'a self,
            request: &'a BatchRequest,
            cancel: &'a CancellationToken,
            on_frame: &'a mut (dyn FnMut(SseFrame) + Send),
        ) -> Result<(), ClientError> {
            let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_open.fetch_max(open, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            self.in_flight
                .lock()
                .unwrap()
                .push(self.store.read(|s| s.translating().iter().copied().collect()));
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Reply::Frames(vec![]));
            let result = match reply {
                Reply::Frames(frames) => {
                    frames.into_iter().for_each(on_frame);
                    tokio::task::yield_now().await;
                    Ok(())
                }
                Reply::FramesThenFail(frames) => {
                    frames.into_iter().for_each(on_frame);
                    Err(ClientError::Status {
                        status: 502,
                        message: "HTTP 502".into(),
                    })
                }
                Reply::FramesThenSignal(frames, token) => {
                    frames.into_iter().for_each(on_frame);
                    token.cancel();
                    tokio::task::yield_now().await;
                    Ok(())
                }
                Reply::Stall => {
                    cancel.cancelled().await;
                    Ok(())
                }
            };
            self.open.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[test]
    fn partition_preserves_order_and_bounds() {
        for n in 0..=10u64 {
            let input: Vec<SegmentId> = (1..=n).map(SegmentId).collect();
            let parts = partition(&input, 3);
            assert_eq!(parts.len(), (n as usize).div_ceil(3));
            assert!(parts.iter().all(|p| !p.is_empty() && p.len() <= 3));
            assert_eq!(parts.concat(), input);
        }
    }

    #[test]
    fn summary_messages() {
        let base = BatchSummary {
            total: 5,
            completed: 5,
            succeeded: 4,
            failed: 1,
            cancelled: false,
        };
        assert_eq!(base.to_string(), "4 success, 1 failed");
        assert_eq!(
            BatchSummary { failed: 0, succeeded: 5, ..base }.to_string(),
            "5 segments translated"
        );
        assert_eq!(
            BatchSummary { cancelled: true, completed: 3, ..base }.to_string(),
            "Batch translation cancelled, 3 done"
        );
    }

    #[tokio::test]
    async fn end_to_end_partial_failure() {
        let store = store_with(5);
        for i in 1..=5 {
            store.select(SegmentId(i));
        }
        let backend = FakeBackend::new(
            &store,
            vec![
                Reply::Frames(vec![
                    SseFrame::new("start", json!({"segment_ids": [1, 2, 3]})),
                    complete(1),
                    complete(2),
                    failed(3),
                    SseFrame::new("done", json!({"segment_ids": [1, 2, 3], "completed": [1, 2]})),
                ]),
                Reply::Frames(vec![complete(4), complete(5)]),
            ],
        );
        let orchestrator = BatchOrchestrator::new(backend, Arc::clone(&store));

        let outcome = orchestrator.run_batch(&ids(&[1, 2, 3, 4, 5])).await;
        let BatchOutcome::Settled(summary) = outcome else {
            panic!("expected settled, got {outcome:?}");
        };
        assert_eq!(summary.to_string(), "4 success, 1 failed");
        assert_eq!(
            orchestrator.backend().requests(),
            vec![ids(&[1, 2, 3]), ids(&[4, 5])]
        );

        store.read(|s| {
            for id in [1, 2, 4, 5] {
                assert!(s.is_translated(SegmentId(id)), "segment {id}");
            }
            assert!(!s.is_translated(SegmentId(3)));
            assert!(s.translating().is_empty());
            assert!(s.selection().is_empty());
            assert_eq!(s.batch_phase(), crate::store::BatchPhase::Settled);
            assert_eq!(s.notice(), Some("4 success, 1 failed"));
            assert_eq!(
                s.batch_progress(),
                BatchProgress {
                    total: 5,
                    completed: 5,
                    succeeded: 4,
                    failed: 1
                }
            );
        });
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    async fn filters_translated_segments() {
        let store = store_with(6);
        store.write_translation(SegmentId(2), Default::default());
        store.write_translation(SegmentId(5), Default::default());
        let backend = FakeBackend::new(&store, vec![]);
        let orchestrator = BatchOrchestrator::new(backend, Arc::clone(&store));

        orchestrator.run_batch(&ids(&[1, 2, 3, 4, 5, 6])).await;
        assert_eq!(
            orchestrator.backend().requests(),
            vec![ids(&[1, 3, 4]), ids(&[6])]
        );
    }

    #[tokio::test]
    async fn nothing_to_translate_is_skipped() {
        let store = store_with(2);
        store.write_translation(SegmentId(1), Default::default());
        store.select(SegmentId(1));
        let revision = store.read(|s| s.revision());
        let backend = FakeBackend::new(&store, vec![]);
        let orchestrator = BatchOrchestrator::new(backend, Arc::clone(&store));

        assert_eq!(orchestrator.run_batch(&ids(&[1])).await, BatchOutcome::Skipped);
        assert_eq!(orchestrator.run_batch(&[]).await, BatchOutcome::Skipped);
        assert!(orchestrator.backend().requests().is_empty());
        store.read(|s| {
            assert_eq!(s.revision(), revision);
            assert_eq!(s.batch_phase(), crate::store::BatchPhase::Idle);
            assert!(s.is_selected(SegmentId(1)));
        });
    }

    #[tokio::test]
    async fn marks_all_translating_before_first_request() {
        let store = store_with(5);
        let backend = FakeBackend::new(&store, vec![]);
        let orchestrator = BatchOrchestrator::new(backend, Arc::clone(&store));

        orchestrator.run_batch(&ids(&[1, 2, 3, 4, 5])).await;
        let in_flight = orchestrator.backend().in_flight.lock().unwrap().clone();
        assert_eq!(in_flight[0], ids(&[1, 2, 3, 4, 5]));
        // Ids of a request that closed without results were released
        assert_eq!(in_flight[1], ids(&[4, 5]));
    }

    #[tokio::test]
    async fn completion_is_visible_immediately() {
        let store = store_with(3);
        let mut rx = store.subscribe();
        let backend = FakeBackend::new(&store, vec![Reply::Frames(vec![complete(2)])]);
        let orchestrator = BatchOrchestrator::new(backend, Arc::clone(&store));

        // Watch every intermediate state for the translated/translating pair
        let watcher = tokio::spawn(async move {
            let mut bad = 0;
            while rx.changed().await.is_ok() {
                let s = rx.borrow_and_update();
                if s.is_translated(SegmentId(2)) && s.is_translating(SegmentId(2)) {
                    bad += 1;
                }
            }
            bad
        });

        orchestrator.run_batch(&ids(&[2])).await;
        store.read(|s| {
            assert!(s.is_translated(SegmentId(2)));
            assert!(!s.is_translating(SegmentId(2)));
        });
        drop(orchestrator);
        drop(store);
        assert_eq!(watcher.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancel_between_sub_batches() {
        let store = store_with(6);
        for i in 1..=6 {
            store.select(SegmentId(i));
        }
        let first_done = CancellationToken::new();
        let backend = FakeBackend::new(
            &store,
            vec![Reply::FramesThenSignal(
                vec![complete(1), complete(2), complete(3)],
                first_done.clone(),
            )],
        );
        let orchestrator = Arc::new(BatchOrchestrator::new(backend, Arc::clone(&store)));

        // Cancel once the first request has delivered all its frames
        let canceller = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                first_done.cancelled().await;
                orchestrator.cancel();
            })
        };
        let handle = orchestrator.spawn_batch(ids(&[1, 2, 3, 4, 5, 6]));
        canceller.await.unwrap();
        let outcome = handle.await.unwrap();

        let BatchOutcome::Settled(summary) = outcome else {
            panic!("expected settled, got {outcome:?}");
        };
        assert!(summary.cancelled);
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.to_string(), "Batch translation cancelled, 3 done");
        assert_eq!(orchestrator.backend().requests(), vec![ids(&[1, 2, 3])]);
        store.read(|s| {
            assert!(s.translating().is_empty());
            assert!(s.selection().is_empty());
            assert!(!s.is_translated(SegmentId(4)));
        });
    }

    #[tokio::test]
    async fn cancel_while_stream_open_releases_ids() {
        let store = store_with(4);
        let backend = FakeBackend::new(&store, vec![Reply::Stall]);
        let orchestrator = Arc::new(BatchOrchestrator::new(backend, Arc::clone(&store)));
        let mut rx = store.subscribe();

        let handle = orchestrator.spawn_batch(ids(&[1, 2, 3, 4]));
        rx.wait_for(|s| s.batch_phase().is_busy()).await.unwrap();
        assert!(orchestrator.cancel());
        assert_eq!(
            store.read(|s| s.batch_phase()),
            crate::store::BatchPhase::Cancelling
        );

        let BatchOutcome::Settled(summary) = handle.await.unwrap() else {
            panic!("expected settled");
        };
        assert!(summary.cancelled);
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(orchestrator.backend().requests(), vec![ids(&[1, 2, 3])]);
        store.read(|s| {
            assert!(s.translating().is_empty());
            assert_eq!(s.batch_phase(), crate::store::BatchPhase::Settled);
        });
        assert!(!orchestrator.cancel());
    }

    #[tokio::test]
    async fn transport_failure_fails_whole_sub_batch() {
        let store = store_with(5);
        let backend = FakeBackend::new(
            &store,
            vec![
                Reply::FramesThenFail(vec![complete(1)]),
                Reply::Frames(vec![complete(4), complete(5)]),
            ],
        );
        let orchestrator = BatchOrchestrator::new(backend, Arc::clone(&store));

        let BatchOutcome::Settled(summary) = orchestrator.run_batch(&ids(&[1, 2, 3, 4, 5])).await
        else {
            panic!("expected settled");
        };
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.completed, 5);
        assert_eq!(summary.to_string(), "3 success, 3 failed");
        // The result that did arrive is kept
        assert!(store.read(|s| s.is_translated(SegmentId(1))));
        // The failure did not stop the next sub-batch
        assert_eq!(orchestrator.backend().requests().len(), 2);
        assert!(store.read(|s| s.translating().is_empty()));
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_are_skipped() {
        let store = store_with(2);
        let backend = FakeBackend::new(
            &store,
            vec![Reply::Frames(vec![
                SseFrame::new("segment_complete", json!("{broken")),
                SseFrame::new("message", json!({"hello": "world"})),
                SseFrame::new("heartbeat", json!({})),
                complete(1),
                complete(2),
            ])],
        );
        let orchestrator = BatchOrchestrator::new(backend, Arc::clone(&store));

        let BatchOutcome::Settled(summary) = orchestrator.run_batch(&ids(&[1, 2])).await else {
            panic!("expected settled");
        };
        assert_eq!(summary.to_string(), "2 segments translated");
    }

    #[tokio::test]
    async fn duplicate_results_are_counted_once() {
        let store = store_with(2);
        let backend = FakeBackend::new(
            &store,
            vec![Reply::Frames(vec![complete(1), complete(1), failed(1), complete(2)])],
        );
        let orchestrator = BatchOrchestrator::new(backend, Arc::clone(&store));

        let BatchOutcome::Settled(summary) = orchestrator.run_batch(&ids(&[1, 2])).await else {
            panic!("expected settled");
        };
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.completed, 2);
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected() {
        let store = store_with(4);
        let backend = FakeBackend::new(&store, vec![Reply::Stall]);
        let orchestrator = Arc::new(BatchOrchestrator::new(backend, Arc::clone(&store)));
        let mut rx = store.subscribe();

        let first = orchestrator.spawn_batch(ids(&[1, 2]));
        rx.wait_for(|s| s.batch_phase().is_busy()).await.unwrap();
        assert!(orchestrator.is_running());

        let revision = store.read(|s| s.revision());
        assert_eq!(
            orchestrator.run_batch(&ids(&[3, 4])).await,
            BatchOutcome::Rejected
        );
        assert_eq!(store.read(|s| s.revision()), revision);
        assert!(!store.read(|s| s.is_translating(SegmentId(3))));

        orchestrator.cancel();
        assert!(matches!(first.await.unwrap(), BatchOutcome::Settled(_)));
        assert!(!orchestrator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn sub_batch_timeout_fails_the_request() {
        let store = store_with(4);
        let backend = FakeBackend::new(
            &store,
            vec![Reply::Stall, Reply::Frames(vec![complete(4)])],
        );
        let orchestrator = BatchOrchestrator::new(backend, Arc::clone(&store))
            .with_sub_batch_timeout(Some(Duration::from_secs(30)));

        let BatchOutcome::Settled(summary) = orchestrator.run_batch(&ids(&[1, 2, 3, 4])).await
        else {
            panic!("expected settled");
        };
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.succeeded, 1);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn custom_sub_batch_size() {
        let store = store_with(5);
        let backend = FakeBackend::new(&store, vec![]);
        let orchestrator =
            BatchOrchestrator::new(backend, Arc::clone(&store)).with_sub_batch_size(2);
        orchestrator.run_batch(&ids(&[1, 2, 3, 4, 5])).await;
        assert_eq!(
            orchestrator.backend().requests(),
            vec![ids(&[1, 2]), ids(&[3, 4]), ids(&[5])]
        );
    }

    #[tokio::test]
    async fn force_resends_translated_segments() {
        let store = store_with(3);
        store.write_translation(SegmentId(2), Default::default());
        let backend = FakeBackend::new(&store, vec![]);
        let orchestrator = BatchOrchestrator::new(backend, Arc::clone(&store)).with_force(true);

        orchestrator.run_batch(&ids(&[2, 3, 2, 9])).await;
        let requests = orchestrator.backend().requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].segment_ids, ids(&[2, 3]));
        assert!(requests[0].force);
    }

    #[tokio::test]
    async fn cancel_right_after_spawn_is_not_lost() {
        let store = store_with(6);
        let backend = FakeBackend::new(&store, vec![]);
        let orchestrator = Arc::new(BatchOrchestrator::new(backend, Arc::clone(&store)));

        let handle = orchestrator.spawn_batch(ids(&[1, 2, 3, 4, 5, 6]));
        assert!(orchestrator.cancel());

        let BatchOutcome::Settled(summary) = handle.await.unwrap() else {
            panic!("expected settled");
        };
        assert!(summary.cancelled);
        assert_eq!(summary.completed, 0);
        assert!(orchestrator.backend().requests().is_empty());
        store.read(|s| {
            assert!(s.translating().is_empty());
            assert_eq!(s.notice(), Some("Batch translation cancelled, 0 done"));
        });
        assert!(!orchestrator.is_running());
        assert!(!orchestrator.cancel());
    }

    #[tokio::test]
    async fn spawn_while_running_is_rejected() {
        let store = store_with(4);
        let backend = FakeBackend::new(&store, vec![Reply::Stall]);
        let orchestrator = Arc::new(BatchOrchestrator::new(backend, Arc::clone(&store)));

        let mut rx = store.subscribe();

        let first = orchestrator.spawn_batch(ids(&[1, 2]));
        let second = orchestrator.spawn_batch(ids(&[3, 4]));
        assert_eq!(second.await.unwrap(), BatchOutcome::Rejected);
        rx.wait_for(|s| s.batch_phase().is_busy()).await.unwrap();

        orchestrator.cancel();
        assert!(matches!(first.await.unwrap(), BatchOutcome::Settled(_)));
        assert_eq!(orchestrator.backend().requests().len(), 1);
    }

    #[tokio::test]
    async fn error_without_id_fails_a_segment_left_without_result() {
        let store = store_with(6);
        let overloaded = || SseFrame::new("error", json!({"error": "overloaded"}));
        let backend = FakeBackend::new(
            &store,
            vec![
                // Every segment still arrives after the error
                Reply::Frames(vec![overloaded(), complete(1), complete(2), complete(3)]),
                Reply::Frames(vec![complete(4), overloaded()]),
            ],
        );
        let orchestrator = BatchOrchestrator::new(backend, Arc::clone(&store));

        let BatchOutcome::Settled(summary) =
            orchestrator.run_batch(&ids(&[1, 2, 3, 4, 5, 6])).await
        else {
            panic!("expected settled");
        };
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 5);
        assert!(summary.completed <= summary.total);
        assert_eq!(summary.to_string(), "4 success, 1 failed");
        store.read(|s| {
            assert!(!s.is_translated(SegmentId(5)));
            assert!(s.translating().is_empty());
        });
    }

    #[tokio::test]
    async fn results_outside_the_request_are_ignored() {
        let store = store_with(6);
        let backend = FakeBackend::new(
            &store,
            vec![
                Reply::Frames(vec![complete(1), complete(2), complete(3), complete(4), failed(5)]),
                Reply::Frames(vec![complete(4), complete(5), complete(6)]),
            ],
        );
        let orchestrator = BatchOrchestrator::new(backend, Arc::clone(&store));

        let BatchOutcome::Settled(summary) =
            orchestrator.run_batch(&ids(&[1, 2, 3, 4, 5, 6])).await
        else {
            panic!("expected settled");
        };
        assert_eq!(summary.to_string(), "6 segments translated");
        assert_eq!(summary.completed, 6);
        assert_eq!(
            orchestrator.backend().requests(),
            vec![ids(&[1, 2, 3]), ids(&[4, 5, 6])]
        );
        // 4 and 5 stayed in flight until their own request reported them
        let in_flight = orchestrator.backend().in_flight.lock().unwrap().clone();
        assert_eq!(in_flight[1], ids(&[4, 5, 6]));
    }

    #[tokio::test]
    async fn one_request_open_at_a_time() {
        let store = store_with(10);
        let backend = FakeBackend::new(
            &store,
            vec![
                Reply::Frames(vec![complete(1), complete(2), complete(3)]),
                Reply::FramesThenFail(vec![complete(4)]),
                Reply::Frames(vec![complete(7), failed(8), complete(9)]),
                Reply::Frames(vec![complete(10)]),
            ],
        );
        let orchestrator = Arc::new(BatchOrchestrator::new(backend, Arc::clone(&store)));

        let outcome = orchestrator
            .spawn_batch((1..=10).map(SegmentId).collect())
            .await
            .unwrap();
        assert!(matches!(outcome, BatchOutcome::Settled(_)));
        let backend = orchestrator.backend();
        assert_eq!(backend.requests().len(), 4);
        assert_eq!(backend.peak_open.load(Ordering::SeqCst), 1);
        assert_eq!(backend.open.load(Ordering::SeqCst), 0);
        // Every id went out in exactly one request
        let mut sent = backend.requests().concat();
        sent.sort();
        sent.dedup();
        assert_eq!(sent.len(), 10);
    }
}
