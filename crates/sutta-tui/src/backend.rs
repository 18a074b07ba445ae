use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sutta_core::{SegmentId, Session};

use crate::tui_event::BackendEvent;

/// Runs translation work off the UI loop and reports back over a channel.
///
/// Store changes reach the UI through the store subscription; the channel
/// only carries completion and error signals.
pub struct Backend {
    session: Arc<Session>,
    tx: mpsc::UnboundedSender<BackendEvent>,
    /// Token of the single-segment translation in flight.
    single: Mutex<Option<CancellationToken>>,
}

impl Backend {
    pub fn new(session: Arc<Session>, tx: mpsc::UnboundedSender<BackendEvent>) -> Self {
        Self {
            session,
            tx,
            single: Mutex::new(None),
        }
    }

    pub fn run_batch(&self, ids: Vec<SegmentId>) {
        let handle = self.session.batch.spawn_batch(ids);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            match handle.await {
                Ok(outcome) => {
                    let _ = tx.send(BackendEvent::BatchFinished(outcome));
                }
                Err(err) => log::error!("batch task failed: {err}"),
            }
        });
    }

    pub fn translate_single(&self, id: SegmentId) {
        let cancel = CancellationToken::new();
        self.set_single(Some(cancel.clone()));

        let translator = Arc::clone(&self.session.translator);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let events = tx.clone();
            let outcome = translator
                .translate(id, &cancel, move |event| {
                    let _ = events.send(BackendEvent::Segment { id, event });
                })
                .await;
            let _ = tx.send(BackendEvent::SegmentFinished { id, outcome });
        });
    }

    /// Cancel the running batch and any single-segment translation.
    pub fn cancel(&self) {
        self.session.batch.cancel();
        if let Some(token) = self.take_single() {
            token.cancel();
        }
    }

    fn set_single(&self, token: Option<CancellationToken>) {
        let previous = match self.single.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, token),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), token),
        };
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn take_single(&self) -> Option<CancellationToken> {
        match self.single.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}
