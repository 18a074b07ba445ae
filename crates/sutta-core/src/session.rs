//! Wiring of one application session: a store shared by the controllers.

use std::path::Path;
use std::sync::Arc;

use crate::api::{SegmentRequest, SyncTranslation, TranslateApi};
use crate::batch::BatchOrchestrator;
use crate::client::{ClientError, SseClient};
use crate::document::{Document, SegmentId};
use crate::store::TranslationStore;
use crate::translate::SegmentTranslator;
use crate::{Config, CoreError};

/// Everything a front end needs, built once per run.
///
/// The store is created here and handed by `Arc` to both controllers and to
/// whoever renders it.
pub struct Session {
    pub config: Config,
    pub store: Arc<TranslationStore>,
    pub batch: Arc<BatchOrchestrator<TranslateApi>>,
    pub translator: Arc<SegmentTranslator<TranslateApi>>,
    api: TranslateApi,
}

impl Session {
    pub fn new(config: Config) -> Result<Self, CoreError> {
        let api = TranslateApi::new(SseClient::new(&config)?);
        let store = Arc::new(TranslationStore::new(config.max_selection));
        let batch = BatchOrchestrator::new(api.clone(), Arc::clone(&store))
            .with_sub_batch_size(config.sub_batch_size)
            .with_sub_batch_timeout(config.sub_batch_timeout())
            .with_force(config.force);
        let translator = SegmentTranslator::new(api.clone(), Arc::clone(&store));
        Ok(Self {
            config,
            store,
            batch: Arc::new(batch),
            translator: Arc::new(translator),
            api,
        })
    }

    /// Build a session and load the document at `path` into its store.
    pub fn open(config: Config, path: &Path) -> Result<Self, CoreError> {
        let session = Self::new(config)?;
        session.load(Document::from_path(path)?);
        Ok(session)
    }

    /// Switch documents; drops selection and in-flight marks.
    pub fn load(&self, document: Document) {
        log::info!(
            "loaded {} ({} segments)",
            document.display_name(),
            document.segments.len()
        );
        self.store.load_document(document);
    }

    /// Translate one segment through the non-streaming endpoint and write
    /// the result into the store.
    pub async fn translate_sync(&self, id: SegmentId) -> Result<SyncTranslation, ClientError> {
        let document_id = self
            .store
            .read(|s| s.document_id().map(str::to_string))
            .unwrap_or_default();
        let request = SegmentRequest {
            document_id,
            segment_id: id,
        };
        let response = self.api.translate_sync(&request).await?;
        if let Some(translation) = &response.translation {
            self.store.write_translation(response.segment_id, translation.clone());
        }
        Ok(response)
    }

    /// Write the store's current document to `path`.
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(document) = self.store.read(|s| s.to_document()) {
            document.save(path)?;
        }
        Ok(())
    }
}
