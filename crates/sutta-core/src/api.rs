//! Translation endpoints and the backend traits the controllers run against.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, SseClient};
use crate::document::{SegmentId, Translation};
use crate::sse::SseFrame;

pub const TRANSLATE_PATH: &str = "/translate";
pub const BATCH_PATH: &str = "/translate/batch";
pub const SYNC_PATH: &str = "/translate/sync";

/// Body of a single-segment request (`/translate` and `/translate/sync`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRequest {
    pub document_id: String,
    pub segment_id: SegmentId,
}

/// Body of a batch request: one sub-batch of segment ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub document_id: String,
    pub segment_ids: Vec<SegmentId>,
    pub force: bool,
}

/// Response of the non-streaming endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTranslation {
    pub segment_id: SegmentId,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub translation: Option<Translation>,
}

/// Something that can stream a batch translation request.
pub trait BatchBackend: Send + Sync {
    fn stream_batch<'a>(
        &'a self,
        request: &'a BatchRequest,
        cancel: &'a CancellationToken,
        on_frame: &'a mut (dyn FnMut(SseFrame) + Send),
    ) -> impl Future<Output = Result<(), ClientError>> + Send + 'a;
}

/// Something that can stream a single-segment translation request.
pub trait SegmentBackend: Send + Sync {
    fn stream_segment<'a>(
        &'a self,
        request: &'a SegmentRequest,
        cancel: &'a CancellationToken,
        on_frame: &'a mut (dyn FnMut(SseFrame) + Send),
    ) -> impl Future<Output = Result<(), ClientError>> + Send + 'a;
}

/// The remote translation service.
#[derive(Debug, Clone)]
pub struct TranslateApi {
    client: SseClient,
}

impl TranslateApi {
    pub fn new(client: SseClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &SseClient {
        &self.client
    }

    /// Translate one segment without streaming.
    pub async fn translate_sync(
        &self,
        request: &SegmentRequest,
    ) -> Result<SyncTranslation, ClientError> {
        self.client.post_json(SYNC_PATH, request).await
    }
}

impl BatchBackend for TranslateApi {
    async fn stream_batch<'a>(
        &'a self,
        request: &'a BatchRequest,
        cancel: &'a CancellationToken,
        on_frame: &'a mut (dyn FnMut(SseFrame) + Send),
    ) -> Result<(), ClientError> {
        self.client.stream(BATCH_PATH, request, cancel, on_frame).await
    }
}

impl SegmentBackend for TranslateApi {
    async fn stream_segment<'a>(
        &'a self,
        request: &'a SegmentRequest,
        cancel: &'a CancellationToken,
        on_frame: &'a mut (dyn FnMut(SseFrame) + Send),
    ) -> Result<(), ClientError> {
        self.client.stream(TRANSLATE_PATH, request, cancel, on_frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn batch_request_wire_shape() {
        let req = BatchRequest {
            document_id: "sn56.11".into(),
            segment_ids: vec![SegmentId(4), SegmentId(5)],
            force: false,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"documentId": "sn56.11", "segmentIds": [4, 5], "force": false})
        );
    }

    #[test]
    fn segment_request_wire_shape() {
        let req = SegmentRequest {
            document_id: "dn16".into(),
            segment_id: SegmentId(12),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"documentId": "dn16", "segmentId": 12})
        );
    }

    #[test]
    fn sync_response_decodes() {
        let resp: SyncTranslation = serde_json::from_value(json!({
            "segmentId": 3,
            "status": "completed",
            "translation": {"sentences": [{"original": "Namo", "translation": "Homage"}]}
        }))
        .unwrap();
        assert_eq!(resp.segment_id, SegmentId(3));
        assert_eq!(resp.translation.unwrap().plain_text(), "Homage");
    }
}
