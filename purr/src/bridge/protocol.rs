//! Bridge wire protocol
//!
//! Each frame is a u32 big-endian length prefix followed by one JSON document.
//!
//! ```text
//! -> {"op":"listRecent","limit":10}
//! <- {"status":"ok","result":{"kind":"summaries","items":[...]}}
//! <- {"status":"error","code":"notFound","message":"..."}
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

use crate::interface::{DeleteOutcome, ErrorCode, HealthStatus, ItemSummary, PayloadProjection, VaultError};

/// Largest frame either side will accept
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum BridgeRequest {
    Health,
    ListRecent { limit: i64 },
    FetchPayload { identity: String },
    Delete { identities: Vec<String> },
    CopyToSystemClipboard { identity: String },
}

impl BridgeRequest {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeRequest::Health => "health",
            BridgeRequest::ListRecent { .. } => "listRecent",
            BridgeRequest::FetchPayload { .. } => "fetchPayload",
            BridgeRequest::Delete { .. } => "delete",
            BridgeRequest::CopyToSystemClipboard { .. } => "copyToSystemClipboard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BridgeResult {
    Health(HealthStatus),
    Summaries { items: Vec<ItemSummary> },
    Payload(PayloadProjection),
    Deleted(DeleteOutcome),
    Copied { identity: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum BridgeResponse {
    Ok { result: BridgeResult },
    Error { code: ErrorCode, message: String },
}

impl BridgeResponse {
    pub fn ok(result: BridgeResult) -> Self {
        BridgeResponse::Ok { result }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, BridgeResponse::Ok { .. })
    }
}

impl From<VaultError> for BridgeResponse {
    fn from(e: VaultError) -> Self {
        BridgeResponse::Error {
            code: e.code(),
            message: e.message().to_string(),
        }
    }
}

impl From<Result<BridgeResult, VaultError>> for BridgeResponse {
    fn from(result: Result<BridgeResult, VaultError>) -> Self {
        match result {
            Ok(result) => BridgeResponse::ok(result),
            Err(e) => e.into(),
        }
    }
}

pub fn decode_request(frame: &[u8]) -> Result<BridgeRequest, VaultError> {
    serde_json::from_slice(frame).map_err(|e| VaultError::InvalidArgument(format!("malformed request: {}", e)))
}

pub fn encode_response(response: &BridgeResponse) -> Result<Bytes, VaultError> {
    serde_json::to_vec(response)
        .map(Bytes::from)
        .map_err(|e| VaultError::IoFailure(format!("cannot encode response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::SemanticType;
    use serde_json::json;

    #[test]
    fn test_request_shapes() {
        assert_eq!(decode_request(br#"{"op":"health"}"#).unwrap(), BridgeRequest::Health);
        assert_eq!(
            decode_request(br#"{"op":"listRecent","limit":5}"#).unwrap(),
            BridgeRequest::ListRecent { limit: 5 }
        );
        assert_eq!(
            decode_request(br#"{"op":"copyToSystemClipboard","identity":"ab"}"#).unwrap(),
            BridgeRequest::CopyToSystemClipboard { identity: "ab".into() }
        );
    }

    #[test]
    fn test_malformed_request_is_invalid_argument() {
        for frame in [&b"not json"[..], br#"{"op":"explode"}"#, br#"{"op":"listRecent"}"#] {
            let err = decode_request(frame).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidArgument);
        }
    }

    #[test]
    fn test_error_response_shape() {
        let response = BridgeResponse::from(VaultError::NotFound("no such item".into()));
        let value: serde_json::Value = serde_json::from_slice(&encode_response(&response).unwrap()).unwrap();
        assert_eq!(value, json!({"status": "error", "code": "notFound", "message": "no such item"}));
    }

    #[test]
    fn test_payload_response_shape() {
        let mut projection = PayloadProjection::empty(&"a".repeat(64), SemanticType::Url);
        projection.url_string = Some("https://example.com".into());
        let response = BridgeResponse::ok(BridgeResult::Payload(projection));
        let value: serde_json::Value = serde_json::from_slice(&encode_response(&response).unwrap()).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["result"]["kind"], "payload");
        assert_eq!(value["result"]["semanticType"], "url");
        assert_eq!(value["result"]["urlString"], "https://example.com");
        assert!(value["result"].get("text").is_none());
    }
}
