//! BridgeProjectionService - the surface an accepted peer can reach
//!
//! Storage work runs on blocking threads. Deletes are tied to the request
//! future: if the connection goes away mid-batch, a DropGuard cancels the
//! token and the remaining identities are reported as failed.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::protocol::{BridgeRequest, BridgeResponse, BridgeResult};
use crate::interface::{DeleteFailure, DeleteOutcome, ErrorCode, HealthStatus, ItemSummary, PayloadProjection, VaultError};
use crate::runtime::runtime_handle;
use crate::store::{DropGuard, VaultCore};

/// Upper bound for `listRecent`, regardless of configuration
pub const MAX_LIST_LIMIT: usize = 50;

#[derive(Clone)]
pub struct BridgeProjectionService {
    core: Arc<VaultCore>,
}

impl BridgeProjectionService {
    pub fn new(core: Arc<VaultCore>) -> Self {
        Self { core }
    }

    /// Liveness only; touches no data
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            ok: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub async fn list_recent(&self, limit: i64) -> Result<Vec<ItemSummary>, VaultError> {
        if limit <= 0 {
            return Err(VaultError::InvalidArgument(format!("limit must be positive, got {}", limit)));
        }
        let ceiling = MAX_LIST_LIMIT.min(self.core.config().list_limit_max as usize);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX).min(ceiling);
        self.blocking(move |core| core.recent_summaries(limit)).await
    }

    pub async fn fetch_payload(&self, identity: String) -> Result<PayloadProjection, VaultError> {
        self.blocking(move |core| core.project_payload(&identity)).await
    }

    /// Delete each identity independently. Never fails as a whole.
    pub async fn delete(&self, identities: Vec<String>) -> DeleteOutcome {
        let token = CancellationToken::new();
        let _guard = DropGuard::new(token.clone());

        let requested = identities.clone();
        let worker_token = token.clone();
        let result = self
            .blocking(move |core| Ok(core.delete_batch(&identities, &worker_token)))
            .await;

        match result {
            Ok(outcome) => {
                info!(deleted = outcome.deleted.len(), failed = outcome.failed.len(), "Bridge delete finished");
                outcome
            }
            // The worker died before reporting; nothing is known about any identity
            Err(e) => DeleteOutcome {
                deleted: Vec::new(),
                failed: requested
                    .into_iter()
                    .map(|identity| DeleteFailure {
                        identity,
                        code: ErrorCode::IoFailure,
                        message: e.message().to_string(),
                    })
                    .collect(),
            },
        }
    }

    pub async fn copy_to_system_clipboard(&self, identity: String) -> Result<(), VaultError> {
        self.blocking(move |core| core.copy_to_system_clipboard(&identity)).await
    }

    /// Service one decoded request
    pub async fn handle(&self, request: BridgeRequest) -> BridgeResponse {
        debug!(op = request.name(), "Bridge request");
        let result = match request {
            BridgeRequest::Health => Ok(BridgeResult::Health(self.health())),
            BridgeRequest::ListRecent { limit } => self
                .list_recent(limit)
                .await
                .map(|items| BridgeResult::Summaries { items }),
            BridgeRequest::FetchPayload { identity } => {
                self.fetch_payload(identity).await.map(BridgeResult::Payload)
            }
            BridgeRequest::Delete { identities } => Ok(BridgeResult::Deleted(self.delete(identities).await)),
            BridgeRequest::CopyToSystemClipboard { identity } => self
                .copy_to_system_clipboard(identity.clone())
                .await
                .map(|()| BridgeResult::Copied { identity }),
        };
        result.into()
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, VaultError>
    where
        T: Send + 'static,
        F: FnOnce(&VaultCore) -> Result<T, VaultError> + Send + 'static,
    {
        let core = Arc::clone(&self.core);
        runtime_handle()
            .spawn_blocking(move || work(&core))
            .await
            .map_err(|e| VaultError::IoFailure(format!("worker task failed: {}", e)))?
    }
}
