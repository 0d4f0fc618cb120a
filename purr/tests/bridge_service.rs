//! Bridge projection service, trust gate and socket transport.

use std::sync::Arc;

use futures::future::join_all;
use futures::{SinkExt, StreamExt};
use purr_vault::bridge::protocol::{frame_codec, BridgeRequest, BridgeResponse, BridgeResult};
use purr_vault::bridge::{
    BridgeProjectionService, BridgeTrustGate, CodeIdentity, PeerCredentials, StaticPeerVerifier, TrustDecision,
};
use purr_vault::crypto::InMemorySecretStore;
use purr_vault::system_clipboard::MemoryClipboard;
use purr_vault::{ErrorCode, SemanticType, SourceFormat, VaultBuilder, VaultConfig, VaultCore, VaultError};
use tempfile::TempDir;

const COMPANION: &str = "dev.purr.vault.companion";

fn vault(dir: &TempDir) -> Arc<VaultCore> {
    Arc::new(
        VaultBuilder::new(VaultConfig::with_root(dir.path()))
            .secret_store(Arc::new(InMemorySecretStore::new()))
            .system_clipboard(Arc::new(MemoryClipboard::new()))
            .build()
            .unwrap(),
    )
}

fn fill(vault: &VaultCore, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            vault
                .capture(SourceFormat::PlainText, format!("clip number {}", i).as_bytes(), None, false)
                .unwrap()
                .identity()
                .to_string()
        })
        .collect()
}

fn companion(team: Option<&str>) -> CodeIdentity {
    CodeIdentity {
        bundle_id: COMPANION.to_string(),
        team_id: team.map(str::to_string),
        signature_valid: true,
    }
}

// ============================================================
// Projection service
// ============================================================

#[tokio::test]
async fn list_recent_rejects_non_positive_limits() {
    let dir = TempDir::new().unwrap();
    let service = BridgeProjectionService::new(vault(&dir));
    for limit in [0, -1, i64::MIN] {
        let err = service.list_recent(limit).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}

#[tokio::test]
async fn list_recent_returns_min_of_limit_cap_and_stored() {
    let dir = TempDir::new().unwrap();
    let core = vault(&dir);
    let identities = fill(&core, 60);
    let service = BridgeProjectionService::new(core);

    assert_eq!(service.list_recent(3).await.unwrap().len(), 3);
    assert_eq!(service.list_recent(100).await.unwrap().len(), 50);
    assert_eq!(service.list_recent(i64::MAX).await.unwrap().len(), 50);

    let newest = service.list_recent(1).await.unwrap();
    assert_eq!(newest[0].identity, identities[59]);
}

#[tokio::test]
async fn list_recent_with_few_items_returns_all() {
    let dir = TempDir::new().unwrap();
    let core = vault(&dir);
    fill(&core, 2);
    let service = BridgeProjectionService::new(core);
    let items = service.list_recent(10).await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.semantic_type == SemanticType::Text));
    assert!(items[0].timestamp_unix >= items[1].timestamp_unix);
}

#[tokio::test]
async fn fetch_payload_validates_identity() {
    let dir = TempDir::new().unwrap();
    let service = BridgeProjectionService::new(vault(&dir));

    let uppercase = "A".repeat(64);
    let too_short = "a".repeat(63);
    for malformed in ["", "xyz", uppercase.as_str(), too_short.as_str()] {
        let err = service.fetch_payload(malformed.to_string()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument, "identity {:?}", malformed);
    }
    let err = service.fetch_payload("0".repeat(64)).await.unwrap_err();
    assert!(matches!(err, VaultError::NotFound(_)));
}

#[tokio::test]
async fn delete_unknown_identity_fails_only_itself() {
    let dir = TempDir::new().unwrap();
    let core = vault(&dir);
    let identities = fill(&core, 2);
    let service = BridgeProjectionService::new(Arc::clone(&core));

    let unknown = "e".repeat(64);
    let outcome = service
        .delete(vec![identities[0].clone(), unknown.clone(), identities[1].clone()])
        .await;
    assert_eq!(outcome.deleted, identities);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].identity, unknown);
    assert_eq!(outcome.failed[0].code, ErrorCode::NotFound);
    assert_eq!(core.count_items().unwrap(), 0);
}

#[tokio::test]
async fn handle_maps_requests_to_responses() {
    let dir = TempDir::new().unwrap();
    let core = vault(&dir);
    let identity = core
        .capture(SourceFormat::PlainText, b"https://example.com/docs", None, false)
        .unwrap()
        .identity()
        .to_string();
    let service = BridgeProjectionService::new(core);

    match service.handle(BridgeRequest::Health).await {
        BridgeResponse::Ok { result: BridgeResult::Health(status) } => assert!(status.ok),
        other => panic!("unexpected {:?}", other),
    }

    match service.handle(BridgeRequest::FetchPayload { identity: identity.clone() }).await {
        BridgeResponse::Ok { result: BridgeResult::Payload(projection) } => {
            assert_eq!(projection.url_string.as_deref(), Some("https://example.com/docs"));
            assert!(projection.text.is_none());
        }
        other => panic!("unexpected {:?}", other),
    }

    match service.handle(BridgeRequest::CopyToSystemClipboard { identity: identity.clone() }).await {
        BridgeResponse::Ok { result: BridgeResult::Copied { identity: copied } } => assert_eq!(copied, identity),
        other => panic!("unexpected {:?}", other),
    }

    match service.handle(BridgeRequest::ListRecent { limit: 0 }).await {
        BridgeResponse::Error { code, .. } => assert_eq!(code, ErrorCode::InvalidArgument),
        other => panic!("unexpected {:?}", other),
    }
}

// ============================================================
// Trust gate
// ============================================================

#[tokio::test]
async fn mismatched_identity_rejected_under_concurrency() {
    let verifier = (0..50).fold(StaticPeerVerifier::new(Some("TEAM1")), |verifier, pid| {
        let identity = match pid % 3 {
            0 => CodeIdentity { bundle_id: "com.attacker.app".into(), ..companion(Some("TEAM1")) },
            1 => companion(Some("OTHERTEAM")),
            _ => CodeIdentity { signature_valid: false, ..companion(Some("TEAM1")) },
        };
        verifier.allow(pid, identity)
    });
    let gate = Arc::new(BridgeTrustGate::new(Arc::new(verifier), COMPANION));

    let decisions = join_all((0..50).map(|pid| {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.admit(&PeerCredentials { pid: Some(pid), uid: None }).await })
    }))
    .await;

    assert_eq!(decisions.len(), 50);
    for decision in decisions {
        assert!(matches!(decision.unwrap(), TrustDecision::Rejected(_)));
    }
}

// ============================================================
// Socket transport
// ============================================================

#[cfg(unix)]
mod socket {
    use super::*;
    use tokio::net::UnixStream;
    use tokio_util::codec::Framed;

    async fn request(framed: &mut Framed<UnixStream, tokio_util::codec::LengthDelimitedCodec>, body: &[u8]) -> serde_json::Value {
        framed.send(bytes::Bytes::copy_from_slice(body)).await.unwrap();
        let frame = framed.next().await.unwrap().unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn accepted_peer_is_served_over_socket() {
        let dir = TempDir::new().unwrap();
        let core = vault(&dir);
        fill(&core, 3);
        let own_pid = std::process::id() as i32;
        let verifier = StaticPeerVerifier::new(None).allow(own_pid, companion(None));
        let bridge = core.spawn_bridge(Arc::new(verifier)).unwrap();
        let socket = bridge.socket_path().to_path_buf();

        let stream = UnixStream::connect(&socket).await.unwrap();
        let mut framed = Framed::new(stream, frame_codec());

        let health = request(&mut framed, br#"{"op":"health"}"#).await;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["result"]["kind"], "health");

        let recent = request(&mut framed, br#"{"op":"listRecent","limit":2}"#).await;
        assert_eq!(recent["result"]["items"].as_array().unwrap().len(), 2);

        let malformed = request(&mut framed, b"{not json").await;
        assert_eq!(malformed["status"], "error");
        assert_eq!(malformed["code"], "invalidArgument");

        bridge.shutdown().await;
        assert!(!socket.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hanging_up_mid_delete_cancels_the_rest() {
        let dir = TempDir::new().unwrap();
        let core = vault(&dir);
        let identities = fill(&core, 5);
        let mut deletions = core.subscribe_deletions();
        let own_pid = std::process::id() as i32;
        let verifier = StaticPeerVerifier::new(None).allow(own_pid, companion(None));
        let bridge = core.spawn_bridge(Arc::new(verifier)).unwrap();

        // Hold the write lock so the first delete blocks inside the worker
        let locker = rusqlite::Connection::open(core.config().database_path()).unwrap();
        locker.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let stream = UnixStream::connect(bridge.socket_path()).await.unwrap();
        let mut framed = Framed::new(stream, frame_codec());
        let body = serde_json::json!({ "op": "delete", "identities": identities });
        framed.send(bytes::Bytes::from(body.to_string())).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        drop(framed);
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        locker.execute_batch("COMMIT;").unwrap();

        let announced = tokio::time::timeout(std::time::Duration::from_secs(5), deletions.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(announced.identities, vec![identities[0].clone()]);
        assert_eq!(core.count_items().unwrap(), 4);

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn rejected_peer_gets_no_response() {
        let dir = TempDir::new().unwrap();
        let core = vault(&dir);
        let verifier = StaticPeerVerifier::new(None);
        let bridge = core.spawn_bridge(Arc::new(verifier)).unwrap();

        let stream = UnixStream::connect(bridge.socket_path()).await.unwrap();
        let mut framed = Framed::new(stream, frame_codec());
        let _ = framed.send(bytes::Bytes::from_static(br#"{"op":"health"}"#)).await;
        assert!(!matches!(framed.next().await, Some(Ok(_))));

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let core = vault(&dir);
        let socket = core.config().socket_path();
        std::fs::write(&socket, b"stale").unwrap();

        let bridge = core.spawn_bridge(Arc::new(StaticPeerVerifier::new(None))).unwrap();
        assert!(UnixStream::connect(&socket).await.is_ok());
        bridge.shutdown().await;
    }
}
