//! Unix-domain socket listener for the bridge
//!
//! One task per connection. The trust gate runs before the first frame is
//! read; a rejected peer sees the socket close without any response.
//! Requests on a connection are answered in order. While one is in flight the
//! read half stays watched: if the peer hangs up (or the server shuts down)
//! the request future is dropped, which cancels an in-flight batch delete.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{decode_request, encode_response, frame_codec, BridgeResponse};
use super::service::BridgeProjectionService;
use super::trust::{BridgeTrustGate, PeerCredentials};

pub struct BridgeServer {
    gate: Arc<BridgeTrustGate>,
    service: BridgeProjectionService,
    socket_path: PathBuf,
}

impl BridgeServer {
    pub fn new(gate: Arc<BridgeTrustGate>, service: BridgeProjectionService, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            gate,
            service,
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale file from an earlier run.
    /// Must be called within a tokio runtime context.
    pub fn bind(&self) -> std::io::Result<UnixListener> {
        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::remove_file(&self.socket_path) {
            Ok(()) => debug!(path = %self.socket_path.display(), "Removed stale bridge socket"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(0o600))?;
        info!(path = %self.socket_path.display(), "Bridge listening");
        Ok(listener)
    }

    /// Accept connections until `shutdown` is cancelled, then remove the socket
    pub async fn serve(self: Arc<Self>, listener: UnixListener, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let server = Arc::clone(&self);
                        let token = shutdown.child_token();
                        tokio::spawn(async move { server.connection(stream, token).await });
                    }
                    Err(e) => warn!(error = %e, "Bridge accept failed"),
                }
            }
        }

        drop(listener);
        if let Err(e) = fs::remove_file(&self.socket_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(error = %e, "Failed to remove bridge socket");
            }
        }
        info!("Bridge stopped");
    }

    async fn connection(&self, stream: UnixStream, shutdown: CancellationToken) {
        let peer = match stream.peer_cred() {
            Ok(cred) => PeerCredentials {
                pid: cred.pid(),
                uid: Some(cred.uid()),
            },
            Err(e) => {
                debug!(error = %e, "Peer credentials unavailable");
                PeerCredentials { pid: None, uid: None }
            }
        };

        if !self.gate.admit(&peer).await.is_accepted() {
            return;
        }

        let (mut sink, mut frames) = Framed::new(stream, frame_codec()).split();
        // A frame that arrived while the previous request was in flight
        let mut pending: Option<BytesMut> = None;
        'requests: loop {
            let frame = match pending.take() {
                Some(frame) => Some(Ok(frame)),
                None => tokio::select! {
                    _ = shutdown.cancelled() => break,
                    frame = frames.next() => frame,
                },
            };

            let request = match frame {
                None => break,
                Some(Err(e)) => {
                    debug!(pid = ?peer.pid, error = %e, "Bridge connection unreadable");
                    break;
                }
                Some(Ok(bytes)) => decode_request(&bytes),
            };

            let response = match request {
                Err(e) => BridgeResponse::from(e),
                Ok(request) => {
                    let op = request.name();
                    let handling = self.service.handle(request);
                    tokio::pin!(handling);
                    loop {
                        tokio::select! {
                            response = &mut handling => break response,
                            _ = shutdown.cancelled() => {
                                debug!(pid = ?peer.pid, op, "Abandoning request on shutdown");
                                break 'requests;
                            }
                            next = frames.next(), if pending.is_none() => match next {
                                Some(Ok(frame)) => pending = Some(frame),
                                None | Some(Err(_)) => {
                                    debug!(pid = ?peer.pid, op, "Peer hung up mid-request; cancelling");
                                    break 'requests;
                                }
                            },
                        }
                    }
                }
            };

            let encoded = match encode_response(&response) {
                Ok(encoded) => encoded,
                Err(e) => {
                    warn!(error = %e, "Dropping bridge connection");
                    break;
                }
            };
            if let Err(e) = sink.send(encoded).await {
                debug!(pid = ?peer.pid, error = %e, "Bridge peer went away");
                break;
            }
        }
        debug!(pid = ?peer.pid, "Bridge connection closed");
    }
}
