//! Trust-gated bridge to the companion process

pub mod protocol;
#[cfg(unix)]
pub mod server;
pub mod service;
pub mod trust;

pub use protocol::{BridgeRequest, BridgeResponse, BridgeResult};
#[cfg(unix)]
pub use server::BridgeServer;
pub use service::BridgeProjectionService;
pub use trust::{
    BridgeTrustGate, CodeIdentity, CodesignVerifier, IdentityRequirement, PeerCredentials,
    PeerIdentityVerifier, StaticPeerVerifier, TrustDecision,
};
