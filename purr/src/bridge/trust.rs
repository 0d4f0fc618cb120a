//! Per-connection peer verification
//!
//! Every bridge connection starts unverified and ends in exactly one of
//! `Accepted` or `Rejected`. Any failure while resolving the peer or building
//! the requirement rejects the connection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Credentials reported by the socket for the connecting process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub pid: Option<i32>,
    pub uid: Option<u32>,
}

/// Signed code identity of a running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeIdentity {
    pub bundle_id: String,
    pub team_id: Option<String>,
    pub signature_valid: bool,
}

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("peer did not report a process id")]
    MissingPid,
    #[error("cannot locate executable of pid {pid}: {reason}")]
    Executable { pid: i32, reason: String },
    #[error("code signature unavailable: {0}")]
    Signature(String),
    #[error("peer pid {0} is not known")]
    UnknownPeer(i32),
    #[error("invalid identity requirement: {0}")]
    Requirement(String),
}

/// What a peer must be signed as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRequirement {
    bundle_id: String,
    team_id: Option<String>,
}

impl IdentityRequirement {
    pub fn build(companion_bundle_id: &str, own_team_id: Option<&str>) -> Result<Self, TrustError> {
        let bundle_id = companion_bundle_id.trim();
        if bundle_id.is_empty() {
            return Err(TrustError::Requirement("companion bundle id is empty".into()));
        }
        if bundle_id.contains('"') || own_team_id.is_some_and(|team| team.contains('"')) {
            return Err(TrustError::Requirement("identifiers must not contain quotes".into()));
        }
        Ok(Self {
            bundle_id: bundle_id.to_string(),
            team_id: own_team_id
                .map(str::trim)
                .filter(|team| !team.is_empty())
                .map(str::to_string),
        })
    }

    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }

    pub fn team_id(&self) -> Option<&str> {
        self.team_id.as_deref()
    }

    pub fn is_satisfied_by(&self, identity: &CodeIdentity) -> bool {
        if !identity.signature_valid || identity.bundle_id != self.bundle_id {
            return false;
        }
        match &self.team_id {
            Some(team) => identity.team_id.as_deref() == Some(team.as_str()),
            None => true,
        }
    }

    /// Requirement string in `codesign -R` syntax
    pub fn to_codesign_requirement(&self) -> String {
        match &self.team_id {
            Some(team) => format!(
                "identifier \"{}\" and anchor apple generic and certificate leaf[subject.OU] = \"{}\"",
                self.bundle_id, team
            ),
            None => format!("identifier \"{}\"", self.bundle_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    IdentityUnavailable,
    RequirementUnavailable,
    Mismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    Accepted(CodeIdentity),
    Rejected(RejectReason),
}

impl TrustDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, TrustDecision::Accepted(_))
    }
}

/// Resolves the code identity behind a connection
#[async_trait]
pub trait PeerIdentityVerifier: Send + Sync {
    /// Identity of the peer, with `signature_valid` evaluated against `requirement`
    async fn resolve(
        &self,
        peer: &PeerCredentials,
        requirement: &IdentityRequirement,
    ) -> Result<CodeIdentity, TrustError>;

    /// Team identifier this process is signed with, if any
    fn own_team_id(&self) -> Option<String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// CODESIGN VERIFIER
// ─────────────────────────────────────────────────────────────────────────────

/// Production verifier backed by the `codesign` tool. On hosts without it
/// every resolution fails, so every connection is rejected.
#[derive(Debug, Clone)]
pub struct CodesignVerifier {
    codesign: PathBuf,
    own_team_id: Option<String>,
}

impl Default for CodesignVerifier {
    fn default() -> Self {
        Self::new("/usr/bin/codesign")
    }
}

impl CodesignVerifier {
    pub fn new(codesign: impl Into<PathBuf>) -> Self {
        let codesign = codesign.into();
        let own_team_id = std::env::current_exe()
            .ok()
            .and_then(|exe| describe_blocking(&codesign, &exe).ok())
            .and_then(|(_, team)| team);
        Self { codesign, own_team_id }
    }

    async fn executable_of(pid: i32) -> Result<PathBuf, TrustError> {
        #[cfg(target_os = "linux")]
        {
            tokio::fs::read_link(format!("/proc/{}/exe", pid))
                .await
                .map_err(|e| TrustError::Executable { pid, reason: e.to_string() })
        }
        #[cfg(not(target_os = "linux"))]
        {
            let path = Self::ps_field(pid, "comm=").await?;
            Ok(PathBuf::from(path))
        }
    }

    /// Executable plus start time. A pid recycled by another process during
    /// verification yields a different fingerprint.
    async fn fingerprint(pid: i32) -> Result<ProcessFingerprint, TrustError> {
        let executable = Self::executable_of(pid).await?;
        #[cfg(target_os = "linux")]
        let started = {
            let stat = tokio::fs::read_to_string(format!("/proc/{}/stat", pid))
                .await
                .map_err(|e| TrustError::Executable { pid, reason: e.to_string() })?;
            parse_proc_start_time(&stat)
                .ok_or_else(|| TrustError::Executable { pid, reason: "unreadable process start time".into() })?
        };
        #[cfg(not(target_os = "linux"))]
        let started = Self::ps_field(pid, "lstart=").await?;
        Ok(ProcessFingerprint { executable, started })
    }

    #[cfg(not(target_os = "linux"))]
    async fn ps_field(pid: i32, field: &str) -> Result<String, TrustError> {
        let output = Command::new("ps")
            .args(["-o", field, "-p", &pid.to_string()])
            .output()
            .await
            .map_err(|e| TrustError::Executable { pid, reason: e.to_string() })?;
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || value.is_empty() {
            return Err(TrustError::Executable { pid, reason: "process not found".into() });
        }
        Ok(value)
    }

    async fn describe(&self, executable: &Path) -> Result<(String, Option<String>), TrustError> {
        let output = Command::new(&self.codesign)
            .args(["--display", "--verbose=2"])
            .arg(executable)
            .output()
            .await
            .map_err(|e| TrustError::Signature(e.to_string()))?;
        if !output.status.success() {
            return Err(TrustError::Signature(format!("codesign --display exited with {}", output.status)));
        }
        // codesign writes its report to stderr
        parse_codesign_display(&String::from_utf8_lossy(&output.stderr))
    }

    async fn satisfies(&self, executable: &Path, requirement: &IdentityRequirement) -> bool {
        let verified = Command::new(&self.codesign)
            .args(["--verify", "--strict"])
            .arg(format!("-R={}", requirement.to_codesign_requirement()))
            .arg(executable)
            .output()
            .await;
        match verified {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!(error = %e, "codesign --verify could not run");
                false
            }
        }
    }
}

fn describe_blocking(codesign: &Path, executable: &Path) -> Result<(String, Option<String>), TrustError> {
    let output = std::process::Command::new(codesign)
        .args(["--display", "--verbose=2"])
        .arg(executable)
        .output()
        .map_err(|e| TrustError::Signature(e.to_string()))?;
    parse_codesign_display(&String::from_utf8_lossy(&output.stderr))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProcessFingerprint {
    executable: PathBuf,
    started: String,
}

/// Start time (field 22, in clock ticks) from `/proc/<pid>/stat`. The command
/// name may itself contain spaces and parentheses, so fields are counted from
/// the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_start_time(stat: &str) -> Option<String> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(19).map(str::to_string)
}

/// Extract `Identifier=` and `TeamIdentifier=` from `codesign --display` output
fn parse_codesign_display(report: &str) -> Result<(String, Option<String>), TrustError> {
    let field = |name: &str| {
        report
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .map(|value| value.trim().to_string())
    };
    let identifier = field("Identifier=")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| TrustError::Signature("no identifier in signature".into()))?;
    let team = field("TeamIdentifier=").filter(|team| !team.is_empty() && team != "not set");
    Ok((identifier, team))
}

#[async_trait]
impl PeerIdentityVerifier for CodesignVerifier {
    async fn resolve(
        &self,
        peer: &PeerCredentials,
        requirement: &IdentityRequirement,
    ) -> Result<CodeIdentity, TrustError> {
        let pid = peer.pid.ok_or(TrustError::MissingPid)?;
        let before = Self::fingerprint(pid).await?;
        let (bundle_id, team_id) = self.describe(&before.executable).await?;
        let signature_valid = self.satisfies(&before.executable, requirement).await;
        if Self::fingerprint(pid).await? != before {
            return Err(TrustError::Executable { pid, reason: "process changed during verification".into() });
        }
        Ok(CodeIdentity { bundle_id, team_id, signature_valid })
    }

    fn own_team_id(&self) -> Option<String> {
        self.own_team_id.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// STATIC VERIFIER
// ─────────────────────────────────────────────────────────────────────────────

/// Allow list keyed by pid, for tests and development hosts
#[derive(Debug, Clone, Default)]
pub struct StaticPeerVerifier {
    allowed: HashMap<i32, CodeIdentity>,
    own_team_id: Option<String>,
}

impl StaticPeerVerifier {
    pub fn new(own_team_id: Option<&str>) -> Self {
        Self {
            allowed: HashMap::new(),
            own_team_id: own_team_id.map(str::to_string),
        }
    }

    pub fn allow(mut self, pid: i32, identity: CodeIdentity) -> Self {
        self.allowed.insert(pid, identity);
        self
    }
}

#[async_trait]
impl PeerIdentityVerifier for StaticPeerVerifier {
    async fn resolve(
        &self,
        peer: &PeerCredentials,
        _requirement: &IdentityRequirement,
    ) -> Result<CodeIdentity, TrustError> {
        let pid = peer.pid.ok_or(TrustError::MissingPid)?;
        self.allowed.get(&pid).cloned().ok_or(TrustError::UnknownPeer(pid))
    }

    fn own_team_id(&self) -> Option<String> {
        self.own_team_id.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TRUST GATE
// ─────────────────────────────────────────────────────────────────────────────

pub struct BridgeTrustGate {
    verifier: Arc<dyn PeerIdentityVerifier>,
    companion_bundle_id: String,
}

impl BridgeTrustGate {
    pub fn new(verifier: Arc<dyn PeerIdentityVerifier>, companion_bundle_id: impl Into<String>) -> Self {
        Self {
            verifier,
            companion_bundle_id: companion_bundle_id.into(),
        }
    }

    /// Decide a connection once. Never errors: every failure is a rejection.
    pub async fn admit(&self, peer: &PeerCredentials) -> TrustDecision {
        let own_team = self.verifier.own_team_id();
        let requirement = match IdentityRequirement::build(&self.companion_bundle_id, own_team.as_deref()) {
            Ok(requirement) => requirement,
            Err(e) => {
                warn!(error = %e, "Rejecting bridge peer: requirement unavailable");
                return TrustDecision::Rejected(RejectReason::RequirementUnavailable);
            }
        };

        let identity = match self.verifier.resolve(peer, &requirement).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(pid = ?peer.pid, error = %e, "Rejecting bridge peer: identity unavailable");
                return TrustDecision::Rejected(RejectReason::IdentityUnavailable);
            }
        };

        if !requirement.is_satisfied_by(&identity) {
            warn!(
                pid = ?peer.pid,
                bundle_id = %identity.bundle_id,
                signature_valid = identity.signature_valid,
                "Rejecting bridge peer: identity mismatch"
            );
            return TrustDecision::Rejected(RejectReason::Mismatch);
        }

        info!(pid = ?peer.pid, bundle_id = %identity.bundle_id, "Accepted bridge peer");
        TrustDecision::Accepted(identity)
    }
}
