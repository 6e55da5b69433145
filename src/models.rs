//! Domain models shared by the handshake stages.

use std::path::PathBuf;

// ── Session ───────────────────────────────────────────────────────────────────

/// Everything needed to launch the VPN client for one run of the program.
/// Only `session_id` changes after construction; it is replaced by every
/// successful probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    /// Resolved gateway IP, passed to `--remote`.
    pub server: String,
    pub port: u16,
    /// Path of the sanitized `.ovpn` copy.
    pub config_path: PathBuf,
    pub openvpn: String,
}

impl Session {
    pub fn new(server: String, port: u16, config_path: PathBuf, openvpn: String) -> Self {
        Self { session_id: String::new(), server, port, config_path, openvpn }
    }
}

// ── Probe result ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SamlChallenge {
    pub saml_url: String,
    pub sid: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Challenge(SamlChallenge),
    /// The operator stopped us while the probe client was running.
    Shutdown,
}

// ── Authenticated run result ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The operator asked us to stop, or the client was killed by a signal.
    Shutdown,
    /// The client exited on its own; a new SAML session is needed.
    Disconnected { code: Option<i32> },
}

// ── Worker state ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Probing,
    AwaitingAssertion,
    Authenticated,
}

impl Phase {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle              => "idle",
            Self::Probing           => "probing",
            Self::AwaitingAssertion => "awaiting-assertion",
            Self::Authenticated     => "authenticated",
        }
    }
}
