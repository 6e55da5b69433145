//! OpenVPN invocations for the two halves of the SAML handshake.
//!
//! Probe: placeholder credentials → AUTH_FAILED challenge carrying the SAML URL
//! and session id. Connect: `CRV1::<sid>::<assertion>` credentials → tunnel.

use std::ffi::OsString;
use std::io::Write as _;
use std::path::Path;
use std::process::{Command, Stdio};

use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};

use crate::browser;
use crate::error::{AppError, Result};
use crate::models::{LaunchOutcome, ProbeOutcome, SamlChallenge, Session};
use crate::process::ProcessHandle;
use crate::worker::Handshake;

pub const SAML_LISTEN_PORT: u16 = 35001;

const CHALLENGE_MARKER: &str = "AUTH_FAILED,CRV1";
const PLACEHOLDER_USER: &str = "N/A";
/// Zero-based index of the session id among the colon-separated fields of the
/// challenge line, timestamp prefix included.
const SID_FIELD: usize = 6;

// ── Credential files ──────────────────────────────────────────────────────────

fn write_creds(user: &str, pass: &str) -> Result<tempfile::NamedTempFile> {
    let mut tmp = tempfile::Builder::new()
        .prefix("aws_vpn_wrapper_")
        .suffix(".password")
        .tempfile()?;
    write!(tmp, "{}\r\n{}\r\n", user, pass)?;
    tmp.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(tmp)
}

fn remove_creds(creds: tempfile::NamedTempFile) {
    if let Err(e) = creds.close() {
        warn!("Could not remove credential file: {}", e);
    }
}

// ── Command lines ─────────────────────────────────────────────────────────────

fn openvpn_args(session: &Session, creds: &Path) -> Vec<OsString> {
    vec![
        "--config".into(),
        session.config_path.clone().into(),
        "--remote".into(),
        session.server.clone().into(),
        session.port.to_string().into(),
        "--auth-user-pass".into(),
        creds.into(),
    ]
}

pub fn probe_command(session: &Session, creds: &Path) -> Command {
    let mut cmd = Command::new(&session.openvpn);
    cmd.args(openvpn_args(session, creds));
    cmd
}

/// `elevate` may carry its own flags, e.g. `sudo -E`.
pub fn authenticated_command(session: &Session, creds: &Path, elevate: Option<&str>) -> Command {
    let wrapper: Vec<&str> = elevate.map(|e| e.split_whitespace().collect()).unwrap_or_default();
    let mut cmd = match wrapper.split_first() {
        Some((bin, rest)) => {
            let mut c = Command::new(bin);
            c.args(rest).arg(&session.openvpn);
            c
        }
        None => Command::new(&session.openvpn),
    };
    cmd.args(openvpn_args(session, creds));
    cmd
}

/// The wrapper is pointless when we already run as root.
pub fn effective_elevation(elevate: Option<String>) -> Option<String> {
    #[cfg(unix)]
    {
        if unsafe { libc::geteuid() } == 0 {
            return None;
        }
    }
    elevate.filter(|e| !e.trim().is_empty())
}

// ── Phase 1: SAML challenge ───────────────────────────────────────────────────

/// Extracts the challenge from a single OpenVPN log line. Returns `None` when
/// the line is not an `AUTH_FAILED,CRV1` challenge or is missing a field.
pub fn parse_challenge_line(line: &str) -> Option<SamlChallenge> {
    if !line.contains(CHALLENGE_MARKER) {
        return None;
    }
    let url_start = line.find("https://")?;
    let sid = line.split(':').nth(SID_FIELD)?;
    Some(SamlChallenge {
        saml_url: line[url_start..].to_string(),
        sid: sid.to_string(),
    })
}

pub fn parse_challenge(output: &str) -> Result<SamlChallenge> {
    output
        .lines()
        .find_map(parse_challenge_line)
        .ok_or(AppError::SamlUrlNotFound)
}

pub fn fetch_saml_challenge(session: &Session, signals: &Receiver<i32>) -> Result<ProbeOutcome> {
    let creds = write_creds(PLACEHOLDER_USER, &format!("ACS::{}", SAML_LISTEN_PORT))?;

    info!("Starting initial OpenVPN to get SAML URL and SID for authentication");
    let mut cmd = probe_command(session, creds.path());
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    let report = ProcessHandle::spawn(&mut cmd).and_then(|mut handle| {
        let output = handle.capture_output()?;
        let report = handle.wait(signals)?;
        Ok((report, output))
    });
    remove_creds(creds);
    let (report, output) = report.map_err(|e| match e {
        AppError::Process(msg) => AppError::Probe(msg),
        other => other,
    })?;

    if let Some(sig) = report.forwarded {
        // Pipes may still be held open by the child's own children; leave
        // the readers behind.
        info!("Probe interrupted by signal {}", sig);
        return Ok(ProbeOutcome::Shutdown);
    }

    // An auth failure is the expected result here.
    debug!("Probe OpenVPN exited with {}", report.status);
    let combined = output.collect();
    for line in combined.lines() {
        debug!("[openvpn] {}", line);
    }

    parse_challenge(&combined)
        .map(ProbeOutcome::Challenge)
        .inspect_err(|_| {
            let tail: Vec<&str> = combined.lines().rev().take(5).collect();
            for line in tail.into_iter().rev() {
                error!("[openvpn] {}", line);
            }
        })
}

// ── Phase 2: authenticated tunnel ─────────────────────────────────────────────

pub fn run_authenticated(
    session: &Session,
    assertion: &str,
    elevate: Option<&str>,
    signals: &Receiver<i32>,
) -> Result<LaunchOutcome> {
    info!("SID:{} server {}:{}", session.session_id, session.server, session.port);
    let creds = write_creds(
        PLACEHOLDER_USER,
        &format!("CRV1::{}::{}", session.session_id, assertion),
    )?;

    let mut cmd = authenticated_command(session, creds.path(), elevate);
    cmd.stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::inherit());

    let report = ProcessHandle::spawn(&mut cmd).and_then(|handle| {
        info!("OpenVPN running as PID {}", handle.id());
        handle.wait(signals)
    });
    remove_creds(creds);
    let report = report?;

    debug!("OpenVPN exited with {}", report.status);
    Ok(report.outcome())
}

// ── Handshake over a real OpenVPN binary ──────────────────────────────────────

pub struct OpenVpn {
    elevate: Option<String>,
    browser: Option<String>,
}

impl OpenVpn {
    pub fn new(elevate: Option<String>, browser: Option<String>) -> Self {
        Self { elevate, browser }
    }
}

impl Handshake for OpenVpn {
    fn probe(&mut self, session: &Session, signals: &Receiver<i32>) -> Result<ProbeOutcome> {
        fetch_saml_challenge(session, signals)
    }

    fn open_browser(&mut self, url: &str) -> Result<()> {
        browser::open_url_in_browser(self.browser.as_deref(), url)
    }

    fn connect(
        &mut self,
        session: &Session,
        assertion: &str,
        signals: &Receiver<i32>,
    ) -> Result<LaunchOutcome> {
        run_authenticated(session, assertion, self.elevate.as_deref(), signals)
    }
}
