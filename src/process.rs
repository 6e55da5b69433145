//! Child process supervision and operator signal plumbing (unix only).

use std::io::Read;
use std::process::{Child, Command, ExitStatus};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver};
use log::{debug, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::error::{AppError, Result};
use crate::models::LaunchOutcome;

/// Time given to the client to flush its shutdown messages after exiting.
const EXIT_GRACE: Duration = Duration::from_millis(100);
/// How often a supervised child is checked for exit between signals.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ── Operator signals ──────────────────────────────────────────────────────────

/// Routes SIGINT/SIGTERM into a queue for the lifetime of the process.
/// Installed once, before any child is spawned.
pub fn operator_signals() -> Result<Receiver<i32>> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let (tx, rx) = bounded(4);
    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            for sig in signals.forever() {
                if tx.try_send(sig).is_err() {
                    warn!("Signal {} dropped, queue full", sig);
                }
            }
        })?;
    Ok(rx)
}

// ── Process handle ────────────────────────────────────────────────────────────

pub struct ProcessHandle {
    child: Child,
}

/// How a supervised child ended.
#[derive(Debug, Clone, Copy)]
pub struct ExitReport {
    pub status: ExitStatus,
    /// Operator signal seen while the child ran. It was forwarded unless the
    /// child had already exited.
    pub forwarded: Option<i32>,
}

impl ExitReport {
    pub fn killed_by_signal(&self) -> bool {
        use std::os::unix::process::ExitStatusExt;
        self.status.signal().is_some()
    }

    pub fn outcome(&self) -> LaunchOutcome {
        if self.forwarded.is_some() || self.killed_by_signal() {
            LaunchOutcome::Shutdown
        } else {
            LaunchOutcome::Disconnected { code: self.status.code() }
        }
    }
}

/// Background readers draining a child's piped stdout and stderr.
pub struct CapturedOutput {
    readers: Vec<JoinHandle<Vec<u8>>>,
}

impl CapturedOutput {
    /// Waits for both pipes to close. Stdout comes first, then stderr.
    pub fn collect(self) -> String {
        let mut out = String::new();
        for reader in self.readers {
            match reader.join() {
                Ok(bytes) => out.push_str(&String::from_utf8_lossy(&bytes)),
                Err(_) => warn!("Output reader panicked"),
            }
        }
        out
    }
}

fn drain<R: Read + Send + 'static>(name: &str, mut pipe: R) -> Result<JoinHandle<Vec<u8>>> {
    let handle = thread::Builder::new().name(name.into()).spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!("Child output truncated: {}", e);
        }
        buf
    })?;
    Ok(handle)
}

impl ProcessHandle {
    pub fn spawn(cmd: &mut Command) -> Result<Self> {
        let child = cmd.spawn().map_err(|e| {
            AppError::Process(format!("Cannot start {:?}: {}", cmd.get_program(), e))
        })?;
        Ok(Self { child })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Starts draining whatever stdio the child was spawned with as piped.
    pub fn capture_output(&mut self) -> Result<CapturedOutput> {
        let mut readers = Vec::new();
        if let Some(stdout) = self.child.stdout.take() {
            readers.push(drain("child-stdout", stdout)?);
        }
        if let Some(stderr) = self.child.stderr.take() {
            readers.push(drain("child-stderr", stderr)?);
        }
        Ok(CapturedOutput { readers })
    }

    /// Blocks until the child exits. The first operator signal seen on
    /// `signals` is forwarded to the child; repeats are ignored.
    pub fn wait(mut self, signals: &Receiver<i32>) -> Result<ExitReport> {
        let pid = self.child.id();
        let mut forwarded = None;
        let status = loop {
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            select! {
                recv(signals) -> sig => {
                    let Ok(sig) = sig else {
                        // No more operator signals can arrive; just wait.
                        break self.child.wait()?;
                    };
                    if forwarded.is_some() {
                        info!("Signal {} ignored, shutdown already in progress", sig);
                        continue;
                    }
                    forwarded = Some(sig);
                    // Only this thread reaps the child: while `try_wait` says
                    // it is running, `pid` still names it.
                    if let Some(status) = self.child.try_wait()? {
                        debug!("Signal {} arrived after PID {} exited", sig, pid);
                        break status;
                    }
                    info!("Received signal {}, forwarding to PID {}", sig, pid);
                    if let Err(e) = deliver_signal(pid, sig) {
                        warn!("{}", e);
                    }
                }
                default(POLL_INTERVAL) => {}
            }
        };

        // A Ctrl-C hits the whole process group, so the child may exit
        // before its copy of the signal is read here.
        if forwarded.is_none() {
            forwarded = signals.try_recv().ok();
        }
        thread::sleep(EXIT_GRACE);

        Ok(ExitReport { status, forwarded })
    }
}

pub fn deliver_signal(pid: u32, sig: i32) -> Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
    if rc != 0 {
        return Err(AppError::Process(format!(
            "kill({}, {}) failed: {}",
            pid,
            sig,
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}
