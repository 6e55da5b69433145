//! The handshake state machine.
//!
//! Idle → Probing → AwaitingAssertion → Authenticated → Probing → …
//!
//! The worker owns the session and every VPN child. It only blocks in
//! `select!`, waiting for a re-probe trigger, an assertion, or an operator
//! signal.

use std::ops::ControlFlow;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::{debug, info, warn};

use crate::error::Result;
use crate::models::{LaunchOutcome, Phase, ProbeOutcome, Session};

/// Capacity of the assertion and re-probe queues.
pub const QUEUE_CAPACITY: usize = 2;

/// The three external steps of a handshake cycle.
pub trait Handshake {
    fn probe(&mut self, session: &Session, signals: &Receiver<i32>) -> Result<ProbeOutcome>;
    fn open_browser(&mut self, url: &str) -> Result<()>;
    fn connect(
        &mut self,
        session: &Session,
        assertion: &str,
        signals: &Receiver<i32>,
    ) -> Result<LaunchOutcome>;
}

pub struct Worker<H: Handshake> {
    handshake: H,
    session: Session,
    phase: Phase,
    assertions: Receiver<String>,
    signals: Receiver<i32>,
    reauth_tx: Sender<()>,
    reauth_rx: Receiver<()>,
}

impl<H: Handshake> Worker<H> {
    pub fn new(
        handshake: H,
        session: Session,
        assertions: Receiver<String>,
        signals: Receiver<i32>,
    ) -> Self {
        let (reauth_tx, reauth_rx) = bounded(QUEUE_CAPACITY);
        Self {
            handshake,
            session,
            phase: Phase::Idle,
            assertions,
            signals,
            reauth_tx,
            reauth_rx,
        }
    }

    /// Runs until the operator stops us (`Ok`) or a fatal error occurs.
    pub fn run(&mut self) -> Result<()> {
        let reauth = self.reauth_rx.clone();
        let assertions = self.assertions.clone();
        let signals = self.signals.clone();

        self.request_probe();
        loop {
            select! {
                recv(reauth) -> _ => {
                    if self.probe()?.is_break() {
                        return Ok(());
                    }
                }
                recv(assertions) -> msg => {
                    let Ok(assertion) = msg else {
                        info!("SAML listener closed, stopping");
                        return Ok(());
                    };
                    if self.phase != Phase::AwaitingAssertion {
                        warn!("Ignoring SAMLResponse received while {}", self.phase.as_str());
                        continue;
                    }
                    match self.authenticate(&assertion)? {
                        LaunchOutcome::Shutdown => return Ok(()),
                        LaunchOutcome::Disconnected { code } => {
                            info!("OpenVPN exited unexpectedly ({:?}). Re-authenticating...", code);
                            self.request_probe();
                        }
                    }
                }
                recv(signals) -> sig => {
                    if let Ok(sig) = sig {
                        info!("Received signal {}, shutting down", sig);
                        return Ok(());
                    }
                }
            }
        }
    }

    fn request_probe(&mut self) {
        self.phase = Phase::Probing;
        // The worker is the only consumer, so a full queue already holds a
        // pending probe.
        if self.reauth_tx.try_send(()).is_err() {
            debug!("Probe already pending");
        }
    }

    fn probe(&mut self) -> Result<ControlFlow<()>> {
        self.phase = Phase::Probing;
        self.discard_stale_assertions();
        let challenge = match self.handshake.probe(&self.session, &self.signals) {
            Ok(ProbeOutcome::Challenge(challenge)) => challenge,
            Ok(ProbeOutcome::Shutdown) => return Ok(ControlFlow::Break(())),
            Err(e) => {
                // The client dies with us on Ctrl-C, so its failure is not ours.
                if let Ok(sig) = self.signals.try_recv() {
                    info!("Received signal {} during probe ({}), shutting down", sig, e);
                    return Ok(ControlFlow::Break(()));
                }
                return Err(e);
            }
        };
        self.session.session_id = challenge.sid;
        info!("Opening webpage for SAML authentication: {}", challenge.saml_url);
        self.handshake.open_browser(&challenge.saml_url)?;
        self.phase = Phase::AwaitingAssertion;
        Ok(ControlFlow::Continue(()))
    }

    fn authenticate(&mut self, assertion: &str) -> Result<LaunchOutcome> {
        info!("Starting OpenVPN with authenticated credentials");
        self.phase = Phase::Authenticated;
        self.handshake.connect(&self.session, assertion, &self.signals)
    }

    fn discard_stale_assertions(&mut self) {
        while self.assertions.try_recv().is_ok() {
            warn!("Discarding SAMLResponse from a previous session");
        }
    }
}
