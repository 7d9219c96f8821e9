//! Liveness decision engine.
//!
//! Fuses per-frame results from both roles into one session verdict. Both
//! device workers mutate the session and the host observes it, so every
//! transition happens under a single lock and is check-then-act: the
//! verdict is read and only changed while still pending.

use super::verdict::Verdict;
use crate::analysis::AnalysisResult;
use crate::config::{LivenessMode, SessionConfig};
use crate::device::DeviceRole;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State of one detection session.
#[derive(Debug, Clone)]
pub struct LivenessSession {
    /// Config the session runs under.
    pub config: Arc<SessionConfig>,
    /// When the session started.
    pub started_at: Instant,
    /// Qualifying infrared results so far.
    pub pass_evidence: u32,
    /// Current verdict.
    pub verdict: Verdict,
}

impl LivenessSession {
    fn new(config: Arc<SessionConfig>, started_at: Instant) -> Self {
        Self {
            config,
            started_at,
            pass_evidence: 0,
            verdict: Verdict::Pending,
        }
    }

    /// Instant at which a pending session times out.
    pub fn deadline(&self) -> Instant {
        self.started_at + self.config.timeout()
    }

    /// Marks the session timed out if its budget is spent.
    /// Returns true if this call made the transition.
    fn expire(&mut self, now: Instant) -> bool {
        if self.verdict == Verdict::Pending && now >= self.deadline() {
            self.verdict = Verdict::TimedOut;
            return true;
        }
        false
    }

    fn settle(&mut self, verdict: Verdict) -> bool {
        if self.verdict.is_terminal() {
            return false;
        }
        self.verdict = verdict;
        true
    }

    /// Applies one result to a pending session.
    fn evaluate(&mut self, role: DeviceRole, result: &AnalysisResult) {
        let config = Arc::clone(&self.config);

        if role.is_infrared() {
            if result.score > config.score_threshold {
                self.pass_evidence = self.pass_evidence.saturating_add(1);
            }
            match config.mode {
                LivenessMode::AlwaysPass => {
                    self.pass_evidence = config.pass_count;
                    self.settle(Verdict::Live);
                }
                // any infrared result settles this mode
                LivenessMode::InfraredSingle => {
                    self.settle(Verdict::Live);
                }
                LivenessMode::InfraredThreshold => {
                    if self.pass_evidence >= config.pass_count {
                        self.settle(Verdict::Live);
                    }
                }
                LivenessMode::VisibleSimple | LivenessMode::VisibleNormal => {}
            }
        } else if config.mode.uses_visible_channel() && result.is_success() {
            self.settle(Verdict::Live);
        }
    }
}

/// What happened to a result handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// No session exists.
    NoSession,
    /// The session had already settled; the result was discarded.
    Ignored(Verdict),
    /// Recorded; the session is still pending.
    Pending { pass_evidence: u32 },
    /// This call settled the session.
    Settled(Verdict),
}

/// Thread-safe liveness decision engine.
#[derive(Default)]
pub struct LivenessEngine {
    session: Mutex<Option<LivenessSession>>,
    settled: Condvar,
    sessions_started: AtomicU64,
}

impl LivenessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new session now, replacing any previous one.
    pub fn start(&self, config: Arc<SessionConfig>) {
        self.start_at(config, Instant::now());
    }

    /// Starts a new session at `now`.
    pub fn start_at(&self, config: Arc<SessionConfig>, now: Instant) {
        let mut session = self.session.lock();
        if let Some(previous) = session.as_ref() {
            if previous.verdict == Verdict::Pending {
                tracing::warn!("Replacing a pending liveness session");
            }
        }
        tracing::info!(
            mode = ?config.mode,
            pass_count = config.pass_count,
            threshold = config.score_threshold,
            timeout_ms = config.timeout_ms,
            "Liveness session started"
        );
        *session = Some(LivenessSession::new(config, now));
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Applies a result from `role` now.
    pub fn apply(&self, role: DeviceRole, result: &AnalysisResult) -> ApplyOutcome {
        self.apply_at(role, result, Instant::now())
    }

    /// Applies a result from `role` at `now`.
    pub fn apply_at(&self, role: DeviceRole, result: &AnalysisResult, now: Instant) -> ApplyOutcome {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return ApplyOutcome::NoSession;
        };

        if session.expire(now) {
            self.announce(session);
            return ApplyOutcome::Settled(Verdict::TimedOut);
        }
        if session.verdict.is_terminal() {
            tracing::trace!(role = %role, verdict = %session.verdict, "Result after verdict discarded");
            return ApplyOutcome::Ignored(session.verdict);
        }

        session.evaluate(role, result);
        tracing::debug!(
            role = %role,
            score = result.score,
            status = result.status,
            pass_evidence = session.pass_evidence,
            "Analysis result applied"
        );

        if session.verdict.is_terminal() {
            self.announce(session);
            ApplyOutcome::Settled(session.verdict)
        } else {
            ApplyOutcome::Pending {
                pass_evidence: session.pass_evidence,
            }
        }
    }

    /// Current verdict, evaluating the timeout now.
    pub fn verdict(&self) -> Option<Verdict> {
        self.poll_at(Instant::now())
    }

    /// Current verdict, evaluating the timeout at `now`.
    pub fn poll_at(&self, now: Instant) -> Option<Verdict> {
        let mut guard = self.session.lock();
        let session = guard.as_mut()?;
        if session.expire(now) {
            self.announce(session);
        }
        Some(session.verdict)
    }

    /// Cancels a pending session.
    pub fn cancel(&self) -> Option<Verdict> {
        self.conclude(Verdict::Cancelled, Instant::now())
    }

    /// Rejects a pending session as not live.
    pub fn reject(&self) -> Option<Verdict> {
        self.conclude(Verdict::NotLive, Instant::now())
    }

    /// Config of the session if it is still accepting results.
    pub fn active_config(&self) -> Option<Arc<SessionConfig>> {
        let mut guard = self.session.lock();
        let session = guard.as_mut()?;
        if session.expire(Instant::now()) {
            self.announce(session);
        }
        (session.verdict == Verdict::Pending).then(|| Arc::clone(&session.config))
    }

    /// Returns true while a session is accepting results.
    pub fn is_active(&self) -> bool {
        self.active_config().is_some()
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Option<LivenessSession> {
        self.session.lock().clone()
    }

    /// Qualifying infrared results in the current session.
    pub fn pass_evidence(&self) -> Option<u32> {
        self.session.lock().as_ref().map(|s| s.pass_evidence)
    }

    /// Sessions started since the engine was created.
    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }

    /// Drops the current session. Pending waiters observe `None`.
    pub fn reset(&self) {
        *self.session.lock() = None;
        self.settled.notify_all();
        tracing::info!("Liveness session reset");
    }

    /// Blocks until the session settles or `limit` elapses.
    ///
    /// Returns `None` when there is no session, `Some(Verdict::Pending)` if
    /// `limit` ran out first.
    pub fn wait_for_verdict(&self, limit: Duration) -> Option<Verdict> {
        let give_up = Instant::now() + limit;
        let mut guard = self.session.lock();
        loop {
            let now = Instant::now();
            let session = guard.as_mut()?;
            if session.expire(now) {
                self.announce(session);
            }
            if session.verdict.is_terminal() || now >= give_up {
                return Some(session.verdict);
            }
            let wake = give_up.min(session.deadline());
            self.settled.wait_until(&mut guard, wake);
        }
    }

    fn conclude(&self, verdict: Verdict, now: Instant) -> Option<Verdict> {
        let mut guard = self.session.lock();
        let session = guard.as_mut()?;
        if session.expire(now) || session.settle(verdict) {
            self.announce(session);
        }
        Some(session.verdict)
    }

    fn announce(&self, session: &LivenessSession) {
        tracing::info!(
            verdict = %session.verdict,
            pass_evidence = session.pass_evidence,
            elapsed_ms = session.started_at.elapsed().as_millis() as u64,
            "Liveness session settled"
        );
        self.settled.notify_all();
    }
}
