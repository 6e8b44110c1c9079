//! Signal-driven graceful shutdown.
//!
//! The coordinator is a small state machine over [`ShutdownPhase`]:
//!
//! ```text
//!   Running ──signal──▶ Draining ──count()==0──────────────▶ Terminated
//!                          │                                     ▲
//!                          └──budget spent──▶ ForceClosing ──────┘
//!                                              close_all(1001)
//! ```
//!
//! Every termination signal bumps an atomic counter. The first one starts a
//! drain; later ones are logged and ignored until the counter reaches the
//! configured threshold, at which point the process is terminated with the
//! default disposition of that signal and the drain is abandoned.
//!
//! Once `Terminated` is reached the process-wide `CancellationToken` is
//! cancelled, which stops the HTTP server and the background loops.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the workspace panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Drain broadcast and forced-close failures are logged and never block
//!   convergence to `Terminated`

use std::io;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_core::ShutdownPhase;
use beacon_protocol::{close, ServerText};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::DaemonConfig;

// ============================================================================
// Settings and outcomes
// ============================================================================

/// Timing knobs for the drain protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSettings {
    /// How often the registry count is polled
    pub poll_interval: Duration,

    /// Wall-clock budget before connections are force-closed
    pub wait_budget: Duration,

    /// A shutdown notice goes out every this many polls, the first one after
    /// `notice_every` polls have passed
    pub notice_every: u32,

    /// Signals needed to skip the drain and terminate immediately
    pub force_threshold: u32,
}

impl From<&DaemonConfig> for ShutdownSettings {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            poll_interval: config.drain_poll_interval(),
            wait_budget: config.drain_wait_budget(),
            notice_every: config.drain_notice_every.max(1),
            force_threshold: config.force_signal_threshold.max(1),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self::from(&DaemonConfig::default())
    }
}

/// What the coordinator decided to do with a termination signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDisposition {
    /// First signal: start draining.
    Drain,

    /// A shutdown is already running; the signal is ignored.
    AlreadyInProgress { count: u32 },

    /// Threshold reached: terminate now.
    Escalate { count: u32 },
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every client left within the budget.
    Drained,

    /// The budget ran out and the remaining connections were closed.
    ForceClosed { closed: usize },
}

// ============================================================================
// Coordinator
// ============================================================================

struct Inner {
    phase: AtomicU8,
    signals: AtomicU32,
    settings: ShutdownSettings,
    broadcaster: Broadcaster,
    cancel_token: CancellationToken,
}

/// Drives the shutdown state machine. Cheap to clone.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator in the `Running` phase.
    ///
    /// `cancel_token` is cancelled once the drain reaches `Terminated`.
    /// A zero `notice_every` or `force_threshold` is treated as 1.
    pub fn new(
        broadcaster: Broadcaster,
        settings: ShutdownSettings,
        cancel_token: CancellationToken,
    ) -> Self {
        let settings = ShutdownSettings {
            notice_every: settings.notice_every.max(1),
            force_threshold: settings.force_threshold.max(1),
            ..settings
        };

        Self {
            inner: Arc::new(Inner {
                phase: AtomicU8::new(ShutdownPhase::Running.as_u8()),
                signals: AtomicU32::new(0),
                settings,
                broadcaster,
                cancel_token,
            }),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.inner.phase.load(Ordering::SeqCst))
            .unwrap_or(ShutdownPhase::Terminated)
    }

    /// Number of termination signals received so far.
    pub fn signal_count(&self) -> u32 {
        self.inner.signals.load(Ordering::SeqCst)
    }

    /// Records one termination signal and decides what to do with it.
    ///
    /// Only the call that moves the phase from `Running` to `Draining`
    /// returns [`SignalDisposition::Drain`].
    pub fn on_signal(&self) -> SignalDisposition {
        let count = self.inner.signals.fetch_add(1, Ordering::SeqCst) + 1;

        if count >= self.inner.settings.force_threshold {
            return SignalDisposition::Escalate { count };
        }

        if self.try_advance(ShutdownPhase::Running, ShutdownPhase::Draining) {
            SignalDisposition::Drain
        } else {
            SignalDisposition::AlreadyInProgress { count }
        }
    }

    /// Moves `from → to` if the phase is still `from`.
    fn try_advance(&self, from: ShutdownPhase, to: ShutdownPhase) -> bool {
        if !from.can_advance_to(to) {
            return false;
        }
        self.inner
            .phase
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Advances to `to` from whatever the current phase is, if legal.
    fn advance(&self, to: ShutdownPhase) {
        let current = self.phase();
        if current == to {
            return;
        }
        match current.advance(to) {
            Ok(next) => {
                self.inner.phase.store(next.as_u8(), Ordering::SeqCst);
                info!(from = %current, to = %next, "Shutdown phase changed");
            }
            Err(e) => warn!(error = %e, "Ignoring shutdown phase change"),
        }
    }

    /// Closes intake and waits for clients to leave, force-closing the rest
    /// once the budget is spent. Always ends in `Terminated`, at most one
    /// poll interval after the budget runs out.
    pub async fn drain(&self) -> DrainOutcome {
        let settings = self.inner.settings;
        let broadcaster = &self.inner.broadcaster;
        let registry = broadcaster.registry();

        self.try_advance(ShutdownPhase::Running, ShutdownPhase::Draining);
        if registry.stop_accepting() {
            info!("Stopped accepting new connections");
        }

        info!(
            budget_secs = settings.wait_budget.as_secs(),
            poll_ms = settings.poll_interval.as_millis() as u64,
            "Draining connections"
        );

        let started = Instant::now();
        let deadline = started + settings.wait_budget + settings.poll_interval;
        let mut polls: u32 = 0;

        loop {
            let active = match registry.count().await {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "Registry unavailable during drain");
                    0
                }
            };

            if active == 0 {
                info!("All connections closed");
                self.advance(ShutdownPhase::Terminated);
                return DrainOutcome::Drained;
            }

            let remaining = settings.wait_budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                warn!(active, "Drain budget exhausted, forcing close");
                self.advance(ShutdownPhase::ForceClosing);

                let closed = match timeout(
                    deadline.saturating_duration_since(Instant::now()),
                    broadcaster.close_all(close::GOING_AWAY, close::REASON_SHUTDOWN_TIMEOUT),
                )
                .await
                {
                    Ok(closed) => closed,
                    Err(_) => {
                        error!("Forced close did not finish in time");
                        active
                    }
                };

                self.advance(ShutdownPhase::Terminated);
                return DrainOutcome::ForceClosed { closed };
            }

            if polls > 0 && polls % settings.notice_every == 0 {
                let notice = ServerText::ShuttingDown {
                    remaining_secs: remaining.as_secs(),
                }
                .to_string();

                let window = settings.poll_interval.min(remaining);
                match timeout(window, broadcaster.broadcast_all(&notice)).await {
                    Ok(Ok(report)) => {
                        debug!(delivered = report.delivered, "Shutdown notice sent")
                    }
                    Ok(Err(e)) => warn!(error = %e, "Shutdown notice failed"),
                    Err(_) => warn!("Shutdown notice timed out"),
                }
            }

            debug!(active, remaining_secs = remaining.as_secs(), "Waiting for clients");
            polls = polls.wrapping_add(1);

            // Never sleep past the end of the budget
            let left = settings.wait_budget.saturating_sub(started.elapsed());
            sleep(settings.poll_interval.min(left)).await;
        }
    }

    /// Runs the drain, then cancels the process-wide token.
    pub async fn run_shutdown(&self) -> DrainOutcome {
        let outcome = self.drain().await;
        info!(?outcome, "Shutdown complete");
        self.inner.cancel_token.cancel();
        outcome
    }

    /// Listens for SIGINT and SIGTERM until the process-wide token fires.
    ///
    /// The first signal spawns [`run_shutdown`](Self::run_shutdown) so later
    /// signals can still be counted while the drain runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handlers cannot be installed.
    pub fn spawn_signal_listener(&self) -> io::Result<JoinHandle<()>> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let coordinator = self.clone();
        let cancel_token = self.inner.cancel_token.clone();

        Ok(tokio::spawn(async move {
            loop {
                let signo = tokio::select! {
                    biased;

                    _ = cancel_token.cancelled() => break,
                    Some(()) = sigint.recv() => libc::SIGINT,
                    Some(()) = sigterm.recv() => libc::SIGTERM,
                };

                match coordinator.on_signal() {
                    SignalDisposition::Drain => {
                        info!(signal = signo, "Shutdown signal received, starting graceful shutdown");
                        let drainer = coordinator.clone();
                        tokio::spawn(async move {
                            drainer.run_shutdown().await;
                        });
                    }
                    SignalDisposition::AlreadyInProgress { count } => {
                        warn!(
                            signal = signo,
                            count,
                            threshold = coordinator.inner.settings.force_threshold,
                            "ShutdownAlreadyInProgress: signal ignored"
                        );
                    }
                    SignalDisposition::Escalate { count } => {
                        error!(signal = signo, count, "ForceShutdownEscalation: terminating now");
                        escalate(signo);
                    }
                }
            }

            debug!("Signal listener task completed");
        }))
    }
}

/// Terminates the process with the default disposition of `signo`.
pub fn escalate(signo: libc::c_int) -> ! {
    // SAFETY: restoring SIG_DFL and raising are async-signal-safe libc calls
    // with no pointer arguments.
    unsafe {
        libc::signal(signo, libc::SIG_DFL);
        libc::raise(signo);
    }
    std::process::exit(128 + signo)
}
