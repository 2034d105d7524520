//! Extendable watchdog timer for long-lived sessions.
//!
//! A `Watchdog` fires its expiry action unless it is pinged within a rolling
//! deadline. Each instance runs exactly one background monitor task that wakes
//! every `timeout / poll_divisor` and is the only place where the terminal
//! transition and the completion notification happen. Callers only flip atomic
//! state, so `ping`, `cancel` and `is_alive` never block.
use crate::config::{self, WatchdogConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

/// Action invoked once when the watchdog genuinely expires.
pub type ExpiryHandler = Box<dyn FnOnce() + Send + 'static>;

/// Why the watchdog's lifecycle ended. Delivered once on the completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No ping arrived within the timeout.
    Expired,
    /// `cancel` was called while the watchdog was alive.
    Cancelled,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Expired => write!(f, "expired"),
            Outcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Errors that can occur when arming a watchdog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogError {
    /// Timeout or polling parameters are out of range.
    InvalidArgument(String),
    /// Construction happened outside a tokio runtime, so no monitor could start.
    NoRuntime,
}

impl std::fmt::Display for WatchdogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchdogError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            WatchdogError::NoRuntime => {
                write!(f, "watchdog must be created inside a tokio runtime")
            }
        }
    }
}

impl std::error::Error for WatchdogError {}

fn saturating_u64(n: u128) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// State shared between callers and the monitor task.
#[derive(Debug)]
struct State {
    origin: Instant,
    /// Nanoseconds since `origin` of the most recent ping.
    last_ping: AtomicU64,
    alive: AtomicBool,
}

impl State {
    /// A fresh, alive state whose first ping is "now".
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ping: AtomicU64::new(0),
            alive: AtomicBool::new(true),
        }
    }

    fn now_nanos(&self) -> u64 {
        saturating_u64(self.origin.elapsed().as_nanos())
    }

    fn ping(&self) {
        if self.is_alive() {
            self.last_ping.store(self.now_nanos(), Ordering::Release);
        }
    }

    fn cancel(&self) {
        self.alive.store(false, Ordering::Release);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Claim the alive -> dead transition. Returns false if a cancel got there first.
    fn expire(&self) -> bool {
        self.alive
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Time since the last ping.
    fn idle(&self) -> Duration {
        let last = self.last_ping.load(Ordering::Acquire);
        Duration::from_nanos(self.now_nanos().saturating_sub(last))
    }
}

/// An armed, extendable timeout.
///
/// Dropping the `Watchdog` does not stop its monitor: an uncancelled watchdog
/// still expires and runs its expiry action. Use [`Watchdog::cancel`] to end
/// it early.
#[derive(Debug)]
pub struct Watchdog {
    state: Arc<State>,
    report: Mutex<mpsc::Receiver<Outcome>>,
    timeout: Duration,
    poll_interval: Duration,
}

/// Cloneable handle for activity sources that ping or cancel a watchdog
/// without owning its completion signal.
#[derive(Debug, Clone)]
pub struct WatchdogHandle {
    state: Arc<State>,
}

impl Watchdog {
    /// Arm a watchdog with the default polling granularity (1/100th of the
    /// timeout, never below one millisecond).
    ///
    /// Fails with `InvalidArgument` for a zero timeout and with `NoRuntime`
    /// when called outside a tokio runtime. Nothing is spawned on failure.
    pub fn spawn(
        timeout: Duration,
        on_expiry: Option<ExpiryHandler>,
    ) -> Result<Watchdog, WatchdogError> {
        let poll_interval = config::poll_interval_for(
            timeout,
            config::DEFAULT_POLL_DIVISOR,
            config::DEFAULT_MIN_POLL_INTERVAL,
        );
        Self::start(timeout, poll_interval, on_expiry)
    }

    /// Like [`Watchdog::spawn`], but panics instead of returning an error.
    pub fn must_spawn(timeout: Duration, on_expiry: Option<ExpiryHandler>) -> Watchdog {
        match Self::spawn(timeout, on_expiry) {
            Ok(watchdog) => watchdog,
            Err(e) => panic!("failed to arm watchdog: {e}"),
        }
    }

    /// Arm a watchdog from a configuration, validating it first.
    pub fn with_config(
        config: &WatchdogConfig,
        on_expiry: Option<ExpiryHandler>,
    ) -> Result<Watchdog, WatchdogError> {
        config.validate()?;
        Self::start(config.timeout(), config.poll_interval(), on_expiry)
    }

    fn start(
        timeout: Duration,
        poll_interval: Duration,
        on_expiry: Option<ExpiryHandler>,
    ) -> Result<Watchdog, WatchdogError> {
        if timeout.is_zero() {
            return Err(WatchdogError::InvalidArgument(
                "positive timeout value expected".to_string(),
            ));
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| WatchdogError::NoRuntime)?;

        let state = Arc::new(State::new());
        let (tx, rx) = mpsc::channel(1);
        runtime.spawn(monitor(
            Arc::clone(&state),
            timeout,
            poll_interval,
            on_expiry,
            tx,
        ));

        tracing::debug!(
            timeout_ms = saturating_u64(timeout.as_millis()),
            poll_interval_us = saturating_u64(poll_interval.as_micros()),
            "watchdog armed"
        );

        Ok(Watchdog {
            state,
            report: Mutex::new(rx),
            timeout,
            poll_interval,
        })
    }

    /// Extend the deadline to one full timeout from now. No-op once dead.
    pub fn ping(&self) {
        self.state.ping();
    }

    /// Cancel the watchdog. The monitor notices within one polling interval,
    /// skips the expiry action and still reports `Outcome::Cancelled`.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    pub fn handle(&self) -> WatchdogHandle {
        WatchdogHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait for the completion signal.
    ///
    /// Resolves once, for whichever caller takes the notification. The signal
    /// is one-shot: every later call pends forever.
    pub async fn reported(&self) -> Outcome {
        let mut report = self.report.lock().await;
        match report.recv().await {
            Some(outcome) => outcome,
            // Monitor finished and its single notification is already taken.
            None => std::future::pending().await,
        }
    }

    /// Take the completion notification if it is already waiting.
    pub fn try_reported(&self) -> Option<Outcome> {
        self.report.try_lock().ok()?.try_recv().ok()
    }
}

impl WatchdogHandle {
    /// See [`Watchdog::ping`].
    pub fn ping(&self) {
        self.state.ping();
    }

    /// See [`Watchdog::cancel`].
    pub fn cancel(&self) {
        self.state.cancel();
    }

    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }
}

/// Background loop: poll until the deadline passes or a cancel is observed,
/// then run the terminal bookkeeping exactly once.
async fn monitor(
    state: Arc<State>,
    timeout: Duration,
    poll_interval: Duration,
    on_expiry: Option<ExpiryHandler>,
    report: mpsc::Sender<Outcome>,
) {
    loop {
        tokio::time::sleep(poll_interval).await;
        if !state.is_alive() || state.idle() >= timeout {
            break;
        }
    }

    let outcome = if state.expire() {
        tracing::info!(
            timeout_ms = saturating_u64(timeout.as_millis()),
            "watchdog expired"
        );
        if let Some(handler) = on_expiry {
            // Detached: a slow or panicking handler must not hold up the report.
            drop(tokio::task::spawn_blocking(handler));
        }
        Outcome::Expired
    } else {
        tracing::debug!("watchdog cancel observed");
        drop(on_expiry);
        Outcome::Cancelled
    };

    // Single send on a capacity-1 channel, so it can only fail if the receiver is gone.
    if report.try_send(outcome).is_err() {
        tracing::debug!(%outcome, "watchdog owner gone, completion not delivered");
    }
}
