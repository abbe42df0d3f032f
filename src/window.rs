//! Codes around the synchronized time.
//!
//! [`WindowCodeProducer`] reads "now" from a [`TimeSource`] (normally a
//! [`SyncContext`]) and evaluates the engine there, optionally one period
//! before and after. [`Ticker`] refreshes those codes once a second on a tokio
//! task until its [`TickerHandle`] is cancelled or dropped.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use zeroize::Zeroizing;

use crate::clock::{Clock, SystemClock};
use crate::sync::SyncContext;
use crate::{TokenResult, TotpEngine};

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Where "now" comes from, in milliseconds since the UNIX epoch.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> i64;
}

impl TimeSource for SyncContext {
    fn now_ms(&self) -> i64 {
        self.synced_time_ms()
    }
}

/// Uncorrected local time.
impl TimeSource for SystemClock {
    fn now_ms(&self) -> i64 {
        self.wall_ms()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn now_ms(&self) -> i64 {
        (**self).now_ms()
    }
}

/// Codes one period apart around a single reading of the clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCodes {
    pub previous: TokenResult,
    pub current: TokenResult,
    pub next: TokenResult,
}

#[derive(Debug, Clone)]
pub struct WindowCodeProducer<S> {
    engine: TotpEngine,
    source: S,
}

impl<S: TimeSource> WindowCodeProducer<S> {
    /// Producer with the default SHA1, 6 digits, 30 s engine.
    pub fn new(source: S) -> Self {
        Self::with_engine(TotpEngine::default(), source)
    }

    pub fn with_engine(engine: TotpEngine, source: S) -> Self {
        Self { engine, source }
    }

    pub fn engine(&self) -> &TotpEngine {
        &self.engine
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Code at `timestamp_ms`, or at the source's current time when `None`.
    pub fn generate(&self, secret: &str, timestamp_ms: Option<i64>) -> TokenResult {
        let ts = timestamp_ms.unwrap_or_else(|| self.source.now_ms());
        self.engine.generate(secret, ts)
    }

    pub fn current(&self, secret: &str) -> TokenResult {
        self.generate(secret, None)
    }

    /// Previous, current and next codes. The time is read once.
    pub fn window(&self, secret: &str) -> WindowCodes {
        self.window_at(secret, self.source.now_ms())
    }

    pub fn window_at(&self, secret: &str, timestamp_ms: i64) -> WindowCodes {
        let period = self.engine.step_ms();
        WindowCodes {
            previous: self
                .engine
                .generate(secret, timestamp_ms.saturating_sub(period)),
            current: self.engine.generate(secret, timestamp_ms),
            next: self
                .engine
                .generate(secret, timestamp_ms.saturating_add(period)),
        }
    }
}

/// What a [`Ticker`] hands to its callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    Current(TokenResult),
    Window(WindowCodes),
}

impl Tick {
    pub fn current(&self) -> &TokenResult {
        match self {
            Tick::Current(current) => current,
            Tick::Window(codes) => &codes.current,
        }
    }
}

/// Once-a-second code refresh.
pub struct Ticker;

impl Ticker {
    /// Spawn the refresh loop on the current tokio runtime.
    ///
    /// `on_tick` runs inline on the task and should only render. When
    /// `adjacent` is set each tick carries the whole [`WindowCodes`]. The
    /// first tick fires immediately.
    pub fn spawn<S, F>(
        producer: WindowCodeProducer<S>,
        secret: impl Into<String>,
        adjacent: bool,
        mut on_tick: F,
    ) -> TickerHandle
    where
        S: TimeSource + 'static,
        F: FnMut(Tick) + Send + 'static,
    {
        let secret = Zeroizing::new(secret.into());
        let (stop, mut stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_PERIOD);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!("code ticker started (adjacent: {adjacent})");

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = interval.tick() => {
                        let tick = if adjacent {
                            Tick::Window(producer.window(&secret))
                        } else {
                            Tick::Current(producer.current(&secret))
                        };
                        on_tick(tick);
                    }
                }
            }

            debug!("code ticker stopped");
        });

        TickerHandle {
            stop: Some(stop),
            task: Some(task),
        }
    }
}

/// Owner of a running [`Ticker`]. Dropping it aborts the loop.
#[derive(Debug)]
pub struct TickerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TickerHandle {
    /// Stop the loop and wait for it to wind down.
    pub async fn cancel(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if err.is_panic() {
                    warn!("code ticker panicked: {err}");
                }
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
