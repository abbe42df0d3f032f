//! Estimating network time over plain HTTP.
//!
//! A [`SyncContext`] owns the offset between the local wall clock and the
//! time reported by a list of providers. Providers are tried one after the
//! other; the first usable answer wins:
//!
//! ```text
//! rtt       = recv - send                  (monotonic)
//! estimate  = server_time + rtt / 2
//! offset    = estimate - local_wall_clock
//! ```
//!
//! When every provider fails the previous offset (or zero) is kept and the
//! context reports itself as unsynchronized. Token generation keeps working
//! from local time either way.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use reqwest::Client;
#[cfg(feature = "serde_support")]
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ProbeError};
use crate::probe::{DateHeaderProbe, JsonTimeProbe, TimeProbe, DEFAULT_TIME_FIELDS};

/// Per-attempt deadline used by [`SyncConfig::default`].
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(2500);

const TIMEAPI_UTC: &str = "https://timeapi.io/api/Time/current/zone?timeZone=UTC";
const WORLDTIMEAPI_UTC: &str = "https://worldtimeapi.org/api/timezone/Etc/UTC";

/// One JSON time endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct ProviderConfig {
    pub url: String,
    /// Candidate fields holding an ISO-8601 timestamp, first match wins.
    pub fields: Vec<String>,
}

impl ProviderConfig {
    /// Endpoint read through the [`DEFAULT_TIME_FIELDS`].
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fields: DEFAULT_TIME_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// Where and how to look for network time.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct SyncConfig {
    /// Tried in order.
    pub providers: Vec<ProviderConfig>,
    /// Origin whose `Date` header is read when every provider failed.
    pub fallback_origin: Option<String>,
    pub probe_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderConfig::new(TIMEAPI_UTC),
                ProviderConfig::new(WORLDTIMEAPI_UTC),
            ],
            fallback_origin: None,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl SyncConfig {
    /// Append a provider after the existing ones.
    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_fallback_origin(mut self, origin: impl Into<String>) -> Self {
        self.fallback_origin = Some(origin.into());
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Offset and synchronized flag, always read and written as a pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct ClockState {
    pub offset_ms: i64,
    pub synchronized: bool,
}

/// One timed round trip to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSample {
    pub source: String,
    pub send: Instant,
    pub recv: Instant,
    pub server_ms: i64,
}

impl ProbeSample {
    pub fn rtt_ms(&self) -> i64 {
        self.recv.saturating_duration_since(self.send).as_millis() as i64
    }

    /// Server time shifted by half the round trip.
    pub fn estimated_now_ms(&self) -> i64 {
        self.server_ms.saturating_add(self.rtt_ms() / 2)
    }
}

/// Result of a [`SyncContext::sync`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A provider answered; the offset was replaced.
    Synced {
        offset_ms: i64,
        source: String,
        rtt_ms: i64,
    },
    /// Every provider and the fallback failed; the previous offset is kept.
    Unavailable { offset_ms: i64 },
    /// Another sync was already running, nothing was done.
    Skipped { offset_ms: i64, synchronized: bool },
}

impl SyncOutcome {
    /// `true` only when this call established a fresh offset.
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Synced { .. })
    }

    /// The offset in effect after the call.
    pub fn offset_ms(&self) -> i64 {
        match self {
            SyncOutcome::Synced { offset_ms, .. }
            | SyncOutcome::Unavailable { offset_ms }
            | SyncOutcome::Skipped { offset_ms, .. } => *offset_ms,
        }
    }
}

/// Session-owned clock synchronization state.
///
/// Share it behind an [`Arc`]: [`sync`](Self::sync) takes `&self`, readers
/// never block on a running sync.
pub struct SyncContext {
    providers: Vec<Box<dyn TimeProbe>>,
    fallback: Option<Box<dyn TimeProbe>>,
    clock: Arc<dyn Clock>,
    probe_timeout: Duration,
    state: RwLock<ClockState>,
    in_flight: Mutex<()>,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers: Vec<&str> = self.providers.iter().map(|p| p.source()).collect();
        f.debug_struct("SyncContext")
            .field("providers", &providers)
            .field("fallback", &self.fallback.as_ref().map(|p| p.source()))
            .field("probe_timeout", &self.probe_timeout)
            .field("state", &self.snapshot())
            .finish()
    }
}

impl SyncContext {
    pub fn new(
        providers: Vec<Box<dyn TimeProbe>>,
        fallback: Option<Box<dyn TimeProbe>>,
        clock: Arc<dyn Clock>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            fallback,
            clock,
            probe_timeout,
            state: RwLock::new(ClockState::default()),
            in_flight: Mutex::new(()),
        }
    }

    /// Build the HTTP probes described by `config` on top of the system clock.
    ///
    /// # Errors
    ///
    /// Will return an error if a provider or fallback URL does not parse, or
    /// the HTTP client cannot be built.
    pub fn from_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        let timeout = config.probe_timeout();
        let http = Client::builder().timeout(timeout).build()?;

        let mut providers: Vec<Box<dyn TimeProbe>> = Vec::with_capacity(config.providers.len());
        for provider in &config.providers {
            let url = Url::parse(&provider.url)?;
            providers.push(Box::new(
                JsonTimeProbe::new(http.clone(), url, provider.fields.iter().cloned())
                    .with_timeout(timeout),
            ));
        }

        let fallback: Option<Box<dyn TimeProbe>> = match &config.fallback_origin {
            Some(origin) => Some(Box::new(
                DateHeaderProbe::new(http, Url::parse(origin)?).with_timeout(timeout),
            )),
            None => None,
        };

        Ok(Self::new(providers, fallback, Arc::new(SystemClock), timeout))
    }

    pub fn snapshot(&self) -> ClockState {
        *self.state.read()
    }

    pub fn is_synchronized(&self) -> bool {
        self.snapshot().synchronized
    }

    pub fn offset_ms(&self) -> i64 {
        self.snapshot().offset_ms
    }

    /// Local wall clock corrected by the current offset.
    ///
    /// Never touches the network. Before any successful sync the offset is
    /// zero and this is plain local time.
    pub fn synced_time_ms(&self) -> i64 {
        self.clock.wall_ms().saturating_add(self.offset_ms())
    }

    /// Try every provider in order, then the fallback, until one answers.
    ///
    /// A call made while another is still running returns
    /// [`SyncOutcome::Skipped`] immediately.
    pub async fn sync(&self) -> SyncOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            let state = self.snapshot();
            debug!("clock sync already running, skipping");
            return SyncOutcome::Skipped {
                offset_ms: state.offset_ms,
                synchronized: state.synchronized,
            };
        };

        for probe in &self.providers {
            match self.attempt(probe.as_ref()).await {
                Ok(sample) => return self.commit(sample),
                Err(err) => warn!("clock sync via {} failed: {err}", probe.source()),
            }
        }

        if let Some(fallback) = &self.fallback {
            match self.attempt(fallback.as_ref()).await {
                Ok(sample) => return self.commit(sample),
                Err(err) => warn!("clock sync fallback {} failed: {err}", fallback.source()),
            }
        }

        let offset_ms = {
            let mut state = self.state.write();
            state.synchronized = false;
            state.offset_ms
        };
        error!("all clock sync methods failed, keeping offset {offset_ms} ms");
        SyncOutcome::Unavailable { offset_ms }
    }

    async fn attempt(&self, probe: &dyn TimeProbe) -> Result<ProbeSample, ProbeError> {
        let send = self.clock.monotonic();
        let server_ms = tokio::time::timeout(self.probe_timeout, probe.server_time_ms())
            .await
            .map_err(|_| ProbeError::Timeout(self.probe_timeout))??;
        let recv = self.clock.monotonic();

        Ok(ProbeSample {
            source: probe.source().to_string(),
            send,
            recv,
            server_ms,
        })
    }

    fn commit(&self, sample: ProbeSample) -> SyncOutcome {
        let rtt_ms = sample.rtt_ms();
        let offset_ms = sample
            .estimated_now_ms()
            .saturating_sub(self.clock.wall_ms());
        *self.state.write() = ClockState {
            offset_ms,
            synchronized: true,
        };
        info!(
            "clock synced via {} (rtt {rtt_ms} ms, offset {offset_ms} ms)",
            sample.source
        );

        SyncOutcome::Synced {
            offset_ms,
            source: sample.source,
            rtt_ms,
        }
    }
}
