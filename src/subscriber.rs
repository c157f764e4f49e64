//! Timeclock event subscriber.
//!
//! Listens on a Postgres NOTIFY channel for clock-in/clock-out events and
//! hands each parsed event to a [`TimeclockHandler`] (the print service in
//! production). A malformed payload is logged and dropped. Receive errors
//! back off exponentially; after [`ReconnectPolicy::max_consecutive_errors`]
//! failures in a row the listener is torn down and reconnected. The loop only
//! ends on cancellation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgListener, PgPoolOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DatabaseConfig;
use crate::error::BridgeResult;
use crate::models::{parse_timestamp, ClockEntry};

/// Payload published by the timeclock trigger.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimeclockEvent {
    pub employee_name: String,
    pub id: i64,
    pub clock_in: String,
    #[serde(default)]
    pub clock_out: Option<String>,
}

impl TimeclockEvent {
    /// The event as a one-entry clock history.
    pub fn entries(&self) -> Vec<ClockEntry> {
        let Some(clock_in) = parse_timestamp(&self.clock_in) else {
            return Vec::new();
        };
        vec![ClockEntry {
            id: self.id,
            clock_in,
            clock_out: self.clock_out.as_deref().and_then(parse_timestamp),
        }]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed timeclock payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("timeclock payload has unparseable clock_in: {0}")]
    Timestamp(String),
}

pub fn parse_timeclock_payload(payload: &str) -> Result<TimeclockEvent, PayloadError> {
    let event: TimeclockEvent = serde_json::from_str(payload)?;
    if parse_timestamp(&event.clock_in).is_none() {
        return Err(PayloadError::Timestamp(event.clock_in));
    }
    if let Some(out) = event.clock_out.as_deref().filter(|s| !s.trim().is_empty()) {
        if parse_timestamp(out).is_none() {
            return Err(PayloadError::Timestamp(out.to_string()));
        }
    }
    Ok(event)
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

#[async_trait]
pub trait NotificationSource: Send {
    /// Next payload. `Ok(None)` means the source is closed for good.
    async fn recv(&mut self) -> BridgeResult<Option<String>>;
}

#[async_trait]
pub trait TimeclockHandler: Send + Sync {
    async fn on_timeclock(&self, event: TimeclockEvent);
}

/// Produces fresh notification sources; called again after the previous one
/// has failed too often.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    type Source: NotificationSource;

    async fn connect(&self) -> BridgeResult<Self::Source>;
}

// ---------------------------------------------------------------------------
// Reconnect policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_consecutive_errors: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_consecutive_errors: 3,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based): doubling, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Why [`pump`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    Cancelled,
    Closed,
    TooManyErrors,
}

/// Drain `source` into `handler` until cancelled, closed, or failing.
pub async fn pump<S, H>(
    source: &mut S,
    handler: &H,
    policy: &ReconnectPolicy,
    shutdown: &CancellationToken,
) -> PumpExit
where
    S: NotificationSource + ?Sized,
    H: TimeclockHandler + ?Sized,
{
    let mut consecutive_errors = 0u32;
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => return PumpExit::Cancelled,
            next = source.recv() => next,
        };
        match next {
            Ok(Some(payload)) => {
                consecutive_errors = 0;
                match parse_timeclock_payload(&payload) {
                    Ok(event) => {
                        debug!(
                            employee = %event.employee_name,
                            id = event.id,
                            at = %event_time(&event),
                            "timeclock event received"
                        );
                        handler.on_timeclock(event).await;
                    }
                    Err(e) => warn!(error = %e, payload = %payload, "dropping timeclock notification"),
                }
            }
            Ok(None) => {
                warn!("notification source closed");
                return PumpExit::Closed;
            }
            Err(e) => {
                consecutive_errors += 1;
                error!(error = %e, attempt = consecutive_errors, "notification receive failed");
                if consecutive_errors >= policy.max_consecutive_errors {
                    return PumpExit::TooManyErrors;
                }
                let delay = policy.backoff(consecutive_errors);
                tokio::select! {
                    _ = shutdown.cancelled() => return PumpExit::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Connect, pump, and reconnect with backoff until `shutdown` fires.
pub async fn run<F, H>(factory: F, handler: Arc<H>, policy: ReconnectPolicy, shutdown: CancellationToken)
where
    F: SourceFactory,
    H: TimeclockHandler + ?Sized,
{
    let mut failures = 0u32;
    while !shutdown.is_cancelled() {
        match factory.connect().await {
            Ok(mut source) => {
                info!("timeclock subscriber connected");
                failures = 0;
                if pump(&mut source, handler.as_ref(), &policy, &shutdown).await == PumpExit::Cancelled {
                    break;
                }
            }
            Err(e) => error!(error = %e, "timeclock subscriber connect failed"),
        }
        failures += 1;
        let delay = policy.backoff(failures);
        info!(delay_ms = delay.as_millis() as u64, "reconnecting timeclock subscriber");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    info!("timeclock subscriber stopped");
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

pub struct PgNotificationSource {
    listener: PgListener,
}

#[async_trait]
impl NotificationSource for PgNotificationSource {
    async fn recv(&mut self) -> BridgeResult<Option<String>> {
        let notification = self.listener.recv().await?;
        Ok(Some(notification.payload().to_string()))
    }
}

pub struct PgSourceFactory {
    config: DatabaseConfig,
}

impl PgSourceFactory {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceFactory for PgSourceFactory {
    type Source = PgNotificationSource;

    async fn connect(&self) -> BridgeResult<PgNotificationSource> {
        let options = PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(&self.config.password)
            .database(&self.config.name);
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy_with(options);
        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(&self.config.channel).await?;
        info!(channel = %self.config.channel, host = %self.config.host, "listening for notifications");
        Ok(PgNotificationSource { listener })
    }
}

/// Event time for logs; falls back to now for unparseable input.
pub fn event_time(event: &TimeclockEvent) -> DateTime<Utc> {
    event
        .clock_out
        .as_deref()
        .and_then(parse_timestamp)
        .or_else(|| parse_timestamp(&event.clock_in))
        .unwrap_or_else(Utc::now)
}
