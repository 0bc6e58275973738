use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serenity::all::MessageId;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::registry::{Countdown, Registry, SignupRecord};

const FINE_TICK: StdDuration = StdDuration::from_secs(5);
const COARSE_TICK: StdDuration = StdDuration::from_secs(60);
const MIN_TICK: StdDuration = StdDuration::from_millis(250);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the wall clock once and then advances with the monotonic timer, so adjusting the
/// system clock never moves a running countdown.
pub struct MonotonicClock {
    anchor: DateTime<Utc>,
    started: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            anchor: Utc::now(),
            started: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        self.anchor + Duration::from_std(self.started.elapsed()).unwrap_or_else(|_| Duration::zero())
    }
}

#[derive(Debug)]
pub enum PublishError {
    /// The announcement (or its channel) no longer exists. Never retried.
    Gone,
    Other(anyhow::Error),
}

impl From<anyhow::Error> for PublishError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err)
    }
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Gone => write!(f, "the announcement message no longer exists"),
            Self::Other(err) => write!(f, "failed to update the announcement: {}", err),
        }
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Other(err) => Some(err.as_ref()),
            Self::Gone => None,
        }
    }
}

/// Where refreshed announcements go.
#[async_trait]
pub trait Announcer: Send + Sync {
    /// Re-renders the record's announcement as of `now`, replacing the message text when
    /// `content` is given.
    async fn edit(
        &self,
        record: &SignupRecord,
        now: DateTime<Utc>,
        content: Option<String>,
    ) -> Result<(), PublishError>;

    async fn publish(&self, record: &SignupRecord, now: DateTime<Utc>) -> Result<(), PublishError> {
        self.edit(record, now, None).await
    }

    /// One-off follow-up after the deadline passed.
    async fn announce_expiry(&self, record: &SignupRecord) -> Result<(), PublishError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// This refresher performed the terminal transition.
    Expired,
    /// The record was already expired when the refresher looked at it.
    AlreadyExpired,
    NoDeadline,
    Gone,
    Cancelled,
    Missing,
}

/// Time until the next wake-up: coarse while far from the deadline, fine in the last minute,
/// never past the deadline itself.
pub fn tick_interval(remaining: Duration) -> StdDuration {
    let remaining = remaining.to_std().unwrap_or(StdDuration::ZERO);
    let step = if remaining <= COARSE_TICK {
        FINE_TICK
    } else {
        COARSE_TICK
    };
    step.min(remaining).max(MIN_TICK)
}

#[derive(Clone)]
pub struct Refresher {
    registry: Arc<Registry>,
    announcer: Arc<dyn Announcer>,
    clock: Arc<dyn Clock>,
}

impl Refresher {
    pub fn new(registry: Arc<Registry>, announcer: Arc<dyn Announcer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            announcer,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn spawn(&self, id: MessageId) -> JoinHandle<RefreshOutcome> {
        let refresher = self.clone();
        tokio::spawn(async move {
            let outcome = refresher.run(id).await;
            debug!(message = %id, ?outcome, "refresher finished");
            outcome
        })
    }

    /// Keeps the announcement's countdown current until the deadline, then performs the
    /// terminal update once. Stops early when the record is removed or the process shuts down.
    pub async fn run(&self, id: MessageId) -> RefreshOutcome {
        let Some(cancel) = self.registry.cancellation(id).await else {
            return RefreshOutcome::Missing;
        };
        loop {
            let Some(record) = self.registry.find(id).await else {
                return RefreshOutcome::Missing;
            };
            let wait = match record.countdown(self.clock.now()) {
                None => return RefreshOutcome::NoDeadline,
                Some(Countdown::Expired) => return self.expire(id).await,
                Some(Countdown::Counting(remaining)) => tick_interval(remaining),
            };

            tokio::select! {
                _ = cancel.cancelled() => return RefreshOutcome::Cancelled,
                _ = tokio::time::sleep(wait) => {}
            }

            let Some(record) = self.registry.find(id).await else {
                return RefreshOutcome::Missing;
            };
            let now = self.clock.now();
            if let Some(Countdown::Counting(_)) = record.countdown(now) {
                match self.announcer.publish(&record, now).await {
                    Ok(()) => {}
                    Err(PublishError::Gone) => {
                        info!(message = %id, "announcement is gone, stopping its countdown");
                        return RefreshOutcome::Gone;
                    }
                    Err(error) => warn!(message = %id, %error, "countdown refresh failed"),
                }
            }
        }
    }

    async fn expire(&self, id: MessageId) -> RefreshOutcome {
        if !self.registry.mark_expired(id).await {
            return RefreshOutcome::AlreadyExpired;
        }
        let Some(record) = self.registry.find(id).await else {
            return RefreshOutcome::Missing;
        };
        info!(message = %id, family = record.family().label(), "deadline reached");

        match self.announcer.publish(&record, self.clock.now()).await {
            Ok(()) => {}
            Err(PublishError::Gone) => return RefreshOutcome::Gone,
            Err(error) => warn!(message = %id, %error, "final countdown refresh failed"),
        }
        match self.announcer.announce_expiry(&record).await {
            Ok(()) => {}
            Err(PublishError::Gone) => return RefreshOutcome::Gone,
            Err(error) => warn!(message = %id, %error, "expiry announcement failed"),
        }
        RefreshOutcome::Expired
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        Publish {
            id: MessageId,
            expired: bool,
            at: DateTime<Utc>,
            content: Option<String>,
        },
        Expiry,
    }

    /// Announcer that records what it was asked to do.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub(crate) calls: Mutex<Vec<Call>>,
        /// Every edit fails as if the message had been deleted.
        pub(crate) gone: bool,
        /// Number of upcoming edits that fail with a retryable error.
        pub(crate) transient_failures: AtomicUsize,
    }

    impl Recorder {
        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn gone() -> Self {
            Self {
                gone: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Announcer for Recorder {
        async fn edit(
            &self,
            record: &SignupRecord,
            now: DateTime<Utc>,
            content: Option<String>,
        ) -> Result<(), PublishError> {
            if self.gone {
                return Err(PublishError::Gone);
            }
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(anyhow::anyhow!("rate limited").into());
            }
            self.calls.lock().unwrap().push(Call::Publish {
                id: record.id,
                expired: record.expired,
                at: now,
                content,
            });
            Ok(())
        }

        async fn announce_expiry(&self, _record: &SignupRecord) -> Result<(), PublishError> {
            self.calls.lock().unwrap().push(Call::Expiry);
            Ok(())
        }
    }
}
