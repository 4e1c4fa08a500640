//! Outbox drain pass: claim, dispatch, classify, record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    backoff,
    dispatcher::{DispatchError, Dispatcher},
    error::Result,
    store::OutboxStore,
    types::{OutboxMessage, ProcessReport},
};

/// Tunables for one drain pass, taken from `[outbox]` config.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Transient failures beyond this attempt count become dead.
    pub max_attempts: u32,
    /// Hard wall-clock budget per dispatcher call. A slow provider must not
    /// stall the whole drain cycle; a timed-out dispatch is transient.
    pub dispatch_timeout: Duration,
    /// Messages claimed per pass.
    pub batch_size: u32,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            max_attempts: lembra_core::config::DEFAULT_MAX_ATTEMPTS,
            dispatch_timeout: Duration::from_secs(
                lembra_core::config::DEFAULT_DISPATCH_TIMEOUT_SECS,
            ),
            batch_size: 25,
        }
    }
}

/// Drain all due messages through the matching dispatchers.
///
/// Claims `queued` rows whose retry time has arrived, runs each through
/// its channel dispatcher under a timeout, and records the outcome:
/// success → `sent`; transient failure → backoff re-queue or `dead` once
/// the attempt budget is spent; permanent failure → `failed`. `cancelled`
/// is consulted immediately before each dispatch so no reminder goes out
/// for a visit that was called off between enqueue and drain.
///
/// Dispatcher errors never propagate out of this function — they are
/// classified and recorded per message, and the pass always returns a
/// [`ProcessReport`].
pub async fn process_outbox(
    store: &OutboxStore,
    dispatchers: &[Box<dyn Dispatcher>],
    cancelled: &(dyn Fn(&str) -> bool + Send + Sync),
    opts: &ProcessOptions,
    now: DateTime<Utc>,
) -> Result<ProcessReport> {
    let claimed = store.claim_due(now, opts.batch_size)?;
    let mut report = ProcessReport {
        claimed: claimed.len(),
        ..ProcessReport::default()
    };
    if claimed.is_empty() {
        return Ok(report);
    }
    debug!(count = claimed.len(), "outbox drain started");

    for message in claimed {
        // Last-moment cancellation check: the appointment may have been
        // called off after this message was enqueued.
        if cancelled(&message.appointment_id) {
            store.mark_skipped(&message.key, "appointment cancelled")?;
            report.skipped += 1;
            continue;
        }

        let outcome = dispatch_one(dispatchers, &message, opts.dispatch_timeout).await;
        match outcome {
            Ok(()) => {
                store.mark_sent(&message.key)?;
                report.sent += 1;
            }
            Err(e) if e.is_transient() => {
                let attempts = message.attempts + 1;
                if attempts >= opts.max_attempts {
                    store.mark_dead(&message.key, &e.to_string())?;
                    report.dead += 1;
                } else {
                    let retry_at = backoff::next_retry_at(message.channel, attempts, now);
                    store.mark_retry(&message.key, &e.to_string(), retry_at)?;
                    report.retried += 1;
                }
            }
            Err(e) => {
                store.mark_failed(&message.key, &e.to_string())?;
                report.failed += 1;
            }
        }
    }

    info!(
        claimed = report.claimed,
        sent = report.sent,
        retried = report.retried,
        failed = report.failed,
        dead = report.dead,
        skipped = report.skipped,
        "outbox drain finished"
    );
    if report.dead > 0 {
        error!(dead = report.dead, "messages reached dead state — operator attention required");
    }
    Ok(report)
}

/// Route one message to its channel dispatcher under the timeout.
async fn dispatch_one(
    dispatchers: &[Box<dyn Dispatcher>],
    message: &OutboxMessage,
    timeout: Duration,
) -> std::result::Result<(), DispatchError> {
    let dispatcher = dispatchers
        .iter()
        .find(|d| d.channel() == message.channel)
        .ok_or_else(|| {
            // Wiring problem, not a provider hiccup: retrying cannot help.
            DispatchError::Permanent(format!("no dispatcher for channel {}", message.channel))
        })?;

    match tokio::time::timeout(timeout, dispatcher.dispatch(message)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(key = %message.key, timeout_ms = timeout.as_millis() as u64, "dispatch timed out");
            Err(DispatchError::Transient(format!(
                "dispatch timed out after {}ms",
                timeout.as_millis()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use lembra_core::{Channel, ReminderKey, ReminderKind};
    use rusqlite::Connection;

    use super::*;
    use crate::types::{MessageStatus, NewMessage};

    /// Scripted dispatcher: pops one outcome per call, succeeding once the
    /// script runs out.
    struct ScriptedDispatcher {
        channel: Channel,
        failures: Vec<DispatchError>,
        calls: AtomicU32,
    }

    impl ScriptedDispatcher {
        fn ok(channel: Channel) -> Box<dyn Dispatcher> {
            Box::new(Self {
                channel,
                failures: Vec::new(),
                calls: AtomicU32::new(0),
            })
        }

        fn failing(channel: Channel, failures: Vec<DispatchError>) -> Box<dyn Dispatcher> {
            Box::new(Self {
                channel,
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Dispatcher for ScriptedDispatcher {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn dispatch(&self, _msg: &OutboxMessage) -> std::result::Result<(), DispatchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.failures.get(call) {
                Some(DispatchError::Transient(s)) => Err(DispatchError::Transient(s.clone())),
                Some(DispatchError::Permanent(s)) => Err(DispatchError::Permanent(s.clone())),
                None => Ok(()),
            }
        }
    }

    fn store() -> OutboxStore {
        OutboxStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn email(appointment_id: &str) -> NewMessage {
        NewMessage {
            key: ReminderKey::new(
                appointment_id,
                ReminderKind::Lead { hours: 24 },
                Channel::Email,
            ),
            recipient: "joao@example.com".to_string(),
            subject: Some("Lembrete".to_string()),
            body: "corpo".to_string(),
        }
    }

    fn not_cancelled(_: &str) -> bool {
        false
    }

    #[tokio::test]
    async fn successful_dispatch_marks_sent() {
        let store = store();
        let msg = store.enqueue(email("apt-1")).unwrap();
        let dispatchers = vec![ScriptedDispatcher::ok(Channel::Email)];

        let report = process_outbox(
            &store,
            &dispatchers,
            &not_cancelled,
            &ProcessOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(store.get(&msg.key).unwrap().unwrap().status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn processed_key_is_not_redispatched() {
        let store = store();
        store.enqueue(email("apt-1")).unwrap();
        let dispatchers = vec![ScriptedDispatcher::ok(Channel::Email)];
        let opts = ProcessOptions::default();

        let first = process_outbox(&store, &dispatchers, &not_cancelled, &opts, Utc::now())
            .await
            .unwrap();
        assert_eq!(first.sent, 1);

        // Re-enqueue + re-process: the sent key stays untouched.
        store.enqueue(email("apt-1")).unwrap();
        let second = process_outbox(&store, &dispatchers, &not_cancelled, &opts, Utc::now())
            .await
            .unwrap();
        assert_eq!(second.claimed, 0);
        assert_eq!(second.sent, 0);
    }

    #[tokio::test]
    async fn transient_failures_back_off_then_die_at_budget() {
        let store = store();
        let msg = store.enqueue(email("apt-1")).unwrap();
        let dispatchers = vec![ScriptedDispatcher::failing(
            Channel::Email,
            (0..5)
                .map(|_| DispatchError::Transient("provider 503".into()))
                .collect(),
        )];
        let opts = ProcessOptions {
            max_attempts: 3,
            ..ProcessOptions::default()
        };

        // Drive the clock forward past each backoff instead of sleeping.
        let mut now = Utc::now();
        let mut gaps: Vec<i64> = Vec::new();
        for _ in 0..2 {
            let report = process_outbox(&store, &dispatchers, &not_cancelled, &opts, now)
                .await
                .unwrap();
            assert_eq!(report.retried, 1);
            let row = store.get(&msg.key).unwrap().unwrap();
            let retry_at: DateTime<Utc> = row
                .next_retry_at
                .as_deref()
                .unwrap()
                .parse()
                .unwrap();
            gaps.push((retry_at - now).num_seconds());
            now = retry_at + chrono::Duration::seconds(1);
        }
        assert!(gaps[1] > gaps[0], "backoff gaps must increase: {gaps:?}");

        // Third transient failure exhausts max_attempts=3.
        let report = process_outbox(&store, &dispatchers, &not_cancelled, &opts, now)
            .await
            .unwrap();
        assert_eq!(report.dead, 1);
        let row = store.get(&msg.key).unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Dead);
        assert_eq!(row.attempts, 3);
    }

    /// Dispatcher that never returns within any sane budget.
    struct HangingDispatcher;

    #[async_trait]
    impl Dispatcher for HangingDispatcher {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        async fn dispatch(&self, _msg: &OutboxMessage) -> std::result::Result<(), DispatchError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn timed_out_dispatch_is_requeued_as_transient() {
        let store = store();
        let msg = store.enqueue(email("apt-1")).unwrap();
        let dispatchers: Vec<Box<dyn Dispatcher>> = vec![Box::new(HangingDispatcher)];
        let opts = ProcessOptions {
            dispatch_timeout: Duration::from_millis(20),
            ..ProcessOptions::default()
        };

        let now = Utc::now();
        let report = process_outbox(&store, &dispatchers, &not_cancelled, &opts, now)
            .await
            .unwrap();

        assert_eq!(report.retried, 1);
        assert_eq!(report.sent, 0);
        let row = store.get(&msg.key).unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Queued);
        assert_eq!(row.attempts, 1);
        let retry_at: DateTime<Utc> = row.next_retry_at.as_deref().unwrap().parse().unwrap();
        assert!(retry_at > now, "timeout must defer the retry with a backoff");
        assert!(row.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn permanent_failure_is_never_retried() {
        let store = store();
        let msg = store.enqueue(email("apt-1")).unwrap();
        let dispatchers = vec![ScriptedDispatcher::failing(
            Channel::Email,
            vec![DispatchError::Permanent("invalid recipient".into())],
        )];
        let opts = ProcessOptions::default();

        let report = process_outbox(&store, &dispatchers, &not_cancelled, &opts, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        let row = store.get(&msg.key).unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Failed);
        assert!(row.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn cancelled_appointment_is_skipped_before_dispatch() {
        let store = store();
        let msg = store.enqueue(email("apt-cancelled")).unwrap();
        let dispatchers = vec![ScriptedDispatcher::ok(Channel::Email)];

        let report = process_outbox(
            &store,
            &dispatchers,
            &|id: &str| id == "apt-cancelled",
            &ProcessOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.sent, 0);
        assert_eq!(
            store.get(&msg.key).unwrap().unwrap().status,
            MessageStatus::Skipped
        );
    }

    #[tokio::test]
    async fn missing_dispatcher_is_a_permanent_failure() {
        let store = store();
        let msg = store.enqueue(email("apt-1")).unwrap();
        let dispatchers: Vec<Box<dyn Dispatcher>> = Vec::new();

        let report = process_outbox(
            &store,
            &dispatchers,
            &not_cancelled,
            &ProcessOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(
            store.get(&msg.key).unwrap().unwrap().status,
            MessageStatus::Failed
        );
    }
}
