//! End-to-end engine tests: appointments in, dispatched messages out,
//! reminder lifecycle reconciled in between.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lembra_core::{
    config::{ClinicConfig, SchedulerConfig},
    Appointment, AppointmentStatus, Channel,
};
use lembra_outbox::{
    DispatchError, Dispatcher, MessageStatus, OutboxMessage, OutboxStore, ProcessOptions,
};
use lembra_scheduler::{
    InMemoryAppointmentStore, ReminderEngine, ReminderStatus, ReminderStore,
};
use rusqlite::Connection;

/// Test dispatcher: replays a script of outcomes (default success) and
/// records every key it was asked to deliver.
struct ScriptedDispatcher {
    channel: Channel,
    outcomes: Mutex<VecDeque<Result<(), DispatchError>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedDispatcher {
    fn ok(channel: Channel, calls: Arc<Mutex<Vec<String>>>) -> Box<dyn Dispatcher> {
        Box::new(Self {
            channel,
            outcomes: Mutex::new(VecDeque::new()),
            calls,
        })
    }

    fn scripted(
        channel: Channel,
        outcomes: Vec<Result<(), DispatchError>>,
        calls: Arc<Mutex<Vec<String>>>,
    ) -> Box<dyn Dispatcher> {
        Box::new(Self {
            channel,
            outcomes: Mutex::new(outcomes.into()),
            calls,
        })
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn dispatch(&self, msg: &OutboxMessage) -> std::result::Result<(), DispatchError> {
        self.calls.lock().unwrap().push(msg.key.clone());
        self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

struct Harness {
    appointments: Arc<InMemoryAppointmentStore>,
    reminders: ReminderStore,
    outbox: OutboxStore,
    engine: ReminderEngine,
    calls: Arc<Mutex<Vec<String>>>,
}

fn harness_with(
    max_attempts: u32,
    make_dispatchers: impl Fn(Arc<Mutex<Vec<String>>>) -> Vec<Box<dyn Dispatcher>>,
) -> Harness {
    let appointments = Arc::new(InMemoryAppointmentStore::new());
    let reminder_conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
    let outbox_conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
    let calls = Arc::new(Mutex::new(Vec::new()));

    // Clinic offset zero keeps clinic time equal to UTC in assertions.
    let clinic = ClinicConfig {
        utc_offset_minutes: 0,
        ..ClinicConfig::default()
    };
    let engine = ReminderEngine::new(
        Box::new(Arc::clone(&appointments)),
        ReminderStore::shared(Arc::clone(&reminder_conn)).unwrap(),
        OutboxStore::shared(Arc::clone(&outbox_conn)).unwrap(),
        make_dispatchers(Arc::clone(&calls)),
        clinic,
        SchedulerConfig::default(),
        ProcessOptions {
            max_attempts,
            dispatch_timeout: Duration::from_secs(5),
            batch_size: 25,
        },
    );
    Harness {
        appointments,
        reminders: ReminderStore::shared(reminder_conn).unwrap(),
        outbox: OutboxStore::shared(outbox_conn).unwrap(),
        engine,
        calls,
    }
}

fn harness() -> Harness {
    harness_with(5, |calls| {
        vec![
            ScriptedDispatcher::ok(Channel::Email, Arc::clone(&calls)),
            ScriptedDispatcher::ok(Channel::Sms, calls),
        ]
    })
}

fn joao(phone: Option<&str>) -> Appointment {
    Appointment {
        id: "apt-1".to_string(),
        patient_name: "João Silva".to_string(),
        patient_email: "joao@example.com".to_string(),
        patient_phone: phone.map(String::from),
        scheduled_date: "2024-01-15".parse().unwrap(),
        scheduled_time: "14:00:00".parse().unwrap(),
        status: AppointmentStatus::Scheduled,
    }
}

/// Inside the 24h window for a Jan 15 14:00 appointment.
fn day_before() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 14, 14, 15, 0).unwrap()
}

#[tokio::test]
async fn confirmation_and_day_before_reminder_are_delivered() {
    let h = harness();
    h.appointments.insert(joao(Some("(11) 98765-4321")));

    let report = h.engine.tick(day_before()).await.unwrap();
    assert_eq!(report.appointments, 1);
    assert_eq!(report.confirmations, 1);
    assert_eq!(report.reminders_enqueued, 1);
    assert_eq!(report.drain.sent, 3);
    assert_eq!(report.completed, 2);

    let mut calls = h.calls.lock().unwrap().clone();
    calls.sort();
    assert_eq!(
        calls,
        vec!["apt-1:24h:email", "apt-1:24h:sms", "apt-1:confirmation:email"]
    );

    // SMS went to the normalized E.164-style number, not the raw input.
    let sms = h.outbox.get("apt-1:24h:sms").unwrap().unwrap();
    assert_eq!(sms.recipient, "5511987654321");
    assert!(sms.body.chars().count() <= 160);

    let reminder = h
        .reminders
        .get("apt-1", "24h".parse().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(reminder.status, ReminderStatus::Sent);
    // 2h reminder exists but its window has not opened.
    let two_hour = h
        .reminders
        .get("apt-1", "2h".parse().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(two_hour.status, ReminderStatus::Pending);
}

#[tokio::test]
async fn overlapping_ticks_never_send_twice() {
    let h = harness();
    h.appointments.insert(joao(Some("(11) 98765-4321")));

    h.engine.tick(day_before()).await.unwrap();
    let first_calls = h.calls.lock().unwrap().len();

    // Same window, five minutes later.
    let later = day_before() + chrono::Duration::minutes(5);
    let report = h.engine.tick(later).await.unwrap();
    assert_eq!(report.confirmations, 0);
    assert_eq!(report.reminders_enqueued, 0);
    assert_eq!(report.drain.claimed, 0);
    assert_eq!(h.calls.lock().unwrap().len(), first_calls);
}

#[tokio::test]
async fn invalid_phone_falls_back_to_email_only() {
    let h = harness();
    h.appointments.insert(joao(Some("123")));

    let report = h.engine.tick(day_before()).await.unwrap();
    assert_eq!(report.reminders_enqueued, 1);
    assert_eq!(report.drain.sent, 2); // confirmation + reminder email, no SMS

    assert!(h.outbox.get("apt-1:24h:sms").unwrap().is_none());
    let reminder = h
        .reminders
        .get("apt-1", "24h".parse().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(reminder.status, ReminderStatus::Sent);
}

#[tokio::test]
async fn missed_window_is_skipped_not_sent() {
    let h = harness();
    h.appointments.insert(joao(None));

    // 24h window closed at 14:30 the day before; tick at 16:00.
    let late = Utc.with_ymd_and_hms(2024, 1, 14, 16, 0, 0).unwrap();
    let report = h.engine.tick(late).await.unwrap();
    assert_eq!(report.reminders_skipped, 1);

    let reminder = h
        .reminders
        .get("apt-1", "24h".parse().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(reminder.status, ReminderStatus::Skipped);
    // No message ever reached the outbox for the missed reminder.
    assert!(h.outbox.get("apt-1:24h:email").unwrap().is_none());
}

#[tokio::test]
async fn stale_pending_reminder_is_swept_on_a_single_tick() {
    let h = harness();
    // The appointment already happened: it never surfaces in `upcoming`,
    // so only the sweep can resolve its leftover record.
    let kind = "2h".parse().unwrap();
    let target = "2024-01-15T12:00:00".parse().unwrap();
    h.reminders.ensure("apt-1", kind, target).unwrap();

    // One isolated tick the day after, as a cron-style invocation runs it.
    let next_day = Utc.with_ymd_and_hms(2024, 1, 16, 9, 0, 0).unwrap();
    h.engine.tick(next_day).await.unwrap();

    let reminder = h.reminders.get("apt-1", kind).unwrap().unwrap();
    assert_eq!(reminder.status, ReminderStatus::Skipped);
    assert!(h.outbox.get("apt-1:2h:email").unwrap().is_none());
}

#[tokio::test]
async fn transient_failures_exhaust_into_dead() {
    let h = harness_with(2, |calls| {
        vec![
            ScriptedDispatcher::scripted(
                Channel::Email,
                vec![
                    Err(DispatchError::Transient("provider 503".into())),
                    Err(DispatchError::Transient("provider 503".into())),
                    Err(DispatchError::Transient("provider 503".into())),
                    Err(DispatchError::Transient("provider 503".into())),
                ],
                calls,
            ),
            // No SMS dispatcher needed: no phone on the appointment.
        ]
    });
    h.appointments.insert(joao(None));

    let report = h.engine.tick(day_before()).await.unwrap();
    assert_eq!(report.drain.retried, 2); // confirmation + 24h emails

    // Next tick after the retry backoff has elapsed.
    let later = day_before() + chrono::Duration::minutes(5);
    let report = h.engine.tick(later).await.unwrap();
    assert_eq!(report.drain.dead, 2);
    assert_eq!(report.dead, 2);

    let reminder = h
        .reminders
        .get("apt-1", "24h".parse().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(reminder.status, ReminderStatus::Dead);
    let message = h.outbox.get("apt-1:24h:email").unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Dead);
    assert_eq!(message.attempts, 2);
}

#[tokio::test]
async fn cancellation_between_ticks_drops_queued_messages() {
    let h = harness_with(5, |calls| {
        vec![
            ScriptedDispatcher::scripted(
                Channel::Email,
                vec![
                    Err(DispatchError::Transient("provider 503".into())),
                    Err(DispatchError::Transient("provider 503".into())),
                ],
                Arc::clone(&calls),
            ),
            ScriptedDispatcher::scripted(
                Channel::Sms,
                vec![Err(DispatchError::Transient("provider 503".into()))],
                calls,
            ),
        ]
    });
    h.appointments.insert(joao(Some("(11) 98765-4321")));

    // First tick: everything enqueued, every dispatch fails transiently.
    let report = h.engine.tick(day_before()).await.unwrap();
    assert_eq!(report.drain.retried, 3);

    h.appointments.cancel("apt-1");

    let later = day_before() + chrono::Duration::minutes(5);
    let report = h.engine.tick(later).await.unwrap();
    assert_eq!(report.drain.claimed, 0, "queued messages were swept, not claimed");

    for key in ["apt-1:confirmation:email", "apt-1:24h:email", "apt-1:24h:sms"] {
        let message = h.outbox.get(key).unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Skipped, "{key}");
    }
    let reminder = h
        .reminders
        .get("apt-1", "24h".parse().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(reminder.status, ReminderStatus::Skipped);
}
