//! The orchestrator: ticks on an interval and moves reminders through
//! their lifecycle.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use lembra_content::{generate_content, generate_email_subject, generate_sms_content, TemplateContext};
use lembra_core::{
    config::{ClinicConfig, SchedulerConfig},
    phone::normalize_brazilian_phone,
    Appointment, Channel, ReminderKey, ReminderKind,
};
use lembra_outbox::{
    process_outbox, Dispatcher, MessageStatus, NewMessage, OutboxStore, ProcessOptions,
    ProcessReport,
};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{
    appointments::AppointmentStore,
    finder::{find_due_reminders, DueState},
    store::{ReminderStatus, ReminderStore},
    error::Result,
};

/// What one tick did, for logging and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// Upcoming appointments observed.
    pub appointments: usize,
    /// Booking confirmations enqueued this tick.
    pub confirmations: usize,
    /// Lead reminders enqueued this tick.
    pub reminders_enqueued: usize,
    /// Lead reminders skipped (window missed beyond grace, or unrenderable).
    pub reminders_skipped: usize,
    /// Outbox drain summary.
    pub drain: ProcessReport,
    /// Reminders reconciled to `sent` this tick.
    pub completed: usize,
    /// Reminders reconciled to `dead` this tick.
    pub dead: usize,
}

/// Ticking orchestrator over the appointment, reminder and outbox stores.
pub struct ReminderEngine {
    appointments: Box<dyn AppointmentStore>,
    reminders: ReminderStore,
    outbox: OutboxStore,
    dispatchers: Vec<Box<dyn Dispatcher>>,
    clinic: ClinicConfig,
    scheduler: SchedulerConfig,
    process: ProcessOptions,
}

impl ReminderEngine {
    pub fn new(
        appointments: Box<dyn AppointmentStore>,
        reminders: ReminderStore,
        outbox: OutboxStore,
        dispatchers: Vec<Box<dyn Dispatcher>>,
        clinic: ClinicConfig,
        scheduler: SchedulerConfig,
        process: ProcessOptions,
    ) -> Self {
        Self {
            appointments,
            reminders,
            outbox,
            dispatchers,
            clinic,
            scheduler,
            process,
        }
    }

    /// Wall-clock UTC converted to clinic-local time.
    fn clinic_now(&self, now_utc: DateTime<Utc>) -> NaiveDateTime {
        (now_utc + Duration::minutes(i64::from(self.clinic.utc_offset_minutes))).naive_utc()
    }

    /// Tick until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            self.scheduler.tick_secs,
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_secs = self.scheduler.tick_secs, "reminder engine started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reminder engine stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One full pass: sweep stale reminders, ensure records, enqueue due
    /// messages, drain the outbox, reconcile reminder status from the
    /// outbox rows.
    pub async fn tick(&self, now_utc: DateTime<Utc>) -> Result<TickReport> {
        let now = self.clinic_now(now_utc);

        // Pending reminders whose window (plus grace) already closed can
        // never be sent: their appointments no longer surface in
        // `upcoming`, so the finder would never see them again. The sweep
        // runs every tick so single-shot (cron) invocations report them
        // skipped too.
        let cutoff =
            now - Duration::minutes(self.scheduler.tolerance_minutes + self.scheduler.grace_minutes);
        self.reminders.sweep_missed(cutoff)?;

        let upcoming = self.appointments.upcoming(now)?;
        let mut report = TickReport {
            appointments: upcoming.len(),
            ..TickReport::default()
        };
        debug!(appointments = upcoming.len(), clinic_now = %now, "tick started");

        for appointment in &upcoming {
            if appointment.is_cancelled() {
                self.sweep_cancelled(appointment)?;
                continue;
            }
            report.confirmations += self.raise_confirmation(appointment, now)?;
        }

        let candidates = find_due_reminders(
            &upcoming,
            &self.scheduler.lead_hours,
            now,
            self.scheduler.tolerance_minutes,
        );
        for candidate in candidates {
            let record = self.reminders.ensure(
                &candidate.appointment.id,
                candidate.kind,
                candidate.target_at,
            )?;
            if record.status != ReminderStatus::Pending {
                continue;
            }
            match candidate.state {
                DueState::NotYet { .. } => {}
                DueState::Due => {
                    let enqueued =
                        self.enqueue_reminder(&candidate.appointment, candidate.kind)?;
                    report.reminders_enqueued += enqueued;
                    report.reminders_skipped += 1 - enqueued;
                }
                DueState::Missed { late_minutes } => {
                    if late_minutes <= self.scheduler.grace_minutes {
                        warn!(
                            appointment_id = %candidate.appointment.id,
                            kind = %candidate.kind,
                            late_minutes,
                            "window missed but within grace, sending anyway"
                        );
                        report.reminders_enqueued +=
                            self.enqueue_reminder(&candidate.appointment, candidate.kind)?;
                    } else {
                        warn!(
                            appointment_id = %candidate.appointment.id,
                            kind = %candidate.kind,
                            late_minutes,
                            "window missed beyond grace, skipping"
                        );
                        self.reminders
                            .mark_skipped(&candidate.appointment.id, candidate.kind)?;
                        report.reminders_skipped += 1;
                    }
                }
            }
        }

        let appointments = &self.appointments;
        report.drain = process_outbox(
            &self.outbox,
            &self.dispatchers,
            &|id| appointments.is_cancelled(id).unwrap_or(false),
            &self.process,
            now_utc,
        )
        .await?;

        let (completed, dead) = self.reconcile()?;
        report.completed = completed;
        report.dead = dead;

        info!(
            appointments = report.appointments,
            confirmations = report.confirmations,
            enqueued = report.reminders_enqueued,
            skipped = report.reminders_skipped,
            sent = report.drain.sent,
            completed = report.completed,
            dead = report.dead,
            "tick finished"
        );
        Ok(report)
    }

    /// Raise the booking-confirmation email for an appointment seen for the
    /// first time. Returns 1 if a confirmation was enqueued.
    fn raise_confirmation(&self, appointment: &Appointment, now: NaiveDateTime) -> Result<usize> {
        let record = self
            .reminders
            .ensure(&appointment.id, ReminderKind::Confirmation, now)?;
        if record.status != ReminderStatus::Pending {
            return Ok(0);
        }

        let ctx = template_context(appointment, None);
        let subject = generate_email_subject(&self.clinic, &ctx);
        let body = match generate_content(&self.clinic, &ctx) {
            Ok(body) => body,
            Err(e) => {
                warn!(appointment_id = %appointment.id, error = %e, "confirmation unrenderable, skipping");
                self.reminders
                    .mark_skipped(&appointment.id, ReminderKind::Confirmation)?;
                return Ok(0);
            }
        };

        self.outbox.enqueue(NewMessage {
            key: ReminderKey::new(&appointment.id, ReminderKind::Confirmation, Channel::Email),
            recipient: appointment.patient_email.clone(),
            subject: Some(subject),
            body,
        })?;
        self.reminders
            .mark_enqueued(&appointment.id, ReminderKind::Confirmation)?;
        Ok(1)
    }

    /// Render and enqueue one lead reminder: email always, SMS when the
    /// patient's phone validates as a Brazilian number. Returns 1 when the
    /// reminder was enqueued, 0 when it had to be skipped.
    fn enqueue_reminder(&self, appointment: &Appointment, kind: ReminderKind) -> Result<usize> {
        let ctx = template_context(appointment, kind.lead_hours());

        // All-or-nothing rendering: if any body fails, nothing reaches the
        // outbox for this reminder.
        let subject = generate_email_subject(&self.clinic, &ctx);
        let email_body = match generate_content(&self.clinic, &ctx) {
            Ok(body) => body,
            Err(e) => {
                warn!(appointment_id = %appointment.id, kind = %kind, error = %e, "reminder unrenderable, skipping");
                self.reminders.mark_skipped(&appointment.id, kind)?;
                return Ok(0);
            }
        };

        let sms = match appointment
            .patient_phone
            .as_deref()
            .and_then(normalize_brazilian_phone)
        {
            // Same context already validated by the email render above, so
            // this cannot fail.
            Some(number) => generate_sms_content(&self.clinic, &ctx)
                .ok()
                .map(|body| (number, body)),
            None => {
                if appointment.patient_phone.is_some() {
                    warn!(appointment_id = %appointment.id, "invalid phone number, sending email only");
                }
                None
            }
        };

        self.outbox.enqueue(NewMessage {
            key: ReminderKey::new(&appointment.id, kind, Channel::Email),
            recipient: appointment.patient_email.clone(),
            subject: Some(subject),
            body: email_body,
        })?;
        if let Some((number, body)) = sms {
            self.outbox.enqueue(NewMessage {
                key: ReminderKey::new(&appointment.id, kind, Channel::Sms),
                recipient: number,
                subject: None,
                body,
            })?;
        }
        self.reminders.mark_enqueued(&appointment.id, kind)?;
        Ok(1)
    }

    /// Drop queued messages and open reminder records for a cancelled
    /// appointment. Already-sent messages are left alone.
    fn sweep_cancelled(&self, appointment: &Appointment) -> Result<()> {
        let dropped = self
            .outbox
            .skip_for_appointment(&appointment.id, "appointment cancelled")?;
        if dropped > 0 {
            info!(appointment_id = %appointment.id, dropped, "cancelled appointment swept");
        }
        let mut kinds = vec![ReminderKind::Confirmation];
        kinds.extend(
            self.scheduler
                .lead_hours
                .iter()
                .map(|&hours| ReminderKind::Lead { hours }),
        );
        for kind in kinds {
            if let Some(record) = self.reminders.get(&appointment.id, kind)? {
                if record.status == ReminderStatus::Pending {
                    self.reminders.mark_skipped(&appointment.id, kind)?;
                }
            }
        }
        Ok(())
    }

    /// Resolve every `enqueued` reminder from the outbox rows it fanned out
    /// to. The outbox is the single source of truth: a reminder is `sent`
    /// only once every delivered channel confirms, `dead` as soon as any
    /// channel exhausts its budget, and left `enqueued` while anything is
    /// still in flight.
    fn reconcile(&self) -> Result<(usize, usize)> {
        let mut completed = 0;
        let mut dead = 0;
        for reminder in self.reminders.enqueued()? {
            let prefix = ReminderKey::reminder_prefix(&reminder.appointment_id, reminder.kind);
            let messages = self.outbox.by_key_prefix(&prefix)?;
            if messages
                .iter()
                .any(|m| matches!(m.status, MessageStatus::Queued | MessageStatus::Sending))
            {
                continue;
            }
            if messages
                .iter()
                .any(|m| matches!(m.status, MessageStatus::Dead | MessageStatus::Failed))
            {
                self.reminders.mark_dead(&reminder.appointment_id, reminder.kind)?;
                dead += 1;
            } else if messages.iter().any(|m| m.status == MessageStatus::Sent) {
                self.reminders.mark_sent(&reminder.appointment_id, reminder.kind)?;
                completed += 1;
            } else {
                // Nothing in flight, nothing delivered: everything was
                // skipped (cancellation between enqueue and drain).
                self.reminders
                    .mark_skipped(&reminder.appointment_id, reminder.kind)?;
            }
        }
        Ok((completed, dead))
    }
}

fn template_context(appointment: &Appointment, lead_hours: Option<u32>) -> TemplateContext {
    TemplateContext {
        patient_name: appointment.patient_name.clone(),
        appointment_date: appointment.scheduled_date,
        appointment_time: appointment.scheduled_time,
        lead_hours,
    }
}
