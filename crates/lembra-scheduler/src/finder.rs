//! Pure due-window classification over a batch of appointments.
//!
//! For an appointment at `scheduled_at` and a lead time of `L` hours, the
//! reminder target is `scheduled_at - L` and the due window is
//! `[target - tolerance, target + tolerance]`. A 14:00 visit with a 24h
//! lead and the default 30-minute tolerance is due between 13:30 and 14:30
//! the day before.

use chrono::{Duration, NaiveDateTime};
use lembra_core::{Appointment, ReminderKind};

/// Where `now` falls relative to a reminder's due window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueState {
    /// Window opens in `minutes_until` minutes.
    NotYet { minutes_until: i64 },
    /// Inside the window; send now.
    Due,
    /// Window closed `late_minutes` ago. Whether to send anyway is a
    /// policy decision (grace period) taken by the engine, not here.
    Missed { late_minutes: i64 },
}

/// One (appointment, kind) pair the engine may need to act on.
#[derive(Debug, Clone)]
pub struct ReminderCandidate {
    pub appointment: Appointment,
    pub kind: ReminderKind,
    /// Clinic-local instant the reminder targets.
    pub target_at: NaiveDateTime,
    pub state: DueState,
}

/// Classify `now` against the window around `target_at`.
pub fn classify(now: NaiveDateTime, target_at: NaiveDateTime, tolerance_minutes: i64) -> DueState {
    let delta = (now - target_at).num_minutes();
    if delta < -tolerance_minutes {
        DueState::NotYet {
            minutes_until: -delta - tolerance_minutes,
        }
    } else if delta <= tolerance_minutes {
        DueState::Due
    } else {
        DueState::Missed {
            late_minutes: delta - tolerance_minutes,
        }
    }
}

/// Expand appointments into lead-reminder candidates and classify each one.
///
/// Cancelled appointments produce no candidates; their queued messages are
/// handled by the engine's cancellation sweep. Reminders whose records are
/// already terminal are filtered by the caller against the reminder store —
/// this function only looks at the clock.
pub fn find_due_reminders(
    appointments: &[Appointment],
    lead_hours: &[u32],
    now: NaiveDateTime,
    tolerance_minutes: i64,
) -> Vec<ReminderCandidate> {
    let mut candidates = Vec::new();
    for appointment in appointments {
        if appointment.is_cancelled() {
            continue;
        }
        for &hours in lead_hours {
            let target_at = appointment.scheduled_at() - Duration::hours(i64::from(hours));
            candidates.push(ReminderCandidate {
                appointment: appointment.clone(),
                kind: ReminderKind::Lead { hours },
                target_at,
                state: classify(now, target_at, tolerance_minutes),
            });
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use lembra_core::AppointmentStatus;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        date.parse::<NaiveDate>()
            .unwrap()
            .and_time(time.parse::<NaiveTime>().unwrap())
    }

    fn appointment(id: &str, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: id.to_string(),
            patient_name: "João Silva".to_string(),
            patient_email: "joao@example.com".to_string(),
            patient_phone: None,
            scheduled_date: "2024-01-15".parse().unwrap(),
            scheduled_time: "14:00:00".parse().unwrap(),
            status,
        }
    }

    #[test]
    fn window_is_symmetric_around_the_target() {
        // 14:00 visit, 24h lead: due window is Jan 14 [13:30, 14:30].
        let target = at("2024-01-14", "14:00:00");
        assert_eq!(classify(at("2024-01-14", "13:30:00"), target, 30), DueState::Due);
        assert_eq!(classify(at("2024-01-14", "14:15:00"), target, 30), DueState::Due);
        assert_eq!(classify(at("2024-01-14", "14:30:00"), target, 30), DueState::Due);
        assert_eq!(
            classify(at("2024-01-14", "13:29:00"), target, 30),
            DueState::NotYet { minutes_until: 1 }
        );
        assert_eq!(
            classify(at("2024-01-14", "15:00:00"), target, 30),
            DueState::Missed { late_minutes: 30 }
        );
    }

    #[test]
    fn each_lead_time_yields_its_own_candidate() {
        let appointments = vec![appointment("apt-1", AppointmentStatus::Scheduled)];
        let now = at("2024-01-14", "14:15:00");
        let candidates = find_due_reminders(&appointments, &[24, 2], now, 30);

        assert_eq!(candidates.len(), 2);
        let day_before = &candidates[0];
        assert_eq!(day_before.kind, ReminderKind::Lead { hours: 24 });
        assert_eq!(day_before.target_at, at("2024-01-14", "14:00:00"));
        assert_eq!(day_before.state, DueState::Due);

        let two_hours = &candidates[1];
        assert_eq!(two_hours.kind, ReminderKind::Lead { hours: 2 });
        assert!(matches!(two_hours.state, DueState::NotYet { .. }));
    }

    #[test]
    fn cancelled_appointments_yield_no_candidates() {
        let appointments = vec![appointment("apt-1", AppointmentStatus::Cancelled)];
        let now = at("2024-01-14", "14:00:00");
        assert!(find_due_reminders(&appointments, &[24, 2], now, 30).is_empty());
    }

    #[test]
    fn late_tick_reports_how_late() {
        let appointments = vec![appointment("apt-1", AppointmentStatus::Scheduled)];
        // 2h lead targets Jan 15 12:00; window closed at 12:30.
        let now = at("2024-01-15", "13:10:00");
        let candidates = find_due_reminders(&appointments, &[2], now, 30);
        assert_eq!(candidates[0].state, DueState::Missed { late_minutes: 40 });
    }
}
