//! Retry backoff policy for transient delivery failures.
//!
//! SMS retries faster and caps sooner than email. The first three attempts
//! double the base delay; later attempts grow by 1.5× from the third step,
//! so a flapping provider backs off quickly without pushing the retry past
//! the point where the reminder is still useful.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lembra_core::Channel;

/// Base delay before the first retry, per channel (seconds).
const BASE_SECS_EMAIL: u64 = 60;
const BASE_SECS_SMS: u64 = 30;
/// Upper bound on any single retry delay, per channel (seconds).
const MAX_SECS_EMAIL: u64 = 30 * 60;
const MAX_SECS_SMS: u64 = 15 * 60;
/// Jitter range added to every delay: 5–15 % of the delay.
const JITTER_MIN: f64 = 0.05;
const JITTER_SPAN: f64 = 0.10;

/// Deterministic retry delay (no jitter) after `attempt` completed failures
/// (`attempt` ≥ 1).
pub fn delay_secs(channel: Channel, attempt: u32) -> u64 {
    let base = match channel {
        Channel::Email => BASE_SECS_EMAIL,
        Channel::Sms => BASE_SECS_SMS,
    };
    let max = match channel {
        Channel::Email => MAX_SECS_EMAIL,
        Channel::Sms => MAX_SECS_SMS,
    };

    let attempt = attempt.max(1);
    let delay = if attempt <= 3 {
        // 1×, 2×, 4× the base.
        base.saturating_mul(1 << (attempt - 1))
    } else {
        // 8× the base, then 1.5× per further attempt.
        let slow = (base * 8) as f64 * 1.5f64.powi(attempt as i32 - 4);
        slow as u64
    };
    delay.min(max)
}

/// Instant of the next retry: `now` + channel delay + 5–15 % jitter.
///
/// The jitter spreads out retries after a provider outage so recovered
/// workers do not all fire at once.
pub fn next_retry_at(channel: Channel, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let delay = delay_secs(channel, attempt);
    let jittered = delay as f64 * (1.0 + JITTER_MIN + jitter_fraction() * JITTER_SPAN);
    now + ChronoDuration::seconds(jittered as i64)
}

/// Pseudo-random fraction in [0, 1) derived from the clock's sub-second
/// nanos, avoiding a rand dependency.
fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos) / f64::from(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_schedule_doubles_then_slows() {
        assert_eq!(delay_secs(Channel::Email, 1), 60);
        assert_eq!(delay_secs(Channel::Email, 2), 120);
        assert_eq!(delay_secs(Channel::Email, 3), 240);
        assert_eq!(delay_secs(Channel::Email, 4), 480);
        assert_eq!(delay_secs(Channel::Email, 5), 720);
    }

    #[test]
    fn sms_retries_faster_and_caps_sooner() {
        assert_eq!(delay_secs(Channel::Sms, 1), 30);
        assert!(delay_secs(Channel::Sms, 3) < delay_secs(Channel::Email, 3));
        // Deep attempt counts hit the per-channel ceiling.
        assert_eq!(delay_secs(Channel::Sms, 20), MAX_SECS_SMS);
        assert_eq!(delay_secs(Channel::Email, 20), MAX_SECS_EMAIL);
    }

    #[test]
    fn gaps_increase_strictly_even_with_jitter() {
        // Worst case: previous delay with max jitter vs next with min jitter.
        for channel in [Channel::Email, Channel::Sms] {
            for attempt in 1..6 {
                let prev_max = delay_secs(channel, attempt) as f64 * 1.15;
                let next_min = delay_secs(channel, attempt + 1) as f64 * 1.05;
                assert!(
                    next_min > prev_max,
                    "attempt {attempt} gap not increasing for {channel}"
                );
            }
        }
    }

    #[test]
    fn next_retry_is_in_the_future() {
        let now = Utc::now();
        let at = next_retry_at(Channel::Email, 1, now);
        assert!(at > now);
    }
}
