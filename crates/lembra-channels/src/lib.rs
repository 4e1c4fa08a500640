//! `lembra-channels` — provider-facing dispatcher implementations.
//!
//! One [`lembra_outbox::Dispatcher`] per delivery channel: email through
//! Resend, SMS through Zenvia. Each wraps exactly one outbound HTTP call
//! and classifies the result as transient or permanent so the outbox can
//! apply the right retry policy. No dispatcher ever mutates outbox or
//! reminder state.

pub mod email;
pub mod sms;

pub use email::EmailDispatcher;
pub use sms::SmsDispatcher;

use lembra_outbox::DispatchError;

/// Map an HTTP status from a provider into the retry taxonomy.
///
/// 429 and 5xx are provider hiccups worth retrying; any other non-success
/// status means the request itself is bad and retrying cannot help.
fn classify_status(provider: &str, status: reqwest::StatusCode, body: &str) -> DispatchError {
    let detail = format!("{provider} returned {status}: {}", excerpt(body));
    if status.as_u16() == 429 || status.is_server_error() {
        DispatchError::Transient(detail)
    } else {
        DispatchError::Permanent(detail)
    }
}

/// First line of a provider error body, capped for log hygiene.
fn excerpt(body: &str) -> String {
    body.lines().next().unwrap_or("").chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        for code in [429u16, 500, 503] {
            let status = reqwest::StatusCode::from_u16(code).unwrap();
            assert!(classify_status("resend", status, "").is_transient());
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        for code in [400u16, 401, 422] {
            let status = reqwest::StatusCode::from_u16(code).unwrap();
            assert!(!classify_status("zenvia", status, "bad request").is_transient());
        }
    }

    #[test]
    fn excerpt_keeps_only_the_first_line() {
        assert_eq!(excerpt("line one\nline two"), "line one");
    }
}
