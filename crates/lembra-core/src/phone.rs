//! Brazilian phone number validation and normalization.
//!
//! Accepted digit forms (anything else is rejected):
//!
//! | Digits | Form                                        |
//! |--------|---------------------------------------------|
//! | 13     | `55` + 2-digit area + 9-digit mobile        |
//! | 12     | `55` + 2-digit area + 8-digit landline      |
//! | 11     | 2-digit area + 9-digit mobile               |
//! | 10     | 2-digit area + 8-digit landline             |
//! | 9      | mobile without area code                    |
//! | 8      | landline without area code                  |
//!
//! Area codes run 11–99, mobiles start with 9, landlines with 2–8.
//! A number that fails here is a permanent (non-retryable) delivery error.

/// Whether `raw` is a dispatchable Brazilian phone number in any accepted form.
pub fn validate_brazilian_phone(raw: &str) -> bool {
    normalize_brazilian_phone(raw).is_some()
}

/// Normalize `raw` into digits-only E.164-like form prefixed with `55`,
/// e.g. `"(11) 99999-9999"` → `"5511999999999"`. Returns `None` when the
/// number is not a valid Brazilian phone.
pub fn normalize_brazilian_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 8 || digits.len() > 15 {
        return None;
    }

    // Strip the country code from full-form numbers before shape checks.
    let national = if digits.len() >= 12 && digits.starts_with("55") {
        &digits[2..]
    } else {
        digits.as_str()
    };

    let valid = match national.len() {
        // Area code + subscriber number.
        10 | 11 => valid_area_code(&national[..2]) && valid_subscriber(&national[2..]),
        // Subscriber number only (area code unknown to us).
        8 | 9 => valid_subscriber(national),
        _ => false,
    };

    valid.then(|| format!("55{national}"))
}

/// Mask a recipient for logging: first 5 characters plus `***`.
/// Patient contact details never appear in full in the logs.
pub fn mask_recipient(recipient: &str) -> String {
    let head: String = recipient.chars().take(5).collect();
    format!("{head}***")
}

fn valid_area_code(area: &str) -> bool {
    matches!(area.parse::<u32>(), Ok(n) if (11..=99).contains(&n))
}

/// 9-digit numbers are mobiles (leading 9); 8-digit numbers are landlines
/// (leading 2–8).
fn valid_subscriber(number: &str) -> bool {
    let first = match number.chars().next() {
        Some(c) => c,
        None => return false,
    };
    match number.len() {
        9 => first == '9',
        8 => ('2'..='8').contains(&first),
        _ => false,
    }
}
