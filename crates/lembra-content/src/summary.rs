//! Human-readable pt-BR phrases for appointment dates and times.

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};

/// Pre-formatted pt-BR fragments for one appointment, shared by the email
/// and SMS templates so both always agree on the wording.
#[derive(Debug, Clone)]
pub struct AppointmentSummary {
    /// Weekday name, e.g. "segunda-feira".
    pub day_name: String,
    /// Date as dd/mm/yyyy.
    pub date: String,
    /// Time as HH:MM.
    pub time: String,
}

impl AppointmentSummary {
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            day_name: weekday_name_pt(date.weekday()).to_string(),
            date: date.format("%d/%m/%Y").to_string(),
            time: time.format("%H:%M").to_string(),
        }
    }
}

fn weekday_name_pt(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "segunda-feira",
        Weekday::Tue => "terça-feira",
        Weekday::Wed => "quarta-feira",
        Weekday::Thu => "quinta-feira",
        Weekday::Fri => "sexta-feira",
        Weekday::Sat => "sábado",
        Weekday::Sun => "domingo",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_date_time_and_weekday() {
        // 2024-01-15 is a Monday.
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let time = NaiveTime::from_hms_opt(14, 0, 0).unwrap();
        let summary = AppointmentSummary::new(date, time);
        assert_eq!(summary.day_name, "segunda-feira");
        assert_eq!(summary.date, "15/01/2024");
        assert_eq!(summary.time, "14:00");
    }
}
