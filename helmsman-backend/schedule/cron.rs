//! 5-field cron evaluation: validation, next-occurrence math, and the
//! human-readable descriptions shown in the schedule UI.

use chrono::{DateTime, Duration, Utc};
use croner::Cron;

/// True when `expr` is a parseable 5-field cron expression
/// (minute hour day-of-month month day-of-week).
pub fn validate_cron(expr: &str) -> bool {
    if expr.split_whitespace().count() != 5 {
        return false;
    }
    Cron::new(expr).parse().is_ok()
}

/// The next firing strictly after `base`, or None when the expression is
/// invalid or has no future occurrence (e.g. `0 0 31 2 *`).
pub fn calculate_next_run(expr: &str, base: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let cron = Cron::new(expr).parse().ok()?;
    cron.find_next_occurrence(&base, false).ok()
}

/// The next `count` firings after `from`.
pub fn next_runs(expr: &str, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    let Ok(cron) = Cron::new(expr).parse() else {
        return Vec::new();
    };
    let mut runs = Vec::new();
    let mut cursor = from;
    for _ in 0..count {
        match cron.find_next_occurrence(&cursor, false) {
            Ok(next) => {
                runs.push(next);
                cursor = next + Duration::seconds(1);
            }
            Err(_) => break,
        }
    }
    runs
}

/// Shortcut descriptions for the common patterns, with a generic fallback.
/// Anything unrecognizable comes back verbatim.
pub fn describe_cron(expr: &str) -> String {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() != 5 {
        return expr.to_string();
    }
    let (minute, hour, day, month, weekday) = (parts[0], parts[1], parts[2], parts[3], parts[4]);

    match expr {
        "0 * * * *" => return "Every hour".to_string(),
        "0 0 * * *" => return "Every day at midnight".to_string(),
        "0 2 * * *" => return "Every day at 2:00 AM".to_string(),
        "0 0 * * 0" => return "Every Sunday at midnight".to_string(),
        "0 0 1 * *" => return "First day of every month".to_string(),
        _ => {}
    }

    let mut desc: Vec<String> = Vec::new();

    if minute == "0" && hour != "*" {
        if let Ok(h) = hour.parse::<u32>() {
            let period = if h < 12 { "AM" } else { "PM" };
            let h12 = match h {
                0 => 12,
                1..=12 => h,
                _ => h - 12,
            };
            desc.push(format!("at {h12}:00 {period}"));
        } else {
            desc.push(format!("at hour {hour}"));
        }
    } else if minute != "*" {
        desc.push(format!("at minute {minute}"));
    }

    if day == "*" && month == "*" && weekday == "*" {
        desc.insert(0, "Daily".to_string());
    } else if weekday != "*" {
        let day_name = match weekday {
            "0" | "7" => Some("Sunday"),
            "1" => Some("Monday"),
            "2" => Some("Tuesday"),
            "3" => Some("Wednesday"),
            "4" => Some("Thursday"),
            "5" => Some("Friday"),
            "6" => Some("Saturday"),
            _ => None,
        };
        match day_name {
            Some(name) => desc.insert(0, format!("Every {name}")),
            None => desc.insert(0, format!("On weekday {weekday}")),
        }
    }

    if desc.is_empty() {
        expr.to_string()
    } else {
        desc.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn accepts_standard_expressions() {
        for expr in ["* * * * *", "*/5 * * * *", "0 2 * * *", "30 8 * * 1-5", "0 0 1 * *"] {
            assert!(validate_cron(expr), "rejected {expr}");
        }
    }

    #[test]
    fn rejects_malformed_expressions() {
        for expr in ["", "not a cron", "60 * * * *", "* * * *", "* * * * * *", "0 25 * * *"] {
            assert!(!validate_cron(expr), "accepted {expr}");
        }
    }

    #[test]
    fn next_run_is_strictly_future_and_matches_fields() {
        let now = Utc::now();
        let next = calculate_next_run("30 * * * *", now).unwrap();
        assert!(next > now);
        assert_eq!(next.minute(), 30);
        assert_eq!(next.second(), 0);

        let next = calculate_next_run("0 2 * * *", now).unwrap();
        assert!(next > now);
        assert_eq!(next.hour(), 2);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn every_five_minutes_advances_by_five() {
        let now = Utc::now();
        let first = calculate_next_run("*/5 * * * *", now).unwrap();
        let second = calculate_next_run("*/5 * * * *", first).unwrap();
        assert_eq!((second - first).num_minutes(), 5);
        assert_eq!(first.minute() % 5, 0);
    }

    #[test]
    fn impossible_date_has_no_occurrence() {
        // February 31st never comes.
        assert!(calculate_next_run("0 0 31 2 *", Utc::now()).is_none());
    }

    #[test]
    fn next_runs_are_increasing() {
        let runs = next_runs("*/15 * * * *", Utc::now(), 5);
        assert_eq!(runs.len(), 5);
        for pair in runs.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn describe_shortcuts() {
        assert_eq!(describe_cron("0 * * * *"), "Every hour");
        assert_eq!(describe_cron("0 0 * * *"), "Every day at midnight");
        assert_eq!(describe_cron("0 2 * * *"), "Every day at 2:00 AM");
        assert_eq!(describe_cron("0 0 * * 0"), "Every Sunday at midnight");
        assert_eq!(describe_cron("0 0 1 * *"), "First day of every month");
    }

    #[test]
    fn describe_generic_construction() {
        assert_eq!(describe_cron("0 14 * * *"), "Daily at 2:00 PM");
        assert_eq!(describe_cron("0 8 * * 1"), "Every Monday at 8:00 AM");
        assert_eq!(describe_cron("30 * * * 5"), "Every Friday at minute 30");
        assert_eq!(describe_cron("0 0 * * *"), "Every day at midnight");
    }

    #[test]
    fn describe_step_minutes() {
        assert_eq!(describe_cron("*/7 * * * *"), "Daily at minute */7");
    }

    #[test]
    fn describe_falls_back_to_expression() {
        // Day-of-month restriction with wildcard minute has no shortcut.
        assert_eq!(describe_cron("* * 5 * *"), "* * 5 * *");
        assert_eq!(describe_cron("nonsense"), "nonsense");
    }
}
