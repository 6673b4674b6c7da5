//! Priority scoring for ingested items (pure, no DB).
//!
//! score = base (from the priority hint) + due-date urgency + freshness,
//! where freshness decays with a half-life on the item's age.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::types::PriorityHint;

const HIGH_BASE_SCORE: i32 = 60;
const NORMAL_BASE_SCORE: i32 = 40;
const LOW_BASE_SCORE: i32 = 20;

const FRESHNESS_MAX_POINTS: f64 = 10.0;
const FRESHNESS_HALF_LIFE_DAYS: f64 = 2.0;

const P1_THRESHOLD: i32 = 80;
const P2_THRESHOLD: i32 = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityScore {
    pub score: i32,
    /// `P1`, `P2` or `P3`
    pub label: &'static str,
    pub reason: String,
}

/// `base * 2^(-age_days / half_life_days)`
pub fn decayed_weight(base_weight: f64, age_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 || age_days < 0.0 {
        return base_weight;
    }
    base_weight * (2.0_f64).powf(-age_days / half_life_days)
}

fn urgency(due_date: Option<NaiveDate>, today: NaiveDate) -> (i32, String) {
    let Some(due_date) = due_date else {
        return (0, "No due date".to_string());
    };
    let delta = (due_date - today).num_days();
    if delta < 0 {
        let overdue_days = (-delta).min(i32::MAX as i64) as i32;
        (
            50 + overdue_days.min(10),
            format!(
                "Overdue by {} day{}",
                overdue_days,
                if overdue_days == 1 { "" } else { "s" }
            ),
        )
    } else if delta == 0 {
        (40, "Due today".to_string())
    } else if delta == 1 {
        (25, "Due tomorrow".to_string())
    } else if delta <= 3 {
        (15, format!("Due in {} days", delta))
    } else if delta <= 7 {
        (8, format!("Due in {} days", delta))
    } else {
        (0, format!("Due on {}", due_date))
    }
}

pub fn score_priority(
    due_date: Option<NaiveDate>,
    hint: Option<PriorityHint>,
    received_at: DateTime<Utc>,
    today: NaiveDate,
) -> PriorityScore {
    let (base, hint_label) = match hint {
        Some(PriorityHint::High) => (HIGH_BASE_SCORE, "high"),
        Some(PriorityHint::Low) => (LOW_BASE_SCORE, "low"),
        Some(PriorityHint::Normal) | None => (NORMAL_BASE_SCORE, "normal"),
    };
    let (urgency_points, due_label) = urgency(due_date, today);

    let today_start = today.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
    let age_days = today_start
        .map(|t| ((t - received_at).num_seconds() as f64 / 86400.0).max(0.0))
        .unwrap_or(0.0);
    let freshness_points =
        decayed_weight(FRESHNESS_MAX_POINTS, age_days, FRESHNESS_HALF_LIFE_DAYS).round() as i32;

    let score = base + urgency_points + freshness_points;
    let label = if score >= P1_THRESHOLD {
        "P1"
    } else if score >= P2_THRESHOLD {
        "P2"
    } else {
        "P3"
    };

    PriorityScore {
        score,
        label,
        reason: format!("{}, {} priority", due_label, hint_label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(date: NaiveDate) -> DateTime<Utc> {
        date.and_hms_opt(0, 0, 0).unwrap().and_utc()
    }

    #[test]
    fn test_half_life_gives_half_weight() {
        let result = decayed_weight(1.0, 2.0, 2.0);
        assert!((result - 0.5).abs() < 0.001, "expected ~0.5, got {}", result);
        assert_eq!(decayed_weight(0.8, -1.0, 2.0), 0.8);
    }

    #[test]
    fn test_overdue_high_priority_is_p1() {
        let today = day(2025, 3, 10);
        let score = score_priority(
            Some(day(2025, 3, 8)),
            Some(PriorityHint::High),
            at(today),
            today,
        );
        // 60 base + 52 overdue + 10 fresh
        assert_eq!(score.score, 122);
        assert_eq!(score.label, "P1");
        assert_eq!(score.reason, "Overdue by 2 days, high priority");
    }

    #[test]
    fn test_no_due_date_old_low_item_is_p3() {
        let today = day(2025, 3, 10);
        let score = score_priority(None, Some(PriorityHint::Low), at(day(2025, 2, 1)), today);
        assert_eq!(score.score, 20);
        assert_eq!(score.label, "P3");
        assert_eq!(score.reason, "No due date, low priority");
    }

    #[test]
    fn test_freshness_decays_with_age() {
        let today = day(2025, 3, 10);
        let fresh = score_priority(None, None, at(today), today);
        let two_days = score_priority(None, None, at(day(2025, 3, 8)), today);
        assert_eq!(fresh.score, 50);
        assert_eq!(two_days.score, 45);
        assert_eq!(fresh.label, "P2");
        assert_eq!(two_days.label, "P3");
    }

    #[test]
    fn test_due_window_points() {
        let today = day(2025, 3, 10);
        let old = at(day(2024, 1, 1));
        let points = |due| score_priority(Some(due), None, old, today).score - NORMAL_BASE_SCORE;
        assert_eq!(points(today), 40);
        assert_eq!(points(day(2025, 3, 11)), 25);
        assert_eq!(points(day(2025, 3, 13)), 15);
        assert_eq!(points(day(2025, 3, 17)), 8);
        assert_eq!(points(day(2025, 4, 1)), 0);
    }
}
