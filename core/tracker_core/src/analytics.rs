//! Streak and activity aggregation over one owner's daily logs.
//!
//! Input records may arrive in any order; everything here sorts first and never
//! mutates its input. All functions are total.

use crate::model::DailyLogRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use time::Date;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreakSummary {
    /// Ascending, unique.
    pub active_dates: Vec<Date>,
    pub longest_streak: u32,
    pub current_streak: u32,
    /// One increment per (day, topic) with a done task.
    pub topic_counts: BTreeMap<String, u32>,
    /// Every logged day, active or not.
    pub activity_map: BTreeMap<Date, bool>,
}

pub fn compute_analytics(records: &[DailyLogRecord], now: Date) -> StreakSummary {
    let mut summary = StreakSummary::default();

    for record in records {
        let active = record.is_active();
        let flag = summary.activity_map.entry(record.log_date).or_insert(false);
        *flag |= active;
        for topic in record.done_topics() {
            *summary.topic_counts.entry(topic.to_string()).or_insert(0) += 1;
        }
    }

    // BTreeMap keys are already sorted and unique.
    summary.active_dates = summary
        .activity_map
        .iter()
        .filter(|(_, active)| **active)
        .map(|(d, _)| *d)
        .collect();

    summary.longest_streak = longest_run(&summary.active_dates);
    summary.current_streak = current_run(&summary.active_dates, now);
    summary
}

fn is_next_day(prev: Date, next: Date) -> bool {
    (next - prev).whole_days() == 1
}

fn longest_run(dates: &[Date]) -> u32 {
    let Some(first) = dates.first() else {
        return 0;
    };
    let mut longest = 1;
    let mut run = 1;
    let mut prev = *first;
    for d in &dates[1..] {
        if is_next_day(prev, *d) {
            run += 1;
        } else {
            run = 1;
        }
        longest = longest.max(run);
        prev = *d;
    }
    longest
}

fn current_run(dates: &[Date], now: Date) -> u32 {
    let Some(last) = dates.last() else {
        return 0;
    };
    // Logged yesterday still counts: the learner has until the end of today.
    if (now - *last).whole_days() > 1 {
        return 0;
    }
    let mut run = 1;
    for pair in dates.windows(2).rev() {
        if !is_next_day(pair[0], pair[1]) {
            break;
        }
        run += 1;
    }
    run
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CalendarDay {
    pub date: String,
    pub active: bool,
}

/// Every date in `[start, end]` with its activity flag. Empty when `start > end`.
pub fn calendar_range(summary: &StreakSummary, start: Date, end: Date) -> Vec<CalendarDay> {
    let mut out = Vec::new();
    let mut day = start;
    while day <= end {
        out.push(CalendarDay {
            date: day.to_string(),
            active: summary.active_dates.binary_search(&day).is_ok(),
        });
        match day.next_day() {
            Some(next) => day = next,
            None => break,
        }
    }
    out
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct HeatmapPoint {
    pub date: String,
    pub value: u8,
}

/// Wire shape of `/analytics_data`.
#[derive(Clone, Debug, Serialize)]
pub struct AnalyticsReport {
    #[serde(rename = "topicCounts")]
    pub topic_counts: BTreeMap<String, u32>,
    #[serde(rename = "longestStreak")]
    pub longest_streak: u32,
    #[serde(rename = "currentStreak")]
    pub current_streak: u32,
    pub heatmap_data: Vec<HeatmapPoint>,
    pub activity_map: BTreeMap<String, bool>,
}

impl From<StreakSummary> for AnalyticsReport {
    fn from(s: StreakSummary) -> Self {
        AnalyticsReport {
            heatmap_data: s
                .active_dates
                .iter()
                .map(|d| HeatmapPoint {
                    date: d.to_string(),
                    value: 1,
                })
                .collect(),
            activity_map: s
                .activity_map
                .iter()
                .map(|(d, active)| (d.to_string(), *active))
                .collect(),
            topic_counts: s.topic_counts,
            longest_streak: s.longest_streak,
            current_streak: s.current_streak,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse_date, TaskEntry};

    fn day(s: &str) -> Date {
        parse_date(s).unwrap()
    }

    fn record(date: &str, tasks: &[(&str, &str, bool)]) -> DailyLogRecord {
        DailyLogRecord {
            owner: "local".to_string(),
            log_date: day(date),
            notes: None,
            completed_tasks: tasks
                .iter()
                .map(|(topic, task, done)| {
                    (
                        topic.to_string(),
                        TaskEntry {
                            task: task.to_string(),
                            done: *done,
                        },
                    )
                })
                .collect(),
        }
    }

    fn active(date: &str) -> DailyLogRecord {
        record(date, &[("python", "practice", true)])
    }

    #[test]
    fn no_records_yields_zeroes() {
        let s = compute_analytics(&[], day("2024-01-05"));
        assert_eq!(s.longest_streak, 0);
        assert_eq!(s.current_streak, 0);
        assert!(s.topic_counts.is_empty());
        assert!(s.active_dates.is_empty());
        assert!(s.activity_map.is_empty());
    }

    #[test]
    fn single_active_day_current_only_if_today_or_yesterday() {
        let records = [active("2024-01-05")];
        for (now, current) in [
            ("2024-01-05", 1),
            ("2024-01-06", 1),
            ("2024-01-07", 0),
            ("2024-03-01", 0),
        ] {
            let s = compute_analytics(&records, day(now));
            assert_eq!(s.longest_streak, 1, "now={now}");
            assert_eq!(s.current_streak, current, "now={now}");
        }
    }

    #[test]
    fn consecutive_run() {
        let records: Vec<_> = (1..=5).map(|d| active(&format!("2024-01-0{d}"))).collect();
        let s = compute_analytics(&records, day("2024-01-05"));
        assert_eq!(s.longest_streak, 5);
        assert_eq!(s.current_streak, 5);
    }

    #[test]
    fn broken_run() {
        let records = [active("2024-01-01"), active("2024-01-02"), active("2024-01-05")];
        let s = compute_analytics(&records, day("2024-01-05"));
        assert_eq!(s.longest_streak, 2);
        assert_eq!(s.current_streak, 1);
    }

    #[test]
    fn stale_streak_is_zero() {
        let records: Vec<_> = (1..=5).map(|d| active(&format!("2024-01-0{d}"))).collect();
        let s = compute_analytics(&records, day("2024-01-08"));
        assert_eq!(s.longest_streak, 5);
        assert_eq!(s.current_streak, 0);
    }

    #[test]
    fn unsorted_input_is_sorted_before_run_detection() {
        let records = [
            active("2024-01-03"),
            active("2024-01-01"),
            active("2024-01-04"),
            active("2024-01-02"),
            active("2023-12-20"),
        ];
        let s = compute_analytics(&records, day("2024-01-05"));
        assert_eq!(s.longest_streak, 4);
        assert_eq!(s.current_streak, 4);
        assert_eq!(s.active_dates.first(), Some(&day("2023-12-20")));
    }

    #[test]
    fn runs_cross_month_and_year_boundaries() {
        let records = [active("2023-12-30"), active("2023-12-31"), active("2024-01-01")];
        let s = compute_analytics(&records, day("2024-01-02"));
        assert_eq!(s.longest_streak, 3);
        assert_eq!(s.current_streak, 3);
    }

    #[test]
    fn inactive_day_only_in_activity_map() {
        let records = [
            record("2024-01-04", &[("python", "x", false)]),
            active("2024-01-05"),
        ];
        let s = compute_analytics(&records, day("2024-01-05"));
        assert_eq!(s.active_dates, vec![day("2024-01-05")]);
        assert_eq!(s.activity_map.get(&day("2024-01-04")), Some(&false));
        assert_eq!(s.activity_map.get(&day("2024-01-05")), Some(&true));
        assert_eq!(s.current_streak, 1);

        let report = AnalyticsReport::from(s);
        assert_eq!(report.heatmap_data.len(), 1);
        assert_eq!(report.heatmap_data[0].date, "2024-01-05");
        assert_eq!(report.activity_map.get("2024-01-04"), Some(&false));
    }

    #[test]
    fn notes_without_tasks_are_not_active() {
        let mut r = record("2024-01-05", &[]);
        r.notes = Some("read a blog post".to_string());
        let s = compute_analytics(&[r], day("2024-01-05"));
        assert_eq!(s.longest_streak, 0);
        assert_eq!(s.current_streak, 0);
        assert_eq!(s.activity_map.len(), 1);
    }

    #[test]
    fn topic_counts_once_per_day() {
        let records = [
            record("2024-01-01", &[("python", "a", true), ("linux", "b", false)]),
            record("2024-01-03", &[("python", "c", true), ("htb", "d", true)]),
        ];
        let s = compute_analytics(&records, day("2024-01-03"));
        assert_eq!(s.topic_counts.get("python"), Some(&2));
        assert_eq!(s.topic_counts.get("htb"), Some(&1));
        assert_eq!(s.topic_counts.get("linux"), None);
    }

    #[test]
    fn calendar_range_marks_every_day() {
        let records = [active("2024-01-02"), record("2024-01-03", &[])];
        let s = compute_analytics(&records, day("2024-01-03"));
        let cal = calendar_range(&s, day("2024-01-01"), day("2024-01-04"));
        let flags: Vec<_> = cal.iter().map(|c| (c.date.as_str(), c.active)).collect();
        assert_eq!(
            flags,
            vec![
                ("2024-01-01", false),
                ("2024-01-02", true),
                ("2024-01-03", false),
                ("2024-01-04", false),
            ]
        );
        assert!(calendar_range(&s, day("2024-01-04"), day("2024-01-01")).is_empty());
    }

    #[test]
    fn report_serializes_with_wire_names() {
        let s = compute_analytics(&[active("2024-01-05")], day("2024-01-05"));
        let v = serde_json::to_value(AnalyticsReport::from(s)).unwrap();
        assert_eq!(v["topicCounts"]["python"], 1);
        assert_eq!(v["longestStreak"], 1);
        assert_eq!(v["currentStreak"], 1);
        assert_eq!(v["heatmap_data"][0]["date"], "2024-01-05");
        assert_eq!(v["heatmap_data"][0]["value"], 1);
        assert_eq!(v["activity_map"]["2024-01-05"], true);
    }
}
