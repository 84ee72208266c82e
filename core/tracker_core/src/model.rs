use serde::Deserialize;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, fmt, str::FromStr};
use time::Date;

/// Lookup key for a topic: trimmed and lowercased.
///
/// Every place that uses a topic as a key (history rows, topic counts, lookups)
/// goes through this so `" HTB "` and `"htb"` address the same history.
pub fn normalize_topic(topic: &str) -> String {
    topic.trim().to_lowercase()
}

/// Canonical task state for one topic on one day.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskEntry {
    pub task: String,
    pub done: bool,
}

/// Task value as it appears on the wire or in stored JSON.
///
/// Older logs stored the task text directly; newer ones store `{task, done}`.
/// Anything else is kept so it can be treated as not done instead of failing.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawTaskEntry {
    Legacy(String),
    Structured {
        #[serde(default)]
        task: String,
        #[serde(default)]
        done: bool,
    },
    Unknown(Value),
}

impl RawTaskEntry {
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(RawTaskEntry::Unknown(value))
    }

    pub fn into_entry(self) -> TaskEntry {
        match self {
            RawTaskEntry::Legacy(text) => TaskEntry {
                done: !text.trim().is_empty(),
                task: text,
            },
            RawTaskEntry::Structured { task, done } => TaskEntry { task, done },
            RawTaskEntry::Unknown(_) => TaskEntry::default(),
        }
    }
}

/// Normalize a `completed_tasks` object into canonical entries keyed by normalized topic.
///
/// Keys that collide after normalization merge: the topic is done if any of them is.
pub fn normalize_tasks(raw: &Map<String, Value>) -> BTreeMap<String, TaskEntry> {
    let mut out: BTreeMap<String, TaskEntry> = BTreeMap::new();
    for (topic, value) in raw {
        let key = normalize_topic(topic);
        if key.is_empty() {
            continue;
        }
        let entry = RawTaskEntry::from_value(value.clone()).into_entry();
        match out.get_mut(&key) {
            Some(existing) => {
                if entry.done && !existing.done {
                    *existing = entry;
                }
            }
            None => {
                out.insert(key, entry);
            }
        }
    }
    out
}

/// One owner's log for one calendar day.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DailyLogRecord {
    pub owner: String,
    pub log_date: Date,
    pub notes: Option<String>,
    pub completed_tasks: BTreeMap<String, TaskEntry>,
}

impl DailyLogRecord {
    /// Topics with a done task on this day.
    pub fn done_topics(&self) -> impl Iterator<Item = &str> {
        self.completed_tasks
            .iter()
            .filter(|(_, e)| e.done)
            .map(|(k, _)| k.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.done_topics().next().is_some()
    }
}

/// Requested difficulty for a generated task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Level {
    #[default]
    Basic,
    Intermediate,
    Advanced,
    Pro,
    Scripting,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "Basic",
            Self::Intermediate => "Intermediate",
            Self::Advanced => "Advanced",
            Self::Pro => "Pro",
            Self::Scripting => "Scripting",
        }
    }

    /// Difficulty guide embedded in the prompt.
    pub fn guide(&self) -> &'static str {
        match self {
            Self::Basic => "fundamentals only: core concepts, single commands or short exercises a beginner can finish in one sitting",
            Self::Intermediate => "combine several concepts, read documentation, and complete a small multi-step exercise",
            Self::Advanced => "non-trivial problem solving with less guidance: chained techniques, debugging, or a realistic scenario",
            Self::Pro => "expert-level work: research-grade challenges, optimisation, or building a tool from scratch",
            Self::Scripting => "automate the task: write a script or small program that solves or speeds up the exercise",
        }
    }

    /// History tag prepended to an accepted suggestion, e.g. `(Advanced)`.
    pub fn tag(&self) -> String {
        format!("({})", self.as_str())
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" => Ok(Self::Advanced),
            "pro" => Ok(Self::Pro),
            "scripting" => Ok(Self::Scripting),
            _ => Err(()),
        }
    }
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(date: &str) -> Option<Date> {
    let parts: Vec<&str> = date.trim().split('-').collect();
    if parts.len() != 3 || parts[0].len() != 4 || parts[1].len() != 2 || parts[2].len() != 2 {
        return None;
    }
    let y: i32 = parts[0].parse().ok()?;
    let m: u8 = parts[1].parse().ok()?;
    let d: u8 = parts[2].parse().ok()?;
    let month = time::Month::try_from(m).ok()?;
    Date::from_calendar_date(y, month, d).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_topic_trims_and_lowercases() {
        assert_eq!(normalize_topic(" HTB "), "htb");
        assert_eq!(normalize_topic("Linux Shell"), "linux shell");
    }

    #[test]
    fn raw_task_entry_shapes() {
        let legacy = RawTaskEntry::from_value(json!("read chapter 3")).into_entry();
        assert!(legacy.done);
        assert_eq!(legacy.task, "read chapter 3");

        let blank = RawTaskEntry::from_value(json!("   ")).into_entry();
        assert!(!blank.done);

        let structured = RawTaskEntry::from_value(json!({"task": "x", "done": false})).into_entry();
        assert_eq!(structured, TaskEntry { task: "x".to_string(), done: false });

        let missing_done = RawTaskEntry::from_value(json!({"task": "x"})).into_entry();
        assert!(!missing_done.done);

        let weird = RawTaskEntry::from_value(json!(42)).into_entry();
        assert_eq!(weird, TaskEntry::default());

        let bad_done = RawTaskEntry::from_value(json!({"task": "x", "done": "yes"})).into_entry();
        assert!(!bad_done.done);
    }

    #[test]
    fn normalize_tasks_merges_colliding_topics() {
        let raw = json!({
            "Python": {"task": "a", "done": false},
            " python ": {"task": "b", "done": true},
            "": "ignored",
        });
        let tasks = normalize_tasks(raw.as_object().unwrap());
        assert_eq!(tasks.len(), 1);
        let e = &tasks["python"];
        assert!(e.done);
        assert_eq!(e.task, "b");
    }

    #[test]
    fn level_parse_and_tag() {
        assert_eq!("advanced".parse::<Level>(), Ok(Level::Advanced));
        assert_eq!(" Pro ".parse::<Level>(), Ok(Level::Pro));
        assert!("expert".parse::<Level>().is_err());
        assert_eq!(Level::Scripting.tag(), "(Scripting)");
        assert_eq!(Level::default(), Level::Basic);
    }

    #[test]
    fn parse_date_accepts_only_calendar_dates() {
        let d = parse_date("2024-02-29").unwrap();
        assert_eq!(d.to_string(), "2024-02-29");
        assert!(parse_date("2023-02-29").is_none());
        assert!(parse_date("2024-1-5").is_none());
        assert!(parse_date("not-a-date").is_none());
        assert!(parse_date("").is_none());
    }
}
