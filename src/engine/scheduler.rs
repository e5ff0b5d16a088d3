//! Time-based workflow triggers
//!
//! Supported schedule types:
//!
//! ```yaml
//! schedule: { type: interval, interval_minutes: 15 }
//! schedule: { type: cron, cron: "*/10 8-18 * * *" }   # minute and hour fields only
//! schedule: { type: daily, time: "07:30" }
//! ```
//!
//! Trigger times are computed on local wall-clock time. The engine polls
//! `Scheduler::due` once per tick, so firing granularity is the tick length.

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::SchedulingError;
use crate::workflow::definition::{ScheduleSpec, WorkflowDefinition};

// ============================================================================
// Cron fields
// ============================================================================

/// One field of the simplified cron syntax
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronField {
    Any,
    Every(u32),
    Values(Vec<u32>),
}

impl CronField {
    fn parse(text: &str, max: u32) -> Option<Self> {
        let text = text.trim();
        if text == "*" {
            return Some(CronField::Any);
        }
        if let Some(step) = text.strip_prefix("*/") {
            return step
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0 && *n <= max)
                .map(CronField::Every);
        }

        let mut values = Vec::new();
        for part in text.split(',') {
            match part.split_once('-') {
                Some((start, end)) => {
                    let start: u32 = start.trim().parse().ok()?;
                    let end: u32 = end.trim().parse().ok()?;
                    if start > end || end > max {
                        return None;
                    }
                    values.extend(start..=end);
                }
                None => {
                    let value: u32 = part.trim().parse().ok()?;
                    if value > max {
                        return None;
                    }
                    values.push(value);
                }
            }
        }
        values.sort_unstable();
        values.dedup();
        Some(CronField::Values(values))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Every(n) => value % n == 0,
            CronField::Values(values) => values.contains(&value),
        }
    }
}

// ============================================================================
// Trigger
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Interval { minutes: u64 },
    Cron { minute: CronField, hour: CronField },
    Daily { at: NaiveTime },
}

impl Trigger {
    pub fn from_spec(spec: &ScheduleSpec) -> Result<Self, SchedulingError> {
        match spec.kind.trim().to_lowercase().as_str() {
            "interval" => {
                let minutes = spec.interval_minutes.ok_or(SchedulingError::MissingField {
                    kind: "interval".to_string(),
                    field: "interval_minutes",
                })?;
                if minutes == 0 {
                    return Err(SchedulingError::InvalidValue {
                        field: "interval_minutes",
                        value: "0".to_string(),
                        reason: "must be at least 1".to_string(),
                    });
                }
                if interval_delta(minutes).is_none() {
                    return Err(SchedulingError::InvalidValue {
                        field: "interval_minutes",
                        value: minutes.to_string(),
                        reason: "interval is too large".to_string(),
                    });
                }
                Ok(Trigger::Interval { minutes })
            }
            "cron" => {
                let expr = spec.cron.as_deref().ok_or(SchedulingError::MissingField {
                    kind: "cron".to_string(),
                    field: "cron",
                })?;
                Self::parse_cron(expr)
            }
            "daily" => {
                let time = spec.time.as_deref().ok_or(SchedulingError::MissingField {
                    kind: "daily".to_string(),
                    field: "time",
                })?;
                let at = NaiveTime::parse_from_str(time.trim(), "%H:%M").map_err(|e| {
                    SchedulingError::InvalidValue {
                        field: "time",
                        value: time.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Trigger::Daily { at })
            }
            other => Err(SchedulingError::UnknownKind(other.to_string())),
        }
    }

    /// Parse the minute and hour fields of a cron expression. A minute field
    /// that cannot be parsed falls back to the top of the hour; an unparsable
    /// hour field matches every hour.
    fn parse_cron(expr: &str) -> Result<Self, SchedulingError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.is_empty() {
            return Err(SchedulingError::InvalidValue {
                field: "cron",
                value: expr.to_string(),
                reason: "empty expression".to_string(),
            });
        }

        let minute = CronField::parse(fields[0], 59).unwrap_or_else(|| {
            warn!(cron = %expr, "Unsupported cron minute field, using minute 0");
            CronField::Values(vec![0])
        });
        let hour = match fields.get(1) {
            Some(field) => CronField::parse(field, 23).unwrap_or_else(|| {
                warn!(cron = %expr, "Unsupported cron hour field, matching every hour");
                CronField::Any
            }),
            None => CronField::Any,
        };
        Ok(Trigger::Cron { minute, hour })
    }

    /// First fire time strictly after `after`, or `None` when it falls
    /// outside the representable calendar
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Trigger::Interval { minutes } => after.checked_add_signed(interval_delta(*minutes)?),
            Trigger::Daily { at } => {
                let today = after.date().and_time(*at);
                if today > after {
                    Some(today)
                } else {
                    today.checked_add_signed(Duration::days(1))
                }
            }
            Trigger::Cron { minute, hour } => {
                let start = after
                    .with_second(0)
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(after)
                    .checked_add_signed(Duration::minutes(1))?;
                let mut candidate = start;
                // Every minute/hour combination repeats within a day
                for _ in 0..(24 * 60) {
                    if minute.matches(candidate.minute()) && hour.matches(candidate.hour()) {
                        return Some(candidate);
                    }
                    candidate = candidate.checked_add_signed(Duration::minutes(1))?;
                }
                start.checked_add_signed(Duration::days(1))
            }
        }
    }
}

fn interval_delta(minutes: u64) -> Option<Duration> {
    Duration::try_minutes(i64::try_from(minutes).ok()?)
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Debug, Clone)]
struct Entry {
    spec: ScheduleSpec,
    trigger: Trigger,
    next_run: NaiveDateTime,
}

/// Upcoming run of a scheduled definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledRun {
    pub workflow_id: String,
    pub next_run: NaiveDateTime,
}

/// Tracks the next fire time of every scheduled definition
#[derive(Debug, Default)]
pub struct Scheduler {
    entries: HashMap<String, Entry>,
    /// Specs already reported as invalid, so they are logged once
    rejected: HashMap<String, ScheduleSpec>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile triggers with the currently loaded definitions
    pub fn sync(&mut self, definitions: &[Arc<WorkflowDefinition>], now: NaiveDateTime) {
        let mut seen = Vec::with_capacity(definitions.len());

        for definition in definitions {
            let Some(spec) = &definition.schedule else {
                continue;
            };
            seen.push(definition.id.clone());

            if self.entries.get(&definition.id).is_some_and(|e| &e.spec == spec)
                || self.rejected.get(&definition.id) == Some(spec)
            {
                continue;
            }

            let scheduled = Trigger::from_spec(spec).and_then(|trigger| {
                let next_run = trigger.next_after(now).ok_or_else(|| SchedulingError::InvalidValue {
                    field: "schedule",
                    value: spec.kind.clone(),
                    reason: "next run is out of range".to_string(),
                })?;
                Ok((trigger, next_run))
            });

            match scheduled {
                Ok((trigger, next_run)) => {
                    info!(workflow_id = %definition.id, %next_run, "Scheduled workflow");
                    self.rejected.remove(&definition.id);
                    self.entries.insert(
                        definition.id.clone(),
                        Entry {
                            spec: spec.clone(),
                            trigger,
                            next_run,
                        },
                    );
                }
                Err(e) => {
                    warn!(workflow_id = %definition.id, error = %e, "Ignoring schedule");
                    self.entries.remove(&definition.id);
                    self.rejected.insert(definition.id.clone(), spec.clone());
                }
            }
        }

        self.entries.retain(|id, _| seen.contains(id));
        self.rejected.retain(|id, _| seen.contains(id));
    }

    /// Definition ids whose trigger fired at or before `now`, advancing each
    /// to its following fire time
    pub fn due(&mut self, now: NaiveDateTime) -> Vec<String> {
        let mut due = Vec::new();
        let mut exhausted = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            if entry.next_run <= now {
                match entry.trigger.next_after(now) {
                    Some(next_run) => entry.next_run = next_run,
                    None => exhausted.push(id.clone()),
                }
                due.push(id.clone());
            }
        }
        for id in exhausted {
            warn!(workflow_id = %id, "Schedule has no further runs, dropping it");
            if let Some(entry) = self.entries.remove(&id) {
                self.rejected.insert(id, entry.spec);
            }
        }
        due.sort();
        due
    }

    pub fn upcoming(&self) -> Vec<ScheduledRun> {
        let mut runs: Vec<ScheduledRun> = self
            .entries
            .iter()
            .map(|(id, entry)| ScheduledRun {
                workflow_id: id.clone(),
                next_run: entry.next_run,
            })
            .collect();
        runs.sort_by(|a, b| a.next_run.cmp(&b.next_run).then(a.workflow_id.cmp(&b.workflow_id)));
        runs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn spec(value: serde_json::Value) -> ScheduleSpec {
        serde_json::from_value(value).unwrap()
    }

    fn definition(id: &str, schedule: serde_json::Value) -> Arc<WorkflowDefinition> {
        Arc::new(
            serde_json::from_value(json!({
                "id": id,
                "name": id,
                "version": "1",
                "steps": [{"id": "s", "type": "delay", "name": "s"}],
                "schedule": schedule
            }))
            .unwrap(),
        )
    }

    #[test]
    fn test_interval() {
        let trigger =
            Trigger::from_spec(&spec(json!({"type": "interval", "interval_minutes": 15}))).unwrap();
        assert_eq!(trigger.next_after(at(10, 0)).unwrap(), at(10, 15));
    }

    #[test]
    fn test_daily() {
        let trigger = Trigger::from_spec(&spec(json!({"type": "daily", "time": "07:30"}))).unwrap();
        assert_eq!(trigger.next_after(at(6, 0)).unwrap(), at(7, 30));
        assert_eq!(trigger.next_after(at(7, 30)).unwrap(), at(7, 30) + Duration::days(1));
    }

    #[test]
    fn test_cron_every_n_minutes() {
        let trigger =
            Trigger::from_spec(&spec(json!({"type": "cron", "cron": "*/10 * * * *"}))).unwrap();
        assert_eq!(trigger.next_after(at(9, 3)).unwrap(), at(9, 10));
        assert_eq!(trigger.next_after(at(9, 10)).unwrap(), at(9, 20));
    }

    #[test]
    fn test_cron_fixed_minute_and_hour_range() {
        let trigger =
            Trigger::from_spec(&spec(json!({"type": "cron", "cron": "30 8-9 * * *"}))).unwrap();
        assert_eq!(trigger.next_after(at(8, 45)).unwrap(), at(9, 30));
        assert_eq!(trigger.next_after(at(9, 30)).unwrap(), at(8, 30) + Duration::days(1));
    }

    #[test]
    fn test_cron_unsupported_minute_defaults_to_top_of_hour() {
        let trigger =
            Trigger::from_spec(&spec(json!({"type": "cron", "cron": "L * * * *"}))).unwrap();
        assert_eq!(trigger.next_after(at(9, 3)).unwrap(), at(10, 0));
    }

    #[test]
    fn test_invalid_specs() {
        assert_eq!(
            Trigger::from_spec(&spec(json!({"type": "weekly"}))),
            Err(SchedulingError::UnknownKind("weekly".to_string()))
        );
        assert!(matches!(
            Trigger::from_spec(&spec(json!({"type": "interval"}))),
            Err(SchedulingError::MissingField { .. })
        ));
        assert!(matches!(
            Trigger::from_spec(&spec(json!({"type": "daily", "time": "25:00"}))),
            Err(SchedulingError::InvalidValue { .. })
        ));
        assert!(matches!(
            Trigger::from_spec(&spec(json!({"type": "interval", "interval_minutes": u64::MAX}))),
            Err(SchedulingError::InvalidValue { field: "interval_minutes", .. })
        ));
    }

    #[test]
    fn test_huge_interval_is_ignored_without_panicking() {
        let trigger = Trigger::from_spec(&spec(
            json!({"type": "interval", "interval_minutes": 1_000_000_000_000u64}),
        ))
        .unwrap();
        assert_eq!(trigger.next_after(at(10, 0)), None);

        let mut scheduler = Scheduler::new();
        let defs = vec![
            definition(
                "forever",
                json!({"type": "interval", "interval_minutes": 1_000_000_000_000u64}),
            ),
            definition("every5", json!({"type": "interval", "interval_minutes": 5})),
        ];
        scheduler.sync(&defs, at(10, 0));
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.due(at(10, 5)), vec!["every5".to_string()]);

        // Already rejected, so a later sync neither panics nor re-adds it
        scheduler.sync(&defs, at(10, 6));
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_scheduler_due_and_advance() {
        let mut scheduler = Scheduler::new();
        let defs = vec![
            definition("every5", json!({"type": "interval", "interval_minutes": 5})),
            definition("bad", json!({"type": "fortnightly"})),
        ];
        scheduler.sync(&defs, at(10, 0));
        assert_eq!(scheduler.len(), 1);

        assert!(scheduler.due(at(10, 4)).is_empty());
        assert_eq!(scheduler.due(at(10, 5)), vec!["every5".to_string()]);
        assert!(scheduler.due(at(10, 6)).is_empty());
        assert_eq!(scheduler.upcoming()[0].next_run, at(10, 10));
    }

    #[test]
    fn test_sync_removes_and_replaces() {
        let mut scheduler = Scheduler::new();
        scheduler.sync(
            &[definition("job", json!({"type": "daily", "time": "07:00"}))],
            at(6, 0),
        );
        assert_eq!(scheduler.upcoming()[0].next_run, at(7, 0));

        scheduler.sync(
            &[definition("job", json!({"type": "daily", "time": "08:00"}))],
            at(6, 0),
        );
        assert_eq!(scheduler.upcoming()[0].next_run, at(8, 0));

        scheduler.sync(&[], at(6, 0));
        assert!(scheduler.is_empty());
    }
}
