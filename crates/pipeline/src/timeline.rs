//! Timeline extraction from step payloads.
//!
//! Steps with a [`TimelineKind`] declare when content happens. The quality
//! gate reads those declarations through this module, and the context
//! accumulator keeps the accepted [`TimelineSlot`]s so later steps are checked
//! against everything already scheduled.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payload::{field_u32, select};
use crate::{StepId, TimelineKind};

/// What a [`TimelineSlot`] occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// A week's theme.
    WeekTheme,
    /// A single scheduled post.
    Post,
}

/// One scheduled item carried in the context ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineSlot {
    /// Step that scheduled the item.
    pub step: StepId,
    /// What the slot occupies.
    pub kind: SlotKind,
    /// 1-based calendar week.
    pub week: u32,
    /// 1-based calendar day, for posts.
    pub day: Option<u32>,
    /// Platform, for posts.
    pub platform: Option<String>,
    /// Post title or week theme.
    pub title: String,
}

/// A `start_week..=end_week` span declared by a calendar framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSpan {
    /// Span label (`name` or `theme`).
    pub label: String,
    /// First week of the span.
    pub start_week: u32,
    /// Last week of the span.
    pub end_week: u32,
}

/// Items extracted from a payload plus the locations that could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction<T> {
    /// Successfully read items with their payload locations.
    pub items: Vec<(String, T)>,
    /// Locations of entries missing a required field.
    pub malformed: Vec<String>,
}

impl<T> Default for Extraction<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            malformed: Vec::new(),
        }
    }
}

/// Returns the week (1-based) containing `day` (1-based).
pub fn week_of_day(day: u32) -> u32 {
    day.saturating_sub(1) / 7 + 1
}

/// Extracts the ledger slots declared by a payload of `kind`.
///
/// [`TimelineKind::PhaseSpans`] declares no slots; use
/// [`extract_phase_spans`] for it.
pub fn extract_slots(
    kind: TimelineKind,
    step: StepId,
    payload: &Value,
) -> Extraction<TimelineSlot> {
    let mut out = Extraction::default();
    match kind {
        TimelineKind::PhaseSpans => {}
        TimelineKind::WeeklyThemes => {
            for entry in select(payload, "weekly_themes[]") {
                let week = field_u32(entry.value, "week");
                let theme = entry.value.get("theme").and_then(Value::as_str);
                match (week, theme) {
                    (Some(week), Some(theme)) => out.items.push((
                        entry.location,
                        TimelineSlot {
                            step,
                            kind: SlotKind::WeekTheme,
                            week,
                            day: None,
                            platform: None,
                            title: theme.to_string(),
                        },
                    )),
                    _ => out.malformed.push(entry.location),
                }
            }
        }
        TimelineKind::DailySchedule => {
            for day_entry in select(payload, "days[]") {
                let Some(day) = field_u32(day_entry.value, "day") else {
                    out.malformed.push(day_entry.location);
                    continue;
                };
                let posts = day_entry.value.get("posts").and_then(Value::as_array);
                for (i, post) in posts.into_iter().flatten().enumerate() {
                    let location = format!("{}.posts[{i}]", day_entry.location);
                    let title = post.get("title").and_then(Value::as_str);
                    let platform = post.get("platform").and_then(Value::as_str);
                    match (title, platform) {
                        (Some(title), Some(platform)) => out.items.push((
                            location,
                            TimelineSlot {
                                step,
                                kind: SlotKind::Post,
                                week: week_of_day(day),
                                day: Some(day),
                                platform: Some(platform.to_string()),
                                title: title.to_string(),
                            },
                        )),
                        _ => out.malformed.push(location),
                    }
                }
            }
        }
    }
    out
}

/// Extracts `timeline_phases[]` spans from a calendar framework payload.
pub fn extract_phase_spans(payload: &Value) -> Extraction<PhaseSpan> {
    let mut out = Extraction::default();
    for entry in select(payload, "timeline_phases[]") {
        let start = field_u32(entry.value, "start_week");
        let end = field_u32(entry.value, "end_week");
        let label = entry
            .value
            .get("name")
            .or_else(|| entry.value.get("theme"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match (start, end) {
            (Some(start_week), Some(end_week)) => out.items.push((
                entry.location,
                PhaseSpan {
                    label,
                    start_week,
                    end_week,
                },
            )),
            _ => out.malformed.push(entry.location),
        }
    }
    out
}

/// Returns the day numbers declared under `days[].day`.
pub fn declared_days(payload: &Value) -> Vec<u32> {
    select(payload, "days[]")
        .into_iter()
        .filter_map(|d| field_u32(d.value, "day"))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn week_boundaries() {
        assert_eq!(week_of_day(1), 1);
        assert_eq!(week_of_day(7), 1);
        assert_eq!(week_of_day(8), 2);
        assert_eq!(week_of_day(28), 4);
    }

    #[test]
    fn daily_schedule_slots_carry_day_week_and_platform() {
        let step = StepId::new(8).unwrap();
        let payload = json!({
            "days": [
                { "day": 9, "posts": [{ "title": "Ops teardown", "platform": "Blog" }] },
                { "day": 10, "posts": [{ "title": "No platform" }] },
                { "posts": [] }
            ]
        });
        let out = extract_slots(TimelineKind::DailySchedule, step, &payload);
        assert_eq!(out.items.len(), 1);
        let (loc, slot) = &out.items[0];
        assert_eq!(loc, "days[0].posts[0]");
        assert_eq!(slot.week, 2);
        assert_eq!(slot.day, Some(9));
        assert_eq!(slot.platform.as_deref(), Some("Blog"));
        assert_eq!(out.malformed, vec!["days[1].posts[0]".to_string(), "days[2]".to_string()]);
    }

    #[test]
    fn phase_spans_read_name_or_theme() {
        let payload = json!({
            "timeline_phases": [
                { "theme": "Awareness", "start_week": 1, "end_week": 2 },
                { "name": "Conversion", "start_week": 3 }
            ]
        });
        let out = extract_phase_spans(&payload);
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].1.label, "Awareness");
        assert_eq!(out.malformed, vec!["timeline_phases[1]".to_string()]);
    }
}
