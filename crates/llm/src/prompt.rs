//! Prompt rendering for one step attempt.

use std::fmt::Write as _;

use pipeline::payload::truncate_chars;
use pipeline::{FieldKind, GenerationRequest};

/// A rendered system/user prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Instructions that hold for every step.
    pub system: String,
    /// The step-specific message.
    pub user: String,
}

const SYSTEM: &str = "You are one stage of a content-calendar planning pipeline. \
Answer with a single JSON object and nothing else. \
Include every required field with the stated JSON type. \
Add a \"referenced_sources\" array listing the input source keys you actually used. \
Never reuse a title or theme listed as already used, and never schedule outside the calendar.";

fn kind_label(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "string",
        FieldKind::Number => "number",
        FieldKind::List => "array",
        FieldKind::Object => "object",
        FieldKind::TextOrObject => "string or object",
    }
}

/// Renders `request` into a prompt.
///
/// Each upstream input is cut to its weighted share of `input_budget_chars`.
/// The context package is included whole; it was already packed to budget.
pub fn render(request: &GenerationRequest, input_budget_chars: usize) -> Prompt {
    let mut user = String::new();
    let cal = &request.calendar;

    let _ = writeln!(
        user,
        "# Step {} of 12: {} ({} phase, attempt {})",
        request.step, request.step_name, request.phase, request.attempt
    );
    let _ = writeln!(user, "{}\n", request.purpose);
    let _ = writeln!(
        user,
        "Calendar: {} weeks, at most {} posts per week per platform, platforms: {}.",
        cal.duration_weeks,
        cal.posts_per_week,
        cal.platforms.join(", ")
    );
    if let Some(cap) = cal.max_posts_per_day {
        let _ = writeln!(user, "At most {cap} posts on any single day.");
    }

    if !request.inputs.is_empty() {
        let _ = writeln!(user, "\n## Inputs");
        for input in &request.inputs {
            let text = serde_json::to_string_pretty(&input.payload).unwrap_or_default();
            let cap = (input.weight * input_budget_chars as f64) as usize;
            let shown = truncate_chars(&text, cap);
            let _ = writeln!(user, "### {} (weight {:.0}%)", input.key, input.weight * 100.0);
            let _ = writeln!(user, "{shown}");
            if shown.len() < text.len() {
                let _ = writeln!(user, "[truncated to {cap} characters]");
            }
        }
    }

    if !request.context.text.is_empty() {
        let _ = writeln!(
            user,
            "\n## Prior steps (weight {:.0}%)\n{}",
            request.context.weight * 100.0,
            request.context.text
        );
    }

    if !request.feedback.is_empty() {
        let _ = writeln!(user, "\n## Fix these problems from the previous attempt");
        for line in &request.feedback {
            let _ = writeln!(user, "- {line}");
        }
    }

    let _ = writeln!(user, "\n## Output");
    for field in &request.required_fields {
        let _ = writeln!(user, "- `{}` ({}, required)", field.name, kind_label(field.kind));
    }
    for name in &request.recommended_fields {
        let _ = writeln!(user, "- `{name}` (recommended)");
    }
    let _ = writeln!(user, "- `referenced_sources` (array of input keys)");

    Prompt {
        system: SYSTEM.to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use pipeline::{
        CalendarConfig, FieldSpec, Phase, RequestContext, RequestInput, RunId, SourceKey, StepId,
    };

    fn request() -> GenerationRequest {
        GenerationRequest {
            run_id: RunId::new_random(),
            step: StepId::new(7).unwrap(),
            phase: Phase::Content,
            step_name: "weekly_theme_development".into(),
            purpose: "Develop one theme per week.".into(),
            attempt: 2,
            calendar: CalendarConfig::default(),
            inputs: vec![RequestInput {
                key: SourceKey::new("keywords").unwrap(),
                weight: 0.5,
                payload: json!({ "terms": ["x".repeat(400)] }),
            }],
            context: RequestContext {
                text: "Context as of step 6\n- Category education (step 4)\n".into(),
                weight: 0.5,
                as_of: StepId::new(6),
            },
            feedback: vec!["[uniqueness] 'Category education' was already used by step 4".into()],
            required_fields: vec![FieldSpec {
                name: "weekly_themes".into(),
                kind: FieldKind::List,
            }],
            recommended_fields: vec!["summary".into()],
        }
    }

    #[test]
    fn prompt_names_step_calendar_and_fields() {
        let prompt = render(&request(), 10_000);
        assert!(prompt
            .user
            .contains("# Step 7 of 12: weekly_theme_development (content phase, attempt 2)"));
        assert!(prompt
            .user
            .contains("4 weeks, at most 3 posts per week per platform, platforms: LinkedIn, Blog"));
        assert!(prompt.user.contains("- `weekly_themes` (array, required)"));
        assert!(prompt.user.contains("- `summary` (recommended)"));
        assert!(prompt.system.contains("referenced_sources"));
    }

    #[test]
    fn feedback_and_context_are_included() {
        let prompt = render(&request(), 10_000);
        assert!(prompt.user.contains("## Fix these problems from the previous attempt"));
        assert!(prompt.user.contains("already used by step 4"));
        assert!(prompt.user.contains("## Prior steps (weight 50%)"));
    }

    #[test]
    fn inputs_are_cut_to_their_weighted_share() {
        let prompt = render(&request(), 200);
        assert!(prompt.user.contains("### keywords (weight 50%)"));
        assert!(prompt.user.contains("[truncated to 100 characters]"));
    }
}
