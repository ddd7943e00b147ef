//! Scripted generation service and fixtures shared by the orchestrator tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use pipeline::{
    GenerationError, GenerationRequest, GenerationResponse, GenerationService, SourceCatalog,
};

/// What the service does for one call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Reply with this payload.
    Reply(Value),
    /// Fail with this error.
    Fail(GenerationError),
    /// Never answer.
    Hang,
}

/// A generation service that answers each step with a well-formed payload
/// unless a script for that step says otherwise.
///
/// Every reply reports all upstream inputs of the request as referenced.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<HashMap<u8, VecDeque<Script>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues `script` for the next call of `step`.
    pub fn script(&self, step: u8, script: Script) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(step)
            .or_default()
            .push_back(script);
        self
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests received for `step`.
    pub fn requests_for(&self, step: u8) -> Vec<GenerationRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.step.as_u8() == step)
            .collect()
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let step = request.step.as_u8();
        let referenced = request.inputs.iter().map(|i| i.key.to_string()).collect();
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&step)
            .and_then(VecDeque::pop_front);
        match script {
            Some(Script::Fail(e)) => Err(e),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(GenerationError::Timeout)
            }
            Some(Script::Reply(payload)) => Ok(GenerationResponse {
                payload,
                referenced_sources: referenced,
            }),
            None => Ok(GenerationResponse {
                payload: good_payload(step),
                referenced_sources: referenced,
            }),
        }
    }
}

const ALIGNED: &str = "Grow qualified pipeline with content for B2B marketing leaders";

/// Upstream data for a complete run.
pub fn sources() -> SourceCatalog {
    SourceCatalog::new()
        .with(
            "strategy",
            json!({
                "business_goals": ["Grow qualified pipeline"],
                "target_audience": "B2B marketing leaders"
            }),
        )
        .and_then(|c| {
            c.with("onboarding_summary", json!({ "company": "Acme Analytics", "industry": "SaaS" }))
        })
        .and_then(|c| c.with("gap_analysis", json!({ "gaps": ["No attribution content"] })))
        .and_then(|c| c.with("performance_history", json!({ "best_day": "Tuesday", "ctr": 0.021 })))
        .and_then(|c| c.with("keywords", json!(["pipeline attribution", "demand generation"])))
        .and_then(|c| c.with("competitor_data", json!({ "competitors": ["Beta Corp"] })))
        .unwrap()
}

/// Daily schedule for a 4-week, 3 posts/week, LinkedIn + Blog calendar:
/// LinkedIn on the 1st/3rd/5th day of each week, Blog on the 2nd/4th/6th.
pub fn schedule_days() -> Vec<Value> {
    (1..=28u32)
        .map(|day| {
            let posts = match (day - 1) % 7 {
                0 | 2 | 4 => vec![json!({
                    "title": format!("Day {day} LinkedIn post on qualified pipeline"),
                    "platform": "LinkedIn"
                })],
                1 | 3 | 5 => vec![json!({
                    "title": format!("Day {day} blog article for marketing leaders"),
                    "platform": "Blog"
                })],
                _ => Vec::new(),
            };
            json!({ "day": day, "posts": posts })
        })
        .collect()
}

/// A payload for `step` that passes every quality-gate criterion.
pub fn good_payload(step: u8) -> Value {
    match step {
        1 => json!({
            "summary": ALIGNED,
            "content_pillars": ["Attribution", "Benchmarks", "Playbooks"],
            "business_goals": ["Grow qualified pipeline"],
            "target_audience": "B2B marketing leaders",
            "positioning": "Analytics for revenue teams",
            "brand_voice": "Direct"
        }),
        2 => json!({
            "summary": ALIGNED,
            "opportunities": [
                { "title": "Attribution explainers" },
                { "title": "Leader interview series" }
            ],
            "quick_wins": ["Repurpose webinar"]
        }),
        3 => json!({
            "summary": ALIGNED,
            "audience_segments": ["CMOs", "Demand gen managers"],
            "platform_priorities": ["LinkedIn", "Blog"],
            "posting_windows": { "LinkedIn": "Tue 9:00" }
        }),
        4 => json!({
            "summary": ALIGNED,
            "duration_weeks": 4,
            "posts_per_week": 3,
            "platforms": ["LinkedIn", "Blog"],
            "timeline_phases": [
                {
                    "name": "Awareness",
                    "theme": "Category education",
                    "start_week": 1,
                    "end_week": 2
                },
                {
                    "name": "Conversion",
                    "theme": "Proof and pipeline",
                    "start_week": 3,
                    "end_week": 4
                }
            ]
        }),
        5 => json!({
            "summary": ALIGNED,
            "pillars": [
                { "name": "Attribution", "percentage": 40 },
                { "name": "Benchmarks", "percentage": 35 },
                { "name": "Playbooks", "percentage": 25 }
            ],
            "rotation": "weekly"
        }),
        6 => json!({
            "summary": ALIGNED,
            "platform_strategies": [
                { "platform": "LinkedIn", "approach": "Short insights" },
                { "platform": "Blog", "approach": "Long-form guides" }
            ],
            "cross_posting": true
        }),
        7 => json!({
            "summary": ALIGNED,
            "weekly_themes": [
                { "week": 1, "theme": "Why attribution breaks" },
                { "week": 2, "theme": "Benchmarks that matter" },
                { "week": 3, "theme": "Customer proof" },
                { "week": 4, "theme": "Planning next quarter" }
            ]
        }),
        8 => json!({ "summary": ALIGNED, "days": schedule_days() }),
        9 => json!({
            "summary": ALIGNED,
            "recommendations": [
                { "title": "Pipeline benchmark report" },
                { "title": "Marketing leader AMA" }
            ],
            "formats": ["carousel", "guide"]
        }),
        10 => json!({
            "summary": ALIGNED,
            "optimizations": ["Post LinkedIn content on Tuesdays"],
            "predicted_engagement": { "ctr": 0.025 }
        }),
        11 => json!({
            "summary": ALIGNED,
            "alignment_findings": ["Every week maps to the pipeline goal"],
            "alignment_score": 0.92
        }),
        12 => json!({
            "summary": ALIGNED,
            "highlights": ["28-day plan across LinkedIn and Blog"],
            "next_steps": ["Brief writers"]
        }),
        _ => json!({}),
    }
}
