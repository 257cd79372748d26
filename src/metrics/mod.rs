//! Per-exchange instrumentation and complexity classification.
//!
//! An [`ExchangeMetrics`] instance lives for exactly one exchange: created
//! when a turn is submitted, finalized into an [`ExchangeReport`] when the
//! exchange completes, fails, or is cancelled, then persisted and dropped.
//! The classification is advisory output for later analysis and never
//! alters runtime behavior.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How reusable the work done in an exchange looks. Advisory classifier
/// input supplied by the embedder; defaults to `Medium`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Reusability {
    Low,
    Medium,
    High,
}

/// Advisory shape of an exchange: small reusable skill, delegated
/// sub-agent work, or a multi-tool combination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TaskShape {
    Skill,
    SubAgent,
    Combo,
}

/// Instrumentation accumulated over one exchange.
#[derive(Debug, Clone)]
pub struct ExchangeMetrics {
    steps: Vec<String>,
    decision_points: Vec<String>,
    tools_used: BTreeSet<String>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    human_corrections: u32,
    follow_ups: u32,
    reusability: Reusability,
}

impl ExchangeMetrics {
    /// Start instrumentation for a freshly submitted turn.
    pub fn begin() -> Self {
        Self {
            steps: Vec::new(),
            decision_points: Vec::new(),
            tools_used: BTreeSet::new(),
            started_at: Utc::now(),
            ended_at: None,
            human_corrections: 0,
            follow_ups: 0,
            reusability: Reusability::Medium,
        }
    }

    pub fn record_step(&mut self, step: impl Into<String>) {
        self.steps.push(step.into());
    }

    pub fn record_decision(&mut self, decision: impl Into<String>) {
        self.decision_points.push(decision.into());
    }

    pub fn record_tool(&mut self, name: &str) {
        self.tools_used.insert(name.to_string());
    }

    pub fn record_human_correction(&mut self) {
        self.human_corrections += 1;
    }

    pub fn record_follow_up(&mut self) {
        self.follow_ups += 1;
    }

    pub fn set_reusability(&mut self, reusability: Reusability) {
        self.reusability = reusability;
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn decision_count(&self) -> usize {
        self.decision_points.len()
    }

    pub fn distinct_tool_count(&self) -> usize {
        self.tools_used.len()
    }

    /// Complexity score in `1..=5`, monotonic non-decreasing in step count,
    /// decision-point count, and distinct tool count.
    pub fn complexity_score(&self) -> u8 {
        let mut score = 1u8;
        score += match self.steps.len() {
            s if s > 5 => 2,
            s if s > 2 => 1,
            _ => 0,
        };
        score += match self.decision_points.len() {
            d if d > 3 => 2,
            d if d > 0 => 1,
            _ => 0,
        };
        if self.tools_used.len() > 3 {
            score += 1;
        }
        score.min(5)
    }

    /// Classify the exchange shape from the accumulated counters.
    pub fn shape(&self) -> TaskShape {
        let complexity = self.complexity_score();
        if self.tools_used.len() >= 3 && complexity >= 3 {
            TaskShape::Combo
        } else if complexity <= 2
            && self.steps.len() <= 2
            && self.decision_points.len() <= 1
            && matches!(self.reusability, Reusability::Medium | Reusability::High)
        {
            TaskShape::Skill
        } else {
            TaskShape::SubAgent
        }
    }

    /// Stamp the end time and produce the report handed to the store.
    pub fn finalize(mut self, success: bool) -> ExchangeReport {
        let ended_at = Utc::now();
        self.ended_at = Some(ended_at);
        ExchangeReport {
            complexity: self.complexity_score(),
            shape: self.shape(),
            success,
            steps: self.steps,
            decision_points: self.decision_points,
            tools_used: self.tools_used.into_iter().collect(),
            human_corrections: self.human_corrections,
            follow_ups: self.follow_ups,
            started_at: self.started_at,
            ended_at,
            duration_ms: (ended_at - self.started_at).num_milliseconds(),
        }
    }
}

/// Finalized instrumentation for one exchange, persisted as a task record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeReport {
    pub complexity: u8,
    pub shape: TaskShape,
    pub success: bool,
    pub steps: Vec<String>,
    pub decision_points: Vec<String>,
    pub tools_used: Vec<String>,
    pub human_corrections: u32,
    pub follow_ups: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
}
