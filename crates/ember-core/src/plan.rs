use crate::error::{EmberError, Result};
use crate::request::Urgency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    /// Lenient parse for model output ("URGENT", " High ", ...).
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" | "normal" | "moderate" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "critical" | "urgent" => Some(Priority::Critical),
            _ => None,
        }
    }
}

impl From<Urgency> for Priority {
    fn from(urgency: Urgency) -> Self {
        match urgency {
            Urgency::Low => Priority::Low,
            Urgency::Medium => Priority::Medium,
            Urgency::High => Priority::High,
            Urgency::Critical => Priority::Critical,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    pub number: u32,
    pub description: String,
    #[serde(default)]
    pub equipment: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub estimated_minutes: u32,
}

impl Step {
    /// The number is assigned when the step is assembled into a plan.
    pub fn new(description: impl Into<String>, estimated_minutes: u32) -> Self {
        Self {
            number: 0,
            description: description.into(),
            equipment: Vec::new(),
            warnings: Vec::new(),
            estimated_minutes,
        }
    }

    pub fn with_equipment<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.equipment.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn with_warnings<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.warnings.extend(items.into_iter().map(Into::into));
        self
    }
}

/// A response plan. Only [`PlanDraft::build`] and [`Plan::evacuate`]
/// construct one, so the step numbering and duration invariants hold for
/// every value in circulation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    id: Uuid,
    title: String,
    priority: Priority,
    steps: Vec<Step>,
    equipment: Vec<String>,
    warnings: Vec<String>,
    total_minutes: u32,
    #[serde(default)]
    duration_overridden: bool,
    created_at: DateTime<Utc>,
    #[serde(default)]
    degraded: bool,
}

impl Plan {
    /// Single-step degraded plan for when no template renders.
    pub fn evacuate(priority: Priority) -> Self {
        let steps = vec![Step {
            number: 1,
            description: "Evacuate everyone and call the fire brigade".into(),
            equipment: Vec::new(),
            warnings: vec!["Do not re-enter the building".into()],
            estimated_minutes: 5,
        }];
        Self {
            id: Uuid::now_v7(),
            title: "Emergency evacuation".into(),
            priority,
            equipment: Vec::new(),
            warnings: collect_unique(steps.iter().flat_map(|s| s.warnings.iter())),
            total_minutes: step_minutes(&steps),
            steps,
            duration_overridden: false,
            created_at: Utc::now(),
            degraded: true,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn equipment(&self) -> &[String] {
        &self.equipment
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn total_minutes(&self) -> u32 {
        self.total_minutes
    }

    pub fn duration_overridden(&self) -> bool {
        self.duration_overridden
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Check the structural invariants. Used on plans that came from outside
    /// the process (the cache) and so bypassed the constructor.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(EmberError::Internal("plan title is blank".into()));
        }
        if self.steps.is_empty() {
            return Err(EmberError::Internal("plan has no steps".into()));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.number as usize != i + 1 {
                return Err(EmberError::Internal(format!(
                    "step at position {} is numbered {}",
                    i + 1,
                    step.number
                )));
            }
        }
        let sum = step_minutes(&self.steps);
        if !self.duration_overridden && self.total_minutes != sum {
            return Err(EmberError::Internal(format!(
                "total duration {} does not match step sum {}",
                self.total_minutes, sum
            )));
        }
        if self.equipment != collect_unique(self.steps.iter().flat_map(|s| s.equipment.iter()))
            || self.warnings != collect_unique(self.steps.iter().flat_map(|s| s.warnings.iter()))
        {
            return Err(EmberError::Internal("aggregate lists do not match the steps".into()));
        }
        Ok(())
    }
}

/// Builder for [`Plan`].
#[derive(Debug, Clone)]
pub struct PlanDraft {
    title: String,
    priority: Priority,
    steps: Vec<Step>,
    duration_override: Option<u32>,
    degraded: bool,
}

impl PlanDraft {
    pub fn new(title: impl Into<String>, priority: Priority) -> Self {
        Self {
            title: title.into(),
            priority,
            steps: Vec::new(),
            duration_override: None,
            degraded: false,
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Replace the step sum with an explicit total.
    pub fn duration_override(mut self, minutes: u32) -> Self {
        self.duration_override = Some(minutes);
        self
    }

    pub fn degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }

    /// Renumber steps from 1, tidy the per-step lists, derive the aggregate
    /// equipment and warnings, and settle the total duration.
    pub fn build(self) -> Result<Plan> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(EmberError::Internal("plan title is blank".into()));
        }

        let steps: Vec<Step> = self
            .steps
            .into_iter()
            .filter(|s| !s.description.trim().is_empty())
            .enumerate()
            .map(|(i, s)| Step {
                number: i as u32 + 1,
                description: s.description.trim().to_string(),
                equipment: collect_unique(s.equipment.iter()),
                warnings: collect_unique(s.warnings.iter()),
                estimated_minutes: s.estimated_minutes,
            })
            .collect();
        if steps.is_empty() {
            return Err(EmberError::Internal("plan has no steps".into()));
        }

        let equipment = collect_unique(steps.iter().flat_map(|s| s.equipment.iter()));
        let warnings = collect_unique(steps.iter().flat_map(|s| s.warnings.iter()));
        let (total_minutes, duration_overridden) = match self.duration_override {
            Some(minutes) => (minutes, true),
            None => (step_minutes(&steps), false),
        };

        Ok(Plan {
            id: Uuid::now_v7(),
            title,
            priority: self.priority,
            steps,
            equipment,
            warnings,
            total_minutes,
            duration_overridden,
            created_at: Utc::now(),
            degraded: self.degraded,
        })
    }
}

fn step_minutes(steps: &[Step]) -> u32 {
    steps
        .iter()
        .fold(0u32, |acc, s| acc.saturating_add(s.estimated_minutes))
}

/// Trimmed, non-blank, deduplicated in first-seen order.
fn collect_unique<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim();
        if !item.is_empty() && !out.iter().any(|seen| seen == item) {
            out.push(item.to_string());
        }
    }
    out
}
