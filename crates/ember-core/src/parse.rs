//! Turning generation output into a [`Plan`].
//!
//! Models are asked for JSON, but they do not always comply. The parser
//! tries the outermost `{...}` block first and falls back to reading
//! numbered lines (`1. ...`, `Step 2: ...`) with `Equipment:`, `Warning:`
//! and `Time:` follow-up lines.

use crate::error::{EmberError, Result};
use crate::plan::{Plan, PlanDraft, Priority, Step};
use crate::request::Request;
use serde::Deserialize;

/// Total used when no step carries a duration.
pub const DEFAULT_TOTAL_MINUTES: u32 = 60;

#[derive(Debug, Deserialize)]
struct GeneratedPlan {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    steps: Vec<GeneratedStep>,
    #[serde(default, alias = "estimated_duration", alias = "total_duration")]
    total_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeneratedStep {
    #[serde(alias = "action", alias = "step")]
    description: String,
    #[serde(default)]
    equipment: Vec<String>,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default, alias = "estimated_time", alias = "minutes")]
    estimated_minutes: Option<u32>,
}

/// Intermediate result shared by both parsing strategies.
#[derive(Debug, Default)]
struct Parsed {
    title: Option<String>,
    priority: Option<Priority>,
    steps: Vec<Step>,
    total_minutes: Option<u32>,
}

pub fn parse_plan(text: &str, request: &Request) -> Result<Plan> {
    let parsed = parse_json(text)
        .or_else(|| parse_lines(text))
        .ok_or_else(|| EmberError::Internal("generation output contained no plan steps".into()))?;

    let title = parsed
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| default_title(request));
    let priority = parsed.priority.unwrap_or_else(|| request.urgency.into());

    // Blank steps are dropped by the draft, so they must not count here.
    let step_sum: u32 = parsed
        .steps
        .iter()
        .filter(|s| !s.description.trim().is_empty())
        .fold(0u32, |acc, s| acc.saturating_add(s.estimated_minutes));
    let mut draft = PlanDraft::new(title, priority).steps(parsed.steps);
    match parsed.total_minutes {
        Some(total) if total > 0 && total != step_sum => draft = draft.duration_override(total),
        _ if step_sum == 0 => draft = draft.duration_override(DEFAULT_TOTAL_MINUTES),
        _ => {}
    }
    draft.build()
}

fn default_title(request: &Request) -> String {
    format!("Emergency response plan: {}", request.categories().join(", "))
}

fn parse_json(text: &str) -> Option<Parsed> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let generated: GeneratedPlan = match serde_json::from_str(&text[start..=end]) {
        Ok(plan) => plan,
        Err(e) => {
            log::debug!("generation output is not a JSON plan: {}", e);
            return None;
        }
    };
    if generated.steps.is_empty() {
        return None;
    }
    Some(Parsed {
        title: generated.title,
        priority: generated.priority.as_deref().and_then(Priority::parse_loose),
        steps: generated
            .steps
            .into_iter()
            .map(|s| {
                Step::new(s.description, s.estimated_minutes.unwrap_or(0))
                    .with_equipment(s.equipment)
                    .with_warnings(s.warnings)
            })
            .collect(),
        total_minutes: generated.total_minutes,
    })
}

fn parse_lines(text: &str) -> Option<Parsed> {
    let mut parsed = Parsed::default();
    let mut current: Option<Step> = None;

    for raw in text.lines() {
        let line = raw.trim().trim_start_matches(['-', '*', '#', '•']).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(description) = step_heading(line) {
            if let Some(step) = current.take() {
                parsed.steps.push(step);
            }
            current = Some(Step::new(description, 0));
            continue;
        }

        match current.as_mut() {
            Some(step) => {
                if let Some(rest) = strip_label(line, &["equipment", "tools", "gear"]) {
                    step.equipment.extend(split_list(rest));
                } else if let Some(rest) = strip_label(line, &["warning", "warnings", "caution", "danger"]) {
                    step.warnings.push(rest.to_string());
                } else if let Some(rest) = strip_label(line, &["time", "duration", "estimated time"]) {
                    if let Some(minutes) = first_number(rest) {
                        step.estimated_minutes = minutes;
                    }
                }
            }
            None => {
                if let Some(rest) = strip_label(line, &["title", "plan"]) {
                    parsed.title.get_or_insert_with(|| rest.to_string());
                } else if let Some(rest) = strip_label(line, &["priority"]) {
                    parsed.priority = Priority::parse_loose(rest);
                }
            }
        }

        if let Some(rest) = strip_label(line, &["total time", "total duration", "estimated duration"]) {
            parsed.total_minutes = first_number(rest);
        }
    }
    if let Some(step) = current {
        parsed.steps.push(step);
    }

    if parsed.steps.is_empty() {
        None
    } else {
        Some(parsed)
    }
}

/// `Step 3: do x`, `Step 3 - do x`, `3. do x`, `3) do x`.
fn step_heading(line: &str) -> Option<String> {
    let rest = match line.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("step ") => {
            let after = line[5..].trim_start();
            let digits = after.chars().take_while(char::is_ascii_digit).count();
            if digits == 0 {
                return None;
            }
            after[digits..].trim_start_matches([':', '.', '-', ')', ' '])
        }
        _ => {
            let digits = line.chars().take_while(char::is_ascii_digit).count();
            if digits == 0 {
                return None;
            }
            let after = &line[digits..];
            if !(after.starts_with('.') || after.starts_with(')')) {
                return None;
            }
            &after[1..]
        }
    };
    let description = rest.trim();
    if description.is_empty() {
        None
    } else {
        Some(description.to_string())
    }
}

fn strip_label<'a>(line: &'a str, labels: &[&str]) -> Option<&'a str> {
    let (label, rest) = line.split_once(':')?;
    let label = label.trim().trim_matches('*').trim().to_lowercase();
    if labels.contains(&label.as_str()) {
        Some(rest.trim())
    } else {
        None
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split([',', ';'])
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

fn first_number(s: &str) -> Option<u32> {
    let digits: String = s
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{generated_plan_text, sample_request};

    #[test]
    fn parses_json_wrapped_in_prose() {
        let plan = parse_plan(&generated_plan_text(), &sample_request()).unwrap();
        assert_eq!(plan.title(), "Kitchen fire response");
        assert_eq!(plan.priority(), Priority::High);
        assert_eq!(plan.steps().len(), 2);
        assert_eq!(plan.total_minutes(), 7);
        assert!(!plan.duration_overridden());
        assert_eq!(
            plan.equipment(),
            ["Insulated gloves", "ABC extinguisher", "Fire blanket"]
        );
        assert!(!plan.is_degraded());
    }

    #[test]
    fn explicit_total_becomes_override() {
        let text = r#"{"steps":[{"description":"Evacuate","estimated_minutes":5}],"estimated_duration":30}"#;
        let plan = parse_plan(text, &sample_request()).unwrap();
        assert_eq!(plan.total_minutes(), 30);
        assert!(plan.duration_overridden());
        // Missing title and priority are derived from the request.
        assert_eq!(plan.title(), "Emergency response plan: furniture, appliance");
        assert_eq!(plan.priority(), Priority::High);
    }

    #[test]
    fn blank_steps_do_not_count_towards_the_total() {
        let text = r#"{"steps":[{"description":"Evacuate","estimated_minutes":20},{"description":"  ","estimated_minutes":10}],"estimated_duration":30}"#;
        let plan = parse_plan(text, &sample_request()).unwrap();
        assert_eq!(plan.steps().len(), 1);
        assert_eq!(plan.total_minutes(), 30);
        assert!(plan.duration_overridden());

        let text = r#"{"steps":[{"description":"Evacuate"},{"description":"","estimated_minutes":10}]}"#;
        let plan = parse_plan(text, &sample_request()).unwrap();
        assert_eq!(plan.total_minutes(), DEFAULT_TOTAL_MINUTES);
    }

    #[test]
    fn parses_numbered_lines() {
        let text = "\
Title: Heater fire
1. Switch off the mains
   Equipment: insulated gloves, torch
   Warning: do not touch the heater
   Time: 3 minutes
Step 2: Use a CO2 extinguisher
   - Equipment: CO2 extinguisher
   - Time: 4 min
";
        let plan = parse_plan(text, &sample_request()).unwrap();
        assert_eq!(plan.title(), "Heater fire");
        assert_eq!(plan.steps().len(), 2);
        assert_eq!(plan.steps()[0].equipment, vec!["insulated gloves", "torch"]);
        assert_eq!(plan.steps()[0].warnings, vec!["do not touch the heater"]);
        assert_eq!(plan.steps()[1].description, "Use a CO2 extinguisher");
        assert_eq!(plan.total_minutes(), 7);
    }

    #[test]
    fn zero_duration_defaults_to_an_hour() {
        let plan = parse_plan("1. Get out\n2. Call the fire brigade", &sample_request()).unwrap();
        assert_eq!(plan.total_minutes(), DEFAULT_TOTAL_MINUTES);
        assert!(plan.duration_overridden());
    }

    #[test]
    fn output_without_steps_is_an_error() {
        assert!(parse_plan("I cannot help with that.", &sample_request()).is_err());
        assert!(parse_plan(r#"{"title":"x","steps":[]}"#, &sample_request()).is_err());
        assert!(parse_plan("", &sample_request()).is_err());
    }

    #[test]
    fn step_heading_variants() {
        assert_eq!(step_heading("Step 4 - Ventilate").as_deref(), Some("Ventilate"));
        assert_eq!(step_heading("12) Check for embers").as_deref(), Some("Check for embers"));
        assert_eq!(step_heading("2024 was a dry year"), None);
        assert_eq!(step_heading("Steps are listed below"), None);
    }
}
