use crate::aggregator::AggregatedContext;
use crate::request::Request;
use serde_json::Value;

const INSTRUCTIONS: &str = "\
Respond with a single JSON object and nothing else, shaped as:
{\"title\": string, \"priority\": \"low\"|\"medium\"|\"high\"|\"critical\",
 \"steps\": [{\"description\": string, \"equipment\": [string], \"warnings\": [string], \"estimated_minutes\": integer}]}
Order the steps as they must be carried out. Put safety first.";

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Render the generation prompt: the request, then the ranked knowledge,
/// then the output format.
pub fn build_prompt(request: &Request, context: &AggregatedContext) -> String {
    let mut out = String::from(
        "You are an emergency response planner. Produce a step-by-step plan for the situation below.\n\n",
    );

    out.push_str("## Entries\n");
    for entry in &request.entries {
        out.push_str(&format!(
            "- {} ({}) x{}",
            entry.name.trim(),
            entry.category.trim(),
            entry.quantity
        ));
        if !entry.attributes.is_empty() {
            let attrs: Vec<String> = entry
                .attributes
                .iter()
                .map(|(k, v)| format!("{}: {}", k, display_value(v)))
                .collect();
            out.push_str(&format!(" [{}]", attrs.join(", ")));
        }
        out.push('\n');
    }

    out.push_str("\n## Context\n");
    for (key, value) in request.context.iter() {
        if !value.is_null() {
            out.push_str(&format!("- {}: {}\n", key, display_value(value)));
        }
    }

    out.push_str(&format!("\n## Urgency\n{}\n", request.urgency));

    if let Some(notes) = request.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        out.push_str(&format!("\n## Notes\n{}\n", notes));
    }

    out.push_str("\n## Retrieved knowledge\n");
    if context.snippets.is_empty() {
        out.push_str("(no knowledge retrieved; rely on general fire safety practice)\n");
    }
    for snippet in &context.snippets {
        out.push_str(&format!(
            "- [{} {:.2}] {}\n",
            snippet.source,
            snippet.relevance,
            snippet.text.trim()
        ));
    }

    out.push_str("\n## Response format\n");
    out.push_str(INSTRUCTIONS);
    out.push('\n');
    out
}
