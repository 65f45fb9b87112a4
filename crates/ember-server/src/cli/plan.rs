use crate::bootstrap;
use crate::cli::PlanArgs;
use crate::config::EmberConfig;
use anyhow::{Context, Result};
use ember_core::{Plan, PlanSource, Request, Resolution};
use std::io::Read;

fn read_request(args: &PlanArgs) -> Result<Request> {
    let raw = if args.request.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(&args.request)
            .with_context(|| format!("Failed to read {}", args.request.display()))?
    };
    serde_json::from_str(&raw).context("Request is not valid JSON")
}

pub async fn run(args: PlanArgs, config: EmberConfig) -> Result<()> {
    let request = read_request(&args)?;
    let runtime = bootstrap::build(&config)?;
    let resolution = runtime.coordinator.coordinate(&request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resolution)?);
    } else {
        print!("{}", render(&resolution));
    }
    Ok(())
}

pub(crate) fn render(resolution: &Resolution) -> String {
    let plan: &Plan = &resolution.plan;
    let mut out = String::new();
    out.push_str(&format!("{} [{}]\n", plan.title(), plan.priority()));
    match &resolution.source {
        PlanSource::Fallback(reason) => out.push_str(&format!("(fallback: {})\n", reason)),
        other => out.push_str(&format!("({})\n", other.label())),
    }
    out.push_str(&"─".repeat(50));
    out.push('\n');
    for step in plan.steps() {
        out.push_str(&format!(
            "{:>2}. {} ({} min)\n",
            step.number, step.description, step.estimated_minutes
        ));
        for item in &step.equipment {
            out.push_str(&format!("      equipment: {}\n", item));
        }
        for warning in &step.warnings {
            out.push_str(&format!("      ⚠ {}\n", warning));
        }
    }
    out.push_str(&"─".repeat(50));
    out.push('\n');
    out.push_str(&format!("Total: {} min\n", plan.total_minutes()));
    if !plan.equipment().is_empty() {
        out.push_str(&format!("Equipment: {}\n", plan.equipment().join(", ")));
    }
    if !resolution.failures.is_empty() {
        let names: Vec<&str> = resolution.failures.iter().map(|f| f.source.as_str()).collect();
        out.push_str(&format!("Unavailable sources: {}\n", names.join(", ")));
    }
    out
}
