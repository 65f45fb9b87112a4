use crate::bootstrap;
use crate::config::EmberConfig;
use anyhow::Result;
use ember_core::DependencyState;

pub async fn run(config: EmberConfig) -> Result<()> {
    let runtime = bootstrap::build(&config)?;

    println!();
    println!("Ember Dependency Check");
    println!("{}", "─".repeat(50));

    runtime.prober.run_once().await;
    let report = runtime.registry.overall();
    let mut has_errors = false;

    for status in &report.dependencies {
        let required = runtime.registry.is_required(&status.name);
        let symbol = match status.state {
            DependencyState::Healthy => "[✓]",
            DependencyState::Degraded => "[⚠]",
            DependencyState::Unreachable if required => {
                has_errors = true;
                "[✗]"
            }
            DependencyState::Unreachable => "[⚠]",
        };
        let detail = match (&status.last_error, status.last_checked) {
            (Some(err), _) => err.clone(),
            (None, Some(_)) => "ok".to_string(),
            (None, None) => "not probed".to_string(),
        };
        let tag = if required { " (required)" } else { "" };
        println!("{} {}{}: {}", symbol, status.name, tag, detail);
    }

    println!("{}", "─".repeat(50));
    println!(
        "{}/{} healthy, overall {:?}",
        report.healthy, report.total, report.overall
    );

    if has_errors {
        std::process::exit(1);
    }
    Ok(())
}
