//! Stage commands and the ticker loop

use anyhow::Result;
use std::sync::Arc;

use herald::config::Config;
use herald::pipeline::{PipelineTicker, StageReport};

use super::{build_orchestrator, print_json};

fn summarize(report: &StageReport) {
    match &report.skip_reason {
        Some(reason) => eprintln!("{}: skipped ({reason})", report.stage),
        None => eprintln!(
            "{}: {} advanced, {} failed, {} conflicts",
            report.stage, report.advanced, report.failed, report.conflicts
        ),
    }
}

pub async fn schedule(config: &Config) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let report = orchestrator.schedule_all().await?;
    summarize(&report);
    print_json(&report)
}

/// Generate every due task, or one task by id
pub async fn generate(config: &Config, id: Option<String>) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    match id {
        Some(id) => print_json(&orchestrator.generate_by_id(&id).await?),
        None => {
            let report = orchestrator.generate_all().await?;
            summarize(&report);
            print_json(&report)
        }
    }
}

/// Publish every due task, or one task by id
pub async fn publish(config: &Config, id: Option<String>) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    match id {
        Some(id) => print_json(&orchestrator.publish_by_id(&id).await?),
        None => {
            let report = orchestrator.publish_all().await?;
            summarize(&report);
            print_json(&report)
        }
    }
}

/// Run the ticker until Ctrl-C, or a single tick with `once`
pub async fn run_ticker(config: &Config, once: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let ticker = Arc::new(PipelineTicker::new(config.pipeline.ticker.clone(), orchestrator)?);

    if once {
        let reports = ticker.tick(1).await;
        reports.iter().for_each(summarize);
        return print_json(&reports);
    }

    let stopper = ticker.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping ticker");
            stopper.stop().await;
        }
    });

    ticker.start().await?;
    Ok(())
}
