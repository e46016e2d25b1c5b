//! Campaign management commands

use anyhow::{Context, Result};
use std::path::Path;

use herald::campaign::CampaignInput;
use herald::config::Config;

use super::{build_orchestrator, print_json};

pub async fn list_campaigns(config: &Config) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let campaigns = orchestrator.list_campaigns().await?;

    for campaign in &campaigns {
        eprintln!(
            "{:<24} {:<8} {} lead={}d channels={:?}",
            campaign.id,
            if campaign.active { "active" } else { "inactive" },
            campaign.start.format("%Y-%m-%d %H:%M"),
            campaign.lead_days,
            campaign.channels,
        );
    }
    print_json(&campaigns)
}

pub async fn show_campaign(config: &Config, id: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    print_json(&orchestrator.get_campaign(id).await?)
}

/// Create a campaign from a JSON file
pub async fn create_campaign(config: &Config, file: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read campaign file: {}", file.display()))?;
    let input: CampaignInput = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse campaign file: {}", file.display()))?;

    let orchestrator = build_orchestrator(config).await?;
    let campaign = orchestrator.create_campaign(input).await?;
    eprintln!("Created campaign '{}'", campaign.id);
    print_json(&campaign)
}

pub async fn delete_campaign(config: &Config, id: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let removed = orchestrator.delete_campaign(id).await?;
    eprintln!("Deleted campaign '{id}' and {removed} tasks");
    Ok(())
}
