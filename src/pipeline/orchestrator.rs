//! Pipeline orchestrator
//!
//! One [`Orchestrator`] is built at start-up and shared (behind an `Arc`) by
//! the HTTP API, the CLI and the ticker. It owns the collaborators and the
//! run guard, and exposes every operation the trigger surfaces need.

use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::campaign::{db as campaign_db, Campaign, CampaignInput};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{Config, StorageBackend};
use crate::content::{ContentStore, MediaResolver, PromptBuilder};
use crate::error::Result;
use crate::llm::{LlmClient, SharedGenerator};
use crate::metrics;
use crate::platforms::{PlatformFanout, PublishEvent};
use crate::storage::{create_json_store, create_memory_store, SharedStore};
use crate::task::{db as task_db, CampaignTask, Stage, TaskStatus};

use super::guard::{RunGuard, StageState, StageStatus};
use super::stages::{self, PipelineContext};
use super::{StageReport, TaskOutcome};

/// Filters for listing tasks
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub campaign_id: Option<String>,
}

/// Entry point for every pipeline operation
pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
    guard: RunGuard,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            guard: RunGuard::new(),
        }
    }

    /// Build every collaborator from configuration
    ///
    /// Publish events go to `events` when given.
    pub async fn from_config(
        config: &Config,
        events: Option<mpsc::UnboundedSender<PublishEvent>>,
    ) -> Result<Self> {
        config.validate()?;

        let store: SharedStore = match config.storage.backend {
            StorageBackend::Memory => create_memory_store(),
            StorageBackend::Json => create_json_store(&config.storage.path).await?,
        };

        let generator: SharedGenerator = Arc::new(LlmClient::with_config(config.llm.clone())?);

        let prompts = match &config.content.prompt_template {
            Some(path) => {
                let template = tokio::fs::read_to_string(path).await?;
                PromptBuilder::with_template(&template)?
            }
            None => PromptBuilder::new()?,
        };

        let mut fanout = PlatformFanout::new(config.platforms.build_adapters()?);
        if let Some(sender) = events {
            fanout = fanout.with_events(sender);
        }

        let clock: SharedClock = Arc::new(SystemClock);

        tracing::info!(
            storage = ?config.storage.backend,
            platforms = ?fanout.platforms(),
            "Orchestrator configured"
        );

        Ok(Self::new(PipelineContext {
            store,
            clock,
            generator,
            prompts,
            system_prompt: config.llm.system_prompt.clone(),
            content: ContentStore::new(&config.content.root)?,
            media: MediaResolver::new(config.content.public_base_url.as_deref())?,
            fanout,
            config: config.pipeline.clone(),
        }))
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn guard(&self) -> &RunGuard {
        &self.guard
    }

    // ========================================================================
    // Stages
    // ========================================================================

    /// Run one stage under the guard
    ///
    /// A stage that is already running or paused is reported as skipped.
    pub async fn run_stage(&self, stage: Stage) -> Result<StageReport> {
        let started_at = self.ctx.now();
        let run_id = Uuid::new_v4();

        let permit = match self.guard.try_acquire(stage) {
            Ok(permit) => permit,
            Err(reason) => {
                tracing::info!(%run_id, stage = %stage, reason = %reason, "Stage run skipped");
                metrics::record_stage_run(stage.as_str(), true);
                return Ok(StageReport::skipped(stage, reason.to_string(), started_at)
                    .with_run_id(run_id));
            }
        };

        let _timer = metrics::start_stage_timer(stage.as_str());
        tracing::info!(%run_id, stage = %stage, "Stage started");

        let outcomes = match stage {
            Stage::Schedule => stages::schedule::run(&self.ctx).await,
            Stage::Generate => stages::generate::run(&self.ctx).await,
            Stage::Publish => stages::publish::run(&self.ctx).await,
        };
        drop(permit);

        let outcomes = outcomes.inspect_err(|e| {
            tracing::error!(%run_id, stage = %stage, error = %e, "Stage aborted");
        })?;

        for outcome in &outcomes {
            metrics::record_task_outcome(stage.as_str(), outcome_label(outcome));
        }
        metrics::record_stage_run(stage.as_str(), false);

        let report = StageReport::completed(stage, started_at, self.ctx.now(), outcomes)
            .with_run_id(run_id);
        tracing::info!(
            %run_id,
            stage = %stage,
            advanced = report.advanced,
            failed = report.failed,
            conflicts = report.conflicts,
            "Stage finished"
        );
        Ok(report)
    }

    pub async fn schedule_all(&self) -> Result<StageReport> {
        self.run_stage(Stage::Schedule).await
    }

    pub async fn generate_all(&self) -> Result<StageReport> {
        self.run_stage(Stage::Generate).await
    }

    pub async fn publish_all(&self) -> Result<StageReport> {
        self.run_stage(Stage::Publish).await
    }

    /// Schedule, generate and publish in order
    pub async fn run_all(&self) -> Result<Vec<StageReport>> {
        let mut reports = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            reports.push(self.run_stage(stage).await?);
        }
        Ok(reports)
    }

    /// Generate one task now, ignoring its due date
    #[tracing::instrument(skip(self))]
    pub async fn generate_by_id(&self, task_id: &str) -> Result<TaskOutcome> {
        let (campaign, task) = self.task_with_campaign(task_id).await?;
        stages::generate::run_one(&self.ctx, &campaign, task).await
    }

    /// Publish one task now, ignoring its due date
    #[tracing::instrument(skip(self))]
    pub async fn publish_by_id(&self, task_id: &str) -> Result<TaskOutcome> {
        let (campaign, task) = self.task_with_campaign(task_id).await?;
        stages::publish::run_one(&self.ctx, &campaign, task).await
    }

    async fn task_with_campaign(&self, task_id: &str) -> Result<(Campaign, CampaignTask)> {
        let store = self.ctx.store.as_ref();
        let task = task_db::assert_task_exists(store, task_id).await?;
        let campaign = campaign_db::assert_campaign_exists(store, &task.campaign_id).await?;
        Ok((campaign, task))
    }

    // ========================================================================
    // Stage Control
    // ========================================================================

    pub fn stage_status(&self) -> Vec<StageStatus> {
        self.guard.snapshot()
    }

    pub fn pause_stage(&self, stage: Stage) -> StageState {
        self.guard.pause(stage)
    }

    pub fn resume_stage(&self, stage: Stage) -> StageState {
        self.guard.resume(stage)
    }

    // ========================================================================
    // Campaigns
    // ========================================================================

    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        let mut campaigns = campaign_db::fetch_campaigns(self.ctx.store.as_ref()).await?;
        campaigns.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(campaigns)
    }

    pub async fn get_campaign(&self, campaign_id: &str) -> Result<Campaign> {
        campaign_db::assert_campaign_exists(self.ctx.store.as_ref(), campaign_id).await
    }

    pub async fn create_campaign(&self, input: CampaignInput) -> Result<Campaign> {
        let campaign = input.into_campaign(self.ctx.now());
        campaign_db::insert_campaign(self.ctx.store.as_ref(), &campaign).await?;
        Ok(campaign)
    }

    /// Replace a campaign; the id in the path wins over the body
    pub async fn update_campaign(&self, campaign_id: &str, input: CampaignInput) -> Result<Campaign> {
        let existing = self.get_campaign(campaign_id).await?;
        let campaign = input.apply_to(&existing, self.ctx.now());
        campaign_db::update_campaign(self.ctx.store.as_ref(), &campaign).await?;
        Ok(campaign)
    }

    /// Delete a campaign and its tasks, returns the number of tasks removed
    pub async fn delete_campaign(&self, campaign_id: &str) -> Result<usize> {
        campaign_db::delete_campaign(self.ctx.store.as_ref(), campaign_id).await
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    pub async fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<CampaignTask>> {
        let store = self.ctx.store.as_ref();
        let mut tasks = match (&query.campaign_id, query.status) {
            (Some(campaign_id), _) => task_db::fetch_tasks_for_campaign(store, campaign_id).await?,
            (None, Some(status)) => task_db::fetch_tasks_with_status(store, status).await?,
            (None, None) => task_db::fetch_tasks(store).await?,
        };

        if let Some(status) = query.status {
            tasks.retain(|t| t.status == status);
        }
        tasks.sort_by(|a, b| a.occurrence.cmp(&b.occurrence).then_with(|| b.lead.cmp(&a.lead)));
        Ok(tasks)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<CampaignTask> {
        task_db::assert_task_exists(self.ctx.store.as_ref(), task_id).await
    }
}

fn outcome_label(outcome: &TaskOutcome) -> &'static str {
    match outcome.status {
        super::OutcomeStatus::Advanced => "advanced",
        super::OutcomeStatus::Failed => "failed",
        super::OutcomeStatus::Conflict => "conflict",
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("platforms", &self.ctx.fanout.platforms())
            .field("stages", &self.guard.snapshot())
            .finish()
    }
}
