//! Generator stage
//!
//! Picks up scheduled tasks whose campaign has reached the generation date
//! for the task's occurrence, asks the content generator for a post, stores
//! it in a fresh dated folder and marks the task generated. Failures are
//! recorded on the task, which stays scheduled for the next run.

use crate::campaign::Campaign;
use crate::content::GeneratedPost;
use crate::error::Error;
use crate::task::{db as task_db, CampaignTask, Stage, TaskError, TaskStatus};

use super::super::TaskOutcome;
use super::PipelineContext;

/// Scheduled tasks due for generation today, with their campaign
pub async fn due_tasks(ctx: &PipelineContext) -> Result<Vec<(Campaign, CampaignTask)>, Error> {
    let campaigns = ctx.campaigns_by_id().await?;
    let tasks = task_db::fetch_tasks_with_status(ctx.store.as_ref(), TaskStatus::Scheduled).await?;

    Ok(tasks
        .into_iter()
        .filter_map(|task| {
            let Some(campaign) = campaigns.get(&task.campaign_id) else {
                tracing::warn!(task_id = %task.id, "Task without campaign, skipped");
                return None;
            };
            let today = ctx.today_for(campaign);
            let timeline = campaign.timeline(ctx.config.offsets());

            (timeline.is_active(today)
                && timeline.is_due_for_occurrence(Stage::Generate, task.occurrence, today))
            .then(|| (campaign.clone(), task))
        })
        .collect())
}

#[tracing::instrument(skip(ctx))]
pub async fn run(ctx: &PipelineContext) -> Result<Vec<TaskOutcome>, Error> {
    let candidates = due_tasks(ctx).await?;
    tracing::info!(tasks = candidates.len(), "Generating content");

    let outcomes = ctx
        .for_each_bounded(candidates, |(campaign, task)| async move {
            generate_task(ctx, &campaign, task).await
        })
        .await;

    ctx.store.save().await?;
    Ok(outcomes)
}

/// Generate one task regardless of its due date
pub async fn run_one(
    ctx: &PipelineContext,
    campaign: &Campaign,
    task: CampaignTask,
) -> Result<TaskOutcome, Error> {
    if !task.is_due_for(TaskStatus::Generated) {
        return Err(TaskError::InvalidTransition {
            task_id: task.id.clone(),
            from: task.status,
            to: TaskStatus::Generated,
        }
        .into());
    }

    let outcome = generate_task(ctx, campaign, task).await;
    ctx.store.save().await?;
    Ok(outcome)
}

#[tracing::instrument(skip(ctx, campaign, task), fields(task_id = %task.id, campaign_id = %campaign.id))]
async fn generate_task(ctx: &PipelineContext, campaign: &Campaign, task: CampaignTask) -> TaskOutcome {
    let folder = match produce_post(ctx, campaign, &task).await {
        Ok(folder) => folder,
        Err(e) => return ctx.fail(Stage::Generate, &task, &e).await,
    };

    let mut generated = task.clone();
    if let Err(e) = generated.mark_generated(&folder, ctx.now()) {
        return ctx.fail(Stage::Generate, &task, &Error::from(e)).await;
    }

    match ctx.commit(&task, &generated).await {
        Ok(()) => {
            tracing::info!(folder = %folder, "Content generated");
            TaskOutcome::advanced(&generated)
        }
        Err(e) => ctx.commit_error(Stage::Generate, &task, e),
    }
}

/// Prompt, complete, parse and store; returns the content folder
async fn produce_post(
    ctx: &PipelineContext,
    campaign: &Campaign,
    task: &CampaignTask,
) -> Result<String, Error> {
    let prompt = ctx.prompts.build(campaign, task)?;
    let completion = ctx.generator.complete(&prompt, &ctx.system_prompt).await?;

    let now = ctx.now();
    let post = GeneratedPost::from_completion(&completion, now)?;
    let folder = ctx.content.save(&campaign.id, &task.id, &post, now).await?;
    Ok(folder)
}
