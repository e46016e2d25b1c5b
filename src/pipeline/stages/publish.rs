//! Publisher stage
//!
//! Picks up generated tasks whose campaign has reached the publish date for
//! the task's occurrence, loads the stored post, resolves media references
//! and fans out to the channels that have not acknowledged it yet.
//!
//! Platforms that accept the post are remembered on the task, so a retry
//! only goes to the ones that failed. Whether a partial success publishes
//! the task depends on [`PublishPolicy`].

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::campaign::Campaign;
use crate::content::{ContentError, GeneratedPost};
use crate::error::Error;
use crate::platforms::{PlatformId, PublishResult};
use crate::task::{
    db as task_db, CampaignTask, PlatformFailure, Stage, TaskError, TaskFailure, TaskStatus,
};

use super::super::{PublishPolicy, TaskOutcome};
use super::PipelineContext;

/// Generated tasks due for publishing today, with their campaign
pub async fn due_tasks(ctx: &PipelineContext) -> Result<Vec<(Campaign, CampaignTask)>, Error> {
    let campaigns = ctx.campaigns_by_id().await?;
    let tasks = task_db::fetch_tasks_with_status(ctx.store.as_ref(), TaskStatus::Generated).await?;

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
                && timeline.is_due_for_occurrence(Stage::Publish, task.occurrence, today))
            .then(|| (campaign.clone(), task))
        })
        .collect())
}

#[tracing::instrument(skip(ctx))]
pub async fn run(ctx: &PipelineContext) -> Result<Vec<TaskOutcome>, Error> {
    let candidates = due_tasks(ctx).await?;
    tracing::info!(tasks = candidates.len(), "Publishing content");

    let outcomes = ctx
        .for_each_bounded(candidates, |(campaign, task)| async move {
            publish_task(ctx, &campaign, task).await
        })
        .await;

    ctx.store.save().await?;
    Ok(outcomes)
}

/// Publish one task regardless of its due date
pub async fn run_one(
    ctx: &PipelineContext,
    campaign: &Campaign,
    task: CampaignTask,
) -> Result<TaskOutcome, Error> {
    if !task.is_due_for(TaskStatus::Published) {
        return Err(TaskError::InvalidTransition {
            task_id: task.id.clone(),
            from: task.status,
            to: TaskStatus::Published,
        }
        .into());
    }

    let outcome = publish_task(ctx, campaign, task).await;
    ctx.store.save().await?;
    Ok(outcome)
}

/// Whether the task may be marked published after this fan-out
fn should_advance(
    policy: PublishPolicy,
    channels: &BTreeSet<PlatformId>,
    acknowledged: &BTreeSet<PlatformId>,
) -> bool {
    match policy {
        PublishPolicy::All => channels.is_subset(acknowledged),
        PublishPolicy::Any => !acknowledged.is_empty(),
    }
}

#[tracing::instrument(skip(ctx, campaign, task), fields(task_id = %task.id, campaign_id = %campaign.id))]
async fn publish_task(ctx: &PipelineContext, campaign: &Campaign, task: CampaignTask) -> TaskOutcome {
    let post = match load_post(ctx, &task).await {
        Ok(post) => post,
        Err(e) => return ctx.fail(Stage::Publish, &task, &e).await,
    };

    let pending = task.pending_channels(&campaign.channels);
    let result = if pending.is_empty() {
        None
    } else {
        Some(ctx.fanout.publish(&post, &pending).await)
    };

    let mut updated = task.clone();
    if let Some(result) = &result {
        updated.record_published_platforms(result.successful_platforms.iter().copied());
    }

    let now = ctx.now();
    let advance = should_advance(
        ctx.config.publish_policy,
        &campaign.channels,
        &updated.published_platforms,
    );

    if advance {
        if let Err(e) = updated.mark_published(now) {
            return ctx.fail(Stage::Publish, &task, &Error::from(e)).await;
        }
    } else {
        updated.record_failure(publish_failure(result.as_ref(), now));
    }

    let outcome = match ctx.commit(&task, &updated).await {
        Ok(()) if advance => {
            tracing::info!(platforms = ?updated.published_platforms, "Task published");
            TaskOutcome::advanced(&updated)
        }
        Ok(()) => {
            let message = updated
                .last_error
                .as_ref()
                .map(|f| f.message.clone())
                .unwrap_or_default();
            tracing::warn!(message = %message, "Publish incomplete, task stays generated");
            TaskOutcome::failed(&updated, message)
        }
        Err(e) => ctx.commit_error(Stage::Publish, &task, e),
    };

    match result {
        Some(result) => outcome.with_publish(result),
        None => outcome,
    }
}

fn publish_failure(result: Option<&PublishResult>, at: DateTime<Utc>) -> TaskFailure {
    let failures: Vec<PlatformFailure> = result
        .map(|r| {
            r.outcomes
                .iter()
                .filter(|o| !o.success)
                .map(|o| PlatformFailure {
                    platform: o.platform,
                    error: o.error.clone().unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    let platforms = failures
        .iter()
        .map(|f| f.platform.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let code = if result.is_some_and(|r| r.success) {
        "partial_publish"
    } else {
        "publish_failed"
    };

    TaskFailure::new(Stage::Publish, code, format!("publish failed on: {platforms}"), at)
        .with_platforms(failures)
}

async fn load_post(ctx: &PipelineContext, task: &CampaignTask) -> Result<GeneratedPost, Error> {
    let folder = task
        .content_folder
        .as_deref()
        .ok_or_else(|| ContentError::NotFound(task.id.clone()))?;
    let post = ctx.content.load(folder).await?;
    Ok(ctx.media.resolve_post(&post)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_advance_policies() {
        let channels: BTreeSet<_> = [PlatformId::Facebook, PlatformId::Linkedin].into();
        let partial: BTreeSet<_> = [PlatformId::Facebook].into();

        assert!(!should_advance(PublishPolicy::All, &channels, &partial));
        assert!(should_advance(PublishPolicy::All, &channels, &channels));
        assert!(should_advance(PublishPolicy::Any, &channels, &partial));
        assert!(!should_advance(PublishPolicy::Any, &channels, &BTreeSet::new()));
    }
}
