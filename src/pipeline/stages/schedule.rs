//! Scheduler stage
//!
//! Creates one task per lead value (`lead_days` down to 0) for every
//! occurrence of an active campaign that falls inside the scheduling horizon,
//! and immediately marks it scheduled. Task ids are deterministic, so running
//! the stage twice creates nothing new.

use crate::campaign::Campaign;
use crate::error::Error;
use crate::task::{db as task_db, CampaignTask, Stage};

use super::super::TaskOutcome;
use super::PipelineContext;

/// Tasks that should exist today for `campaign`
pub fn planned_tasks(ctx: &PipelineContext, campaign: &Campaign) -> Vec<CampaignTask> {
    let today = ctx.today_for(campaign);
    let timeline = campaign.timeline(ctx.config.offsets());

    if !timeline.is_active(today) {
        return Vec::new();
    }

    let mut tasks = Vec::new();
    for occurrence in timeline.occurrences_to_schedule(today) {
        let occurrence_date = campaign
            .is_recurring()
            .then(|| campaign.local_date(occurrence));

        for lead in (0..=campaign.lead_days).rev() {
            tasks.push(CampaignTask::new(&campaign.id, occurrence, occurrence_date, lead));
        }
    }
    tasks
}

/// Run the scheduler over every campaign
#[tracing::instrument(skip(ctx))]
pub async fn run(ctx: &PipelineContext) -> Result<Vec<TaskOutcome>, Error> {
    let campaigns = ctx.campaigns_by_id().await?;

    let mut candidates: Vec<CampaignTask> = Vec::new();
    for campaign in campaigns.values() {
        let planned = planned_tasks(ctx, campaign);
        if !planned.is_empty() {
            tracing::debug!(campaign_id = %campaign.id, tasks = planned.len(), "Campaign due for scheduling");
        }
        candidates.extend(planned);
    }

    let outcomes = ctx
        .for_each_bounded(candidates, |task| schedule_task(ctx, task))
        .await
        .into_iter()
        .flatten()
        .collect();

    ctx.store.save().await?;
    Ok(outcomes)
}

/// Insert a pending task and mark it scheduled
///
/// Returns `None` when the task already exists past `Pending`. A task left
/// pending by an interrupted run is picked up again.
async fn schedule_task(ctx: &PipelineContext, planned: CampaignTask) -> Option<TaskOutcome> {
    let pending = match task_db::insert_task(ctx.store.as_ref(), &planned).await {
        Ok(true) => planned,
        Ok(false) => match task_db::fetch_task_by_id(ctx.store.as_ref(), &planned.id).await {
            Ok(Some(existing)) if existing.is_due_for(Stage::Schedule.target_status()) => existing,
            Ok(_) => return None,
            Err(e) => return Some(ctx.commit_error(Stage::Schedule, &planned, e)),
        },
        Err(e) => return Some(ctx.commit_error(Stage::Schedule, &planned, e)),
    };

    let mut scheduled = pending.clone();
    if let Err(e) = scheduled.mark_scheduled(ctx.now()) {
        tracing::warn!(task_id = %pending.id, error = %e, "Skipping task");
        return Some(TaskOutcome::failed(&pending, e.to_string()));
    }

    Some(match ctx.commit(&pending, &scheduled).await {
        Ok(()) => {
            tracing::info!(task_id = %scheduled.id, "Task scheduled");
            TaskOutcome::advanced(&scheduled)
        }
        Err(e) => ctx.commit_error(Stage::Schedule, &pending, e),
    })
}
