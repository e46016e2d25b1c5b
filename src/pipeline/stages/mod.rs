//! The three batch stages
//!
//! Each stage reads its candidates, decides eligibility with the campaign
//! timeline and the task state machine, then processes candidates through a
//! bounded worker pool. Every write is a compare-and-set against the task as
//! it was read.

pub mod generate;
pub mod publish;
pub mod schedule;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::future::Future;

use crate::campaign::{db as campaign_db, Campaign};
use crate::clock::SharedClock;
use crate::content::{ContentStore, MediaResolver, PromptBuilder};
use crate::error::{Error, HeraldErrorTrait, StorageError};
use crate::llm::SharedGenerator;
use crate::platforms::PlatformFanout;
use crate::storage::SharedStore;
use crate::task::{db as task_db, CampaignTask, Stage, TaskFailure};

use super::{PipelineConfig, TaskOutcome};

/// Collaborators and settings shared by every stage
pub struct PipelineContext {
    pub store: SharedStore,
    pub clock: SharedClock,
    pub generator: SharedGenerator,
    pub prompts: PromptBuilder,
    pub system_prompt: String,
    pub content: ContentStore,
    pub media: MediaResolver,
    pub fanout: PlatformFanout,
    pub config: PipelineConfig,
}

impl PipelineContext {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Today in the campaign's timezone
    pub fn today_for(&self, campaign: &Campaign) -> NaiveDate {
        campaign.local_date(self.now())
    }

    /// Campaigns keyed by id
    pub(crate) async fn campaigns_by_id(&self) -> Result<HashMap<String, Campaign>, Error> {
        let campaigns = campaign_db::fetch_campaigns(self.store.as_ref()).await?;
        Ok(campaigns.into_iter().map(|c| (c.id.clone(), c)).collect())
    }

    /// Run `work` over `items` with at most `max_concurrent_tasks` in flight
    pub(crate) async fn for_each_bounded<T, R, F, Fut>(&self, items: Vec<T>, work: F) -> Vec<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R>,
    {
        stream::iter(items)
            .map(work)
            .buffer_unordered(self.config.max_concurrent_tasks.max(1))
            .collect()
            .await
    }

    /// Compare-and-set `updated` over `observed`
    pub(crate) async fn commit(
        &self,
        observed: &CampaignTask,
        updated: &CampaignTask,
    ) -> Result<(), Error> {
        task_db::transition_task(self.store.as_ref(), observed, updated).await
    }

    /// Record a failed attempt on the task and report it
    ///
    /// If the task changed in the meantime the failure is only reported.
    pub(crate) async fn fail(&self, stage: Stage, observed: &CampaignTask, error: &Error) -> TaskOutcome {
        tracing::warn!(
            stage = %stage,
            task_id = %observed.id,
            code = error.code(),
            error = %error,
            "Task attempt failed"
        );

        let mut updated = observed.clone();
        updated.record_failure(TaskFailure::new(stage, error.code(), error.to_string(), self.now()));

        match self.commit(observed, &updated).await {
            Ok(()) => TaskOutcome::failed(&updated, error.to_string()),
            Err(Error::Storage(StorageError::Conflict { .. })) => TaskOutcome::conflict(observed),
            Err(e) => {
                tracing::error!(task_id = %observed.id, error = %e, "Could not record failure");
                TaskOutcome::failed(observed, error.to_string())
            }
        }
    }

    /// Map a failed commit to an outcome
    pub(crate) fn commit_error(&self, stage: Stage, task: &CampaignTask, error: Error) -> TaskOutcome {
        match error {
            Error::Storage(StorageError::Conflict { .. }) => {
                tracing::info!(stage = %stage, task_id = %task.id, "Task changed concurrently, skipped");
                TaskOutcome::conflict(task)
            }
            e => {
                tracing::error!(stage = %stage, task_id = %task.id, error = %e, "Task write failed");
                TaskOutcome::failed(task, e.to_string())
            }
        }
    }
}
