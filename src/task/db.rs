//! Task persistence
//!
//! Status changes are written with a compare-and-set against the record the
//! caller read, so two workers can never both advance the same task.

use serde_json::Value;

use crate::error::{Error, StorageError};
use crate::storage::{from_record, from_records, to_record, RecordStore, CAMPAIGN_TASKS};

use super::{CampaignTask, TaskStatus};

#[tracing::instrument(skip(store))]
pub async fn fetch_tasks(store: &dyn RecordStore) -> Result<Vec<CampaignTask>, Error> {
    let records = store.list(CAMPAIGN_TASKS).await?;
    Ok(from_records(records)?)
}

#[tracing::instrument(skip(store))]
pub async fn fetch_tasks_with_status(
    store: &dyn RecordStore,
    status: TaskStatus,
) -> Result<Vec<CampaignTask>, Error> {
    let wanted = status.as_str();
    let records = store
        .filter(CAMPAIGN_TASKS, &|r: &Value| r["status"] == wanted)
        .await?;
    Ok(from_records(records)?)
}

#[tracing::instrument(skip(store))]
pub async fn fetch_tasks_for_campaign(
    store: &dyn RecordStore,
    campaign_id: &str,
) -> Result<Vec<CampaignTask>, Error> {
    let records = store
        .filter(CAMPAIGN_TASKS, &|r: &Value| r["campaign_id"] == campaign_id)
        .await?;
    Ok(from_records(records)?)
}

#[tracing::instrument(skip(store))]
pub async fn fetch_task_by_id(
    store: &dyn RecordStore,
    task_id: &str,
) -> Result<Option<CampaignTask>, Error> {
    match store.get(CAMPAIGN_TASKS, task_id).await? {
        Some(record) => Ok(Some(from_record(record)?)),
        None => Ok(None),
    }
}

#[tracing::instrument(skip(store))]
pub async fn assert_task_exists(store: &dyn RecordStore, task_id: &str) -> Result<CampaignTask, Error> {
    fetch_task_by_id(store, task_id)
        .await?
        .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
}

/// Store a new task
///
/// Returns `false` when a task with the same id already exists.
#[tracing::instrument(skip(store, task), fields(task_id = %task.id))]
pub async fn insert_task(store: &dyn RecordStore, task: &CampaignTask) -> Result<bool, Error> {
    match store.insert(CAMPAIGN_TASKS, &task.id, to_record(task)?).await {
        Ok(()) => Ok(true),
        Err(StorageError::AlreadyExists { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Replace `observed` with `updated` if nobody changed it in between
#[tracing::instrument(skip(store, observed, updated), fields(task_id = %observed.id))]
pub async fn transition_task(
    store: &dyn RecordStore,
    observed: &CampaignTask,
    updated: &CampaignTask,
) -> Result<(), Error> {
    let expected = to_record(observed)?;
    store
        .replace_if(CAMPAIGN_TASKS, &observed.id, &expected, to_record(updated)?)
        .await?;
    Ok(())
}

/// Remove every task of a campaign, returns how many were removed
#[tracing::instrument(skip(store))]
pub async fn delete_tasks_for_campaign(
    store: &dyn RecordStore,
    campaign_id: &str,
) -> Result<usize, Error> {
    let tasks = fetch_tasks_for_campaign(store, campaign_id).await?;

    let mut removed = 0;
    for task in &tasks {
        if store.delete(CAMPAIGN_TASKS, &task.id).await? {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn task(lead: u32) -> CampaignTask {
        let occurrence = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        CampaignTask::new("launch", occurrence, None, lead)
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = MemoryStore::new();
        assert!(insert_task(&store, &task(0)).await.unwrap());
        assert!(!insert_task(&store, &task(0)).await.unwrap());
        assert_eq!(fetch_tasks(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_by_status() {
        let store = MemoryStore::new();
        let mut scheduled = task(1);
        scheduled.mark_scheduled(Utc::now()).unwrap();

        insert_task(&store, &task(0)).await.unwrap();
        insert_task(&store, &scheduled).await.unwrap();

        let found = fetch_tasks_with_status(&store, TaskStatus::Scheduled).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "launch:d-1");
    }

    #[tokio::test]
    async fn test_transition_rejects_stale_observation() {
        let store = MemoryStore::new();
        let original = task(0);
        insert_task(&store, &original).await.unwrap();

        let mut first = original.clone();
        first.mark_scheduled(Utc::now()).unwrap();
        transition_task(&store, &original, &first).await.unwrap();

        let mut second = original.clone();
        second.mark_scheduled(Utc::now()).unwrap();
        let err = transition_task(&store, &original, &second).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::Conflict { .. })));

        let stored = assert_task_exists(&store, "launch:d-0").await.unwrap();
        assert_eq!(stored, first);
    }

    #[tokio::test]
    async fn test_missing_task() {
        let store = MemoryStore::new();
        let err = assert_task_exists(&store, "nope").await.unwrap_err();
        assert!(matches!(err, Error::TaskNotFound(_)));
    }
}
