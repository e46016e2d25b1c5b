//! Campaign persistence

use crate::error::{CampaignError, Error, StorageError};
use crate::storage::{from_record, from_records, to_record, RecordStore, CAMPAIGNS};
use crate::task;

use super::Campaign;

#[tracing::instrument(skip(store))]
pub async fn fetch_campaigns(store: &dyn RecordStore) -> Result<Vec<Campaign>, Error> {
    let records = store.list(CAMPAIGNS).await?;
    Ok(from_records(records)?)
}

#[tracing::instrument(skip(store))]
pub async fn fetch_campaign_by_id(
    store: &dyn RecordStore,
    campaign_id: &str,
) -> Result<Option<Campaign>, Error> {
    match store.get(CAMPAIGNS, campaign_id).await? {
        Some(record) => Ok(Some(from_record(record)?)),
        None => Ok(None),
    }
}

#[tracing::instrument(skip(store))]
pub async fn assert_campaign_exists(
    store: &dyn RecordStore,
    campaign_id: &str,
) -> Result<Campaign, Error> {
    fetch_campaign_by_id(store, campaign_id)
        .await?
        .ok_or_else(|| CampaignError::NotFound(campaign_id.to_string()).into())
}

/// Validate and store a new campaign
#[tracing::instrument(skip(store, campaign), fields(campaign_id = %campaign.id))]
pub async fn insert_campaign(store: &dyn RecordStore, campaign: &Campaign) -> Result<(), Error> {
    campaign.validate()?;

    let record = to_record(campaign)?;
    match store.insert(CAMPAIGNS, &campaign.id, record).await {
        Ok(()) => {}
        Err(StorageError::AlreadyExists { .. }) => {
            return Err(CampaignError::AlreadyExists(campaign.id.clone()).into());
        }
        Err(e) => return Err(e.into()),
    }

    store.save().await?;
    tracing::info!("Campaign created");
    Ok(())
}

/// Validate and replace an existing campaign
#[tracing::instrument(skip(store, campaign), fields(campaign_id = %campaign.id))]
pub async fn update_campaign(store: &dyn RecordStore, campaign: &Campaign) -> Result<(), Error> {
    campaign.validate()?;

    let record = to_record(campaign)?;
    match store.update(CAMPAIGNS, &campaign.id, record).await {
        Ok(()) => {}
        Err(StorageError::NotFound { .. }) => {
            return Err(CampaignError::NotFound(campaign.id.clone()).into());
        }
        Err(e) => return Err(e.into()),
    }

    store.save().await?;
    tracing::info!("Campaign updated");
    Ok(())
}

/// Delete a campaign and every task it owns
///
/// Returns the number of tasks removed.
#[tracing::instrument(skip(store))]
pub async fn delete_campaign(store: &dyn RecordStore, campaign_id: &str) -> Result<usize, Error> {
    if !store.delete(CAMPAIGNS, campaign_id).await? {
        return Err(CampaignError::NotFound(campaign_id.to_string()).into());
    }

    let removed = task::db::delete_tasks_for_campaign(store, campaign_id).await?;
    store.save().await?;

    tracing::info!(tasks_removed = removed, "Campaign deleted");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::CampaignInput;
    use crate::platforms::PlatformId;
    use crate::storage::MemoryStore;
    use crate::task::CampaignTask;
    use chrono::{TimeZone, Utc};
    use chrono_tz::Tz;

    fn campaign(id: &str) -> Campaign {
        let now = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        CampaignInput {
            id: id.to_string(),
            name: "Test".to_string(),
            theme: "Testing".to_string(),
            start: Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
            end: None,
            timezone: Tz::UTC,
            channels: [PlatformId::Webhook].into(),
            lead_days: 1,
            recurrence: None,
            active: true,
        }
        .into_campaign(now)
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let store = MemoryStore::new();
        insert_campaign(&store, &campaign("a")).await.unwrap();

        let fetched = assert_campaign_exists(&store, "a").await.unwrap();
        assert_eq!(fetched, campaign("a"));
        assert_eq!(fetch_campaigns(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_conflict() {
        let store = MemoryStore::new();
        insert_campaign(&store, &campaign("a")).await.unwrap();

        let err = insert_campaign(&store, &campaign("a")).await.unwrap_err();
        assert!(matches!(err, Error::Campaign(CampaignError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_invalid_campaign_not_stored() {
        let store = MemoryStore::new();
        let mut bad = campaign("a");
        bad.name = String::new();

        assert!(insert_campaign(&store, &bad).await.is_err());
        assert!(fetch_campaigns(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = update_campaign(&store, &campaign("ghost")).await.unwrap_err();
        assert!(matches!(err, Error::Campaign(CampaignError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_tasks() {
        let store = MemoryStore::new();
        let a = campaign("a");
        insert_campaign(&store, &a).await.unwrap();
        insert_campaign(&store, &campaign("b")).await.unwrap();

        for lead in 0..=1 {
            task::db::insert_task(&store, &CampaignTask::new("a", a.start, None, lead))
                .await
                .unwrap();
        }
        task::db::insert_task(&store, &CampaignTask::new("b", a.start, None, 0))
            .await
            .unwrap();

        assert_eq!(delete_campaign(&store, "a").await.unwrap(), 2);
        assert!(fetch_campaign_by_id(&store, "a").await.unwrap().is_none());
        assert_eq!(task::db::fetch_tasks(&store).await.unwrap().len(), 1);

        let err = delete_campaign(&store, "a").await.unwrap_err();
        assert!(matches!(err, Error::Campaign(CampaignError::NotFound(_))));
    }
}
