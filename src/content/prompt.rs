//! Prompt construction with Handlebars

use handlebars::Handlebars;
use serde::Serialize;

use super::ContentError;
use crate::campaign::Campaign;
use crate::task::CampaignTask;

/// Default generation prompt
const DEFAULT_TEMPLATE: &str = include_str!("../../templates/prompt.hbs");

const TEMPLATE_NAME: &str = "prompt";

/// Values available to the prompt template
#[derive(Debug, Serialize)]
pub struct PromptContext {
    pub campaign_id: String,
    pub campaign_name: String,
    pub theme: String,
    pub task_id: String,
    pub lead: u32,
    pub is_event_day: bool,
    pub occurrence_date: String,
    pub channels: Vec<String>,
}

impl PromptContext {
    pub fn new(campaign: &Campaign, task: &CampaignTask) -> Self {
        Self {
            campaign_id: campaign.id.clone(),
            campaign_name: campaign.name.clone(),
            theme: campaign.theme.clone(),
            task_id: task.id.clone(),
            lead: task.lead,
            is_event_day: task.lead == 0,
            occurrence_date: campaign.local_date(task.occurrence).format("%Y-%m-%d").to_string(),
            channels: campaign.channels.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Renders generation prompts from a campaign and task
pub struct PromptBuilder {
    handlebars: Handlebars<'static>,
}

impl PromptBuilder {
    /// Builder with the bundled template
    pub fn new() -> Result<Self, ContentError> {
        Self::with_template(DEFAULT_TEMPLATE)
    }

    /// Builder with a custom template string
    pub fn with_template(template: &str) -> Result<Self, ContentError> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
            .register_template_string(TEMPLATE_NAME, template)
            .map_err(|e| ContentError::Template(e.to_string()))?;

        Ok(Self { handlebars })
    }

    pub fn build(&self, campaign: &Campaign, task: &CampaignTask) -> Result<String, ContentError> {
        self.handlebars
            .render(TEMPLATE_NAME, &PromptContext::new(campaign, task))
            .map_err(|e| ContentError::Template(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::CampaignInput;
    use crate::platforms::PlatformId;
    use chrono::{TimeZone, Utc};
    use chrono_tz::Tz;

    fn campaign() -> Campaign {
        CampaignInput {
            id: "launch".to_string(),
            name: "Launch & Co".to_string(),
            theme: "Our new app".to_string(),
            start: Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
            end: None,
            timezone: Tz::UTC,
            channels: [PlatformId::Facebook, PlatformId::Linkedin].into(),
            lead_days: 7,
            recurrence: None,
            active: true,
        }
        .into_campaign(Utc::now())
    }

    #[test]
    fn test_default_prompt_mentions_identity() {
        let campaign = campaign();
        let task = CampaignTask::new("launch", campaign.start, None, 3);
        let prompt = PromptBuilder::new().unwrap().build(&campaign, &task).unwrap();

        assert!(prompt.contains("Launch & Co"));
        assert!(prompt.contains("Our new app"));
        assert!(prompt.contains("2025-03-10"));
        assert!(prompt.contains("3 day(s) before"));
        assert!(prompt.contains("facebook, linkedin"));
        assert!(prompt.contains("launch:d-3"));
    }

    #[test]
    fn test_event_day_wording() {
        let campaign = campaign();
        let task = CampaignTask::new("launch", campaign.start, None, 0);
        let prompt = PromptBuilder::new().unwrap().build(&campaign, &task).unwrap();

        assert!(prompt.contains("on the day of the event"));
    }

    #[test]
    fn test_custom_template() {
        let builder = PromptBuilder::with_template("{{theme}} / {{task_id}}").unwrap();
        let campaign = campaign();
        let task = CampaignTask::new("launch", campaign.start, None, 1);

        assert_eq!(builder.build(&campaign, &task).unwrap(), "Our new app / launch:d-1");
    }

    #[test]
    fn test_invalid_template() {
        assert!(matches!(
            PromptBuilder::with_template("{{#if}}"),
            Err(ContentError::Template(_))
        ));
    }
}
