use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::subscriber::EmailFrequency;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;
pub mod endpoints;
pub mod manager;
pub use endpoints::*;

pub type CampaignId = TypedId<Campaign>;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Campaign {
    #[serde(rename = "_id")]
    pub id: CampaignId,
    pub title: String,
    pub subject: String,
    pub content: String,
    pub content_type: ContentType,
    pub status: CampaignStatus,
    #[serde(with = "crate::utils::optional_chrono_datetime_as_bson_datetime")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::utils::optional_chrono_datetime_as_bson_datetime")]
    pub sent_at: Option<DateTime<Utc>>,
    pub target_audience: TargetAudience,
    pub template: TemplateSettings,
    pub recipients: RecipientCounts,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub modified_at: DateTime<Utc>,
}

impl TypedIdMarker for Campaign {
    fn tag() -> &'static str {
        "CMP"
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    Failed,
    PartiallyFailed,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum ContentType {
    Markdown,
    Html,
}

impl Default for ContentType {
    fn default() -> ContentType {
        ContentType::Markdown
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct TargetAudience {
    pub status: AudienceStatusFilter,
    pub categories: Option<Vec<String>>,
    pub frequency: Option<EmailFrequency>,
}

impl Default for TargetAudience {
    fn default() -> TargetAudience {
        TargetAudience {
            status: AudienceStatusFilter::All,
            categories: None,
            frequency: None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum AudienceStatusFilter {
    All,
    Active,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct TemplateSettings {
    pub header_image: Option<String>,
    pub footer_text: Option<String>,
    pub accent_color: Option<String>,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct RecipientCounts {
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
    pub opened: i64,
    pub clicked: i64,
}

#[derive(Clone, Debug)]
pub struct CampaignUpdate {
    pub title: String,
    pub subject: String,
    pub content: String,
    pub content_type: ContentType,
    pub target_audience: TargetAudience,
    pub template: TemplateSettings,
    pub scheduled_at: Option<DateTime<Utc>>,
}
