use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::campaign::CampaignId;
use crate::subscriber::SubscriberId;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;
pub mod endpoints;
pub mod scheduler;
pub mod worker;
pub use endpoints::*;

pub type DeliveryAttemptId = TypedId<DeliveryAttempt>;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeliveryAttempt {
    #[serde(rename = "_id")]
    pub id: DeliveryAttemptId,
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
    pub position: i64,
    pub outcome: AttemptOutcome,
    pub attempt_count: i32,
    #[serde(with = "crate::utils::optional_chrono_datetime_as_bson_datetime")]
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    #[serde(with = "crate::utils::optional_chrono_datetime_as_bson_datetime")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::utils::optional_chrono_datetime_as_bson_datetime")]
    pub clicked_at: Option<DateTime<Utc>>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub modified_at: DateTime<Utc>,
}

impl TypedIdMarker for DeliveryAttempt {
    fn tag() -> &'static str {
        "DLV"
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum AttemptOutcome {
    Pending,
    Sent,
    TransientFailure,
    PermanentFailure,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct OutcomeTally {
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
    pub pending: i64,
    pub opened: i64,
    pub clicked: i64,
}
