use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;
pub mod endpoints;
pub mod manager;
pub use endpoints::*;

pub type SubscriberId = TypedId<Subscriber>;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Subscriber {
    #[serde(rename = "_id")]
    pub id: SubscriberId,
    pub email: String,
    pub name: Option<String>,
    pub status: SubscriberStatus,
    pub preferences: Preferences,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub subscribed_at: DateTime<Utc>,
    #[serde(with = "crate::utils::optional_chrono_datetime_as_bson_datetime")]
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub provenance: Provenance,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub modified_at: DateTime<Utc>,
}

impl TypedIdMarker for Subscriber {
    fn tag() -> &'static str {
        "SUB"
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum SubscriberStatus {
    Active,
    Unsubscribed,
    Bounced,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Preferences {
    pub frequency: EmailFrequency,
    pub categories: Vec<String>,
}

impl Default for Preferences {
    fn default() -> Preferences {
        Preferences {
            frequency: EmailFrequency::Weekly,
            categories: vec![],
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum EmailFrequency {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Provenance {
    pub source: SignupSource,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum SignupSource {
    Website,
    Admin,
    Import,
}
