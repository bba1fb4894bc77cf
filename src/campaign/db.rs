use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use mongodb::{bson, Database};

use crate::database::MongoCampaignStore;
use crate::delivery::OutcomeTally;
use crate::error::Error;

use super::{Campaign, CampaignId, CampaignStatus, CampaignUpdate};

const CAMPAIGNS: &str = "campaigns";

pub async fn initialize(db: &Database) -> Result<(), Error> {
    db.run_command(
        bson::doc! {
            "createIndexes": CAMPAIGNS,
            "indexes": [
                { "key": { "status": 1, "created_at": -1 }, "name": "by_status" },
            ]
        },
        None,
    )
    .await?;

    Ok(())
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error>;

    async fn fetch_campaigns(&self) -> Result<Vec<Campaign>, Error>;

    async fn fetch_campaign_by_id(&self, campaign_id: CampaignId)
        -> Result<Option<Campaign>, Error>;

    async fn update_campaign(
        &self,
        campaign: Campaign,
        update: CampaignUpdate,
    ) -> Result<Campaign, Error>;

    async fn transition_to_sending(&self, campaign: Campaign, total: i64)
        -> Result<Campaign, Error>;

    async fn finalize_campaign(
        &self,
        campaign: Campaign,
        tally: OutcomeTally,
        status: Option<CampaignStatus>,
    ) -> Result<Campaign, Error>;

    async fn request_cancel(&self, campaign: Campaign) -> Result<Campaign, Error>;
}

#[async_trait]
impl CampaignStore for MongoCampaignStore {
    #[tracing::instrument(skip(self))]
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error> {
        self.insert_one(campaign, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaigns(&self) -> Result<Vec<Campaign>, Error> {
        let options = FindOptions::builder()
            .sort(bson::doc! { "created_at": -1 })
            .build();

        let campaigns: Vec<Campaign> =
            self.find(bson::doc! {}, options).await?.try_collect().await?;

        Ok(campaigns)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaign_by_id(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<Campaign>, Error> {
        let campaign: Option<Campaign> =
            self.find_one(bson::doc! { "_id": campaign_id }, None).await?;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self))]
    async fn update_campaign(
        &self,
        mut campaign: Campaign,
        update: CampaignUpdate,
    ) -> Result<Campaign, Error> {
        let now = Utc::now();
        let old_modified_at = bson::DateTime::from_chrono(campaign.modified_at);
        let new_modified_at = bson::DateTime::from_chrono(now);

        let result = self
            .update_one(
                bson::doc! {
                    "_id": campaign.id,
                    "modified_at": old_modified_at,
                    "status": bson::to_bson(&CampaignStatus::Draft)?,
                },
                bson::doc! { "$set": {
                    "title": update.title.clone(),
                    "subject": update.subject.clone(),
                    "content": update.content.clone(),
                    "content_type": bson::to_bson(&update.content_type)?,
                    "target_audience": bson::to_bson(&update.target_audience)?,
                    "template": bson::to_bson(&update.template)?,
                    "scheduled_at": update.scheduled_at.map(bson::DateTime::from_chrono),
                    "modified_at": new_modified_at,
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        campaign.title = update.title;
        campaign.subject = update.subject;
        campaign.content = update.content;
        campaign.content_type = update.content_type;
        campaign.target_audience = update.target_audience;
        campaign.template = update.template;
        campaign.scheduled_at = update.scheduled_at;
        campaign.modified_at = now;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self))]
    async fn transition_to_sending(
        &self,
        mut campaign: Campaign,
        total: i64,
    ) -> Result<Campaign, Error> {
        let now = Utc::now();
        let new_modified_at = bson::DateTime::from_chrono(now);

        // the campaign document is the lock: of any concurrent begin_send
        // calls, exactly one matches a sendable status
        let result = self
            .update_one(
                bson::doc! {
                    "_id": campaign.id,
                    "status": { "$in": [
                        bson::to_bson(&CampaignStatus::Draft)?,
                        bson::to_bson(&CampaignStatus::Scheduled)?,
                    ] },
                },
                bson::doc! { "$set": {
                    "status": bson::to_bson(&CampaignStatus::Sending)?,
                    "recipients.total": total,
                    "modified_at": new_modified_at,
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::InvalidStateTransition {
                campaign_id: campaign.id,
                status: campaign.status,
            });
        }

        campaign.status = CampaignStatus::Sending;
        campaign.recipients.total = total;
        campaign.modified_at = now;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self))]
    async fn finalize_campaign(
        &self,
        mut campaign: Campaign,
        tally: OutcomeTally,
        status: Option<CampaignStatus>,
    ) -> Result<Campaign, Error> {
        let now = Utc::now();
        let new_modified_at = bson::DateTime::from_chrono(now);

        let mut set = bson::doc! {
            "recipients.sent": tally.sent,
            "recipients.failed": tally.failed,
            "recipients.opened": tally.opened,
            "recipients.clicked": tally.clicked,
            "modified_at": new_modified_at,
        };
        if let Some(status) = status {
            set.insert("status", bson::to_bson(&status)?);
            set.insert("sent_at", new_modified_at);
        }

        let result = self
            .update_one(
                bson::doc! {
                    "_id": campaign.id,
                    "status": bson::to_bson(&CampaignStatus::Sending)?,
                },
                bson::doc! { "$set": set },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        campaign.recipients.sent = tally.sent;
        campaign.recipients.failed = tally.failed;
        campaign.recipients.opened = tally.opened;
        campaign.recipients.clicked = tally.clicked;
        campaign.modified_at = now;
        if let Some(status) = status {
            campaign.status = status;
            campaign.sent_at = Some(now);
        }

        Ok(campaign)
    }

    #[tracing::instrument(skip(self))]
    async fn request_cancel(&self, mut campaign: Campaign) -> Result<Campaign, Error> {
        let now = Utc::now();
        let new_modified_at = bson::DateTime::from_chrono(now);

        let result = self
            .update_one(
                bson::doc! {
                    "_id": campaign.id,
                    "status": bson::to_bson(&CampaignStatus::Sending)?,
                },
                bson::doc! { "$set": {
                    "cancel_requested": true,
                    "modified_at": new_modified_at,
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::InvalidStateTransition {
                campaign_id: campaign.id,
                status: campaign.status,
            });
        }

        campaign.cancel_requested = true;
        campaign.modified_at = now;

        Ok(campaign)
    }
}
