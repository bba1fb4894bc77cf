use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::options::{FindOptions, UpdateOptions};
use mongodb::{bson, Database};

use crate::campaign::CampaignId;
use crate::database::MongoDeliveryAttemptStore;
use crate::error::Error;
use crate::subscriber::SubscriberId;

use super::{AttemptOutcome, DeliveryAttempt, DeliveryAttemptId, OutcomeTally};

const DELIVERY_ATTEMPTS: &str = "delivery_attempts";

pub async fn initialize(db: &Database) -> Result<(), Error> {
    db.run_command(
        bson::doc! {
            "createIndexes": DELIVERY_ATTEMPTS,
            "indexes": [
                {
                    "key": { "campaign_id": 1, "subscriber_id": 1 },
                    "name": "by_campaign_id_subscriber_id",
                    "unique": true,
                },
                { "key": { "campaign_id": 1, "position": 1 }, "name": "by_campaign_id_position" },
            ]
        },
        None,
    )
    .await?;

    Ok(())
}

#[async_trait]
pub trait DeliveryAttemptStore: Send + Sync {
    async fn create_pending_attempts(&self, attempts: &[DeliveryAttempt]) -> Result<(), Error>;

    async fn count_attempts_by_campaign(&self, campaign_id: CampaignId) -> Result<i64, Error>;

    async fn fetch_attempts_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<DeliveryAttempt>, Error>;

    async fn fetch_retryable_attempts(
        &self,
        campaign_id: CampaignId,
        max_attempts: i32,
    ) -> Result<Vec<DeliveryAttempt>, Error>;

    async fn fetch_attempt_by_campaign_and_subscriber(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
    ) -> Result<Option<DeliveryAttempt>, Error>;

    async fn record_attempt_outcome(
        &self,
        attempt: DeliveryAttempt,
        outcome: AttemptOutcome,
        last_error: Option<String>,
    ) -> Result<DeliveryAttempt, Error>;

    async fn count_outcomes_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<OutcomeTally, Error>;

    async fn mark_attempt_opened(&self, attempt_id: DeliveryAttemptId) -> Result<(), Error>;

    async fn mark_attempt_clicked(&self, attempt_id: DeliveryAttemptId) -> Result<(), Error>;
}

#[async_trait]
impl DeliveryAttemptStore for MongoDeliveryAttemptStore {
    #[tracing::instrument(skip(self, attempts))]
    async fn create_pending_attempts(&self, attempts: &[DeliveryAttempt]) -> Result<(), Error> {
        // $setOnInsert keyed on the unique (campaign_id, subscriber_id) index
        // makes the snapshot re-runnable: existing rows are left untouched
        for attempt in attempts {
            let options = UpdateOptions::builder().upsert(true).build();
            self.update_one(
                bson::doc! {
                    "campaign_id": attempt.campaign_id,
                    "subscriber_id": attempt.subscriber_id,
                },
                bson::doc! { "$setOnInsert": bson::to_document(attempt)? },
                options,
            )
            .await?;
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn count_attempts_by_campaign(&self, campaign_id: CampaignId) -> Result<i64, Error> {
        let count = self
            .count_documents(bson::doc! { "campaign_id": campaign_id }, None)
            .await?;

        Ok(count as i64)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_attempts_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<DeliveryAttempt>, Error> {
        let options = FindOptions::builder()
            .sort(bson::doc! { "position": 1 })
            .build();

        let attempts: Vec<DeliveryAttempt> = self
            .find(bson::doc! { "campaign_id": campaign_id }, options)
            .await?
            .try_collect()
            .await?;

        Ok(attempts)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_retryable_attempts(
        &self,
        campaign_id: CampaignId,
        max_attempts: i32,
    ) -> Result<Vec<DeliveryAttempt>, Error> {
        let options = FindOptions::builder()
            .sort(bson::doc! { "position": 1 })
            .build();

        let attempts: Vec<DeliveryAttempt> = self
            .find(
                bson::doc! {
                    "campaign_id": campaign_id,
                    "$or": [
                        { "outcome": bson::to_bson(&AttemptOutcome::Pending)? },
                        {
                            "outcome": bson::to_bson(&AttemptOutcome::TransientFailure)?,
                            "attempt_count": { "$lt": max_attempts },
                        },
                    ],
                },
                options,
            )
            .await?
            .try_collect()
            .await?;

        Ok(attempts)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_attempt_by_campaign_and_subscriber(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
    ) -> Result<Option<DeliveryAttempt>, Error> {
        let attempt: Option<DeliveryAttempt> = self
            .find_one(
                bson::doc! { "campaign_id": campaign_id, "subscriber_id": subscriber_id },
                None,
            )
            .await?;

        Ok(attempt)
    }

    #[tracing::instrument(skip(self))]
    async fn record_attempt_outcome(
        &self,
        mut attempt: DeliveryAttempt,
        outcome: AttemptOutcome,
        last_error: Option<String>,
    ) -> Result<DeliveryAttempt, Error> {
        let now = Utc::now();
        let new_modified_at = bson::DateTime::from_chrono(now);

        // rows that reached Sent or PermanentFailure are settled; the filter
        // refuses to touch them so a delivery can never be recorded twice
        let result = self
            .update_one(
                bson::doc! {
                    "_id": attempt.id,
                    "outcome": { "$in": [
                        bson::to_bson(&AttemptOutcome::Pending)?,
                        bson::to_bson(&AttemptOutcome::TransientFailure)?,
                    ] },
                },
                bson::doc! {
                    "$set": {
                        "outcome": bson::to_bson(&outcome)?,
                        "last_error": last_error.clone(),
                        "last_attempted_at": new_modified_at,
                        "modified_at": new_modified_at,
                    },
                    "$inc": { "attempt_count": 1 },
                },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        attempt.outcome = outcome;
        attempt.attempt_count += 1;
        attempt.last_error = last_error;
        attempt.last_attempted_at = Some(now);
        attempt.modified_at = now;

        Ok(attempt)
    }

    #[tracing::instrument(skip(self))]
    async fn count_outcomes_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<OutcomeTally, Error> {
        let by_campaign = bson::doc! { "campaign_id": campaign_id };

        let total = self.count_documents(by_campaign.clone(), None).await?;

        let mut sent_filter = by_campaign.clone();
        sent_filter.insert("outcome", bson::to_bson(&AttemptOutcome::Sent)?);
        let sent = self.count_documents(sent_filter, None).await?;

        let mut failed_filter = by_campaign.clone();
        failed_filter.insert("outcome", bson::to_bson(&AttemptOutcome::PermanentFailure)?);
        let failed = self.count_documents(failed_filter, None).await?;

        let mut opened_filter = by_campaign.clone();
        opened_filter.insert("opened_at", bson::doc! { "$ne": null });
        let opened = self.count_documents(opened_filter, None).await?;

        let mut clicked_filter = by_campaign;
        clicked_filter.insert("clicked_at", bson::doc! { "$ne": null });
        let clicked = self.count_documents(clicked_filter, None).await?;

        Ok(OutcomeTally {
            total: total as i64,
            sent: sent as i64,
            failed: failed as i64,
            pending: (total - sent - failed) as i64,
            opened: opened as i64,
            clicked: clicked as i64,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn mark_attempt_opened(&self, attempt_id: DeliveryAttemptId) -> Result<(), Error> {
        let new_modified_at = bson::DateTime::from_chrono(Utc::now());

        // first stamp wins, repeat opens are no-ops
        self.update_one(
            bson::doc! { "_id": attempt_id, "opened_at": null },
            bson::doc! { "$set": {
                "opened_at": new_modified_at,
                "modified_at": new_modified_at,
            } },
            None,
        )
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn mark_attempt_clicked(&self, attempt_id: DeliveryAttemptId) -> Result<(), Error> {
        let new_modified_at = bson::DateTime::from_chrono(Utc::now());

        self.update_one(
            bson::doc! { "_id": attempt_id, "clicked_at": null },
            bson::doc! { "$set": {
                "clicked_at": new_modified_at,
                "modified_at": new_modified_at,
            } },
            None,
        )
        .await?;

        // a click implies the message was opened even if the pixel never fired
        self.update_one(
            bson::doc! { "_id": attempt_id, "opened_at": null },
            bson::doc! { "$set": { "opened_at": new_modified_at } },
            None,
        )
        .await?;

        Ok(())
    }
}
