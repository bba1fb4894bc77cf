use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::FindOptions;
use mongodb::{bson, Database};

use crate::campaign::TargetAudience;
use crate::database::MongoSubscriberStore;
use crate::error::Error;

use super::{Subscriber, SubscriberId, SubscriberStatus};

const SUBSCRIBERS: &str = "subscribers";

pub async fn initialize(db: &Database) -> Result<(), Error> {
    db.run_command(
        bson::doc! {
            "createIndexes": SUBSCRIBERS,
            "indexes": [
                { "key": { "email": 1 }, "name": "by_email", "unique": true },
                { "key": { "status": 1, "subscribed_at": 1 }, "name": "by_status" },
            ]
        },
        None,
    )
    .await?;

    Ok(())
}

#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn insert_subscriber(&self, subscriber: &Subscriber) -> Result<(), Error>;

    async fn fetch_subscribers(&self) -> Result<Vec<Subscriber>, Error>;

    async fn fetch_subscriber_by_id(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<Option<Subscriber>, Error>;

    async fn fetch_subscriber_by_email(&self, email: &str) -> Result<Option<Subscriber>, Error>;

    async fn fetch_eligible_subscribers(
        &self,
        audience: &TargetAudience,
    ) -> Result<Vec<Subscriber>, Error>;

    async fn update_subscriber_status(
        &self,
        subscriber: Subscriber,
        status: SubscriberStatus,
    ) -> Result<Subscriber, Error>;

    async fn mark_subscriber_bounced(&self, subscriber_id: SubscriberId) -> Result<(), Error>;
}

#[async_trait]
impl SubscriberStore for MongoSubscriberStore {
    #[tracing::instrument(skip(self))]
    async fn insert_subscriber(&self, subscriber: &Subscriber) -> Result<(), Error> {
        match self.insert_one(subscriber, None).await {
            Ok(_) => Ok(()),
            Err(error) if is_duplicate_key(&error) => Err(Error::SubscriberAlreadyExists {
                email: subscriber.email.clone(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_subscribers(&self) -> Result<Vec<Subscriber>, Error> {
        let options = FindOptions::builder()
            .sort(bson::doc! { "subscribed_at": 1 })
            .build();

        let subscribers: Vec<Subscriber> =
            self.find(bson::doc! {}, options).await?.try_collect().await?;

        Ok(subscribers)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_subscriber_by_id(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<Option<Subscriber>, Error> {
        let subscriber: Option<Subscriber> =
            self.find_one(bson::doc! { "_id": subscriber_id }, None).await?;

        Ok(subscriber)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_subscriber_by_email(&self, email: &str) -> Result<Option<Subscriber>, Error> {
        let subscriber: Option<Subscriber> =
            self.find_one(bson::doc! { "email": email }, None).await?;

        Ok(subscriber)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_eligible_subscribers(
        &self,
        audience: &TargetAudience,
    ) -> Result<Vec<Subscriber>, Error> {
        // the audience rule can narrow the result but never widens it past
        // active subscribers, whatever its status filter says
        let mut filter = bson::doc! { "status": bson::to_bson(&SubscriberStatus::Active)? };
        if let Some(categories) = &audience.categories {
            filter.insert(
                "preferences.categories",
                bson::doc! { "$in": categories.clone() },
            );
        }
        if let Some(frequency) = audience.frequency {
            filter.insert("preferences.frequency", bson::to_bson(&frequency)?);
        }

        let options = FindOptions::builder()
            .sort(bson::doc! { "subscribed_at": 1 })
            .build();

        let subscribers: Vec<Subscriber> = self.find(filter, options).await?.try_collect().await?;

        Ok(subscribers)
    }

    #[tracing::instrument(skip(self))]
    async fn update_subscriber_status(
        &self,
        mut subscriber: Subscriber,
        status: SubscriberStatus,
    ) -> Result<Subscriber, Error> {
        let now = Utc::now();
        let old_modified_at = bson::DateTime::from_chrono(subscriber.modified_at);
        let new_modified_at = bson::DateTime::from_chrono(now);

        let mut set = bson::doc! {
            "status": bson::to_bson(&status)?,
            "modified_at": new_modified_at,
        };
        if status == SubscriberStatus::Unsubscribed {
            set.insert("unsubscribed_at", new_modified_at);
        }

        let result = self
            .update_one(
                bson::doc! { "_id": subscriber.id, "modified_at": old_modified_at },
                bson::doc! { "$set": set },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        subscriber.status = status;
        subscriber.modified_at = now;
        if status == SubscriberStatus::Unsubscribed {
            subscriber.unsubscribed_at = Some(now);
        }

        Ok(subscriber)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_subscriber_bounced(&self, subscriber_id: SubscriberId) -> Result<(), Error> {
        let new_modified_at = bson::DateTime::from_chrono(Utc::now());

        // zero matches means the subscriber already left the active pool
        self.update_one(
            bson::doc! {
                "_id": subscriber_id,
                "status": bson::to_bson(&SubscriberStatus::Active)?,
            },
            bson::doc! { "$set": {
                "status": bson::to_bson(&SubscriberStatus::Bounced)?,
                "modified_at": new_modified_at,
            } },
            None,
        )
        .await?;

        Ok(())
    }
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        _ => false,
    }
}
