use chrono::Utc;

use crate::campaign::TargetAudience;
use crate::database::Database;
use crate::error::Error;

use super::{Preferences, Provenance, Subscriber, SubscriberId, SubscriberStatus};

#[tracing::instrument(skip(db))]
pub async fn subscribe(
    db: &dyn Database,
    email: String,
    name: Option<String>,
    preferences: Preferences,
    provenance: Provenance,
) -> Result<Subscriber, Error> {
    let email = email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(Error::InvalidEmailAddress { email });
    }

    if let Some(existing) = db.subscribers().fetch_subscriber_by_email(&email).await? {
        if existing.status == SubscriberStatus::Unsubscribed {
            return db
                .subscribers()
                .update_subscriber_status(existing, SubscriberStatus::Active)
                .await;
        }
        return Err(Error::SubscriberAlreadyExists { email });
    }

    let now = Utc::now();
    let subscriber = Subscriber {
        id: SubscriberId::new(),
        email,
        name,
        status: SubscriberStatus::Active,
        preferences,
        subscribed_at: now,
        unsubscribed_at: None,
        provenance,
        created_at: now,
        modified_at: now,
    };

    db.subscribers().insert_subscriber(&subscriber).await?;

    Ok(subscriber)
}

#[tracing::instrument(skip(db))]
pub async fn unsubscribe(db: &dyn Database, email: &str) -> Result<Subscriber, Error> {
    let email = email.trim().to_lowercase();

    let subscriber = db
        .subscribers()
        .fetch_subscriber_by_email(&email)
        .await?
        .ok_or(Error::SubscriberNotFound { email })?;

    if subscriber.status == SubscriberStatus::Unsubscribed {
        return Err(Error::SubscriberAlreadyUnsubscribed {
            subscriber_id: subscriber.id,
        });
    }

    db.subscribers()
        .update_subscriber_status(subscriber, SubscriberStatus::Unsubscribed)
        .await
}

#[tracing::instrument(skip(db))]
pub async fn get_subscribers(db: &dyn Database) -> Result<Vec<Subscriber>, Error> {
    let subscribers = db.subscribers().fetch_subscribers().await?;

    Ok(subscribers)
}

#[tracing::instrument(skip(db))]
pub async fn resolve_audience(
    db: &dyn Database,
    audience: &TargetAudience,
) -> Result<Vec<Subscriber>, Error> {
    let subscribers = db.subscribers().fetch_eligible_subscribers(audience).await?;

    Ok(subscribers)
}
