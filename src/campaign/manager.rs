use chrono::{DateTime, Utc};

use crate::database::Database;
use crate::delivery::{AttemptOutcome, DeliveryAttempt, DeliveryAttemptId};
use crate::error::Error;
use crate::subscriber;

use super::{
    Campaign, CampaignId, CampaignStatus, CampaignUpdate, ContentType, RecipientCounts,
    TargetAudience, TemplateSettings,
};

#[tracing::instrument(skip(db))]
pub async fn create_campaign(
    db: &dyn Database,
    title: String,
    subject: String,
    content: String,
    content_type: ContentType,
    target_audience: TargetAudience,
    template: TemplateSettings,
    scheduled_at: Option<DateTime<Utc>>,
) -> Result<Campaign, Error> {
    let now = Utc::now();
    let campaign = Campaign {
        id: CampaignId::new(),
        title,
        subject,
        content,
        content_type,
        status: CampaignStatus::Draft,
        scheduled_at,
        sent_at: None,
        target_audience,
        template,
        recipients: RecipientCounts::default(),
        cancel_requested: false,
        created_at: now,
        modified_at: now,
    };

    db.campaigns().insert_campaign(&campaign).await?;

    Ok(campaign)
}

#[tracing::instrument(skip(db))]
pub async fn get_campaigns(db: &dyn Database) -> Result<Vec<Campaign>, Error> {
    let campaigns = db.campaigns().fetch_campaigns().await?;

    Ok(campaigns)
}

#[tracing::instrument(skip(db))]
pub async fn get_campaign_by_id(
    db: &dyn Database,
    campaign_id: CampaignId,
) -> Result<Campaign, Error> {
    let campaign = db
        .campaigns()
        .fetch_campaign_by_id(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound { campaign_id })?;

    Ok(campaign)
}

#[tracing::instrument(skip(db, update))]
pub async fn update_campaign(
    db: &dyn Database,
    campaign_id: CampaignId,
    update: CampaignUpdate,
) -> Result<Campaign, Error> {
    let campaign = get_campaign_by_id(db, campaign_id).await?;

    if campaign.status != CampaignStatus::Draft {
        return Err(Error::InvalidStateTransition {
            campaign_id,
            status: campaign.status,
        });
    }

    db.campaigns().update_campaign(campaign, update).await
}

#[tracing::instrument(skip(db))]
pub async fn begin_send(db: &dyn Database, campaign_id: CampaignId) -> Result<Campaign, Error> {
    let campaign = get_campaign_by_id(db, campaign_id).await?;

    match campaign.status {
        CampaignStatus::Draft | CampaignStatus::Scheduled => {}
        status => {
            return Err(Error::InvalidStateTransition {
                campaign_id,
                status,
            })
        }
    }

    let audience = subscriber::manager::resolve_audience(db, &campaign.target_audience).await?;
    if audience.is_empty() {
        return Err(Error::EmptyAudience { campaign_id });
    }

    let now = Utc::now();
    let attempts: Vec<DeliveryAttempt> = audience
        .iter()
        .enumerate()
        .map(|(position, subscriber)| DeliveryAttempt {
            id: DeliveryAttemptId::new(),
            campaign_id,
            subscriber_id: subscriber.id,
            position: position as i64,
            outcome: AttemptOutcome::Pending,
            attempt_count: 0,
            last_attempted_at: None,
            last_error: None,
            opened_at: None,
            clicked_at: None,
            created_at: now,
            modified_at: now,
        })
        .collect();

    // the snapshot is written before the status flip; the flip is the single
    // commit point and carries the fixed recipient total with it
    db.deliveries().create_pending_attempts(&attempts).await?;
    let total = db.deliveries().count_attempts_by_campaign(campaign_id).await?;

    db.campaigns().transition_to_sending(campaign, total).await
}

#[tracing::instrument(skip(db))]
pub async fn finalize(db: &dyn Database, campaign_id: CampaignId) -> Result<Campaign, Error> {
    let campaign = get_campaign_by_id(db, campaign_id).await?;

    if campaign.status != CampaignStatus::Sending {
        return Ok(campaign);
    }

    let tally = db.deliveries().count_outcomes_by_campaign(campaign_id).await?;

    let status = if tally.pending > 0 {
        None
    } else if tally.failed == 0 {
        Some(CampaignStatus::Sent)
    } else if tally.sent == 0 {
        Some(CampaignStatus::Failed)
    } else {
        Some(CampaignStatus::PartiallyFailed)
    };

    db.campaigns().finalize_campaign(campaign, tally, status).await
}

#[tracing::instrument(skip(db))]
pub async fn cancel_campaign(db: &dyn Database, campaign_id: CampaignId) -> Result<Campaign, Error> {
    let campaign = get_campaign_by_id(db, campaign_id).await?;

    if campaign.status != CampaignStatus::Sending {
        return Err(Error::InvalidStateTransition {
            campaign_id,
            status: campaign.status,
        });
    }

    db.campaigns().request_cancel(campaign).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test::MockDatabase;
    use crate::delivery::OutcomeTally;
    use crate::subscriber::{
        Preferences, Provenance, SignupSource, Subscriber, SubscriberId, SubscriberStatus,
    };
    use std::sync::{Arc, Mutex};

    fn campaign_with_status(status: CampaignStatus) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: CampaignId::new(),
            title: "March Update".to_string(),
            subject: "What happened in March".to_string(),
            content: "Hello **world**".to_string(),
            content_type: ContentType::Markdown,
            status,
            scheduled_at: None,
            sent_at: None,
            target_audience: TargetAudience::default(),
            template: TemplateSettings::default(),
            recipients: RecipientCounts::default(),
            cancel_requested: false,
            created_at: now,
            modified_at: now,
        }
    }

    fn active_subscriber(email: &str) -> Subscriber {
        let now = Utc::now();
        Subscriber {
            id: SubscriberId::new(),
            email: email.to_string(),
            name: None,
            status: SubscriberStatus::Active,
            preferences: Preferences::default(),
            subscribed_at: now,
            unsubscribed_at: None,
            provenance: Provenance {
                source: SignupSource::Website,
                ip: None,
                user_agent: None,
                referrer: None,
            },
            created_at: now,
            modified_at: now,
        }
    }

    #[tokio::test]
    async fn can_create_campaign() {
        let mut db = MockDatabase::new();
        let called_insert = Arc::new(Mutex::new(false));
        let called_insert_clone = Arc::clone(&called_insert);
        db.campaigns.on_insert_campaign = Box::new(move |campaign| {
            *called_insert_clone.lock().unwrap() = true;
            assert_eq!(campaign.title, "March Update".to_string());
            assert_eq!(campaign.status, CampaignStatus::Draft);
            assert_eq!(campaign.recipients, RecipientCounts::default());
            Ok(())
        });

        let campaign = create_campaign(
            &db,
            "March Update".into(),
            "What happened in March".into(),
            "Hello **world**".into(),
            ContentType::Markdown,
            TargetAudience::default(),
            TemplateSettings::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(campaign.status, CampaignStatus::Draft);
        assert!(
            *called_insert.lock().unwrap(),
            "db.insert_campaign was not called"
        );
    }

    #[tokio::test]
    async fn begin_send_snapshots_audience_and_flips_status() {
        let test_campaign = campaign_with_status(CampaignStatus::Draft);
        let test_campaign_id = test_campaign.id;
        let subscriber1 = active_subscriber("first@example.com");
        let subscriber2 = active_subscriber("second@example.com");
        let subscriber_ids = vec![subscriber1.id, subscriber2.id];

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(test_campaign.clone())));
        db.subscribers.on_fetch_eligible_subscribers =
            Box::new(move |_| Ok(vec![subscriber1.clone(), subscriber2.clone()]));
        let snapshotted = Arc::new(Mutex::new(false));
        let snapshotted_clone = Arc::clone(&snapshotted);
        db.deliveries.on_create_pending_attempts = Box::new(move |attempts| {
            *snapshotted_clone.lock().unwrap() = true;
            assert_eq!(attempts.len(), 2);
            assert_eq!(attempts[0].subscriber_id, subscriber_ids[0]);
            assert_eq!(attempts[0].position, 0);
            assert_eq!(attempts[0].outcome, AttemptOutcome::Pending);
            assert_eq!(attempts[1].subscriber_id, subscriber_ids[1]);
            assert_eq!(attempts[1].position, 1);
            Ok(())
        });
        db.deliveries.on_count_attempts_by_campaign = Box::new(|_| Ok(2));
        db.campaigns.on_transition_to_sending = Box::new(|mut campaign, total| {
            assert_eq!(total, 2);
            campaign.status = CampaignStatus::Sending;
            campaign.recipients.total = total;
            Ok(campaign)
        });

        let campaign = begin_send(&db, test_campaign_id).await.unwrap();

        assert_eq!(campaign.status, CampaignStatus::Sending);
        assert_eq!(campaign.recipients.total, 2);
        assert!(
            *snapshotted.lock().unwrap(),
            "db.create_pending_attempts was not called"
        );
    }

    #[tokio::test]
    async fn begin_send_rejects_empty_audience() {
        let test_campaign = campaign_with_status(CampaignStatus::Draft);
        let test_campaign_id = test_campaign.id;

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(test_campaign.clone())));
        db.subscribers.on_fetch_eligible_subscribers = Box::new(|_| Ok(vec![]));

        let result = begin_send(&db, test_campaign_id).await;

        assert_eq!(
            result.unwrap_err(),
            Error::EmptyAudience {
                campaign_id: test_campaign_id
            }
        );
    }

    #[tokio::test]
    async fn begin_send_rejects_campaign_not_in_draft() {
        let test_campaign = campaign_with_status(CampaignStatus::Sending);
        let test_campaign_id = test_campaign.id;

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(test_campaign.clone())));

        let result = begin_send(&db, test_campaign_id).await;

        assert_eq!(
            result.unwrap_err(),
            Error::InvalidStateTransition {
                campaign_id: test_campaign_id,
                status: CampaignStatus::Sending,
            }
        );
    }

    #[tokio::test]
    async fn begin_send_surfaces_lost_transition_race() {
        let test_campaign = campaign_with_status(CampaignStatus::Draft);
        let test_campaign_id = test_campaign.id;

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(test_campaign.clone())));
        db.subscribers.on_fetch_eligible_subscribers =
            Box::new(|_| Ok(vec![active_subscriber("first@example.com")]));
        db.deliveries.on_create_pending_attempts = Box::new(|_| Ok(()));
        db.deliveries.on_count_attempts_by_campaign = Box::new(|_| Ok(1));
        db.campaigns.on_transition_to_sending = Box::new(|campaign, _| {
            Err(Error::InvalidStateTransition {
                campaign_id: campaign.id,
                status: campaign.status,
            })
        });

        let result = begin_send(&db, test_campaign_id).await;

        assert_eq!(
            result.unwrap_err(),
            Error::InvalidStateTransition {
                campaign_id: test_campaign_id,
                status: CampaignStatus::Draft,
            }
        );
    }

    #[tokio::test]
    async fn finalize_with_no_failures_marks_sent() {
        let test_campaign = campaign_with_status(CampaignStatus::Sending);
        let test_campaign_id = test_campaign.id;

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(test_campaign.clone())));
        db.deliveries.on_count_outcomes_by_campaign = Box::new(|_| {
            Ok(OutcomeTally {
                total: 25,
                sent: 25,
                failed: 0,
                pending: 0,
                opened: 0,
                clicked: 0,
            })
        });
        db.campaigns.on_finalize_campaign = Box::new(|mut campaign, tally, status| {
            assert_eq!(status, Some(CampaignStatus::Sent));
            assert_eq!(tally.sent + tally.failed + tally.pending, tally.total);
            campaign.status = status.unwrap();
            campaign.recipients.sent = tally.sent;
            campaign.recipients.failed = tally.failed;
            Ok(campaign)
        });

        let campaign = finalize(&db, test_campaign_id).await.unwrap();

        assert_eq!(campaign.status, CampaignStatus::Sent);
        assert_eq!(campaign.recipients.sent, 25);
        assert_eq!(campaign.recipients.failed, 0);
    }

    #[tokio::test]
    async fn finalize_with_some_failures_marks_partially_failed() {
        let test_campaign = campaign_with_status(CampaignStatus::Sending);
        let test_campaign_id = test_campaign.id;

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(test_campaign.clone())));
        db.deliveries.on_count_outcomes_by_campaign = Box::new(|_| {
            Ok(OutcomeTally {
                total: 10,
                sent: 7,
                failed: 3,
                pending: 0,
                opened: 0,
                clicked: 0,
            })
        });
        db.campaigns.on_finalize_campaign = Box::new(|mut campaign, tally, status| {
            assert_eq!(status, Some(CampaignStatus::PartiallyFailed));
            campaign.status = status.unwrap();
            campaign.recipients.sent = tally.sent;
            campaign.recipients.failed = tally.failed;
            Ok(campaign)
        });

        let campaign = finalize(&db, test_campaign_id).await.unwrap();

        assert_eq!(campaign.status, CampaignStatus::PartiallyFailed);
        assert_eq!(campaign.recipients.sent, 7);
        assert_eq!(campaign.recipients.failed, 3);
    }

    #[tokio::test]
    async fn finalize_with_every_delivery_failed_marks_failed() {
        let test_campaign = campaign_with_status(CampaignStatus::Sending);
        let test_campaign_id = test_campaign.id;

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(test_campaign.clone())));
        db.deliveries.on_count_outcomes_by_campaign = Box::new(|_| {
            Ok(OutcomeTally {
                total: 4,
                sent: 0,
                failed: 4,
                pending: 0,
                opened: 0,
                clicked: 0,
            })
        });
        db.campaigns.on_finalize_campaign = Box::new(|mut campaign, _, status| {
            assert_eq!(status, Some(CampaignStatus::Failed));
            campaign.status = status.unwrap();
            Ok(campaign)
        });

        let campaign = finalize(&db, test_campaign_id).await.unwrap();

        assert_eq!(campaign.status, CampaignStatus::Failed);
    }

    #[tokio::test]
    async fn finalize_with_pending_rows_keeps_sending() {
        let test_campaign = campaign_with_status(CampaignStatus::Sending);
        let test_campaign_id = test_campaign.id;

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(test_campaign.clone())));
        db.deliveries.on_count_outcomes_by_campaign = Box::new(|_| {
            Ok(OutcomeTally {
                total: 25,
                sent: 10,
                failed: 0,
                pending: 15,
                opened: 0,
                clicked: 0,
            })
        });
        db.campaigns.on_finalize_campaign = Box::new(|mut campaign, tally, status| {
            assert_eq!(status, None);
            campaign.recipients.sent = tally.sent;
            campaign.recipients.failed = tally.failed;
            Ok(campaign)
        });

        let campaign = finalize(&db, test_campaign_id).await.unwrap();

        assert_eq!(campaign.status, CampaignStatus::Sending);
        assert_eq!(campaign.recipients.sent, 10);
    }

    #[tokio::test]
    async fn finalize_leaves_terminal_campaign_untouched() {
        let test_campaign = campaign_with_status(CampaignStatus::Sent);
        let test_campaign_id = test_campaign.id;

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(test_campaign.clone())));

        let campaign = finalize(&db, test_campaign_id).await.unwrap();

        assert_eq!(campaign.status, CampaignStatus::Sent);
    }

    #[tokio::test]
    async fn cancel_requires_sending_status() {
        let test_campaign = campaign_with_status(CampaignStatus::Draft);
        let test_campaign_id = test_campaign.id;

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(test_campaign.clone())));

        let result = cancel_campaign(&db, test_campaign_id).await;

        assert_eq!(
            result.unwrap_err(),
            Error::InvalidStateTransition {
                campaign_id: test_campaign_id,
                status: CampaignStatus::Draft,
            }
        );
    }

    #[tokio::test]
    async fn update_rejects_campaign_past_draft() {
        let test_campaign = campaign_with_status(CampaignStatus::Sent);
        let test_campaign_id = test_campaign.id;

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(test_campaign.clone())));

        let update = CampaignUpdate {
            title: "April Update".to_string(),
            subject: "What happened in April".to_string(),
            content: "content".to_string(),
            content_type: ContentType::Markdown,
            target_audience: TargetAudience::default(),
            template: TemplateSettings::default(),
            scheduled_at: None,
        };
        let result = update_campaign(&db, test_campaign_id, update).await;

        assert_eq!(
            result.unwrap_err(),
            Error::InvalidStateTransition {
                campaign_id: test_campaign_id,
                status: CampaignStatus::Sent,
            }
        );
    }
}
