use std::time::Duration;

use futures::future;
use tracing::info;

use crate::campaign::{manager, Campaign, CampaignId, CampaignStatus};
use crate::database::Database;
use crate::error::Error;
use crate::render;
use crate::transport::Transport;

use super::worker;

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub max_attempts: i32,
}

impl Default for DispatchConfig {
    fn default() -> DispatchConfig {
        DispatchConfig {
            batch_size: 10,
            batch_delay: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> DispatchConfig {
        let defaults = DispatchConfig::default();
        DispatchConfig {
            batch_size: env_or("DISPATCH_BATCH_SIZE", defaults.batch_size),
            batch_delay: Duration::from_millis(env_or("DISPATCH_BATCH_DELAY_MS", 1000)),
            max_attempts: env_or("DISPATCH_MAX_ATTEMPTS", defaults.max_attempts),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

// safe to invoke any number of times: settled rows are never re-selected, so
// a re-run only completes whatever is left
#[tracing::instrument(skip(db, transport, config))]
pub async fn run(
    db: &dyn Database,
    transport: &dyn Transport,
    campaign_id: CampaignId,
    config: &DispatchConfig,
) -> Result<Campaign, Error> {
    let campaign = manager::get_campaign_by_id(db, campaign_id).await?;
    if campaign.status != CampaignStatus::Sending {
        return Ok(campaign);
    }

    let html = render::render_email(&campaign);
    let attempts = db
        .deliveries()
        .fetch_retryable_attempts(campaign_id, config.max_attempts)
        .await?;
    info!(campaign_id = %campaign_id, attempts = attempts.len(), "dispatching campaign");

    let batch_size = config.batch_size.max(1);
    for (index, batch) in attempts.chunks(batch_size).enumerate() {
        if index > 0 {
            tokio::time::sleep(config.batch_delay).await;
        }

        // a cancel or a concurrent finalize stops dispatch between batches;
        // the batch in flight always drains
        let current = manager::get_campaign_by_id(db, campaign_id).await?;
        if current.status != CampaignStatus::Sending || current.cancel_requested {
            info!(campaign_id = %campaign_id, batch = index, "dispatch stopped");
            break;
        }

        let deliveries = batch.iter().map(|attempt| {
            worker::deliver(
                db,
                transport,
                &campaign,
                &html,
                attempt.clone(),
                config.max_attempts,
            )
        });
        for result in future::join_all(deliveries).await {
            result?;
        }
    }

    manager::finalize(db, campaign_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{
        CampaignId, ContentType, RecipientCounts, TargetAudience, TemplateSettings,
    };
    use crate::database::test::MockDatabase;
    use crate::delivery::{AttemptOutcome, DeliveryAttempt, DeliveryAttemptId, OutcomeTally};
    use crate::subscriber::{
        Preferences, Provenance, SignupSource, Subscriber, SubscriberId, SubscriberStatus,
    };
    use crate::transport::test::MockTransport;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    fn campaign_with_status(status: CampaignStatus, cancel_requested: bool) -> Campaign {
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
            cancel_requested,
            created_at: now,
            modified_at: now,
        }
    }

    fn active_subscriber_with_id(subscriber_id: SubscriberId) -> Subscriber {
        let now = Utc::now();
        Subscriber {
            id: subscriber_id,
            email: "reader@example.com".to_string(),
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

    fn pending_attempts(campaign_id: CampaignId, count: i64) -> Vec<DeliveryAttempt> {
        let now = Utc::now();
        (0..count)
            .map(|position| DeliveryAttempt {
                id: DeliveryAttemptId::new(),
                campaign_id,
                subscriber_id: SubscriberId::new(),
                position,
                outcome: AttemptOutcome::Pending,
                attempt_count: 0,
                last_attempted_at: None,
                last_error: None,
                opened_at: None,
                clicked_at: None,
                created_at: now,
                modified_at: now,
            })
            .collect()
    }

    fn test_config() -> DispatchConfig {
        DispatchConfig {
            batch_size: 10,
            batch_delay: Duration::from_millis(0),
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn dispatches_batches_in_order_and_finalizes() {
        let test_campaign = campaign_with_status(CampaignStatus::Sending, false);
        let test_campaign_id = test_campaign.id;
        let attempts = pending_attempts(test_campaign_id, 25);

        let mut db = MockDatabase::new();
        let fetch_count = Arc::new(Mutex::new(0));
        let fetch_count_clone = Arc::clone(&fetch_count);
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| {
            *fetch_count_clone.lock().unwrap() += 1;
            Ok(Some(test_campaign.clone()))
        });
        db.deliveries.on_fetch_retryable_attempts = Box::new(move |campaign_id, max_attempts| {
            assert_eq!(campaign_id, test_campaign_id);
            assert_eq!(max_attempts, 3);
            Ok(attempts.clone())
        });
        db.subscribers.on_fetch_subscriber_by_id =
            Box::new(|subscriber_id| Ok(Some(active_subscriber_with_id(subscriber_id))));
        let recorded_positions = Arc::new(Mutex::new(vec![]));
        let recorded_positions_clone = Arc::clone(&recorded_positions);
        db.deliveries.on_record_attempt_outcome = Box::new(move |mut attempt, outcome, error| {
            assert_eq!(outcome, AttemptOutcome::Sent);
            recorded_positions_clone.lock().unwrap().push(attempt.position);
            attempt.outcome = outcome;
            attempt.attempt_count += 1;
            attempt.last_error = error;
            Ok(attempt)
        });
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
            campaign.status = status.unwrap();
            campaign.recipients.sent = tally.sent;
            campaign.recipients.failed = tally.failed;
            Ok(campaign)
        });

        let sent_count = Arc::new(Mutex::new(0));
        let sent_count_clone = Arc::clone(&sent_count);
        let mut transport = MockTransport::new();
        transport.on_send = Box::new(move |_, _, _| {
            *sent_count_clone.lock().unwrap() += 1;
            Ok(())
        });

        let campaign = run(&db, &transport, test_campaign_id, &test_config())
            .await
            .unwrap();

        assert_eq!(campaign.status, CampaignStatus::Sent);
        assert_eq!(campaign.recipients.sent, 25);
        assert_eq!(campaign.recipients.failed, 0);
        assert_eq!(*sent_count.lock().unwrap(), 25);
        // initial load + one check per batch of 10 + the finalize re-read
        assert_eq!(*fetch_count.lock().unwrap(), 5);
        assert_eq!(
            *recorded_positions.lock().unwrap(),
            (0..25).collect::<Vec<i64>>()
        );
    }

    #[tokio::test]
    async fn leaves_campaign_untouched_when_not_sending() {
        let test_campaign = campaign_with_status(CampaignStatus::Sent, false);
        let test_campaign_id = test_campaign.id;

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(test_campaign.clone())));

        // every other mock panics if touched
        let transport = MockTransport::new();

        let campaign = run(&db, &transport, test_campaign_id, &test_config())
            .await
            .unwrap();

        assert_eq!(campaign.status, CampaignStatus::Sent);
    }

    #[tokio::test]
    async fn cancel_stops_dispatch_after_draining_batch() {
        let test_campaign = campaign_with_status(CampaignStatus::Sending, false);
        let test_campaign_id = test_campaign.id;
        let attempts = pending_attempts(test_campaign_id, 25);

        let mut db = MockDatabase::new();
        let fetch_count = Arc::new(Mutex::new(0));
        let fetch_count_clone = Arc::clone(&fetch_count);
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| {
            let mut count = fetch_count_clone.lock().unwrap();
            *count += 1;
            // the operator cancels while the first batch is in flight
            let cancel_requested = *count >= 3;
            Ok(Some(campaign_with_status_and_id(
                test_campaign_id,
                CampaignStatus::Sending,
                cancel_requested,
            )))
        });
        db.deliveries.on_fetch_retryable_attempts = Box::new(move |_, _| Ok(attempts.clone()));
        db.subscribers.on_fetch_subscriber_by_id =
            Box::new(|subscriber_id| Ok(Some(active_subscriber_with_id(subscriber_id))));
        db.deliveries.on_record_attempt_outcome = Box::new(|mut attempt, outcome, error| {
            attempt.outcome = outcome;
            attempt.attempt_count += 1;
            attempt.last_error = error;
            Ok(attempt)
        });
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
            // unfinished rows remain, so the campaign stays resumable
            assert_eq!(status, None);
            campaign.recipients.sent = tally.sent;
            Ok(campaign)
        });

        let sent_count = Arc::new(Mutex::new(0));
        let sent_count_clone = Arc::clone(&sent_count);
        let mut transport = MockTransport::new();
        transport.on_send = Box::new(move |_, _, _| {
            *sent_count_clone.lock().unwrap() += 1;
            Ok(())
        });

        let campaign = run(&db, &transport, test_campaign_id, &test_config())
            .await
            .unwrap();

        assert_eq!(campaign.status, CampaignStatus::Sending);
        assert_eq!(*sent_count.lock().unwrap(), 10);
    }

    #[tokio::test]
    async fn rerun_with_no_unfinished_rows_only_refreshes_counters() {
        let test_campaign = campaign_with_status(CampaignStatus::Sending, false);
        let test_campaign_id = test_campaign.id;

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(test_campaign.clone())));
        db.deliveries.on_fetch_retryable_attempts = Box::new(|_, _| Ok(vec![]));
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
            campaign.status = status.unwrap();
            campaign.recipients.sent = tally.sent;
            Ok(campaign)
        });

        // transport mock panics if anything is re-sent
        let transport = MockTransport::new();

        let campaign = run(&db, &transport, test_campaign_id, &test_config())
            .await
            .unwrap();

        assert_eq!(campaign.status, CampaignStatus::Sent);
        assert_eq!(campaign.recipients.sent, 25);
    }

    fn campaign_with_status_and_id(
        campaign_id: CampaignId,
        status: CampaignStatus,
        cancel_requested: bool,
    ) -> Campaign {
        let mut campaign = campaign_with_status(status, cancel_requested);
        campaign.id = campaign_id;
        campaign
    }
}
