use tracing::warn;

use crate::campaign::Campaign;
use crate::database::Database;
use crate::error::Error;
use crate::subscriber::SubscriberStatus;
use crate::transport::{Transport, TransportError};

use super::{AttemptOutcome, DeliveryAttempt};

// transport failures are recorded on the attempt row and never escape;
// only store failures propagate
#[tracing::instrument(skip(db, transport, campaign, html))]
pub async fn deliver(
    db: &dyn Database,
    transport: &dyn Transport,
    campaign: &Campaign,
    html: &str,
    attempt: DeliveryAttempt,
    max_attempts: i32,
) -> Result<DeliveryAttempt, Error> {
    let subscriber = db
        .subscribers()
        .fetch_subscriber_by_id(attempt.subscriber_id)
        .await?;

    // the snapshot was taken at begin_send; a subscriber who left the active
    // pool since then must still not receive anything
    let subscriber = match subscriber {
        Some(subscriber) if subscriber.status == SubscriberStatus::Active => subscriber,
        _ => {
            return db
                .deliveries()
                .record_attempt_outcome(
                    attempt,
                    AttemptOutcome::PermanentFailure,
                    Some("recipient is no longer an active subscriber".to_string()),
                )
                .await;
        }
    };

    match transport.send(&subscriber.email, &campaign.subject, html).await {
        Ok(()) => {
            db.deliveries()
                .record_attempt_outcome(attempt, AttemptOutcome::Sent, None)
                .await
        }
        Err(TransportError::Transient(message)) => {
            warn!(
                campaign_id = %campaign.id,
                subscriber_id = %subscriber.id,
                %message,
                "transient delivery failure"
            );
            let outcome = if attempt.attempt_count + 1 >= max_attempts {
                AttemptOutcome::PermanentFailure
            } else {
                AttemptOutcome::TransientFailure
            };
            db.deliveries()
                .record_attempt_outcome(attempt, outcome, Some(message))
                .await
        }
        Err(TransportError::Permanent(message)) => {
            warn!(
                campaign_id = %campaign.id,
                subscriber_id = %subscriber.id,
                %message,
                "permanent delivery failure"
            );
            db.subscribers().mark_subscriber_bounced(subscriber.id).await?;
            db.deliveries()
                .record_attempt_outcome(attempt, AttemptOutcome::PermanentFailure, Some(message))
                .await
        }
    }
}
