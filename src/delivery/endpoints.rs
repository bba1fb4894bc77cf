use actix_web::web::{Data, Json, Path};
use actix_web::{get, post, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::campaign::{manager, CampaignId};
use crate::database::{Database, MongoDatabase};
use crate::error::Error;
use crate::subscriber::SubscriberId;

use super::{AttemptOutcome, DeliveryAttempt};

const TRACKING_PIXEL: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0xFF, 0xFF,
    0xFF, 0x00, 0x00, 0x00, 0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3B,
];

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeliveryAttemptBody {
    pub subscriber_id: SubscriberId,
    pub position: i64,
    pub outcome: AttemptOutcome,
    pub attempt_count: i32,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
}

impl DeliveryAttemptBody {
    pub fn render(attempt: DeliveryAttempt) -> DeliveryAttemptBody {
        DeliveryAttemptBody {
            subscriber_id: attempt.subscriber_id,
            position: attempt.position,
            outcome: attempt.outcome,
            attempt_count: attempt.attempt_count,
            last_attempted_at: attempt.last_attempted_at,
            last_error: attempt.last_error,
            opened_at: attempt.opened_at,
            clicked_at: attempt.clicked_at,
        }
    }
}

#[get("/campaigns/{campaign_id}/attempts")]
#[tracing::instrument(skip(db))]
async fn get_attempts_in_campaign(
    db: Data<MongoDatabase>,
    params: Path<CampaignId>,
) -> Result<Json<Vec<DeliveryAttemptBody>>, Error> {
    let campaign_id = params.into_inner();

    manager::get_campaign_by_id(db.get_ref(), campaign_id).await?;

    let attempts = db
        .get_ref()
        .deliveries()
        .fetch_attempts_by_campaign(campaign_id)
        .await?;

    let body = attempts.into_iter().map(DeliveryAttemptBody::render).collect();

    Ok(Json(body))
}

#[get("/campaigns/{campaign_id}/open/{subscriber_id}")]
#[tracing::instrument(skip(db))]
async fn track_open(
    db: Data<MongoDatabase>,
    params: Path<(CampaignId, SubscriberId)>,
) -> Result<HttpResponse, Error> {
    let (campaign_id, subscriber_id) = params.into_inner();

    let attempt = db
        .get_ref()
        .deliveries()
        .fetch_attempt_by_campaign_and_subscriber(campaign_id, subscriber_id)
        .await?
        .ok_or(Error::DeliveryAttemptNotFound {
            campaign_id,
            subscriber_id,
        })?;

    db.get_ref().deliveries().mark_attempt_opened(attempt.id).await?;

    Ok(HttpResponse::Ok()
        .content_type("image/gif")
        .body(TRACKING_PIXEL))
}

#[post("/campaigns/{campaign_id}/click/{subscriber_id}")]
#[tracing::instrument(skip(db))]
async fn track_click(
    db: Data<MongoDatabase>,
    params: Path<(CampaignId, SubscriberId)>,
) -> Result<HttpResponse, Error> {
    let (campaign_id, subscriber_id) = params.into_inner();

    let attempt = db
        .get_ref()
        .deliveries()
        .fetch_attempt_by_campaign_and_subscriber(campaign_id, subscriber_id)
        .await?
        .ok_or(Error::DeliveryAttemptNotFound {
            campaign_id,
            subscriber_id,
        })?;

    db.get_ref().deliveries().mark_attempt_clicked(attempt.id).await?;

    Ok(HttpResponse::NoContent().finish())
}
