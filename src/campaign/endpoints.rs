use actix_web::web::{Data, Json, Path};
use actix_web::{get, post, put};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::database::{Database, MongoDatabase};
use crate::delivery::scheduler::{self, DispatchConfig};
use crate::error::Error;
use crate::transport::SmtpTransport;

use super::{
    manager, Campaign, CampaignId, CampaignStatus, CampaignUpdate, ContentType, RecipientCounts,
    TargetAudience, TemplateSettings,
};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateCampaignBody {
    pub title: String,
    pub subject: String,
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub target_audience: TargetAudience,
    #[serde(default)]
    pub template: TemplateSettings,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpdateCampaignBody {
    pub title: String,
    pub subject: String,
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub target_audience: TargetAudience,
    #[serde(default)]
    pub template: TemplateSettings,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CampaignBody {
    pub id: CampaignId,
    pub title: String,
    pub subject: String,
    pub content: String,
    pub content_type: ContentType,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub target_audience: TargetAudience,
    pub template: TemplateSettings,
    pub recipients: RecipientCounts,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl CampaignBody {
    pub async fn render(db: &dyn Database, campaign: Campaign) -> Result<CampaignBody, Error> {
        // while a send is underway the stored counters lag behind the rows,
        // so recompute them for the read side
        let recipients = if campaign.status == CampaignStatus::Sending {
            let tally = db.deliveries().count_outcomes_by_campaign(campaign.id).await?;
            RecipientCounts {
                total: tally.total,
                sent: tally.sent,
                failed: tally.failed,
                opened: tally.opened,
                clicked: tally.clicked,
            }
        } else {
            campaign.recipients
        };

        Ok(CampaignBody {
            id: campaign.id,
            title: campaign.title,
            subject: campaign.subject,
            content: campaign.content,
            content_type: campaign.content_type,
            status: campaign.status,
            scheduled_at: campaign.scheduled_at,
            sent_at: campaign.sent_at,
            target_audience: campaign.target_audience,
            template: campaign.template,
            recipients,
            cancel_requested: campaign.cancel_requested,
            created_at: campaign.created_at,
            modified_at: campaign.modified_at,
        })
    }
}

#[post("/campaigns")]
#[tracing::instrument(skip(db))]
async fn create_campaign(
    db: Data<MongoDatabase>,
    body: Json<CreateCampaignBody>,
) -> Result<Json<CampaignBody>, Error> {
    let body = body.into_inner();

    let campaign = manager::create_campaign(
        db.get_ref(),
        body.title,
        body.subject,
        body.content,
        body.content_type,
        body.target_audience,
        body.template,
        body.scheduled_at,
    )
    .await?;

    Ok(Json(CampaignBody::render(db.get_ref(), campaign).await?))
}

#[get("/campaigns")]
#[tracing::instrument(skip(db))]
async fn get_campaigns(db: Data<MongoDatabase>) -> Result<Json<Vec<CampaignBody>>, Error> {
    let campaigns = manager::get_campaigns(db.get_ref()).await?;

    let body = stream::iter(campaigns)
        .then(|campaign| CampaignBody::render(db.get_ref(), campaign))
        .try_collect()
        .await?;

    Ok(Json(body))
}

#[get("/campaigns/{campaign_id}")]
#[tracing::instrument(skip(db))]
async fn get_campaign_by_id(
    db: Data<MongoDatabase>,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();

    let campaign = manager::get_campaign_by_id(db.get_ref(), campaign_id).await?;

    Ok(Json(CampaignBody::render(db.get_ref(), campaign).await?))
}

#[put("/campaigns/{campaign_id}")]
#[tracing::instrument(skip(db, body))]
async fn update_campaign(
    db: Data<MongoDatabase>,
    params: Path<CampaignId>,
    body: Json<UpdateCampaignBody>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();
    let body = body.into_inner();

    let update = CampaignUpdate {
        title: body.title,
        subject: body.subject,
        content: body.content,
        content_type: body.content_type,
        target_audience: body.target_audience,
        template: body.template,
        scheduled_at: body.scheduled_at,
    };
    let campaign = manager::update_campaign(db.get_ref(), campaign_id, update).await?;

    Ok(Json(CampaignBody::render(db.get_ref(), campaign).await?))
}

#[post("/campaigns/{campaign_id}/send")]
#[tracing::instrument(skip(db, transport, config))]
async fn send_campaign(
    db: Data<MongoDatabase>,
    transport: Data<SmtpTransport>,
    config: Data<DispatchConfig>,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();

    let campaign = manager::begin_send(db.get_ref(), campaign_id).await?;

    let task_db = db.get_ref().clone();
    let task_transport = transport.get_ref().clone();
    let task_config = config.get_ref().clone();
    actix_web::rt::spawn(async move {
        if let Err(error) = scheduler::run(&task_db, &task_transport, campaign_id, &task_config).await
        {
            error!(campaign_id = %campaign_id, %error, "campaign dispatch aborted");
        }
    });

    Ok(Json(CampaignBody::render(db.get_ref(), campaign).await?))
}

#[post("/campaigns/{campaign_id}/cancel")]
#[tracing::instrument(skip(db))]
async fn cancel_campaign(
    db: Data<MongoDatabase>,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();

    let campaign = manager::cancel_campaign(db.get_ref(), campaign_id).await?;

    Ok(Json(CampaignBody::render(db.get_ref(), campaign).await?))
}
