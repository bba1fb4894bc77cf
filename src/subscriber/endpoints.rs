use actix_web::web::{Data, Json};
use actix_web::{get, post, HttpRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::MongoDatabase;
use crate::error::Error;

use super::{
    manager, Preferences, Provenance, SignupSource, Subscriber, SubscriberId, SubscriberStatus,
};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateSubscriberBody {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub source: Option<SignupSource>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UnsubscribeBody {
    pub email: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SubscriberBody {
    pub id: SubscriberId,
    pub email: String,
    pub name: Option<String>,
    pub status: SubscriberStatus,
    pub preferences: Preferences,
    pub subscribed_at: DateTime<Utc>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

impl SubscriberBody {
    pub fn render(subscriber: Subscriber) -> SubscriberBody {
        SubscriberBody {
            id: subscriber.id,
            email: subscriber.email,
            name: subscriber.name,
            status: subscriber.status,
            preferences: subscriber.preferences,
            subscribed_at: subscriber.subscribed_at,
            unsubscribed_at: subscriber.unsubscribed_at,
        }
    }
}

#[post("/subscribers")]
#[tracing::instrument(skip(db, request))]
async fn create_subscriber(
    db: Data<MongoDatabase>,
    body: Json<CreateSubscriberBody>,
    request: HttpRequest,
) -> Result<Json<SubscriberBody>, Error> {
    let body = body.into_inner();

    let provenance = Provenance {
        source: body.source.unwrap_or(SignupSource::Website),
        ip: request.peer_addr().map(|addr| addr.ip().to_string()),
        user_agent: header_value(&request, "user-agent"),
        referrer: header_value(&request, "referer"),
    };

    let subscriber = manager::subscribe(
        db.get_ref(),
        body.email,
        body.name,
        body.preferences,
        provenance,
    )
    .await?;

    Ok(Json(SubscriberBody::render(subscriber)))
}

#[post("/subscribers/unsubscribe")]
#[tracing::instrument(skip(db))]
async fn unsubscribe_subscriber(
    db: Data<MongoDatabase>,
    body: Json<UnsubscribeBody>,
) -> Result<Json<SubscriberBody>, Error> {
    let body = body.into_inner();

    let subscriber = manager::unsubscribe(db.get_ref(), &body.email).await?;

    Ok(Json(SubscriberBody::render(subscriber)))
}

#[get("/subscribers")]
#[tracing::instrument(skip(db))]
async fn get_subscribers(db: Data<MongoDatabase>) -> Result<Json<Vec<SubscriberBody>>, Error> {
    let subscribers = manager::get_subscribers(db.get_ref()).await?;

    let body = subscribers.into_iter().map(SubscriberBody::render).collect();

    Ok(Json(body))
}

fn header_value(request: &HttpRequest, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}
