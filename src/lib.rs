use actix_web::web::{self, Data, FormConfig, JsonConfig, PathConfig, QueryConfig};
use actix_web::{App, HttpServer, ResponseError};
use mongodb::Client;
use tracing::info;
use tracing_actix_web::TracingLogger;

pub mod campaign;
pub mod database;
pub mod delivery;
pub mod error;
pub mod render;
pub mod seed;
pub mod subscriber;
pub mod transport;
pub mod typedid;
pub mod utils;

pub use crate::campaign::{CampaignBody, CreateCampaignBody};
pub use crate::error::Error;
pub use crate::subscriber::{CreateSubscriberBody, SubscriberBody};

use crate::database::MongoDatabase;
use crate::delivery::scheduler::DispatchConfig;
use crate::transport::SmtpTransport;

pub fn run(seed_data: bool) -> Result<(), Error> {
    actix_web::rt::System::new().block_on(serve(seed_data))
}

async fn serve(seed_data: bool) -> Result<(), Error> {
    let uri = env_or("MONGODB_URI", "mongodb://localhost:27017");
    let db_name = env_or("MONGODB_DATABASE", "newsletter");
    info!("connecting to db: {}", uri);
    let db = Client::with_uri_str(&uri).await?.database(&db_name);
    let db = MongoDatabase::initialize(db).await?;

    if seed_data {
        seed::seed(&db).await?;
    }

    let transport = SmtpTransport::new(
        &env_or("SMTP_HOST", "localhost"),
        std::env::var("SMTP_PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(1025),
        &env_or("SMTP_USERNAME", ""),
        &env_or("SMTP_PASSWORD", ""),
        &env_or("SMTP_FROM", "newsletter@example.com"),
    )?;
    let config = DispatchConfig::from_env();

    HttpServer::new(move || {
        App::new()
            .app_data(JsonConfig::default().error_handler(|err, _req| {
                // format json errors with custom format
                Error::InvalidJson(err).into()
            }))
            .app_data(PathConfig::default().error_handler(|err, _req| {
                // format path errors with custom format
                Error::InvalidPath(err).into()
            }))
            .app_data(FormConfig::default().error_handler(|err, _req| {
                // format form errors with custom format
                Error::InvalidForm(err).into()
            }))
            .app_data(QueryConfig::default().error_handler(|err, _req| {
                // format query errors with custom format
                Error::InvalidQuery(err).into()
            }))
            .app_data(Data::new(db.clone()))
            .app_data(Data::new(transport.clone()))
            .app_data(Data::new(config.clone()))
            .wrap(TracingLogger::default())
            .service(campaign::endpoints::create_campaign)
            .service(campaign::endpoints::get_campaigns)
            .service(campaign::endpoints::get_campaign_by_id)
            .service(campaign::endpoints::update_campaign)
            .service(campaign::endpoints::send_campaign)
            .service(campaign::endpoints::cancel_campaign)
            .service(delivery::endpoints::get_attempts_in_campaign)
            .service(delivery::endpoints::track_open)
            .service(delivery::endpoints::track_click)
            .service(subscriber::endpoints::create_subscriber)
            .service(subscriber::endpoints::unsubscribe_subscriber)
            .service(subscriber::endpoints::get_subscribers)
            .default_service(web::to(|| async { Error::PathNotFound.error_response() }))
    })
    .bind("127.0.0.1:8080")?
    .run()
    .await?;

    Ok(())
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
