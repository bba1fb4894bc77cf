use async_trait::async_trait;
use mongodb::Collection;

use crate::campaign::db::CampaignStore;
use crate::campaign::Campaign;
use crate::delivery::db::DeliveryAttemptStore;
use crate::delivery::DeliveryAttempt;
use crate::error::Error;
use crate::subscriber::db::SubscriberStore;
use crate::subscriber::Subscriber;

pub type MongoCampaignStore = Collection<Campaign>;
pub type MongoSubscriberStore = Collection<Subscriber>;
pub type MongoDeliveryAttemptStore = Collection<DeliveryAttempt>;

#[async_trait]
pub trait Database: Send + Sync {
    fn campaigns(&self) -> &dyn CampaignStore;

    fn subscribers(&self) -> &dyn SubscriberStore;

    fn deliveries(&self) -> &dyn DeliveryAttemptStore;

    async fn drop(&self) -> Result<(), Error>;
}

#[derive(Debug, Clone)]
pub struct MongoDatabase {
    campaigns: Collection<Campaign>,
    subscribers: Collection<Subscriber>,
    deliveries: Collection<DeliveryAttempt>,
    db: mongodb::Database,
}

impl MongoDatabase {
    pub async fn initialize(db: mongodb::Database) -> Result<MongoDatabase, Error> {
        crate::campaign::db::initialize(&db).await?;
        crate::subscriber::db::initialize(&db).await?;
        crate::delivery::db::initialize(&db).await?;

        Ok(MongoDatabase::new(db))
    }

    pub fn new(db: mongodb::Database) -> MongoDatabase {
        MongoDatabase {
            campaigns: db.collection("campaigns"),
            subscribers: db.collection("subscribers"),
            deliveries: db.collection("delivery_attempts"),
            db,
        }
    }
}

#[async_trait]
impl Database for MongoDatabase {
    fn campaigns(&self) -> &dyn CampaignStore {
        &self.campaigns
    }

    fn subscribers(&self) -> &dyn SubscriberStore {
        &self.subscribers
    }

    fn deliveries(&self) -> &dyn DeliveryAttemptStore {
        &self.deliveries
    }

    async fn drop(&self) -> Result<(), Error> {
        self.db.drop(None).await?;
        Ok(())
    }
}
