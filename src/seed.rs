use chrono::Utc;

use crate::campaign::{
    AudienceStatusFilter, Campaign, CampaignStatus, ContentType, RecipientCounts, TargetAudience,
    TemplateSettings,
};
use crate::database::Database;
use crate::error::Error;
use crate::subscriber::{
    EmailFrequency, Preferences, Provenance, SignupSource, Subscriber, SubscriberStatus,
};

pub async fn seed(db: &dyn Database) -> Result<(), Error> {
    db.drop().await?;

    let campaign_id = "CMP-16E77539-8873-4C8A-BCA3-2036010474AD".parse().unwrap();
    let subscriber1_id = "SUB-33957EB6-0EE7-487F-A087-E55C335BD63C".parse().unwrap();
    let subscriber2_id = "SUB-DE3168FD-2730-47A2-BFE0-E53C79DD57A0".parse().unwrap();
    let subscriber3_id = "SUB-5EA81D0A-9788-4B8A-82D9-1A0D636B53CE".parse().unwrap();
    let subscriber4_id = "SUB-5C903E93-2524-4876-B4C8-816B98D0C77B".parse().unwrap();

    let now = Utc::now();
    let website = Provenance {
        source: SignupSource::Website,
        ip: None,
        user_agent: None,
        referrer: None,
    };

    let subscribers = vec![
        Subscriber {
            id: subscriber1_id,
            email: "morning.reader@example.com".to_string(),
            name: Some("Morning Reader".to_string()),
            status: SubscriberStatus::Active,
            preferences: Preferences {
                frequency: EmailFrequency::Daily,
                categories: vec!["rust".to_string(), "engineering".to_string()],
            },
            subscribed_at: now,
            unsubscribed_at: None,
            provenance: website.clone(),
            created_at: now,
            modified_at: now,
        },
        Subscriber {
            id: subscriber2_id,
            email: "weekend.skimmer@example.com".to_string(),
            name: None,
            status: SubscriberStatus::Active,
            preferences: Preferences {
                frequency: EmailFrequency::Weekly,
                categories: vec!["engineering".to_string()],
            },
            subscribed_at: now,
            unsubscribed_at: None,
            provenance: Provenance {
                source: SignupSource::Admin,
                ip: None,
                user_agent: None,
                referrer: None,
            },
            created_at: now,
            modified_at: now,
        },
        Subscriber {
            id: subscriber3_id,
            email: "former.fan@example.com".to_string(),
            name: None,
            status: SubscriberStatus::Unsubscribed,
            preferences: Preferences::default(),
            subscribed_at: now,
            unsubscribed_at: Some(now),
            provenance: website.clone(),
            created_at: now,
            modified_at: now,
        },
        Subscriber {
            id: subscriber4_id,
            email: "gone.mailbox@example.com".to_string(),
            name: None,
            status: SubscriberStatus::Bounced,
            preferences: Preferences::default(),
            subscribed_at: now,
            unsubscribed_at: None,
            provenance: website,
            created_at: now,
            modified_at: now,
        },
    ];

    for subscriber in &subscribers {
        db.subscribers().insert_subscriber(subscriber).await?;
    }

    let campaign = Campaign {
        id: campaign_id,
        title: "Welcome to the Newsletter".to_string(),
        subject: "First issue".to_string(),
        content: "# Hello\n\nThanks for subscribing, more soon.".to_string(),
        content_type: ContentType::Markdown,
        status: CampaignStatus::Draft,
        scheduled_at: None,
        sent_at: None,
        target_audience: TargetAudience {
            status: AudienceStatusFilter::All,
            categories: None,
            frequency: None,
        },
        template: TemplateSettings {
            header_image: None,
            footer_text: Some("Written with love on a rainy weekend".to_string()),
            accent_color: Some("#2a6df4".to_string()),
        },
        recipients: RecipientCounts::default(),
        cancel_requested: false,
        created_at: now,
        modified_at: now,
    };

    db.campaigns().insert_campaign(&campaign).await?;

    Ok(())
}
