use std::fmt::{Debug, Display};

use async_trait::async_trait;
use lettre::message::header::ContentType as MessageContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::error::Error;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransportError {
    Transient(String),
    Permanent(String),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            TransportError::Transient(message) => write!(f, "transient: {}", message),
            TransportError::Permanent(message) => write!(f, "permanent: {}", message),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), TransportError>;
}

#[derive(Clone)]
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: Mailbox,
}

impl SmtpTransport {
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        from_address: &str,
    ) -> Result<SmtpTransport, Error> {
        let from_address: Mailbox = from_address
            .parse()
            .map_err(|e| Error::InvalidMailerConfiguration(format!("from address: {}", e)))?;

        // no credentials means a local relay over plain smtp
        let mailer = if username.is_empty() {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .port(port)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| Error::InvalidMailerConfiguration(format!("relay: {}", e)))?
                .port(port)
                .credentials(Credentials::new(username.to_string(), password.to_string()))
                .build()
        };

        Ok(SmtpTransport {
            mailer,
            from_address,
        })
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    #[tracing::instrument(skip(self, html))]
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), TransportError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| TransportError::Permanent(format!("invalid recipient address: {}", e)))?;

        let message = Message::builder()
            .from(self.from_address.clone())
            .to(to)
            .subject(subject)
            .header(MessageContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| TransportError::Permanent(format!("failed to build message: {}", e)))?;

        match self.mailer.send(message).await {
            Ok(_) => Ok(()),
            Err(error) if error.is_permanent() => Err(TransportError::Permanent(error.to_string())),
            Err(error) => Err(TransportError::Transient(error.to_string())),
        }
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    pub struct MockTransport {
        pub on_send: Box<dyn Fn(&str, &str, &str) -> Result<(), TransportError> + Send + Sync>,
    }

    impl MockTransport {
        pub fn new() -> MockTransport {
            MockTransport {
                on_send: Box::new(|_, _, _| panic!("unexpected call to send")),
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), TransportError> {
            (self.on_send)(to, subject, html)
        }
    }

    #[test]
    fn new_accepts_credentialless_config() {
        let transport = SmtpTransport::new("localhost", 1025, "", "", "news@example.com");

        assert!(transport.is_ok());
    }

    #[test]
    fn new_rejects_bad_from_address() {
        let transport = SmtpTransport::new("localhost", 1025, "", "", "not an address");

        assert!(matches!(
            transport,
            Err(Error::InvalidMailerConfiguration(_))
        ));
    }
}
