//! Outbound mail via lettre: forwards a message as a `message/rfc822` attachment.

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::channels::OutboundTransport;
use crate::error::SendError;

/// SMTP submission settings. The username doubles as the From address.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Sends forwards over SMTP with implicit TLS, one connection per message.
#[derive(Debug, Clone)]
pub struct SmtpForwarder {
    config: SmtpConfig,
}

impl SmtpForwarder {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<SmtpTransport, SendError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );
        Ok(SmtpTransport::relay(&self.config.host)
            .map_err(|e| SendError::Relay(e.to_string()))?
            .port(self.config.port)
            .credentials(creds)
            .build())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, SendError> {
    address.parse().map_err(|e: lettre::address::AddressError| SendError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Build the forward: a plain-text note plus the original message attached verbatim.
pub fn build_forward(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
    attachment: &[u8],
    attachment_name: &str,
) -> Result<Message, SendError> {
    let rfc822 = ContentType::parse("message/rfc822")
        .map_err(|e| SendError::Build(format!("content type: {e}")))?;

    Message::builder()
        .from(parse_mailbox(from)?)
        .to(parse_mailbox(to)?)
        .subject(subject)
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(body.to_string()))
                .singlepart(
                    Attachment::new(attachment_name.to_string()).body(attachment.to_vec(), rfc822),
                ),
        )
        .map_err(|e| SendError::Build(e.to_string()))
}

impl OutboundTransport for SmtpForwarder {
    fn send_with_attachment(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        attachment: &[u8],
        attachment_name: &str,
    ) -> Result<(), SendError> {
        let email = build_forward(
            &self.config.username,
            to,
            subject,
            body,
            attachment,
            attachment_name,
        )?;

        self.transport()?
            .send(&email)
            .map_err(|e| SendError::Send(e.to_string()))?;

        info!("Forwarded message to {to}");
        Ok(())
    }
}
