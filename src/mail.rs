//! Send emails to employees through the mailing queue.

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::Serialize;
use url::Url;

use crate::config::Mail;
use crate::model::DocumentType;

const DEFAULT_AMPQ_HOST: &str = "localhost";
const DEFAULT_AMPQ_PORT: u16 = 5672;
const DEFAULT_AMPQ_VHOST: &str = "/";

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const ID_LENGTH: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error(transparent)]
    Amqp(#[from] lapin::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("invalid broker address: {0}")]
    Address(String),
    #[error("mail delivery refused: {0}")]
    Rejected(String),
}

/// What the employee is asked to do about a visa document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderAction {
    Upload,
    Reupload,
}

/// Outbound email port.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Invite someone to register. Returns the message id.
    async fn send_invitation(&self, to: &str, name: &str, token: &str) -> Result<String, MailError>;

    /// Remind an employee about the next visa document.
    async fn send_reminder(
        &self,
        to: &str,
        name: &str,
        document_type: DocumentType,
        action: ReminderAction,
    ) -> Result<String, MailError>;
}

/// Mail templates list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum Template {
    /// Registration invitation carrying the sign-up link.
    Invitation,
    /// OPT document upload reminder.
    VisaReminder,
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: Content<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Content<'a> {
    to: Cow<'a, str>,
    template: Template,
    name: Cow<'a, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_type: Option<DocumentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<ReminderAction>,
}

/// Publishes mail events as CloudEvents on RabbitMQ.
#[derive(Debug, Clone, Default)]
pub struct MailManager {
    queue: String,
    conn: Option<Arc<Connection>>,
    /// Registration page; the token is appended as a query parameter.
    registration_url: String,
}

impl MailManager {
    /// Mailer that only logs events, used when no broker is configured.
    pub fn disconnected(registration_url: String) -> Self {
        Self {
            registration_url,
            ..Default::default()
        }
    }

    /// Create a new [`MailManager`].
    pub async fn new(config: &Mail, registration_url: String) -> Result<Self, MailError> {
        let addr = Url::parse(&config.address).map_err(|err| MailError::Address(err.to_string()))?;
        let uri = AMQPUri {
            scheme: AMQPScheme::from_str(addr.scheme())
                .map_err(|_| MailError::Address(addr.scheme().to_owned()))?,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: addr.host_str().unwrap_or(DEFAULT_AMPQ_HOST).into(),
                port: addr.port().unwrap_or(DEFAULT_AMPQ_PORT),
            },
            vhost: config
                .vhost
                .clone()
                .unwrap_or(DEFAULT_AMPQ_VHOST.to_string()),
            query: AMQPQueryString {
                channel_max: config.pool,
                ..Default::default()
            },
        };

        let conn_config =
            ConnectionProperties::default().with_connection_name("hiregate_mail_client".into());
        let conn = Connection::connect_uri(uri, conn_config).await?;

        tracing::info!(%addr, queue = config.queue, "rabbitmq connected");

        Ok(Self {
            queue: config.queue.clone(),
            conn: Some(Arc::new(conn)),
            registration_url,
        })
    }

    async fn create_channel(conn: &Connection, queue: &str) -> Result<Channel, MailError> {
        let channel = conn.create_channel().await?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(channel)
    }

    fn create_event(data: Content) -> Cloudevent {
        let id = Alphanumeric.sample_string(&mut OsRng, ID_LENGTH);
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: "com.hiregate.email",
            source: "com.hiregate.api",
            id,
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }

    /// Publish event, returning its id.
    async fn publish_event(&self, content: Content<'_>) -> Result<String, MailError> {
        let payload = Self::create_event(content);
        let id = payload.id.clone();

        let Some(conn) = &self.conn else {
            tracing::debug!(template = ?payload.data.template, %id, "no mail broker, event dropped");
            return Ok(id);
        };
        let channel = Self::create_channel(conn, &self.queue).await?;
        let body = serde_json::to_vec(&payload)?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await?;

        tracing::trace!(template = ?payload.data.template, %id, "event sent");

        Ok(id)
    }
}

#[async_trait]
impl Mailer for MailManager {
    async fn send_invitation(&self, to: &str, name: &str, token: &str) -> Result<String, MailError> {
        self.publish_event(Content {
            to: Cow::from(to),
            template: Template::Invitation,
            name: Cow::from(name),
            link: Some(format!("{}?token={}", self.registration_url, token)),
            document_type: None,
            action: None,
        })
        .await
    }

    async fn send_reminder(
        &self,
        to: &str,
        name: &str,
        document_type: DocumentType,
        action: ReminderAction,
    ) -> Result<String, MailError> {
        self.publish_event(Content {
            to: Cow::from(to),
            template: Template::VisaReminder,
            name: Cow::from(name),
            link: None,
            document_type: Some(document_type),
            action: Some(action),
        })
        .await
    }
}
