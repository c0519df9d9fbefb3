//! Email node - send emails through a pluggable transport.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::types::{Credentials, Node, NodeDefinition, NodeGroup, NodeOutput, PropertyDefinition};
use crate::error::{Error, Result};

const DEFAULT_FROM: &str = "noreply@weft.local";

/// A fully resolved message ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub reply_to: Option<String>,
    pub subject: String,
    /// HTML body
    pub body: String,
}

/// Delivers mail on behalf of the email node.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail, credentials: &Credentials) -> Result<()>;
}

/// Transport for HTTP mail APIs, selected by the `provider` credential field.
///
/// Supported providers are `sendgrid` and `resend`; both read `api_key` and
/// an optional `from` address from the credentials.
pub struct ApiMailTransport {
    client: reqwest::Client,
}

impl ApiMailTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ApiMailTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn sender(credentials: &Credentials) -> &str {
    credentials
        .get("from")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_FROM)
}

fn sendgrid_payload(mail: &OutgoingMail, from: &str) -> Value {
    let addresses =
        |list: &[String]| -> Vec<Value> { list.iter().map(|e| json!({"email": e})).collect() };

    let mut personalization = json!({ "to": addresses(&mail.to) });
    if !mail.cc.is_empty() {
        personalization["cc"] = json!(addresses(&mail.cc));
    }
    if !mail.bcc.is_empty() {
        personalization["bcc"] = json!(addresses(&mail.bcc));
    }

    let mut body = json!({
        "personalizations": [personalization],
        "from": { "email": from },
        "subject": mail.subject,
        "content": [{"type": "text/html", "value": mail.body}],
    });
    if let Some(reply_to) = &mail.reply_to {
        body["reply_to"] = json!({ "email": reply_to });
    }
    body
}

fn resend_payload(mail: &OutgoingMail, from: &str) -> Value {
    let mut body = json!({
        "from": from,
        "to": mail.to,
        "subject": mail.subject,
        "html": mail.body,
    });
    if !mail.cc.is_empty() {
        body["cc"] = json!(mail.cc);
    }
    if !mail.bcc.is_empty() {
        body["bcc"] = json!(mail.bcc);
    }
    if let Some(reply_to) = &mail.reply_to {
        body["reply_to"] = json!(reply_to);
    }
    body
}

#[async_trait]
impl MailTransport for ApiMailTransport {
    async fn send(&self, mail: &OutgoingMail, credentials: &Credentials) -> Result<()> {
        let provider = credentials
            .get("provider")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let (endpoint, payload) = match provider {
            "sendgrid" => (
                "https://api.sendgrid.com/v3/mail/send",
                sendgrid_payload(mail, sender(credentials)),
            ),
            "resend" => (
                "https://api.resend.com/emails",
                resend_payload(mail, sender(credentials)),
            ),
            other => return Err(Error::node(format!("Unknown mail provider '{}'", other))),
        };
        let api_key = credentials
            .get("api_key")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::node(format!("{} requires api_key", provider)))?;

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let error_body = response.text().await.unwrap_or_default();
            Err(Error::node(format!(
                "{} error {}: {}",
                provider, status, error_body
            )))
        }
    }
}

/// Email node for sending emails.
pub struct EmailNode {
    transport: Arc<dyn MailTransport>,
}

impl EmailNode {
    pub fn new() -> Self {
        Self::with_transport(Arc::new(ApiMailTransport::new()))
    }

    pub fn with_transport(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }
}

impl Default for EmailNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrVec {
    Single(String),
    Multiple(Vec<String>),
}

impl StringOrVec {
    /// Addresses, splitting comma-separated strings.
    fn to_vec(&self) -> Vec<String> {
        let items: Vec<&str> = match self {
            StringOrVec::Single(s) => s.split(',').collect(),
            StringOrVec::Multiple(v) => v.iter().map(String::as_str).collect(),
        };
        items
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmailConfig {
    to: StringOrVec,
    subject: String,
    body: String,
    #[serde(default)]
    cc: Option<StringOrVec>,
    #[serde(default)]
    bcc: Option<StringOrVec>,
    #[serde(default, alias = "reply_to")]
    reply_to: Option<String>,
}

#[async_trait]
impl Node for EmailNode {
    fn node_type(&self) -> &str {
        "email"
    }

    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("Email", self.node_type(), NodeGroup::Action, "Send an email")
            .with_property(PropertyDefinition::new("to", "To", "string").required())
            .with_property(PropertyDefinition::new("subject", "Subject", "string").required())
            .with_property(PropertyDefinition::new("body", "Body", "string").required())
            .with_property(PropertyDefinition::new("cc", "CC", "string"))
            .with_property(PropertyDefinition::new("bcc", "BCC", "string"))
            .with_property(PropertyDefinition::new("replyTo", "Reply To", "string"))
            .with_credential("emailApi", true)
    }

    async fn execute(&self, _: &Value, params: &Value, credentials: &Credentials) -> Result<NodeOutput> {
        let config: EmailConfig = serde_json::from_value(params.clone())
            .map_err(|e| Error::node(format!("Invalid email config: {}", e)))?;

        let mail = OutgoingMail {
            to: config.to.to_vec(),
            cc: config.cc.as_ref().map(StringOrVec::to_vec).unwrap_or_default(),
            bcc: config.bcc.as_ref().map(StringOrVec::to_vec).unwrap_or_default(),
            reply_to: config.reply_to.filter(|r| !r.trim().is_empty()),
            subject: config.subject,
            body: config.body,
        };
        if mail.to.is_empty() {
            return Err(Error::MissingRequiredParameter("to".to_string()));
        }

        debug!(to = ?mail.to, subject = %mail.subject, "Sending email");
        self.transport
            .send(&mail, credentials)
            .await
            .map_err(|e| Error::node(format!("Email sending failed: {}", e)))?;

        Ok(NodeOutput::Data(json!({
            "success": true,
            "message": "Email sent successfully",
            "to": params["to"],
            "subject": mail.subject,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<OutgoingMail>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn send(&self, mail: &OutgoingMail, _: &Credentials) -> Result<()> {
            self.sent.lock().await.push(mail.clone());
            Ok(())
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl MailTransport for FailingTransport {
        async fn send(&self, _: &OutgoingMail, _: &Credentials) -> Result<()> {
            Err(Error::node("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_send_through_transport() {
        let transport = Arc::new(RecordingTransport::default());
        let node = EmailNode::with_transport(transport.clone());

        let out = node
            .execute(
                &json!({}),
                &json!({
                    "to": "a@example.com, b@example.com",
                    "subject": "Order shipped",
                    "body": "<p>On its way</p>",
                    "cc": ["c@example.com"],
                    "replyTo": "support@example.com"
                }),
                &Credentials::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            out.payload(),
            &json!({
                "success": true,
                "message": "Email sent successfully",
                "to": "a@example.com, b@example.com",
                "subject": "Order shipped"
            })
        );

        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["a@example.com", "b@example.com"]);
        assert_eq!(sent[0].cc, vec!["c@example.com"]);
        assert_eq!(sent[0].reply_to.as_deref(), Some("support@example.com"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_node_error() {
        let node = EmailNode::with_transport(Arc::new(FailingTransport));
        let err = node
            .execute(
                &json!({}),
                &json!({"to": "a@example.com", "subject": "s", "body": "b"}),
                &Credentials::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Email sending failed: connection refused");
    }

    #[test]
    fn test_required_fields() {
        let node = EmailNode::new();
        assert!(matches!(
            node.validate(&json!({"to": "a@example.com", "subject": "s"})),
            Err(Error::MissingRequiredParameter(name)) if name == "body"
        ));
    }

    #[test]
    fn test_provider_payloads() {
        let mail = OutgoingMail {
            to: vec!["a@example.com".into()],
            cc: vec![],
            bcc: vec!["b@example.com".into()],
            reply_to: None,
            subject: "Hi".into(),
            body: "<b>x</b>".into(),
        };

        let sendgrid = sendgrid_payload(&mail, "me@example.com");
        assert_eq!(sendgrid["personalizations"][0]["to"][0]["email"], "a@example.com");
        assert_eq!(sendgrid["personalizations"][0]["bcc"][0]["email"], "b@example.com");
        assert!(sendgrid["personalizations"][0].get("cc").is_none());
        assert_eq!(sendgrid["from"]["email"], "me@example.com");

        let resend = resend_payload(&mail, DEFAULT_FROM);
        assert_eq!(resend["to"], json!(["a@example.com"]));
        assert_eq!(resend["html"], "<b>x</b>");
        assert!(resend.get("reply_to").is_none());
    }

    #[tokio::test]
    async fn test_api_transport_requires_known_provider_and_key() {
        let transport = ApiMailTransport::new();
        let mail = OutgoingMail {
            to: vec!["a@example.com".into()],
            cc: vec![],
            bcc: vec![],
            reply_to: None,
            subject: "s".into(),
            body: "b".into(),
        };

        let err = transport.send(&mail, &Credentials::new()).await.unwrap_err();
        assert!(err.to_string().contains("Unknown mail provider"));

        let creds = json!({"provider": "resend"}).as_object().cloned().unwrap();
        let err = transport.send(&mail, &creds).await.unwrap_err();
        assert!(err.to_string().contains("requires api_key"));
    }
}
