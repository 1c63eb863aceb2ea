//! Built-in notification clients.

use super::Notifier;
use serde_json::{Map, Value};

/// Writes notifications to the log.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier {
    channel: Option<String>,
}

impl LoggingNotifier {
    /// Registry name.
    pub const CLIENT_NAME: &'static str = "LoggingClient";

    /// Builds the client. Accepts an optional `channel` label.
    #[must_use]
    pub fn from_params(params: &Map<String, Value>) -> Self {
        Self {
            channel: params.get("channel").and_then(Value::as_str).map(String::from),
        }
    }
}

impl Notifier for LoggingNotifier {
    fn post_message(&self, message: &str) -> anyhow::Result<()> {
        tracing::warn!(
            client = Self::CLIENT_NAME,
            channel = self.channel.as_deref().unwrap_or("default"),
            "{message}"
        );
        Ok(())
    }
}

/// Posts `{"text": message}` to a webhook URL.
#[cfg(feature = "webhook")]
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    member_id: Option<String>,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "webhook")]
impl WebhookNotifier {
    /// Registry name.
    pub const CLIENT_NAME: &'static str = "WebhookClient";

    /// Builds the client. Requires `url`; `member_id` adds a mention.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is missing.
    pub fn from_params(params: &Map<String, Value>) -> anyhow::Result<Self> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing 'url' parameter"))?;
        Ok(Self {
            url: url.to_string(),
            member_id: params.get("member_id").and_then(Value::as_str).map(String::from),
            client: reqwest::blocking::Client::new(),
        })
    }

    fn text(&self, message: &str) -> String {
        match &self.member_id {
            Some(member) => format!("{message}\n <@{member}>"),
            None => message.to_string(),
        }
    }
}

#[cfg(feature = "webhook")]
impl Notifier for WebhookNotifier {
    fn post_message(&self, message: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({ "text": self.text(message) });
        self.client
            .post(&self.url)
            .json(&body)
            .send()?
            .error_for_status()?;
        Ok(())
    }
}
