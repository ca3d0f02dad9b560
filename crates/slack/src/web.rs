//! Slack Web API client backing the core `Messenger` trait.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use squadup_core::{Display, MessageRef, Messenger, MessengerError, Participant};
use tracing::debug;

use crate::blocks::{display_message, MessageTemplate};
use crate::events::{Reply, ReplySink};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ApiFamily {
    Post,
    Edit,
    Reaction,
    Lookup,
    Connection,
}

impl ApiFamily {
    fn error(self, detail: String) -> MessengerError {
        match self {
            Self::Post => MessengerError::Post(detail),
            Self::Edit => MessengerError::Edit(detail),
            Self::Reaction => MessengerError::Reaction(detail),
            Self::Lookup => MessengerError::Lookup(detail),
            Self::Connection => MessengerError::Transport(detail),
        }
    }
}

pub struct SlackWebClient {
    http: reqwest::Client,
    api_base_url: String,
    bot_token: SecretString,
    app_token: SecretString,
}

impl SlackWebClient {
    pub fn new(
        api_base_url: impl Into<String>,
        bot_token: SecretString,
        app_token: SecretString,
    ) -> Result<Self, MessengerError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| MessengerError::Transport(error.to_string()))?;
        let api_base_url = api_base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { http, api_base_url, bot_token, app_token })
    }

    /// Requests a fresh Socket Mode websocket URL.
    pub async fn open_socket_url(&self) -> Result<String, MessengerError> {
        let request = self
            .http
            .post(self.method_url("apps.connections.open"))
            .bearer_auth(self.app_token.expose_secret());
        let body = self.send(request, ApiFamily::Connection, "apps.connections.open").await?;

        body.get("url")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| MessengerError::Transport("connection response without url".to_owned()))
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base_url)
    }

    async fn call(
        &self,
        method: &'static str,
        family: ApiFamily,
        payload: Value,
    ) -> Result<Value, MessengerError> {
        let request = self
            .http
            .post(self.method_url(method))
            .bearer_auth(self.bot_token.expose_secret())
            .json(&payload);
        self.send(request, family, method).await
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        family: ApiFamily,
        method: &'static str,
    ) -> Result<Value, MessengerError> {
        let response = request
            .send()
            .await
            .map_err(|error| MessengerError::Transport(format!("{method}: {error}")))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|error| MessengerError::Transport(format!("{method}: {error}")))?;

        debug!(
            event_name = "egress.slack.api_call",
            method,
            status = status.as_u16(),
            ok = body.get("ok").and_then(serde_json::Value::as_bool).unwrap_or(false),
            "slack web api call completed"
        );
        check_api_response(method, family, body)
    }
}

#[async_trait]
impl Messenger for SlackWebClient {
    async fn post(
        &self,
        channel_id: &str,
        display: &Display,
    ) -> Result<MessageRef, MessengerError> {
        let body =
            self.call("chat.postMessage", ApiFamily::Post, post_payload(channel_id, display)).await?;
        posted_message_ref(channel_id, &body)
    }

    async fn edit(&self, message: &MessageRef, display: &Display) -> Result<(), MessengerError> {
        self.call("chat.update", ApiFamily::Edit, update_payload(message, display)).await?;
        Ok(())
    }

    async fn add_marker(&self, message: &MessageRef, marker: &str) -> Result<(), MessengerError> {
        match self.call("reactions.add", ApiFamily::Reaction, reaction_payload(message, marker)).await
        {
            Err(error) if is_tolerated("reactions.add", &error) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn remove_marker(
        &self,
        message: &MessageRef,
        marker: &str,
    ) -> Result<(), MessengerError> {
        match self
            .call("reactions.remove", ApiFamily::Reaction, reaction_payload(message, marker))
            .await
        {
            Err(error) if is_tolerated("reactions.remove", &error) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn resolve_participant(&self, user_id: &str) -> Result<Participant, MessengerError> {
        let request = self
            .http
            .get(self.method_url("users.info"))
            .bearer_auth(self.bot_token.expose_secret())
            .query(&[("user", user_id)]);
        let body = self.send(request, ApiFamily::Lookup, "users.info").await?;
        Ok(participant_from_user(user_id, &body))
    }
}

#[async_trait]
impl ReplySink for SlackWebClient {
    async fn send_reply(&self, reply: &Reply) -> Result<(), MessengerError> {
        let mut payload = template_payload(&reply.message);
        payload["channel"] = json!(reply.channel_id);
        payload["user"] = json!(reply.user_id);
        self.call("chat.postEphemeral", ApiFamily::Post, payload).await?;
        Ok(())
    }
}

fn template_payload(template: &MessageTemplate) -> Value {
    json!({ "text": template.fallback_text, "blocks": template.blocks })
}

fn post_payload(channel_id: &str, display: &Display) -> Value {
    let mut payload = template_payload(&display_message(display));
    payload["channel"] = json!(channel_id);
    payload
}

fn update_payload(message: &MessageRef, display: &Display) -> Value {
    let mut payload = template_payload(&display_message(display));
    payload["channel"] = json!(message.channel_id);
    payload["ts"] = json!(message.message_id);
    payload
}

fn reaction_payload(message: &MessageRef, marker: &str) -> Value {
    json!({ "channel": message.channel_id, "timestamp": message.message_id, "name": marker })
}

fn check_api_response(
    method: &str,
    family: ApiFamily,
    body: Value,
) -> Result<Value, MessengerError> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }
    let code = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error");
    Err(family.error(format!("{method}: {code}")))
}

/// Reaction calls that already match the desired state.
fn is_tolerated(method: &str, error: &MessengerError) -> bool {
    let MessengerError::Reaction(detail) = error else {
        return false;
    };
    match method {
        "reactions.add" => detail.ends_with(": already_reacted"),
        "reactions.remove" => detail.ends_with(": no_reaction"),
        _ => false,
    }
}

fn posted_message_ref(channel_id: &str, body: &Value) -> Result<MessageRef, MessengerError> {
    let ts = body
        .get("ts")
        .and_then(Value::as_str)
        .ok_or_else(|| MessengerError::Post("chat.postMessage: response without ts".to_owned()))?;
    let channel = body.get("channel").and_then(Value::as_str).unwrap_or(channel_id);
    Ok(MessageRef::new(channel, ts))
}

fn participant_from_user(user_id: &str, body: &Value) -> Participant {
    // Slackbot is not flagged `is_bot` by users.info
    let is_bot = user_id == "USLACKBOT"
        || body.pointer("/user/is_bot").and_then(Value::as_bool).unwrap_or(false);
    Participant {
        display_name: display_name_from_user(body).unwrap_or_else(|| user_id.to_owned()),
        is_bot,
    }
}

fn display_name_from_user(body: &Value) -> Option<String> {
    let user = body.get("user")?;
    let profile = user.get("profile");
    [
        profile.and_then(|profile| profile.get("display_name")),
        profile.and_then(|profile| profile.get("real_name")),
        user.get("real_name"),
        user.get("name"),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_str)
    .map(str::trim)
    .find(|name| !name.is_empty())
    .map(str::to_owned)
}
