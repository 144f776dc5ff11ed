//! Phoenix channel frames and database change payloads

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Error;

pub(crate) const PHOENIX_TOPIC: &str = "phoenix";

/// Events carried in the `event` field of a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEvent {
    #[serde(rename = "phx_join")]
    Join,
    #[serde(rename = "phx_leave")]
    Leave,
    #[serde(rename = "phx_reply")]
    Reply,
    #[serde(rename = "phx_error")]
    Error,
    #[serde(rename = "phx_close")]
    Close,
    Heartbeat,
    AccessToken,
    PostgresChanges,
    System,
    PresenceState,
    PresenceDiff,
    Broadcast,
    #[serde(other)]
    Unknown,
}

/// One websocket frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: ChannelEvent,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub message_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    pub fn heartbeat(message_ref: String) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: ChannelEvent::Heartbeat,
            payload: json!({}),
            message_ref: Some(message_ref),
            join_ref: None,
        }
    }

    /// Join `topic` listening for the changes described by `filter`
    pub fn join(topic: &str, filter: &ChangeFilter, access_token: &str, message_ref: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: ChannelEvent::Join,
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [filter.to_config()],
                },
                "access_token": access_token,
            }),
            join_ref: Some(message_ref.clone()),
            message_ref: Some(message_ref),
        }
    }

    pub fn leave(topic: &str, message_ref: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: ChannelEvent::Leave,
            payload: json!({}),
            message_ref: Some(message_ref),
            join_ref: None,
        }
    }

    pub fn access_token(topic: &str, access_token: &str, message_ref: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: ChannelEvent::AccessToken,
            payload: json!({ "access_token": access_token }),
            message_ref: Some(message_ref),
            join_ref: None,
        }
    }

    /// `status` of a reply or system frame
    pub fn status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }
}

/// Row operation a change feed carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "*")]
    All,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
            ChangeKind::All => "*",
        }
    }
}

/// Which table changes a channel listens for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub schema: String,
    pub table: String,
    pub event: ChangeKind,
    /// Row filter in `column=op.value` form
    pub filter: Option<String>,
}

impl ChangeFilter {
    /// Every change on `table` in the public schema
    pub fn table(table: &str) -> Self {
        Self {
            schema: "public".to_string(),
            table: table.to_string(),
            event: ChangeKind::All,
            filter: None,
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    pub fn event(mut self, event: ChangeKind) -> Self {
        self.event = event;
        self
    }

    /// Only rows where `column` equals `value`
    pub fn eq<T: ToString>(mut self, column: &str, value: T) -> Self {
        self.filter = Some(format!("{}=eq.{}", column, value.to_string()));
        self
    }

    pub(crate) fn to_config(&self) -> Value {
        let mut config = json!({
            "event": self.event.as_str(),
            "schema": self.schema,
            "table": self.table,
        });
        if let Some(filter) = &self.filter {
            config["filter"] = json!(filter);
        }
        config
    }
}

/// `data` object of a `postgres_changes` frame
#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(default)]
    schema: String,
    #[serde(default)]
    table: String,
    #[serde(rename = "type", alias = "eventType")]
    kind: ChangeKind,
    #[serde(default, alias = "new")]
    record: Option<Value>,
    #[serde(default, alias = "old")]
    old_record: Option<Value>,
    #[serde(default)]
    commit_timestamp: Option<String>,
}

/// A row change delivered on a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    pub record: Option<Value>,
    pub old_record: Option<Value>,
    pub commit_timestamp: Option<String>,
}

impl ChangeEvent {
    /// Decode from a `postgres_changes` payload. The change sits under
    /// `data`, or at the top level in older servers.
    pub fn from_payload(payload: &Value) -> Result<Self, Error> {
        let data = payload.get("data").unwrap_or(payload);
        let data: ChangeData = serde_json::from_value(data.clone())?;
        Ok(Self {
            kind: data.kind,
            schema: data.schema,
            table: data.table,
            record: data.record.filter(non_empty),
            old_record: data.old_record.filter(non_empty),
            commit_timestamp: data.commit_timestamp,
        })
    }

    /// The new row, decoded
    pub fn record_as<T: DeserializeOwned>(&self) -> Result<Option<T>, Error> {
        self.record
            .as_ref()
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(Error::from)
    }
}

fn non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}
