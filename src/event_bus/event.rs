use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ambient diagnostics emitted by the action runner / orchestrator,
/// independent of the renderer-facing `Actor::subscribe` stream (§4.H).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    Action(ActionEvent),
    Diagnostic(DiagnosticEvent),
}

impl Event {
    pub fn action_message(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Action(ActionEvent::new(None, None, scope.into(), message.into()))
    }

    pub fn action_message_with_meta(
        node_id: impl Into<String>,
        step: u64,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Event::Action(ActionEvent::new(
            Some(node_id.into()),
            Some(step),
            scope.into(),
            message.into(),
        ))
    }

    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic(DiagnosticEvent {
            scope: scope.into(),
            message: message.into(),
        })
    }

    pub fn scope_label(&self) -> Option<&str> {
        match self {
            Event::Action(action) => Some(action.scope()),
            Event::Diagnostic(diag) => Some(diag.scope()),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Event::Action(action) => action.message(),
            Event::Diagnostic(diag) => diag.message(),
        }
    }

    /// Convert event to structured JSON value with normalized schema.
    ///
    /// ```json
    /// {
    ///   "type": "action" | "diagnostic",
    ///   "scope": "scope_label",
    ///   "message": "event_message",
    ///   "timestamp": "2025-11-03T12:34:56.789Z",
    ///   "metadata": { /* variant-specific fields */ }
    /// }
    /// ```
    ///
    /// ```
    /// use flowspire::event_bus::Event;
    ///
    /// let event = Event::action_message_with_meta("checkout.pay", 5, "http", "Processing request");
    /// let json = event.to_json_value();
    ///
    /// assert_eq!(json["type"], "action");
    /// assert_eq!(json["scope"], "http");
    /// assert_eq!(json["message"], "Processing request");
    /// assert_eq!(json["metadata"]["node_id"], "checkout.pay");
    /// assert_eq!(json["metadata"]["step"], 5);
    /// ```
    pub fn to_json_value(&self) -> serde_json::Value {
        use serde_json::json;

        let (event_type, metadata) = match self {
            Event::Action(action) => {
                let mut meta = serde_json::Map::new();
                if let Some(node_id) = action.node_id() {
                    meta.insert("node_id".to_string(), json!(node_id));
                }
                if let Some(step) = action.step() {
                    meta.insert("step".to_string(), json!(step));
                }
                ("action", Value::Object(meta))
            }
            Event::Diagnostic(_) => {
                let meta = serde_json::Map::new();
                ("diagnostic", Value::Object(meta))
            }
        };

        json!({
            "type": event_type,
            "scope": self.scope_label(),
            "message": self.message(),
            "timestamp": Utc::now().to_rfc3339(),
            "metadata": metadata,
        })
    }

    /// ```
    /// use flowspire::event_bus::Event;
    ///
    /// let event = Event::diagnostic("test", "message");
    /// let json_str = event.to_json_string().unwrap();
    /// assert!(json_str.contains("\"type\":\"diagnostic\""));
    /// ```
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }

    /// ```
    /// use flowspire::event_bus::Event;
    ///
    /// let event = Event::action_message("test", "hello");
    /// let json_str = event.to_json_pretty().unwrap();
    /// assert!(json_str.contains("  \"type\": \"action\""));
    /// ```
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_json_value())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Action(action) => match (action.node_id(), action.step()) {
                (Some(id), Some(step)) => write!(f, "[{id}@{step}] {}", action.message()),
                (Some(id), None) => write!(f, "[{id}] {}", action.message()),
                (None, Some(step)) => write!(f, "[step {step}] {}", action.message()),
                (None, None) => write!(f, "{}", action.message()),
            },
            Event::Diagnostic(diag) => write!(f, "{}", diag.message()),
        }
    }
}

/// An event scoped to a particular node/action during pipeline execution.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionEvent {
    node_id: Option<String>,
    step: Option<u64>,
    scope: String,
    message: String,
}

impl ActionEvent {
    pub fn new(node_id: Option<String>, step: Option<u64>, scope: String, message: String) -> Self {
        Self { node_id, step, scope, message }
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn step(&self) -> Option<u64> {
        self.step
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A scope-tagged event with no node/step association — compile-time
/// diagnostics, orchestrator lifecycle notices, config warnings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEvent {
    scope: String,
    message: String,
}

impl DiagnosticEvent {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
