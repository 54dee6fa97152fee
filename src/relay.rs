//! Error relay: turns posted preview messages into UI-ready error reports.

use log::debug;

use crate::compose::RunToken;

/// An error reported by a preview, as posted to its parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeErrorEvent {
    pub message: String,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    pub colno: Option<u32>,
    pub stack: Option<String>,
    /// Run correlation token, present when the document was composed with one
    pub token: Option<String>,
}

impl RuntimeErrorEvent {
    /// Parse posted JSON; anything that is not a `{type: 'error'}` object
    /// yields `None`. Field types are taken loosely, the way a page may
    /// post them: numbers may arrive as strings and messages as any value.
    pub fn from_posted(data: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(data).ok()?;
        if value.get("type").and_then(|t| t.as_str()) != Some("error") {
            return None;
        }
        Some(Self {
            message: value.get("message").map(loose_text).unwrap_or_default(),
            filename: text_field(&value, "filename"),
            lineno: number_field(&value, "lineno"),
            colno: number_field(&value, "colno"),
            stack: text_field(&value, "stack"),
            token: text_field(&value, "token"),
        })
    }

    fn headline(&self) -> &str {
        if self.message.is_empty() {
            "Script error."
        } else {
            &self.message
        }
    }

    /// Panel text: the stack when there is one, otherwise the message and
    /// a best-effort line number.
    pub fn display_text(&self) -> String {
        match self.stack.as_deref().filter(|s| !s.is_empty()) {
            Some(stack) => stack.to_string(),
            None => {
                let line = self
                    .lineno
                    .filter(|n| *n > 0)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                format!("{}\nAt line {}", self.headline(), line)
            }
        }
    }
}

fn loose_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn text_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key).filter(|v| !v.is_null()).map(loose_text)
}

fn number_field(value: &serde_json::Value, key: &str) -> Option<u32> {
    match value.get(key)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Whether errors must carry the active run's token to be shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPolicy {
    /// Show every error message, whichever preview load sent it
    Permissive,
    /// Show only errors tagged with the active run's token
    Correlated,
}

/// What the UI should show for one accepted error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedError {
    pub event: RuntimeErrorEvent,
    /// Persistent panel contents
    pub panel_text: String,
    /// Transient notification contents
    pub notification_text: String,
}

#[derive(Debug, Clone)]
pub struct ErrorRelay {
    policy: RelayPolicy,
    active: Option<RunToken>,
}

impl ErrorRelay {
    pub fn new(policy: RelayPolicy) -> Self {
        Self { policy, active: None }
    }

    pub fn policy(&self) -> RelayPolicy {
        self.policy
    }

    /// Make `token` the only run whose errors are accepted (correlated policy)
    pub fn activate(&mut self, token: Option<RunToken>) {
        self.active = token;
    }

    pub fn active(&self) -> Option<&RunToken> {
        self.active.as_ref()
    }

    /// Decide what, if anything, to show for one posted message
    pub fn accept(&self, data: &str) -> Option<RelayedError> {
        let event = RuntimeErrorEvent::from_posted(data)?;

        if self.policy == RelayPolicy::Correlated {
            let current = self.active.as_ref().map(RunToken::as_str);
            if event.token.as_deref() != current || current.is_none() {
                debug!(
                    "dropping error from stale preview (token {:?}, active {:?}): {}",
                    event.token, current, event.message
                );
                return None;
            }
        }

        Some(RelayedError {
            panel_text: event.display_text(),
            notification_text: format!("Runtime Error: {}", event.headline()),
            event,
        })
    }
}
