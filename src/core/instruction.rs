//! Instructions exchanged with the oracle
//!
//! [`Instruction`] is the wire shape the oracle produces. It is validated
//! structurally at the oracle boundary and converted into a typed
//! [`Action`] by the executor, which is where field-level errors surface.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use url::Url;

use crate::core::error::{ActionError, OracleProtocolError};

/// Actions the executor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Search,
    Click,
    Input,
    Wait,
    ScrollPageDown,
    ScrollPageUp,
    Navigate,
    Extract,
    Completed,
}

impl ActionKind {
    /// Parse an action name, accepting the short scroll aliases
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "search" => Some(Self::Search),
            "click" => Some(Self::Click),
            "input" => Some(Self::Input),
            "wait" => Some(Self::Wait),
            "scroll_page_down" | "scroll_down" => Some(Self::ScrollPageDown),
            "scroll_page_up" | "scroll_up" => Some(Self::ScrollPageUp),
            "navigate" => Some(Self::Navigate),
            "extract" => Some(Self::Extract),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Canonical wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Click => "click",
            Self::Input => "input",
            Self::Wait => "wait",
            Self::ScrollPageDown => "scroll_page_down",
            Self::ScrollPageUp => "scroll_page_up",
            Self::Navigate => "navigate",
            Self::Extract => "extract",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instruction as produced by the oracle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Action name
    #[serde(
        default,
        deserialize_with = "de_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub action: Option<String>,
    /// Free-text description from the oracle
    #[serde(
        default,
        deserialize_with = "de_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,
    /// Snapshot handle of the element to act on
    #[serde(
        default,
        deserialize_with = "de_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub target: Option<String>,
    /// Text for `input` and `search`
    #[serde(
        default,
        deserialize_with = "de_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<String>,
    /// Wait duration in milliseconds
    #[serde(
        default,
        deserialize_with = "de_opt_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub wait: Option<u64>,
    /// Absolute url for `navigate`
    #[serde(
        default,
        deserialize_with = "de_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub url: Option<String>,
    /// Completion marker
    #[serde(
        default,
        deserialize_with = "de_opt_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed: Option<bool>,
}

/// A validated, executable action
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Search { target: String, value: String },
    Click { target: String },
    Input { target: String, value: String },
    Wait { duration: Duration },
    ScrollPageDown,
    ScrollPageUp,
    Navigate { url: Url },
    Extract { target: String },
    Completed,
}

impl Action {
    /// Kind of this action
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Search { .. } => ActionKind::Search,
            Action::Click { .. } => ActionKind::Click,
            Action::Input { .. } => ActionKind::Input,
            Action::Wait { .. } => ActionKind::Wait,
            Action::ScrollPageDown => ActionKind::ScrollPageDown,
            Action::ScrollPageUp => ActionKind::ScrollPageUp,
            Action::Navigate { .. } => ActionKind::Navigate,
            Action::Extract { .. } => ActionKind::Extract,
            Action::Completed => ActionKind::Completed,
        }
    }
}

impl Instruction {
    fn of(kind: ActionKind) -> Self {
        Self {
            action: Some(kind.as_str().to_string()),
            ..Default::default()
        }
    }

    /// `click` on a handle
    pub fn click(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::of(ActionKind::Click)
        }
    }

    /// `input` text into a handle
    pub fn input(target: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            value: Some(value.into()),
            ..Self::of(ActionKind::Input)
        }
    }

    /// `search`: input followed by Enter
    pub fn search(target: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            value: Some(value.into()),
            ..Self::of(ActionKind::Search)
        }
    }

    /// `navigate` to an absolute url
    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::of(ActionKind::Navigate)
        }
    }

    /// `wait` for a number of milliseconds
    pub fn wait_ms(ms: u64) -> Self {
        Self {
            wait: Some(ms),
            ..Self::of(ActionKind::Wait)
        }
    }

    /// `extract` the value or text of a handle
    pub fn extract(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::of(ActionKind::Extract)
        }
    }

    /// `scroll_page_down`
    pub fn scroll_down() -> Self {
        Self::of(ActionKind::ScrollPageDown)
    }

    /// `scroll_page_up`
    pub fn scroll_up() -> Self {
        Self::of(ActionKind::ScrollPageUp)
    }

    /// Terminal marker
    pub fn completed() -> Self {
        Self {
            completed: Some(true),
            ..Default::default()
        }
    }

    /// Attach a description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Recognised action kind, if any
    pub fn kind(&self) -> Option<ActionKind> {
        self.action.as_deref().and_then(ActionKind::parse)
    }

    /// Whether this instruction ends the task
    pub fn is_completed(&self) -> bool {
        self.completed == Some(true) || self.kind() == Some(ActionKind::Completed)
    }

    /// Short label for logs and records
    pub fn label(&self) -> String {
        if self.is_completed() {
            return "completed".to_string();
        }
        match (&self.action, &self.target) {
            (Some(action), Some(target)) => format!("{}({})", action, target),
            (Some(action), None) => action.clone(),
            (None, _) => "<none>".to_string(),
        }
    }

    /// Structural check applied to oracle responses: a recognised action or
    /// the completion marker must be present.
    pub fn validate(&self) -> Result<(), OracleProtocolError> {
        if self.is_completed() {
            return Ok(());
        }
        match &self.action {
            None => Err(OracleProtocolError::MissingRequiredField(
                "action".to_string(),
            )),
            Some(name) if ActionKind::parse(name).is_none() => Err(
                OracleProtocolError::MalformedResponse(format!("unrecognised action '{}'", name)),
            ),
            Some(_) => Ok(()),
        }
    }

    /// Convert into an executable action, checking required fields
    pub fn to_action(&self, default_wait: Duration) -> Result<Action, ActionError> {
        if self.is_completed() {
            return Ok(Action::Completed);
        }

        let name = self.action.as_deref().unwrap_or_default();
        let kind = ActionKind::parse(name)
            .ok_or_else(|| ActionError::UnsupportedAction(name.to_string()))?;

        let target = || self.required(kind, "target", &self.target);
        let value = || self.required(kind, "value", &self.value);

        Ok(match kind {
            ActionKind::Search => Action::Search {
                target: target()?,
                value: value()?,
            },
            ActionKind::Click => Action::Click { target: target()? },
            ActionKind::Input => Action::Input {
                target: target()?,
                value: value()?,
            },
            ActionKind::Wait => Action::Wait {
                duration: self.wait.map(Duration::from_millis).unwrap_or(default_wait),
            },
            ActionKind::ScrollPageDown => Action::ScrollPageDown,
            ActionKind::ScrollPageUp => Action::ScrollPageUp,
            ActionKind::Navigate => {
                let raw = self
                    .url
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .ok_or(ActionError::NavigationMissingUrl)?;
                let url = Url::parse(raw).map_err(|_| ActionError::InvalidUrl(raw.to_string()))?;
                Action::Navigate { url }
            }
            ActionKind::Extract => Action::Extract { target: target()? },
            ActionKind::Completed => Action::Completed,
        })
    }

    fn required(
        &self,
        kind: ActionKind,
        field: &str,
        slot: &Option<String>,
    ) -> Result<String, ActionError> {
        // `value` may legitimately be an empty string (clearing a field)
        match slot {
            Some(v) if field == "value" || !v.trim().is_empty() => Ok(v.clone()),
            _ => Err(ActionError::MissingRequiredField {
                action: kind.as_str().to_string(),
                field: field.to_string(),
            }),
        }
    }
}

/// Accepts a string or a number; blank strings become `None`
pub(crate) fn de_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

/// Accepts a number or a numeric string of milliseconds
pub(crate) fn de_opt_millis<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64),
        _ => None,
    })
}

/// Accepts a bool or "true"/"false"
pub(crate) fn de_opt_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => Some(b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}
