//! Shared types used across webpilot modules
//!
//! Chat turns, action results and prompt intents.

use serde::{Deserialize, Serialize};

/// Speaker of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat turn sent to the oracle endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Instructions framing the exchange
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Result of a successfully executed action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Action that produced this result
    pub action: String,
    /// Structured payload (extracted text, tab info, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ActionResult {
    /// Result with no payload
    pub fn empty(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            data: None,
        }
    }

    /// Result carrying structured data
    pub fn with_data(action: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            action: action.into(),
            data: Some(data),
        }
    }
}

/// Task categories an intent can be classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Plain question answering
    General,
    /// Summaries, comparisons, evaluations
    Analysis,
    /// Code generation
    Code,
    /// Image generation or editing advice
    Image,
    /// Translation and polishing
    Translation,
    /// Requires driving the browser
    BrowserUse,
    /// Anything else
    Other,
}

impl TaskType {
    /// Parse a label from the closed vocabulary
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "general" => Some(Self::General),
            "analysis" => Some(Self::Analysis),
            "code" => Some(Self::Code),
            "image" => Some(Self::Image),
            "translation" => Some(Self::Translation),
            "browser_use" => Some(Self::BrowserUse),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::General => write!(f, "general"),
            TaskType::Analysis => write!(f, "analysis"),
            TaskType::Code => write!(f, "code"),
            TaskType::Image => write!(f, "image"),
            TaskType::Translation => write!(f, "translation"),
            TaskType::BrowserUse => write!(f, "browser_use"),
            TaskType::Other => write!(f, "other"),
        }
    }
}

/// Classified intent of a user prompt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Categories, deduplicated, in the order the oracle gave them
    pub task_types: Vec<TaskType>,
}

impl Intent {
    /// Build from raw labels, dropping anything outside the vocabulary
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut task_types = Vec::new();
        for label in labels {
            if let Some(t) = TaskType::parse(label.as_ref()) {
                if !task_types.contains(&t) {
                    task_types.push(t);
                }
            }
        }
        Self { task_types }
    }

    /// Whether the browser must be driven
    pub fn needs_browser(&self) -> bool {
        self.task_types.contains(&TaskType::BrowserUse)
    }
}
