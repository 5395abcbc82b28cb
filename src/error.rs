//! Client Error Handling
//!
//! Transport failures never become errors: the connection manager reports
//! them as status changes and reconnects. Everything else falls into one of
//! three categories, and only command faults travel back to the presentation
//! layer.

use std::fmt;

/// Categorized error types for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed topics, unknown resource types, undecodable payloads
    Protocol,

    /// Non-success answer to a REST command (shown to the user)
    Command,

    /// Caller misuse such as duplicate registrations
    Invariant,
}

impl ErrorCategory {
    /// Check if this error category should be displayed to the user
    pub fn is_user_visible(&self) -> bool {
        matches!(self, ErrorCategory::Command)
    }
}

/// Errors produced by the client library
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// A collection topic without a collection segment
    MalformedTopic { topic: String },

    /// A type/reference tag no family variant handles
    UnknownType { family: &'static str, tag: String },

    /// A payload that could not be decoded into the expected shape
    InvalidPayload { context: String, reason: String },

    /// A REST command answered with an unexpected status or failed to complete
    Command { title: String, message: String },

    /// A subscriber key that is already registered
    DuplicateSubscriber { name: String },
}

impl ClientError {
    pub fn command(title: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::Command {
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn invalid_payload(context: impl Into<String>, reason: impl fmt::Display) -> Self {
        ClientError::InvalidPayload {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Give a command fault the title of the operation that raised it
    pub fn retitle(self, title: &str) -> Self {
        match self {
            ClientError::Command { message, .. } => ClientError::command(title, message),
            other => other,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::MalformedTopic { .. }
            | ClientError::UnknownType { .. }
            | ClientError::InvalidPayload { .. } => ErrorCategory::Protocol,
            ClientError::Command { .. } => ErrorCategory::Command,
            ClientError::DuplicateSubscriber { .. } => ErrorCategory::Invariant,
        }
    }

    /// Title and message for display, only for user-visible errors
    pub fn user_error(&self) -> Option<UserError> {
        match self {
            ClientError::Command { title, message } => Some(UserError {
                title: format!("{} error!", title),
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::MalformedTopic { topic } => {
                write!(f, "invalid collection event '{}'", topic)
            }
            ClientError::UnknownType { family, tag } => {
                write!(f, "unknown {} ref '{}'", family, tag)
            }
            ClientError::InvalidPayload { context, reason } => {
                write!(f, "invalid {} payload: {}", context, reason)
            }
            ClientError::Command { title, message } => write!(f, "{}: {}", title, message),
            ClientError::DuplicateSubscriber { name } => {
                write!(f, "already existing observer '{}'", name)
            }
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::command("Request", err.to_string())
    }
}

/// A command fault ready for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserError {
    pub title: String,
    pub message: String,
}

impl UserError {
    /// Render the error as a two-line terminal message
    pub fn display(&self) -> String {
        format!("❌ {}\n   {}", self.title, self.message)
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Categorize an arbitrary error bubbling up through `anyhow`
pub fn categorize_error(error: &anyhow::Error) -> ErrorCategory {
    if let Some(client) = error.downcast_ref::<ClientError>() {
        return client.category();
    }

    if error.downcast_ref::<serde_json::Error>().is_some() {
        ErrorCategory::Protocol
    } else {
        ErrorCategory::Command
    }
}

/// The title and message to show for an error, when it is a command fault
pub fn user_message(error: &anyhow::Error) -> Option<UserError> {
    if !categorize_error(error).is_user_visible() {
        return None;
    }
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ClientError>())
        .and_then(ClientError::user_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        let topic = ClientError::MalformedTopic {
            topic: "collection".into(),
        };
        assert_eq!(topic.category(), ErrorCategory::Protocol);

        let cmd = ClientError::command("Add import", "500");
        assert_eq!(cmd.category(), ErrorCategory::Command);

        let dup = ClientError::DuplicateSubscriber { name: "x".into() };
        assert_eq!(dup.category(), ErrorCategory::Invariant);
    }

    #[test]
    fn test_only_commands_reach_the_user() {
        let cmd = ClientError::command("Delete import", "server answered 500");
        let shown = cmd.user_error().unwrap();
        assert_eq!(shown.title, "Delete import error!");
        assert_eq!(shown.message, "server answered 500");

        let unknown = ClientError::UnknownType {
            family: "imports",
            tag: "ftp".into(),
        };
        assert!(unknown.user_error().is_none());
        assert!(!unknown.category().is_user_visible());
    }

    #[test]
    fn test_categorize_anyhow() {
        let err = anyhow::Error::new(ClientError::DuplicateSubscriber { name: "cli".into() });
        assert_eq!(categorize_error(&err), ErrorCategory::Invariant);

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(categorize_error(&anyhow::Error::new(json)), ErrorCategory::Protocol);
    }

    #[test]
    fn test_user_message_only_for_command_faults() {
        let cmd = anyhow::Error::new(ClientError::command("Add import", "server answered 500"));
        let shown = user_message(&cmd).unwrap();
        assert_eq!(shown.title, "Add import error!");

        let dup = anyhow::Error::new(ClientError::DuplicateSubscriber { name: "cli".into() });
        assert!(user_message(&dup).is_none());

        let plain = anyhow::anyhow!("config file missing");
        assert!(user_message(&plain).is_none());
    }
}
