use std::fmt;

use anyhow::anyhow;

use crate::i18n::{self, Message, MessageArg};

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Store,
    NotFound,
    Unauthorized,
    InvalidTransition,
    InvariantViolation,
    Validation,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetails {
    /// The membership state machine refused an event in `current`.
    InvalidTransition { event: String, current: String },
    /// A census row failed validation.
    CensusLine { line: usize },
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    /// Message key; doubles as the untranslated English text.
    pub public: &'static str,
    pub args: Vec<MessageArg>,
    pub details: Option<ErrorDetails>,
    pub source: anyhow::Error,
}

impl LibError {
    fn new(
        kind: ErrorKind,
        code: &'static str,
        public: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind,
            code,
            public,
            args: Vec::new(),
            details: None,
            source,
        }
    }

    pub fn store(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Store, "store_error", public, source)
    }

    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::NotFound, "not_found", public, source)
    }

    pub fn unauthorized(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Unauthorized, "unauthorized", public, source)
    }

    pub fn invalid_transition(
        public: &'static str,
        event: &str,
        current: &str,
        source: anyhow::Error,
    ) -> Self {
        let mut err = Self::new(
            ErrorKind::InvalidTransition,
            "membership_invalid_transition",
            public,
            source,
        );
        err.args.push(MessageArg::Text(current.to_string()));
        err.details = Some(ErrorDetails::InvalidTransition {
            event: event.to_string(),
            current: current.to_string(),
        });
        err
    }

    pub fn invariant(code: &'static str, public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::InvariantViolation, code, public, source)
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Validation, "invalid_input", public, source)
    }

    pub fn invalid_line(public: &'static str, line: usize, source: anyhow::Error) -> Self {
        let mut err = Self::new(ErrorKind::Validation, "census_invalid_row", public, source);
        err.args.push(MessageArg::Number(line as i64));
        err.details = Some(ErrorDetails::CensusLine { line });
        err
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Unknown, "unknown_error", public, source)
    }

    pub fn message(public: &'static str) -> Self {
        Self::unknown(public, anyhow!(public))
    }

    pub fn with_arg(mut self, arg: impl Into<MessageArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Wraps `self` under an outer message key, keeping kind, code and details.
    /// The inner message becomes the outer message's last argument.
    pub fn context(self, public: &'static str) -> Self {
        let inner = self.to_message();
        Self {
            kind: self.kind,
            code: self.code,
            public,
            args: vec![MessageArg::Message(inner)],
            details: self.details,
            source: self.source.context(public),
        }
    }

    pub fn to_message(&self) -> Message {
        Message {
            key: self.public.to_string(),
            args: self.args.clone(),
        }
    }

    pub fn line(&self) -> Option<usize> {
        match &self.details {
            Some(ErrorDetails::CensusLine { line }) => Some(*line),
            _ => None,
        }
    }
}

impl fmt::Display for LibError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&i18n::render(&self.to_message(), None))
    }
}

impl std::error::Error for LibError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for LibError {
    fn from(value: sqlx::Error) -> Self {
        Self::store("Database request failed", anyhow!(value))
    }
}

impl From<serde_json::Error> for LibError {
    fn from(value: serde_json::Error) -> Self {
        Self::store("document serialization failed", anyhow!(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_current_state() {
        let err = LibError::invalid_transition(
            "cannot approve: current status is %s",
            "approve",
            "inactive",
            anyhow!("guard rejected"),
        );
        assert_eq!(err.kind, ErrorKind::InvalidTransition);
        assert_eq!(err.to_string(), "cannot approve: current status is inactive");
        assert_eq!(
            err.details,
            Some(ErrorDetails::InvalidTransition {
                event: "approve".to_string(),
                current: "inactive".to_string(),
            })
        );
    }

    #[test]
    fn context_nests_inner_message() {
        let err = LibError::invalid_line("line %d: blank row found", 3, anyhow!("blank"))
            .context("could not store census: %w");
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.line(), Some(3));
        assert_eq!(
            err.to_string(),
            "could not store census: line 3: blank row found"
        );
    }
}
