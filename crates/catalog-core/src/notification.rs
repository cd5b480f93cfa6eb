//! Validation notification collected by entities.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Field-keyed collection of validation messages.
///
/// Entities accumulate errors here instead of failing on the first broken
/// rule, so a caller sees every problem with an input at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Notification {
    errors: BTreeMap<String, Vec<String>>,
}

impl Notification {
    /// Creates an empty notification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a notification holding a single error.
    #[must_use]
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut notification = Self::new();
        notification.add_error(field, message);
        notification
    }

    /// Adds `message` under `field`, ignoring exact duplicates.
    pub fn add_error(&mut self, field: &str, message: impl Into<String>) {
        let message = message.into();
        let messages = self.errors.entry(field.to_owned()).or_default();
        if !messages.contains(&message) {
            messages.push(message);
        }
    }

    /// Replaces every message recorded for `field`.
    pub fn set_errors(&mut self, field: &str, messages: Vec<String>) {
        self.errors.insert(field.to_owned(), messages);
    }

    /// Removes every message recorded for `field`.
    pub fn clear_field(&mut self, field: &str) {
        self.errors.remove(field);
    }

    /// Merges all messages from `other` into this notification.
    pub fn copy_errors(&mut self, other: &Notification) {
        for (field, messages) in &other.errors {
            for message in messages {
                self.add_error(field, message.clone());
            }
        }
    }

    /// Returns `true` if any field has at least one message.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errors.values().any(|messages| !messages.is_empty())
    }

    /// Messages recorded for `field`.
    #[must_use]
    pub fn messages_for(&self, field: &str) -> &[String] {
        self.errors.get(field).map_or(&[], Vec::as_slice)
    }

    /// All recorded messages keyed by field.
    #[must_use]
    pub fn errors(&self) -> &BTreeMap<String, Vec<String>> {
        &self.errors
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.errors {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}
