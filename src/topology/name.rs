//! Queue, topic and subscription name grammar.

use crate::messaging::{MessagingError, MessagingResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Grammar shared by queues, topics and subscriptions (ASCII, case-insensitive)
pub const ENTITY_NAME_PATTERN: &str = r"^[a-z0-9._/-]{1,260}$";

// Unicode mode off so `[a-z]` does not fold to the Kelvin sign or long s
static NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("(?i-u){}", ENTITY_NAME_PATTERN)).expect("entity name pattern is valid")
});

/// A validated broker entity name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntityName(String);

impl EntityName {
    /// Validate `name` against [`ENTITY_NAME_PATTERN`]
    pub fn parse(name: &str) -> MessagingResult<Self> {
        if name.trim().is_empty() {
            return Err(MessagingError::Validation(
                "entity name must not be blank".to_string(),
            ));
        }

        if !NAME_REGEX.is_match(name) {
            return Err(MessagingError::Validation(format!(
                "entity name '{}' must match {} (case-insensitive)",
                name, ENTITY_NAME_PATTERN
            )));
        }

        Ok(Self(name.to_string()))
    }

    /// Get the name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate a name without keeping the parsed value
pub fn validate_entity_name(name: &str) -> MessagingResult<()> {
    EntityName::parse(name).map(|_| ())
}
