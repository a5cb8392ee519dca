//! Channel naming
//!
//! Channel names are supplied by clients and carry no structure: any
//! non-empty string is a valid channel. `orders`, `user.42`, and `a b/c`
//! are all distinct channels.

use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel name cannot be empty")]
    Empty,
}

/// A validated (non-empty) channel name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel {
    name: String,
}

impl Channel {
    /// Parse and validate a channel name
    pub fn parse(name: &str) -> Result<Self, ChannelError> {
        if name.is_empty() {
            return Err(ChannelError::Empty);
        }

        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Get the channel name as a string slice
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl Borrow<str> for Channel {
    fn borrow(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
