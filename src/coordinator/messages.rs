//! Command and reply envelopes
//!
//! The transport treats payloads as opaque bytes; only the coordinator knows
//! that `Add`, `Remove`, and `GetInfo` carry a JSON-encoded instance record.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::InstanceError;

/// Commands understood by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Add,
    Remove,
    GetInfo,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Add => "Add",
            CommandKind::Remove => "Remove",
            CommandKind::GetInfo => "GetInfo",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CommandKind {
    type Err = InstanceError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "Add" => Ok(CommandKind::Add),
            "Remove" => Ok(CommandKind::Remove),
            "GetInfo" => Ok(CommandKind::GetInfo),
            other => Err(InstanceError::UnknownCommand(other.to_string())),
        }
    }
}

/// Request envelope: a command name and an opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub cmd: String,
    pub data: Vec<u8>,
}

impl Command {
    pub fn new(cmd: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            cmd: cmd.into(),
            data,
        }
    }

    /// Build a command whose payload is the JSON encoding of `payload`
    pub fn with_json<T: Serialize>(kind: CommandKind, payload: &T) -> serde_json::Result<Self> {
        Ok(Self::new(kind.name(), serde_json::to_vec(payload)?))
    }

    /// Success reply, optionally carrying a payload
    pub fn reply(&self, data: Option<Vec<u8>>) -> Reply {
        Reply {
            cmd: self.cmd.clone(),
            data,
            error: None,
        }
    }

    /// Failure reply carrying the error's message
    pub fn reply_error(&self, error: impl fmt::Display) -> Reply {
        Reply {
            cmd: self.cmd.clone(),
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// Response envelope: a payload, an error, or neither
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Name of the command this replies to
    pub cmd: String,
    pub data: Option<Vec<u8>>,
    pub error: Option<String>,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Decode the JSON payload, if any
    pub fn decode<T: DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
        self.data.as_deref().map(serde_json::from_slice)
    }
}
