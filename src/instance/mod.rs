//! Instance records and the durable instance catalog
//!
//! An instance is anything the agent monitors: a MySQL server, the host OS, ...
//! Each one is identified by a 32 character hexadecimal UUID that is assigned
//! by the control-plane and never changes afterwards.
//!
//! ## Record layout
//!
//! ```text
//! {
//!   "UUID": "e4b65f107a4caca10e72ac1f1b23e4aa",
//!   "Type": "MySQL",
//!   "Prefix": "mysql",
//!   "Properties": { "dsn": "...", "hostname": "...", "distro": "...", "version": "..." }
//! }
//! ```
//!
//! `Properties` is a sorted map so that encoding semantically equal records
//! always produces the same bytes.

pub mod store;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use store::InstanceStore;

/// `Type` of a MySQL instance
pub const MYSQL_TYPE: &str = "MySQL";
/// `Prefix` of a MySQL instance
pub const MYSQL_PREFIX: &str = "mysql";
/// `Type` of the host operating system instance
pub const OS_TYPE: &str = "OS";
/// `Prefix` of the host operating system instance
pub const OS_PREFIX: &str = "os";

/// Property holding the connection string of a database instance
pub const DSN_PROPERTY: &str = "dsn";
pub const HOSTNAME_PROPERTY: &str = "hostname";
pub const DISTRO_PROPERTY: &str = "distro";
pub const VERSION_PROPERTY: &str = "version";

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[[:xdigit:]]{32}$").expect("static regex"));

/// Check that an instance id is exactly 32 hexadecimal characters
pub fn valid_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

/// A monitored instance as stored on disk and exchanged with the control-plane
///
/// Missing fields decode as empty, so a command payload may carry just the `UUID`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstanceRecord {
    #[serde(rename = "UUID")]
    pub uuid: String,

    /// Instance kind (`MySQL`, `OS`, ...)
    #[serde(rename = "Type")]
    pub kind: String,

    pub prefix: String,

    /// Connection identity and probed metadata
    pub properties: BTreeMap<String, String>,
}

impl InstanceRecord {
    /// Create a MySQL instance record for the given connection string
    pub fn mysql(uuid: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            kind: MYSQL_TYPE.to_string(),
            prefix: MYSQL_PREFIX.to_string(),
            properties: BTreeMap::from([(DSN_PROPERTY.to_string(), dsn.into())]),
        }
    }

    /// Create a host OS instance record
    pub fn os(uuid: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            kind: OS_TYPE.to_string(),
            prefix: OS_PREFIX.to_string(),
            properties: BTreeMap::from([(HOSTNAME_PROPERTY.to_string(), hostname.into())]),
        }
    }

    pub fn is_database(&self) -> bool {
        self.kind == MYSQL_TYPE && self.prefix == MYSQL_PREFIX
    }

    pub fn is_os(&self) -> bool {
        self.kind == OS_TYPE && self.prefix == OS_PREFIX
    }

    /// Connection string, if set and non-empty
    pub fn dsn(&self) -> Option<&str> {
        self.properties
            .get(DSN_PROPERTY)
            .map(String::as_str)
            .filter(|dsn| !dsn.is_empty())
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}
