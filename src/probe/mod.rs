//! Live metadata of monitored database servers
//!
//! The probe runs one fixed read-only query and reports the server's
//! host identity, distribution, and version. Applying the result to an
//! [`InstanceRecord`] only touches the `hostname`, `distro`, and `version`
//! properties.

#[cfg(feature = "mysql")]
pub mod mysql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::instance::{DISTRO_PROPERTY, HOSTNAME_PROPERTY, InstanceRecord, VERSION_PROPERTY};

/// Result of a metadata probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMetadata {
    /// `hostname`, or `hostname.port` when not on the default port
    pub hostname: String,
    /// e.g. `MySQL Community Server (GPL)`
    pub distro: String,
    pub version: String,
}

impl InstanceMetadata {
    /// Write the probed fields into the record's properties
    pub fn apply_to(&self, record: &mut InstanceRecord) {
        record
            .properties
            .insert(HOSTNAME_PROPERTY.to_string(), self.hostname.clone());
        record
            .properties
            .insert(DISTRO_PROPERTY.to_string(), self.distro.clone());
        record
            .properties
            .insert(VERSION_PROPERTY.to_string(), self.version.clone());
    }
}

/// Reads live metadata from the server behind a connection string
#[async_trait]
pub trait MetadataProbe: Send + Sync {
    async fn probe(&self, dsn: &str) -> anyhow::Result<InstanceMetadata>;
}
