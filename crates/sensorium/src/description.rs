//! Node descriptions: what a factory can produce

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::NodeType;

/// Four-part module version. Ordering is lexicographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub maintenance: u16,
    pub build: u32,
}

impl Version {
    pub const fn new(major: u8, minor: u8, maintenance: u16, build: u32) -> Self {
        Self {
            major,
            minor,
            maintenance,
            build,
        }
    }

    /// Version of this library, used by built-in nodes
    pub fn library() -> Self {
        let part = |s: &str| s.parse::<u32>().unwrap_or(0);
        Self::new(
            part(env!("CARGO_PKG_VERSION_MAJOR")).min(u8::MAX as u32) as u8,
            part(env!("CARGO_PKG_VERSION_MINOR")).min(u8::MAX as u32) as u8,
            part(env!("CARGO_PKG_VERSION_PATCH")).min(u16::MAX as u32) as u16,
            0,
        )
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.maintenance, self.build
        )
    }
}

/// Identifies a producible kind of node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductionNodeDescription {
    pub node_type: NodeType,
    pub vendor: String,
    pub name: String,
    pub version: Version,
}

impl ProductionNodeDescription {
    pub fn new(
        node_type: NodeType,
        vendor: impl Into<String>,
        name: impl Into<String>,
        version: Version,
    ) -> Self {
        Self {
            node_type,
            vendor: vendor.into(),
            name: name.into(),
            version,
        }
    }

    /// `"Vendor/Name"`, the form used by module filters
    pub fn module_key(&self) -> String {
        format!("{}/{}", self.vendor, self.name)
    }
}

impl fmt::Display for ProductionNodeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{}/{}",
            self.node_type, self.vendor, self.name, self.version
        )
    }
}
