//! Attach descriptor for process links.
//!
//! The creator describes the region it allocated; the acceptor echoes what
//! it found after mapping it. Both travel as one JSON line.
//!
//! # Example
//!
//! ```
//! use groupwire::control::{AttachInfo, PROTOCOL_VERSION};
//!
//! let info = AttachInfo::new("/worker-1", 1024, 2 * 1024 * 1024);
//! let json = info.to_json().unwrap();
//! assert!(json.contains("\"region\":\"/worker-1\""));
//!
//! let parsed = AttachInfo::from_json(&json).unwrap();
//! assert_eq!(parsed.version, PROTOCOL_VERSION);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{GroupwireError, Result};
use crate::transport::CONTROL_BLOCK_SIZE;

/// Protocol version string.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Everything a peer needs to open a process region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachInfo {
    /// Protocol version of the sender.
    pub version: String,
    /// Region name, `/name`.
    pub region: String,
    /// Declared creator->acceptor capacity in bytes.
    pub creator_to_acceptor_capacity: u64,
    /// Declared acceptor->creator capacity in bytes.
    pub acceptor_to_creator_capacity: u64,
    /// Size of the control block preceding the buffers.
    pub control_block_size: u64,
}

impl AttachInfo {
    /// Describe a region with the current protocol version.
    pub fn new(region: impl Into<String>, creator_to_acceptor: u64, acceptor_to_creator: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            region: region.into(),
            creator_to_acceptor_capacity: creator_to_acceptor,
            acceptor_to_creator_capacity: acceptor_to_creator,
            control_block_size: CONTROL_BLOCK_SIZE as u64,
        }
    }

    /// Serialize as a single JSON line (no trailing newline).
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and check the major version.
    pub fn from_json(json: &str) -> Result<Self> {
        let info: AttachInfo = serde_json::from_str(json.trim())?;
        if major(&info.version) != major(PROTOCOL_VERSION) {
            return Err(GroupwireError::Launch(format!(
                "peer speaks protocol {}, expected {}",
                info.version, PROTOCOL_VERSION
            )));
        }
        Ok(info)
    }
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_info_format() {
        let info = AttachInfo::new("/gw", 1024, 4096);
        let parsed: serde_json::Value = serde_json::from_str(&info.to_json().unwrap()).unwrap();

        assert_eq!(parsed["version"], PROTOCOL_VERSION);
        assert_eq!(parsed["region"], "/gw");
        assert_eq!(parsed["creator_to_acceptor_capacity"], 1024);
        assert_eq!(parsed["acceptor_to_creator_capacity"], 4096);
        assert_eq!(parsed["control_block_size"], 128);
    }

    #[test]
    fn test_round_trip_through_json() {
        let info = AttachInfo::new("/gw", 1, 2);
        let parsed = AttachInfo::from_json(&format!("{}\n", info.to_json().unwrap())).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn test_major_version_mismatch_rejected() {
        let mut info = AttachInfo::new("/gw", 1, 2);
        info.version = "9.0.0".to_string();
        let err = AttachInfo::from_json(&info.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, GroupwireError::Launch(_)));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            AttachInfo::from_json("{not json"),
            Err(GroupwireError::Json(_))
        ));
    }
}
