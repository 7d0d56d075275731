//! Cross-process region over POSIX shared memory.
//!
//! ```text
//! offset   0  command  creator->acceptor   (i32)
//!          8  length   creator->acceptor   (u64)
//!         16  status   acceptor->creator   (i32)
//!         24  length   acceptor->creator   (u64)
//!         32  capacity creator->acceptor   (u64)
//!         40  capacity acceptor->creator   (u64)
//!         48  zero padding
//!        128  buffer   creator->acceptor
//!   128 + c2a buffer   acceptor->creator
//! ```
//!
//! The creator sizes and zeroes the region, declares both capacities, then
//! launches the peer. The acceptor maps the control block alone, reads the
//! capacities, and maps the whole region.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::endpoint::{Endpoint, Role};
use super::region::{atomic_u64_at, RegionMemory};
use super::shm::ShmSegment;
use super::slot::{LengthField, Slot, SlotLayout};
use crate::control::{AttachInfo, PeerLauncher};
use crate::error::{GroupwireError, Result};

/// Size of the control block preceding the buffers.
pub const CONTROL_BLOCK_SIZE: usize = 128;

/// Default creator->acceptor capacity (1 KiB).
pub const DEFAULT_CREATOR_TO_ACCEPTOR_CAPACITY: usize = 1024;

/// Default acceptor->creator capacity (2 MiB).
pub const DEFAULT_ACCEPTOR_TO_CREATOR_CAPACITY: usize = 2 * 1024 * 1024;

/// Largest capacity an acceptor accepts from a control block (1 GiB).
pub const MAX_DECLARED_CAPACITY: u64 = 1 << 30;

const COMMAND_OFFSET: usize = 0;
const COMMAND_LEN_OFFSET: usize = 8;
const STATUS_OFFSET: usize = 16;
const STATUS_LEN_OFFSET: usize = 24;
const C2A_CAPACITY_OFFSET: usize = 32;
const A2C_CAPACITY_OFFSET: usize = 40;

/// Settings for creating a process link.
///
/// Loadable from JSON; missing fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessLinkConfig {
    /// Region name, `/name`.
    pub region: String,
    /// Creator->acceptor buffer size.
    pub creator_to_acceptor_capacity: usize,
    /// Acceptor->creator buffer size.
    pub acceptor_to_creator_capacity: usize,
}

impl Default for ProcessLinkConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            creator_to_acceptor_capacity: DEFAULT_CREATOR_TO_ACCEPTOR_CAPACITY,
            acceptor_to_creator_capacity: DEFAULT_ACCEPTOR_TO_CREATOR_CAPACITY,
        }
    }
}

impl ProcessLinkConfig {
    /// Default capacities for the given region name.
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Self::default()
        }
    }

    /// Set the creator->acceptor capacity.
    pub fn creator_to_acceptor_capacity(mut self, capacity: usize) -> Self {
        self.creator_to_acceptor_capacity = capacity;
        self
    }

    /// Set the acceptor->creator capacity.
    pub fn acceptor_to_creator_capacity(mut self, capacity: usize) -> Self {
        self.acceptor_to_creator_capacity = capacity;
        self
    }

    /// Parse from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Attach descriptor for this configuration.
    pub fn attach_info(&self) -> AttachInfo {
        AttachInfo::new(
            self.region.clone(),
            self.creator_to_acceptor_capacity as u64,
            self.acceptor_to_creator_capacity as u64,
        )
    }
}

/// Buffer sizes of a process region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcessLayout {
    c2a: usize,
    a2c: usize,
}

impl ProcessLayout {
    fn new(c2a: u64, a2c: u64) -> Result<Self> {
        for (name, cap) in [("creator->acceptor", c2a), ("acceptor->creator", a2c)] {
            if cap == 0 || cap > MAX_DECLARED_CAPACITY {
                return Err(GroupwireError::InvalidLayout(format!(
                    "{} capacity {} outside 1..={}",
                    name, cap, MAX_DECLARED_CAPACITY
                )));
            }
        }
        Ok(Self {
            c2a: c2a as usize,
            a2c: a2c as usize,
        })
    }

    fn total_size(&self) -> usize {
        CONTROL_BLOCK_SIZE + self.c2a + self.a2c
    }

    fn creator_to_acceptor(&self) -> SlotLayout {
        SlotLayout {
            signal_offset: COMMAND_OFFSET,
            length: LengthField::U64(COMMAND_LEN_OFFSET),
            data_offset: CONTROL_BLOCK_SIZE,
            capacity: self.c2a,
        }
    }

    fn acceptor_to_creator(&self) -> SlotLayout {
        SlotLayout {
            signal_offset: STATUS_OFFSET,
            length: LengthField::U64(STATUS_LEN_OFFSET),
            data_offset: CONTROL_BLOCK_SIZE + self.c2a,
            capacity: self.a2c,
        }
    }
}

/// Create a region, declare its capacities, and launch the peer.
///
/// Any stale region with the same name is removed first. If the launcher
/// fails the region is released again and the error is returned.
pub fn create_process_link<L>(config: &ProcessLinkConfig, launcher: &mut L) -> Result<Endpoint>
where
    L: PeerLauncher + ?Sized,
{
    let layout = ProcessLayout::new(
        config.creator_to_acceptor_capacity as u64,
        config.acceptor_to_creator_capacity as u64,
    )?;

    let segment = ShmSegment::create(&config.region, layout.total_size())?;
    atomic_u64_at(&segment, C2A_CAPACITY_OFFSET)?.store(layout.c2a as u64, Ordering::Release);
    atomic_u64_at(&segment, A2C_CAPACITY_OFFSET)?.store(layout.a2c as u64, Ordering::Release);

    let region: Arc<dyn RegionMemory> = Arc::new(segment);
    let endpoint = Endpoint::new(
        Slot::new(region.clone(), layout.creator_to_acceptor())?,
        Slot::new(region, layout.acceptor_to_creator())?,
        Role::Creator,
    );

    tracing::debug!(
        region = %config.region,
        creator_to_acceptor = layout.c2a,
        acceptor_to_creator = layout.a2c,
        "Created process region"
    );

    launcher.launch(&config.attach_info())?;
    Ok(endpoint)
}

/// Open a region created by the other side.
pub fn open_process_link(region_name: &str) -> Result<Endpoint> {
    let (endpoint, _) = open_with_info(region_name)?;
    Ok(endpoint)
}

/// Open a region and report the layout that was found.
pub fn open_with_info(region_name: &str) -> Result<(Endpoint, AttachInfo)> {
    let (c2a, a2c) = {
        let control = ShmSegment::open(region_name, CONTROL_BLOCK_SIZE)?;
        (
            atomic_u64_at(&control, C2A_CAPACITY_OFFSET)?.load(Ordering::Acquire),
            atomic_u64_at(&control, A2C_CAPACITY_OFFSET)?.load(Ordering::Acquire),
        )
    };
    let layout = ProcessLayout::new(c2a, a2c)?;

    let region: Arc<dyn RegionMemory> =
        Arc::new(ShmSegment::open(region_name, layout.total_size())?);
    let endpoint = Endpoint::new(
        Slot::new(region.clone(), layout.acceptor_to_creator())?,
        Slot::new(region, layout.creator_to_acceptor())?,
        Role::Acceptor,
    );

    tracing::debug!(
        region = region_name,
        creator_to_acceptor = c2a,
        acceptor_to_creator = a2c,
        "Opened process region"
    );
    Ok((endpoint, AttachInfo::new(region_name, c2a, a2c)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Incoming, SlotState};

    fn unique_name() -> String {
        use std::sync::atomic::AtomicUsize;
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        format!(
            "/gw-proc-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn no_launch(_: &AttachInfo) -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_layout_offsets() {
        let layout = ProcessLayout::new(1024, 4096).unwrap();
        assert_eq!(layout.total_size(), 128 + 1024 + 4096);
        assert_eq!(layout.creator_to_acceptor().data_offset, 128);
        assert_eq!(layout.acceptor_to_creator().data_offset, 128 + 1024);
    }

    #[test]
    fn test_layout_rejects_bad_capacity() {
        assert!(ProcessLayout::new(0, 10).is_err());
        assert!(ProcessLayout::new(10, MAX_DECLARED_CAPACITY + 1).is_err());
    }

    #[test]
    fn test_creator_and_acceptor_talk() {
        let config = ProcessLinkConfig::new(unique_name())
            .creator_to_acceptor_capacity(64)
            .acceptor_to_creator_capacity(256);

        let mut launched = None;
        let creator = create_process_link(&config, &mut |info: &AttachInfo| -> Result<()> {
            launched = Some(info.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(launched.unwrap().acceptor_to_creator_capacity, 256);

        let (acceptor, info) = open_with_info(&config.region).unwrap();
        assert_eq!(info.creator_to_acceptor_capacity, 64);
        assert_eq!(acceptor.send_capacity(), 256);
        assert_eq!(acceptor.receive_capacity(), 64);

        creator.tx().publish(b"command").unwrap();
        assert!(matches!(acceptor.rx().take(), Incoming::Message(m) if &m[..] == b"command"));
        acceptor.rx().release();
        assert_eq!(creator.tx().state(), SlotState::Idle);

        acceptor.tx().publish(&[7u8; 200]).unwrap();
        assert!(matches!(creator.rx().take(), Incoming::Message(m) if m.len() == 200));
    }

    #[test]
    fn test_failed_launch_releases_region() {
        let config = ProcessLinkConfig::new(unique_name());
        let result = create_process_link(&config, &mut |_: &AttachInfo| -> Result<()> {
            Err(GroupwireError::Launch("no peer".to_string()))
        });
        assert!(matches!(result, Err(GroupwireError::Launch(_))));
        assert!(open_process_link(&config.region).is_err());
    }

    #[test]
    fn test_open_rejects_capacities_beyond_region() {
        let name = unique_name();
        let control = ShmSegment::create(&name, CONTROL_BLOCK_SIZE).unwrap();
        atomic_u64_at(&control, C2A_CAPACITY_OFFSET)
            .unwrap()
            .store(1 << 20, Ordering::Release);
        atomic_u64_at(&control, A2C_CAPACITY_OFFSET)
            .unwrap()
            .store(1 << 20, Ordering::Release);

        assert!(matches!(
            open_process_link(&name),
            Err(GroupwireError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let config = ProcessLinkConfig::new("no-slash");
        let result = create_process_link(&config, &mut no_launch);
        assert!(matches!(result, Err(GroupwireError::InvalidRegionName(_))));
    }

    #[test]
    fn test_config_from_json() {
        let config =
            ProcessLinkConfig::from_json_str(r#"{"region": "/w", "creator_to_acceptor_capacity": 4096}"#)
                .unwrap();
        assert_eq!(config.region, "/w");
        assert_eq!(config.creator_to_acceptor_capacity, 4096);
        assert_eq!(
            config.acceptor_to_creator_capacity,
            DEFAULT_ACCEPTOR_TO_CREATOR_CAPACITY
        );
    }
}
