//! In-process pair of endpoints over one heap region.
//!
//! ```text
//! offset  0  signal A->B   (i32)
//!         4  length A->B   (u32)
//!         8  signal B->A   (i32)
//!        12  length B->A   (u32)
//!        16  buffer A->B   (cap_ab bytes)
//!  16+cap_ab buffer B->A   (cap_ba bytes)
//! ```

use std::sync::Arc;

use super::endpoint::{Endpoint, Role};
use super::region::{HeapRegion, RegionMemory};
use super::slot::{LengthField, Slot, SlotLayout};
use crate::error::{GroupwireError, Result};

/// Size of the paired control block.
pub const PAIRED_CONTROL_SIZE: usize = 16;

/// Create two connected endpoints.
///
/// The first endpoint sends on A->B and receives on B->A; the second the
/// other way round. Capacities must fit a 32-bit length word.
///
/// # Example
///
/// ```
/// use groupwire::transport::{paired, Incoming};
///
/// let (a, b) = paired(64, 64).unwrap();
/// a.tx().publish(b"ping").unwrap();
/// assert!(matches!(b.rx().take(), Incoming::Message(m) if &m[..] == b"ping"));
/// ```
pub fn paired(capacity_ab: usize, capacity_ba: usize) -> Result<(Endpoint, Endpoint)> {
    if capacity_ab == 0 || capacity_ba == 0 {
        return Err(GroupwireError::InvalidLayout(
            "slot capacity must be non-zero".to_string(),
        ));
    }
    let total = PAIRED_CONTROL_SIZE
        .checked_add(capacity_ab)
        .and_then(|n| n.checked_add(capacity_ba))
        .ok_or_else(|| GroupwireError::InvalidLayout("region size overflows".to_string()))?;

    let region: Arc<dyn RegionMemory> = Arc::new(HeapRegion::new(total)?);

    let ab = SlotLayout {
        signal_offset: 0,
        length: LengthField::U32(4),
        data_offset: PAIRED_CONTROL_SIZE,
        capacity: capacity_ab,
    };
    let ba = SlotLayout {
        signal_offset: 8,
        length: LengthField::U32(12),
        data_offset: PAIRED_CONTROL_SIZE + capacity_ab,
        capacity: capacity_ba,
    };

    let a = Endpoint::new(
        Slot::new(region.clone(), ab)?,
        Slot::new(region.clone(), ba)?,
        Role::Paired,
    );
    let b = Endpoint::new(Slot::new(region.clone(), ba)?, Slot::new(region, ab)?, Role::Paired);

    tracing::debug!(capacity_ab, capacity_ba, "Created paired region");
    Ok((a, b))
}
