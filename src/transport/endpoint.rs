//! One side of a region: an outgoing slot and an incoming slot.

use std::sync::Arc;

use super::slot::Slot;

/// Which side of which region flavor an endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Either side of an in-process pair.
    Paired,
    /// The side that created a process region. Sends the shutdown command
    /// on teardown and removes the region name.
    Creator,
    /// The side that attached to an existing process region.
    Acceptor,
}

/// Outgoing and incoming slot of one side.
#[derive(Debug, Clone)]
pub struct Endpoint {
    tx: Arc<Slot>,
    rx: Arc<Slot>,
    role: Role,
}

impl Endpoint {
    pub(crate) fn new(tx: Slot, rx: Slot, role: Role) -> Self {
        Self {
            tx: Arc::new(tx),
            rx: Arc::new(rx),
            role,
        }
    }

    /// Slot this side writes to.
    #[inline]
    pub fn tx(&self) -> &Arc<Slot> {
        &self.tx
    }

    /// Slot this side reads from.
    #[inline]
    pub fn rx(&self) -> &Arc<Slot> {
        &self.rx
    }

    /// Side and flavor.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Largest message this side can send.
    #[inline]
    pub fn send_capacity(&self) -> usize {
        self.tx.capacity()
    }

    /// Largest message this side can receive.
    #[inline]
    pub fn receive_capacity(&self) -> usize {
        self.rx.capacity()
    }
}
