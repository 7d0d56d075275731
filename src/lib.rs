//! # groupwire
//!
//! Packet-group wire protocol and a single-slot shared-memory channel for
//! moving data between a coordinator and its workers.
//!
//! ## Architecture
//!
//! - **Protocol**: 18-byte headers, `metadata + binary` payloads, packets
//!   grouped by id and closed by an end-of-group bit, and an incremental
//!   decoder that reassembles groups from arbitrarily split chunks
//! - **Transport**: one buffer per direction with a signal word and a length
//!   word; whoever holds `DATA_READY` may read, whoever holds `IDLE` may
//!   write. Regions live on the heap (paired workers) or in POSIX shared
//!   memory (separate processes)
//! - **Channel**: receive polling loop plus fair send arbitration between
//!   direct and queued sends
//!
//! ## Example
//!
//! ```ignore
//! use groupwire::protocol::{tags, HybridData, Packet};
//! use groupwire::{transport, Channel};
//!
//! #[tokio::main]
//! async fn main() -> groupwire::Result<()> {
//!     let (coordinator, worker) = transport::paired(64 * 1024, 64 * 1024)?;
//!
//!     let _worker = Channel::builder()
//!         .on_message(|bytes| println!("worker got {} bytes", bytes.len()))
//!         .start(worker)
//!         .await?;
//!
//!     let channel = Channel::builder().start(coordinator).await?;
//!     channel
//!         .send_packets(vec![Packet::new(tags::TEXT, 1, 7, HybridData::from_metadata("{}"))])
//!         .await?;
//!     channel.shutdown().await
//! }
//! ```

#[cfg(not(unix))]
compile_error!("groupwire requires a unix target (POSIX shared memory)");

pub mod control;
pub mod error;
pub mod protocol;
pub mod transport;

mod arbiter;
mod backpressure;
mod channel;

pub use channel::{
    Channel, ChannelBuilder, ChannelConfig, MessageHandler, PacketHandler, DEFAULT_SEND_TIMEOUT,
    DEFAULT_SHUTDOWN_ACK_TIMEOUT,
};
pub use error::{GroupwireError, Result};
