//! Control plane - attach descriptor, peer launch, and stdio lines.
//!
//! Process links need a little out-of-band coordination before the region
//! carries traffic.
//!
//! # Workflow
//!
//! 1. Creator allocates and initializes the region
//! 2. Creator builds an [`AttachInfo`] and hands it to a [`PeerLauncher`]
//! 3. Peer opens the region by name
//! 4. Peer announces itself with one JSON line on stdout (optional)
//! 5. Binary traffic flows through the slots

mod attach;
mod launch;
mod stdio;

pub use attach::{AttachInfo, PROTOCOL_VERSION};
pub use launch::{CommandLauncher, PeerLauncher};
pub use stdio::{read_json_line, write_line, write_stdout_json, write_stdout_line};
