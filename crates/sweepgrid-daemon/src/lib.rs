//! sweepgrid-daemon — a listen-and-spawn-on-command transport.
//!
//! ```text
//! peer ──"s<id>,<cmd>"──▶ SpawnDaemon ──sh -c <cmd>──▶ child (own process group)
//!      ◀──"ack" (on exit) or piped stdio (duplex)
//! peer ──"c"────────────▶ kill every tracked group ──▶ "ack"
//! peer ──anything else──▶ "nack", close
//! ```

pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;

pub use error::{DaemonError, DaemonResult};
pub use protocol::{Reply, Request};
pub use registry::ChildRegistry;
pub use server::{DaemonSettings, SpawnDaemon};
