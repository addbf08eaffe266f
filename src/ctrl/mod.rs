//! ctrl — the per-snapstore control channel.
//!
//! Layout:
//! - `queue`    — bounded outbound FIFO with a blocking, interruptible reader.
//! - `proto`    — wire format: cursor, device ids, encoders, outbound decode.
//! - `registry` — process-wide list of live channels (owned by `SnapCtx`).
//! - `channel`  — the duplex endpoint: inbound dispatch + outbound catalog.

pub mod channel;
pub mod proto;
pub mod queue;
pub mod registry;

pub use channel::CtrlChannel;
pub use proto::{encode_initiate, encode_next_portion, encode_next_portion_multidev};
pub use proto::{Cursor, DevId, OutMsg, StorageTarget};
pub use queue::{CmdQueue, PollFlags};
pub use registry::ChannelRegistry;
