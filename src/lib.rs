//! snapstore — dynamic storage allocation for block-level CoW snapshots.
//!
//! When a snapshotted block is about to be overwritten, its original data
//! must land somewhere. This crate is the subsystem that decides where:
//! page-granular staging buffers for the payload, growable descriptor pools
//! mapping CoW chunks to byte ranges on backing storage, and the control
//! channel over which a user-space daemon feeds the engine more storage as
//! the snapshot fills up.
//!
//! Out of scope (external collaborators): bio interception and device I/O,
//! ioctl plumbing, and the aggregation policy above a single snapstore.

pub mod consts;
pub mod errors;

pub mod pagebuf; // src/pagebuf/mod.rs
pub mod descr;   // src/descr/mod.rs
pub mod ctrl;    // src/ctrl/{mod,queue,proto,registry,channel}.rs
pub mod store;   // src/store/{mod,file}.rs

// Convenience re-exports
pub use ctrl::{ChannelRegistry, CtrlChannel, DevId, OutMsg, PollFlags, StorageTarget};
pub use descr::{BlkRange, DescrPool, FileDescr, RangeList};
pub use errors::{Result, SnapError};
pub use pagebuf::PageBuf;
pub use store::{DeviceProvider, MemDevProvider, SnapCtx, Snapstore};
