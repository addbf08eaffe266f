//! descr — block descriptor pool for CoW chunks.
//!
//! A descriptor maps one CoW chunk to the place its preserved data lives on
//! the backing store. The file variant carries a rangelist: an ordered list
//! of sector ranges on a single backing file/device.
//!
//! Pool contracts:
//! - indices are dense and stable: a descriptor keeps its index for the
//!   lifetime of the pool, and the pool never shrinks while in use;
//! - growth is chunked (`POOL_CHUNK` slots at a time) so `add_file` stays
//!   O(1) amortized on the CoW write path;
//! - the pool holds exactly one descriptor variant at a time; the variant
//!   tag lives on the pool, not on each slot;
//! - the pool is not internally synchronized; callers serialize mutation
//!   (here: confined behind the per-snapstore lock).

use log::error;

use crate::consts::POOL_CHUNK;
use crate::errors::{Result, SnapError};

/// A run of sectors on backing storage: `cnt` sectors starting at `ofs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlkRange {
    pub ofs: u64,
    pub cnt: u64,
}

/// Insertion-ordered list of ranges describing one chunk's storage.
pub type RangeList = Vec<BlkRange>;

/// File-variant descriptor. Owns its rangelist: construction consumes the
/// caller's list (the transplant the original did by splicing list heads),
/// and no other descriptor ever shares it.
#[derive(Debug)]
pub struct FileDescr {
    ranges: RangeList,
}

impl FileDescr {
    fn new(ranges: RangeList) -> Self {
        FileDescr { ranges }
    }

    pub fn ranges(&self) -> &[BlkRange] {
        &self.ranges
    }

    /// Total sectors covered by this descriptor.
    pub fn sector_count(&self) -> u64 {
        self.ranges.iter().map(|r| r.cnt).sum()
    }
}

/// Variant-tagged descriptor storage; one pool holds one variant.
#[derive(Debug)]
pub enum PoolSlots {
    File(Vec<FileDescr>),
}

#[derive(Debug)]
pub struct DescrPool {
    slots: PoolSlots,
}

impl DescrPool {
    /// Empty zero-capacity pool for the file-descriptor variant.
    pub fn new_file() -> Self {
        DescrPool {
            slots: PoolSlots::File(Vec::new()),
        }
    }

    /// Allocate one new descriptor slot and transplant `ranges` into it.
    /// Returns the new descriptor's index. On allocation failure the pool
    /// is left untouched and the rangelist is dropped with the error.
    pub fn add_file(&mut self, ranges: RangeList) -> Result<usize> {
        let PoolSlots::File(descrs) = &mut self.slots;
        if descrs.len() == descrs.capacity() && descrs.try_reserve_exact(POOL_CHUNK).is_err() {
            error!("failed to allocate block descriptor: pool grow failed");
            return Err(SnapError::NoMemory);
        }
        let index = descrs.len();
        descrs.push(FileDescr::new(ranges));
        Ok(index)
    }

    /// Borrow the variant-tagged storage for enumeration (chunk lookup on
    /// the read path). Never allocates.
    pub fn take(&self) -> &PoolSlots {
        &self.slots
    }

    /// Live descriptor count.
    pub fn len(&self) -> usize {
        let PoolSlots::File(descrs) = &self.slots;
        descrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear down every live descriptor (its rangelist with it) and release
    /// the pool's backing storage. Safe on an empty or already-done pool.
    pub fn done(&mut self) {
        let PoolSlots::File(descrs) = &mut self.slots;
        *descrs = Vec::new();
    }
}
