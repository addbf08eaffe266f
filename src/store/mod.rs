//! store — the snapstore engine: identity, backing storage and growth.
//!
//! A `Snapstore` owns the preserved CoW data of one snapshot: a UUID, a
//! resolved backing target (in-memory, one file device, or a multi-device
//! set), the descriptor pool(s) recording where chunks live, and sector-unit
//! fill accounting. When a stretch channel is attached, crossing the
//! low-space threshold emits HALFFILL and exhaustion emits OVERFLOW, so the
//! user-space daemon can supply more ranges through the control channel.
//!
//! `SnapCtx` is the explicit process-wide context: it owns the channel
//! registry and the UUID -> snapstore table. Teardown order: stores first
//! (each emits TERMINATE on its channel), then the channel registry check.
//!
//! Locking: the store table is behind an `RwLock` (lookup on the read path,
//! create/remove on the write path); each store sits behind its own `Mutex`,
//! which is what serializes descriptor-pool mutation.

pub mod file;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::{error, info};
use uuid::Uuid;

use crate::consts::from_sectors;
use crate::ctrl::{ChannelRegistry, CtrlChannel, DevId, StorageTarget};
use crate::descr::{BlkRange, RangeList};
use crate::errors::{Result, SnapError};

pub use file::SnapstoreFile;

// ---------------------- device collaborators ----------------------

/// An opened backing device. Block sizes are consumed for diagnostic
/// reporting only.
pub trait BlockDev: Send + Sync {
    fn logical_block_size(&self) -> u32;
    fn physical_block_size(&self) -> u32;
}

/// Opens and closes backing devices by id.
pub trait DeviceProvider: Send + Sync {
    fn open(&self, dev: DevId) -> Result<Arc<dyn BlockDev>>;
    fn close(&self, dev: DevId);
}

/// In-process provider: every id opens as a stub device. Used by tests and
/// by deployments where the device layer lives elsewhere.
pub struct MemDevProvider;

struct MemBlockDev;

impl BlockDev for MemBlockDev {
    fn logical_block_size(&self) -> u32 {
        512
    }
    fn physical_block_size(&self) -> u32 {
        4096
    }
}

impl DeviceProvider for MemDevProvider {
    fn open(&self, _dev: DevId) -> Result<Arc<dyn BlockDev>> {
        Ok(Arc::new(MemBlockDev))
    }
    fn close(&self, _dev: DevId) {}
}

// ---------------------- snapstore ----------------------

enum Backing {
    /// Accounting only; portions are not registered through the channel.
    Mem,
    /// One file device with its descriptor pool.
    File(SnapstoreFile),
    /// Per-device files, opened lazily as portions arrive.
    Multidev(HashMap<DevId, SnapstoreFile>),
}

pub struct Snapstore {
    id: Uuid,
    backing: Backing,
    dev_set: Vec<DevId>,
    channel: Option<Arc<CtrlChannel>>,
    /// Sectors; free space at or below this threshold raises HALFFILL.
    empty_limit: u64,
    capacity: u64,
    filled: u64,
    low_space: bool,
    overflowed: bool,
}

impl Snapstore {
    fn new(
        id: Uuid,
        target: StorageTarget,
        dev_set: Vec<DevId>,
        devs: &dyn DeviceProvider,
    ) -> Result<Snapstore> {
        let backing = match target {
            StorageTarget::Mem => {
                info!("in-memory snapstore was created for {}", id);
                Backing::Mem
            }
            StorageTarget::Multidev => {
                info!("multidevice snapstore was created for {}", id);
                Backing::Multidev(HashMap::new())
            }
            StorageTarget::Device(dev) => Backing::File(SnapstoreFile::create(devs, dev)?),
        };
        Ok(Snapstore {
            id,
            backing,
            dev_set,
            channel: None,
            empty_limit: 0,
            capacity: 0,
            filled: 0,
            low_space: false,
            overflowed: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Devices under snapshot, as named by INITIATE.
    pub fn dev_set(&self) -> &[DevId] {
        &self.dev_set
    }

    /// Filled bytes — the 64-bit status payload of HALFFILL / OVERFLOW /
    /// TERMINATE (the daemon thinks in the byte units it sent as the limit).
    pub fn filled_status(&self) -> u64 {
        from_sectors(self.filled)
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.capacity
    }

    pub fn filled_sectors(&self) -> u64 {
        self.filled
    }

    /// Attach the stretch channel and the free-space warning threshold.
    fn stretch_initiate(&mut self, channel: Arc<CtrlChannel>, empty_limit: u64) {
        info!(
            "stretch snapstore {} initiated, empty limit {} sectors",
            self.id, empty_limit
        );
        self.channel = Some(channel);
        self.empty_limit = empty_limit;
    }

    /// Register a portion against single-file backing.
    pub fn add_file_ranges(&mut self, ranges: RangeList) -> Result<()> {
        let sectors = match &mut self.backing {
            Backing::File(f) => f.add_ranges(ranges)?,
            _ => {
                error!("snapstore {} is not file-backed", self.id);
                return Err(SnapError::NoDevice);
            }
        };
        self.account_added(sectors);
        Ok(())
    }

    /// Register a portion against one device of a multidev store; the
    /// device is opened on first use.
    pub fn add_multidev_ranges(
        &mut self,
        dev: DevId,
        ranges: RangeList,
        devs: &dyn DeviceProvider,
    ) -> Result<()> {
        let sectors = match &mut self.backing {
            Backing::Multidev(files) => {
                if !files.contains_key(&dev) {
                    files.insert(dev, SnapstoreFile::create(devs, dev)?);
                }
                match files.get_mut(&dev) {
                    Some(f) => f.add_ranges(ranges)?,
                    None => return Err(SnapError::NoDevice),
                }
            }
            _ => {
                error!("snapstore {} is not multidevice", self.id);
                return Err(SnapError::NoDevice);
            }
        };
        self.account_added(sectors);
        Ok(())
    }

    fn account_added(&mut self, sectors: u64) {
        self.capacity += sectors;
        if self.low_space && self.capacity - self.filled > self.empty_limit {
            self.low_space = false;
        }
    }

    /// Hot-path allocation: carve `count` sectors of preserved-data storage.
    ///
    /// Returns the carved range in the store's logical space. Crossing the
    /// low-space threshold emits HALFFILL once per refill cycle; exhaustion
    /// latches the store as overflowed, emits OVERFLOW and fails with
    /// `NoSpace` — the snapshot is at risk until the daemon reacts.
    pub fn request_store(&mut self, count: u64) -> Result<BlkRange> {
        if self.overflowed {
            return Err(SnapError::NoSpace);
        }
        if self.capacity - self.filled < count {
            self.overflowed = true;
            if let Some(ch) = &self.channel {
                if let Err(e) =
                    ch.request_overflow(SnapError::NoSpace.wire_code(), self.filled_status())
                {
                    error!("failed to queue overflow notification: {}", e);
                }
            }
            return Err(SnapError::NoSpace);
        }

        let range = BlkRange {
            ofs: self.filled,
            cnt: count,
        };
        self.filled += count;

        if !self.low_space && self.capacity - self.filled <= self.empty_limit {
            self.low_space = true;
            if let Some(ch) = &self.channel {
                if let Err(e) = ch.request_halffill(self.filled_status()) {
                    error!("failed to queue halffill notification: {}", e);
                }
            }
        }

        Ok(range)
    }

    /// End of snapshot tracking: notify the daemon and release the backing.
    fn terminate(&mut self, devs: &dyn DeviceProvider) {
        if let Some(ch) = self.channel.take() {
            if let Err(e) = ch.request_terminate(self.filled_status()) {
                error!("failed to queue terminate notification: {}", e);
            }
        }
        match &mut self.backing {
            Backing::Mem => {}
            Backing::File(f) => f.destroy(devs),
            Backing::Multidev(files) => {
                for (_, f) in files.iter_mut() {
                    f.destroy(devs);
                }
                files.clear();
            }
        }
    }

    /// Read-only view of the file pool (chunk lookup, diagnostics).
    pub fn file(&self) -> Option<&SnapstoreFile> {
        match &self.backing {
            Backing::File(f) => Some(f),
            _ => None,
        }
    }
}

// ---------------------- process-wide context ----------------------

/// Owns everything with process lifetime: the channel registry and the
/// table of live snapstores. Created explicitly at engine start, torn down
/// with `done()`.
pub struct SnapCtx {
    channels: Arc<ChannelRegistry>,
    stores: RwLock<HashMap<Uuid, Arc<Mutex<Snapstore>>>>,
    devs: Arc<dyn DeviceProvider>,
}

impl SnapCtx {
    pub fn new(devs: Arc<dyn DeviceProvider>) -> SnapCtx {
        SnapCtx {
            channels: Arc::new(ChannelRegistry::new()),
            stores: RwLock::new(HashMap::new()),
            devs,
        }
    }

    pub fn channels(&self) -> &Arc<ChannelRegistry> {
        &self.channels
    }

    /// Open a control channel registered in this context.
    pub fn open_channel(&self) -> Arc<CtrlChannel> {
        CtrlChannel::open(&self.channels)
    }

    /// Create a snapstore bound to the resolved target device(s).
    pub fn create_store(
        &self,
        id: Uuid,
        target: StorageTarget,
        dev_set: &[DevId],
    ) -> Result<()> {
        let mut stores = self.stores.write().unwrap();
        if stores.contains_key(&id) {
            error!("snapstore {} already exists", id);
            return Err(SnapError::AlreadyExists);
        }
        let store = Snapstore::new(id, target, dev_set.to_vec(), self.devs.as_ref())?;
        stores.insert(id, Arc::new(Mutex::new(store)));
        Ok(())
    }

    /// Shared handle to a live snapstore.
    pub fn store(&self, id: &Uuid) -> Result<Arc<Mutex<Snapstore>>> {
        let stores = self.stores.read().unwrap();
        match stores.get(id) {
            Some(s) => Ok(Arc::clone(s)),
            None => {
                error!("snapstore {} was not found", id);
                Err(SnapError::NoDevice)
            }
        }
    }

    /// Begin bounded/dynamic growth tracking: attach the channel that will
    /// carry HALFFILL/OVERFLOW/TERMINATE, with the limit in sectors.
    pub fn stretch_initiate(
        &self,
        id: &Uuid,
        channel: Arc<CtrlChannel>,
        empty_limit: u64,
    ) -> Result<()> {
        let store = self.store(id)?;
        store.lock().unwrap().stretch_initiate(channel, empty_limit);
        Ok(())
    }

    pub fn add_file_ranges(&self, id: &Uuid, ranges: RangeList) -> Result<()> {
        let store = self.store(id)?;
        let res = store.lock().unwrap().add_file_ranges(ranges);
        res
    }

    pub fn add_multidev_ranges(&self, id: &Uuid, dev: DevId, ranges: RangeList) -> Result<()> {
        let store = self.store(id)?;
        let res = store
            .lock()
            .unwrap()
            .add_multidev_ranges(dev, ranges, self.devs.as_ref());
        res
    }

    /// Carve storage for one CoW chunk (see `Snapstore::request_store`).
    pub fn request_store(&self, id: &Uuid, count: u64) -> Result<BlkRange> {
        let store = self.store(id)?;
        let res = store.lock().unwrap().request_store(count);
        res
    }

    /// End tracking for one snapstore and drop it from the table.
    pub fn terminate(&self, id: &Uuid) -> Result<()> {
        let store = {
            let mut stores = self.stores.write().unwrap();
            match stores.remove(id) {
                Some(s) => s,
                None => {
                    error!("snapstore {} was not found", id);
                    return Err(SnapError::NoDevice);
                }
            }
        };
        store.lock().unwrap().terminate(self.devs.as_ref());
        Ok(())
    }

    /// Engine teardown: terminate leftover stores, then the registry check.
    pub fn done(&self) {
        let ids: Vec<Uuid> = {
            let stores = self.stores.read().unwrap();
            stores.keys().copied().collect()
        };
        for id in ids {
            let _ = self.terminate(&id);
        }
        self.channels.done();
    }
}
