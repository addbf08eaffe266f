//! store/file — single-device backing for one snapstore.

use std::sync::Arc;

use log::{error, info};

use crate::descr::{DescrPool, RangeList};
use crate::errors::Result;

use super::{BlockDev, DeviceProvider};
use crate::ctrl::DevId;

/// One backing device plus the descriptor pool mapping CoW chunks onto it.
pub struct SnapstoreFile {
    dev_id: DevId,
    bdev: Arc<dyn BlockDev>,
    pool: DescrPool,
}

impl SnapstoreFile {
    /// Open the backing device and initialize an empty pool.
    pub fn create(devs: &dyn DeviceProvider, dev_id: DevId) -> Result<SnapstoreFile> {
        let bdev = devs.open(dev_id).map_err(|e| {
            error!(
                "unable to create snapstore file: failed to open device {}: {}",
                dev_id, e
            );
            e
        })?;

        info!("single device file snapstore was created on device {}", dev_id);
        info!("snapstore device logical block size {}", bdev.logical_block_size());
        info!("snapstore device physical block size {}", bdev.physical_block_size());

        Ok(SnapstoreFile {
            dev_id,
            bdev,
            pool: DescrPool::new_file(),
        })
    }

    pub fn dev_id(&self) -> DevId {
        self.dev_id
    }

    pub fn block_dev(&self) -> &Arc<dyn BlockDev> {
        &self.bdev
    }

    pub fn pool(&self) -> &DescrPool {
        &self.pool
    }

    /// Transplant a rangelist into a fresh descriptor slot.
    /// Returns the sectors this portion adds to the store's capacity.
    pub fn add_ranges(&mut self, ranges: RangeList) -> Result<u64> {
        let sectors: u64 = ranges.iter().map(|r| r.cnt).sum();
        self.pool.add_file(ranges)?;
        Ok(sectors)
    }

    /// Tear down the pool and release the device.
    pub fn destroy(&mut self, devs: &dyn DeviceProvider) {
        self.pool.done();
        devs.close(self.dev_id);
    }
}
