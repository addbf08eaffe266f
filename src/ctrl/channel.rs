//! ctrl/channel — the duplex control endpoint of one snapstore.
//!
//! Inbound, a user-space daemon writes binary commands that grow the
//! snapstore's backing storage (INITIATE, NEXT_PORTION*). Outbound, the
//! engine queues status notifications (ACKNOWLEDGE, HALFFILL, OVERFLOW,
//! TERMINATE, INVALID) for a blocking reader.
//!
//! Handler contract: validate-then-consume (never read past the supplied
//! length), stage variable-length payloads into a page buffer with one
//! bounds-checked bulk copy, parse from the staged copy, and always answer —
//! ACKNOWLEDGE with the completion code, or INVALID when the command did not
//! parse — so the daemon is never left waiting for a reply that silently
//! never arrives.

use std::sync::{Arc, Weak};

use byteorder::{ByteOrder, LittleEndian};
use log::{error, warn};
use uuid::Uuid;

use crate::consts::{
    to_sectors, CHARCMD_ACKNOWLEDGE, CHARCMD_HALFFILL, CHARCMD_INITIATE, CHARCMD_INVALID,
    CHARCMD_NEXT_PORTION, CHARCMD_NEXT_PORTION_MULTIDEV, CHARCMD_OVERFLOW, CHARCMD_TERMINATE,
    CMD_TO_USER_FIFO_SIZE, DEV_ID_SIZE, RANGE_REC_SIZE,
};
use crate::descr::{BlkRange, RangeList};
use crate::errors::{Result, SnapError};
use crate::pagebuf::PageBuf;
use crate::store::SnapCtx;

use super::proto::{Cursor, DevId};
use super::queue::{CmdQueue, PollFlags};
use super::registry::ChannelRegistry;

pub struct CtrlChannel {
    id: u64,
    queue: CmdQueue,
    registry: Weak<ChannelRegistry>,
}

/// Per-field truncation logging around a cursor getter.
fn want<T>(r: Result<T>, what: &str, cmd: &str, length: usize) -> Result<T> {
    r.map_err(|e| {
        error!(
            "unable to get {}: invalid ctrl {} command. length={}",
            what, cmd, length
        );
        e
    })
}

impl CtrlChannel {
    /// Create a channel and register it. The returned `Arc` is the first
    /// owner; the registry only holds a weak handle, and the channel leaves
    /// the registry when the last owner drops.
    pub fn open(registry: &Arc<ChannelRegistry>) -> Arc<CtrlChannel> {
        let id = registry.next_id();
        let channel = Arc::new(CtrlChannel {
            id,
            queue: CmdQueue::new(CMD_TO_USER_FIFO_SIZE),
            registry: Arc::downgrade(registry),
        });
        registry.register(id, Arc::downgrade(&channel));
        channel
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    // ---------------- outbound (engine -> daemon) ----------------

    /// Block until a notification is queued, then drain up to `dst.len()`
    /// bytes. Fails with `Interrupted` if the wait is cancelled.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize> {
        self.queue.read(dst)
    }

    /// Cancel a blocked reader; it fails with `Interrupted` instead of
    /// retrying silently.
    pub fn interrupt(&self) {
        self.queue.interrupt();
    }

    /// Readable when a notification is queued; always writable.
    pub fn poll(&self) -> PollFlags {
        self.queue.poll()
    }

    /// Completion status of the last inbound command.
    pub fn request_acknowledge(&self, result: u32) -> Result<()> {
        self.queue.push(&[CHARCMD_ACKNOWLEDGE, result])
    }

    /// Fill level crossed the warning threshold; `filled_status` is bytes.
    pub fn request_halffill(&self, filled_status: u64) -> Result<()> {
        warn!("snapstore is half-full");
        let (lo, hi) = split_u64(filled_status);
        self.queue.push(&[CHARCMD_HALFFILL, lo, hi])
    }

    /// Storage exhausted; the snapshot is at risk.
    pub fn request_overflow(&self, error_code: u32, filled_status: u64) -> Result<()> {
        error!("snapstore overflow");
        let (lo, hi) = split_u64(filled_status);
        self.queue.push(&[CHARCMD_OVERFLOW, error_code, lo, hi])
    }

    /// Snapshot tracking ended.
    pub fn request_terminate(&self, filled_status: u64) -> Result<()> {
        warn!("snapstore termination");
        let (lo, hi) = split_u64(filled_status);
        self.queue.push(&[CHARCMD_TERMINATE, lo, hi])
    }

    /// An inbound command failed to parse.
    pub fn request_invalid(&self) -> Result<()> {
        error!("ctrl channel received invalid command");
        self.queue.push(&[CHARCMD_INVALID])
    }

    // ---------------- inbound (daemon -> engine) ----------------

    /// Consume commands from `buf`: a leading 32-bit opcode, then the
    /// command payload, repeated while bytes remain. The cursor advances
    /// after each successful command; the first failing command stops the
    /// loop and its error becomes the call's result. A trailing fragment
    /// shorter than one opcode, or an unknown opcode, stops processing with
    /// the bytes consumed so far (no outbound message for either).
    pub fn write(self: &Arc<Self>, ctx: &SnapCtx, buf: &[u8]) -> Result<usize> {
        let mut processed = 0usize;

        while processed < buf.len() {
            if buf.len() - processed < 4 {
                error!(
                    "unable to write command to ctrl channel: invalid command length={}",
                    buf.len()
                );
                break;
            }
            let opcode = LittleEndian::read_u32(&buf[processed..]);
            processed += 4;

            let rest = &buf[processed..];
            let consumed = match opcode {
                CHARCMD_INITIATE => self.command_initiate(ctx, rest)?,
                CHARCMD_NEXT_PORTION => self.command_next_portion(ctx, rest)?,
                CHARCMD_NEXT_PORTION_MULTIDEV => self.command_next_portion_multidev(ctx, rest)?,
                _ => {
                    error!("ctrl channel write error: invalid command [{:#x}] received", opcode);
                    break;
                }
            };
            processed += consumed;
        }

        Ok(processed)
    }

    /// INITIATE: create the snapstore and start stretch tracking.
    fn command_initiate(self: &Arc<Self>, ctx: &SnapCtx, buf: &[u8]) -> Result<usize> {
        self.complete(self.initiate_inner(ctx, buf))
    }

    fn initiate_inner(self: &Arc<Self>, ctx: &SnapCtx, buf: &[u8]) -> Result<usize> {
        let length = buf.len();
        let mut cur = Cursor::new(buf);

        let unique_id = want(cur.uuid(), "snapstore uuid", "initiate", length)?;
        let empty_limit = want(cur.u64(), "stretch snapstore limit", "initiate", length)?;
        let store_dev = want(cur.dev_id(), "snapstore device id", "initiate", length)?;
        let list_len = want(cur.u32(), "device id list length", "initiate", length)? as usize;

        want(
            cur.ensure(list_len * DEV_ID_SIZE),
            "all devices from device id list",
            "initiate",
            length,
        )?;
        let mut dev_set = Vec::with_capacity(list_len);
        for _ in 0..list_len {
            dev_set.push(cur.dev_id()?);
        }

        let target = store_dev.resolve();
        ctx.create_store(unique_id, target, &dev_set).map_err(|e| {
            error!("failed to create snapstore on device {}", store_dev);
            e
        })?;
        ctx.stretch_initiate(&unique_id, Arc::clone(self), to_sectors(empty_limit))
            .map_err(|e| {
                error!("failed to initiate stretch snapstore {}", unique_id);
                e
            })?;

        Ok(cur.pos())
    }

    /// NEXT_PORTION: register a batch of ranges as single-file storage.
    fn command_next_portion(self: &Arc<Self>, ctx: &SnapCtx, buf: &[u8]) -> Result<usize> {
        let res = self.next_portion_inner(buf).and_then(|(id, ranges, pos)| {
            ctx.add_file_ranges(&id, ranges).map_err(|e| {
                error!("failed to add file ranges to snapstore {}", id);
                e
            })?;
            Ok(pos)
        });
        self.complete(res)
    }

    fn next_portion_inner(&self, buf: &[u8]) -> Result<(Uuid, RangeList, usize)> {
        let length = buf.len();
        let mut cur = Cursor::new(buf);

        let unique_id = want(cur.uuid(), "snapstore id", "next portion", length)?;
        let ranges_len = want(cur.u32(), "ranges length", "next portion", length)? as usize;
        let ranges = self.stage_ranges(&mut cur, ranges_len, "next portion")?;

        Ok((unique_id, ranges, cur.pos()))
    }

    /// NEXT_PORTION_MULTIDEV: register ranges against one device of a
    /// multi-device snapstore.
    fn command_next_portion_multidev(self: &Arc<Self>, ctx: &SnapCtx, buf: &[u8]) -> Result<usize> {
        let res = self
            .next_portion_multidev_inner(buf)
            .and_then(|(id, dev, ranges, pos)| {
                ctx.add_multidev_ranges(&id, dev, ranges).map_err(|e| {
                    error!("failed to add ranges to multidev snapstore {}", id);
                    e
                })?;
                Ok(pos)
            });
        self.complete(res)
    }

    fn next_portion_multidev_inner(&self, buf: &[u8]) -> Result<(Uuid, DevId, RangeList, usize)> {
        let length = buf.len();
        let mut cur = Cursor::new(buf);

        let unique_id = want(cur.uuid(), "snapstore id", "next portion multidev", length)?;
        let dev = want(cur.dev_id(), "device id", "next portion multidev", length)?;
        let ranges_len = want(cur.u32(), "ranges length", "next portion multidev", length)?
            as usize;
        let ranges = self.stage_ranges(&mut cur, ranges_len, "next portion multidev")?;

        Ok((unique_id, dev, ranges, cur.pos()))
    }

    /// Stage `count` range records through a page buffer in one
    /// bounds-checked bulk copy, then parse from the trusted copy.
    fn stage_ranges(&self, cur: &mut Cursor<'_>, count: usize, cmd: &str) -> Result<RangeList> {
        let size = count * RANGE_REC_SIZE;
        let payload = want(cur.bytes(size), "all ranges", cmd, cur.remaining())?;

        let mut staged = PageBuf::alloc(size).map_err(|e| {
            error!("unable to process {} command: failed to allocate staging buffer", cmd);
            e
        })?;
        if staged.copy_from_slice(0, payload) != size {
            error!("unable to process {} command: short staging copy", cmd);
            return Err(SnapError::InvalidArgument);
        }

        let mut ranges = RangeList::with_capacity(count);
        for inx in 0..count {
            let rec = staged.element(inx, RANGE_REC_SIZE)?;
            ranges.push(BlkRange {
                ofs: LittleEndian::read_u64(&rec[..8]),
                cnt: LittleEndian::read_u64(&rec[8..]),
            });
        }
        Ok(ranges)
    }

    /// Answer the daemon no matter how the command went: ACKNOWLEDGE with
    /// the completion code, or INVALID when the command did not parse.
    /// A full outbound queue at this point is only logged; the command's
    /// own result wins.
    fn complete(&self, res: Result<usize>) -> Result<usize> {
        let push_res = match &res {
            Ok(_) => self.request_acknowledge(0),
            Err(SnapError::InvalidArgument) => self.request_invalid(),
            Err(e) => self.request_acknowledge(e.wire_code()),
        };
        if let Err(e) = push_res {
            error!("failed to queue command completion: {}", e);
        }
        res
    }
}

impl Drop for CtrlChannel {
    fn drop(&mut self) {
        if let Some(reg) = self.registry.upgrade() {
            reg.deregister(self.id);
        }
    }
}

fn split_u64(v: u64) -> (u32, u32) {
    ((v & 0xFFFF_FFFF) as u32, (v >> 32) as u32)
}
