//! ctrl/proto — the control-channel wire format.
//!
//! Inbound commands and outbound notifications are word-aligned binary
//! records, 32-bit LE words, word 0 = opcode (`consts::CHARCMD_*`). 64-bit
//! payload fields travel as two words, low word first.
//!
//! Inbound layouts:
//! - INITIATE:      [uuid 16][empty_limit u64, bytes][dev_id 8][count u32][dev_id 8]*count
//! - NEXT_PORTION:  [uuid 16][count u32][range 16]*count
//! - NEXT_PORTION_MULTIDEV: [uuid 16][dev_id 8][count u32][range 16]*count
//!
//! Parsing is validate-then-consume: every getter on [`Cursor`] checks the
//! remaining length before reading, so a truncated or adversarial buffer
//! fails with `InvalidArgument` at the first short field and nothing past
//! the supplied length is ever touched. This discipline is the sole defense
//! the channel has; keep it when adding fields.
//!
//! The encoders and [`OutMsg`] are the daemon-side half of the same wire,
//! used by user-space callers and by the tests that drive the channel.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use uuid::Uuid;

use crate::consts::{
    CHARCMD_ACKNOWLEDGE, CHARCMD_HALFFILL, CHARCMD_INITIATE, CHARCMD_INVALID,
    CHARCMD_NEXT_PORTION, CHARCMD_NEXT_PORTION_MULTIDEV, CHARCMD_OVERFLOW, CHARCMD_TERMINATE,
};
use crate::descr::BlkRange;
use crate::errors::{Result, SnapError};

// ---------------------- device identity ----------------------

/// Backing-device identifier pair as it travels on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DevId {
    pub major: i32,
    pub minor: i32,
}

impl DevId {
    pub fn new(major: i32, minor: i32) -> Self {
        DevId { major, minor }
    }

    /// Sentinel decoding: (-1,-1) = multi-device, (0,0) = in-memory,
    /// anything else is a concrete device.
    pub fn resolve(self) -> StorageTarget {
        if self.major == -1 && self.minor == -1 {
            StorageTarget::Multidev
        } else if self.major == 0 && self.minor == 0 {
            StorageTarget::Mem
        } else {
            StorageTarget::Device(self)
        }
    }
}

impl fmt::Display for DevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.major, self.minor)
    }
}

/// Where a snapstore keeps its preserved data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageTarget {
    /// Accounting only, no backing device.
    Mem,
    /// Ranges spread over several devices, registered per device later.
    Multidev,
    /// One concrete backing device.
    Device(DevId),
}

// ---------------------- bounds-checked reader ----------------------

/// Forward-only reader over an inbound buffer. Every getter validates the
/// remaining length before consuming.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Validate that `n` more bytes are present before a caller commits to
    /// reading a variable-length trailer.
    pub fn ensure(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(SnapError::InvalidArgument);
        }
        Ok(())
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        let v = LittleEndian::read_u32(&self.buf[self.pos..]);
        self.pos += 4;
        Ok(v)
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        let v = LittleEndian::read_u64(&self.buf[self.pos..]);
        self.pos += 8;
        Ok(v)
    }

    pub fn uuid(&mut self) -> Result<Uuid> {
        self.ensure(16)?;
        let mut b = [0u8; 16];
        b.copy_from_slice(&self.buf[self.pos..self.pos + 16]);
        self.pos += 16;
        Ok(Uuid::from_bytes(b))
    }

    pub fn dev_id(&mut self) -> Result<DevId> {
        self.ensure(8)?;
        let major = LittleEndian::read_i32(&self.buf[self.pos..]);
        let minor = LittleEndian::read_i32(&self.buf[self.pos + 4..]);
        self.pos += 8;
        Ok(DevId { major, minor })
    }

    /// Consume `n` raw bytes (used for the bulk staging copy).
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }
}

// ---------------------- daemon-side encoders ----------------------

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_dev_id(out: &mut Vec<u8>, dev: DevId) {
    out.extend_from_slice(&dev.major.to_le_bytes());
    out.extend_from_slice(&dev.minor.to_le_bytes());
}

fn put_ranges(out: &mut Vec<u8>, ranges: &[BlkRange]) {
    put_u32(out, ranges.len() as u32);
    for r in ranges {
        put_u64(out, r.ofs);
        put_u64(out, r.cnt);
    }
}

/// INITIATE: create a snapstore and start stretch (dynamic growth) tracking.
/// `empty_limit` is in bytes; the engine converts it to sectors.
pub fn encode_initiate(id: &Uuid, empty_limit: u64, dev: DevId, dev_set: &[DevId]) -> Vec<u8> {
    let mut out = Vec::new();
    put_u32(&mut out, CHARCMD_INITIATE);
    out.extend_from_slice(id.as_bytes());
    put_u64(&mut out, empty_limit);
    put_dev_id(&mut out, dev);
    put_u32(&mut out, dev_set.len() as u32);
    for d in dev_set {
        put_dev_id(&mut out, *d);
    }
    out
}

/// NEXT_PORTION: hand a batch of freshly reserved ranges to the snapstore.
pub fn encode_next_portion(id: &Uuid, ranges: &[BlkRange]) -> Vec<u8> {
    let mut out = Vec::new();
    put_u32(&mut out, CHARCMD_NEXT_PORTION);
    out.extend_from_slice(id.as_bytes());
    put_ranges(&mut out, ranges);
    out
}

/// NEXT_PORTION_MULTIDEV: same, against one device of a multidev snapstore.
pub fn encode_next_portion_multidev(id: &Uuid, dev: DevId, ranges: &[BlkRange]) -> Vec<u8> {
    let mut out = Vec::new();
    put_u32(&mut out, CHARCMD_NEXT_PORTION_MULTIDEV);
    out.extend_from_slice(id.as_bytes());
    put_dev_id(&mut out, dev);
    put_ranges(&mut out, ranges);
    out
}

// ---------------------- outbound decoding ----------------------

/// One decoded outbound notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutMsg {
    /// Completion status of the last inbound command (0 = success,
    /// otherwise a `SnapError::wire_code`).
    Acknowledge { result: u32 },
    /// Storage crossed the fill-level warning threshold.
    Halffill { filled: u64 },
    /// Storage exhausted; the snapshot is at risk.
    Overflow { error_code: u32, filled: u64 },
    /// Snapshot tracking ended.
    Terminate { filled: u64 },
    /// The engine could not parse an inbound command.
    Invalid,
}

impl OutMsg {
    /// Decode one notification at the cursor.
    pub fn decode(cur: &mut Cursor<'_>) -> Result<OutMsg> {
        let filled_64 = |lo: u32, hi: u32| (lo as u64) | ((hi as u64) << 32);
        match cur.u32()? {
            CHARCMD_ACKNOWLEDGE => Ok(OutMsg::Acknowledge { result: cur.u32()? }),
            CHARCMD_HALFFILL => {
                let lo = cur.u32()?;
                let hi = cur.u32()?;
                Ok(OutMsg::Halffill {
                    filled: filled_64(lo, hi),
                })
            }
            CHARCMD_OVERFLOW => {
                let error_code = cur.u32()?;
                let lo = cur.u32()?;
                let hi = cur.u32()?;
                Ok(OutMsg::Overflow {
                    error_code,
                    filled: filled_64(lo, hi),
                })
            }
            CHARCMD_TERMINATE => {
                let lo = cur.u32()?;
                let hi = cur.u32()?;
                Ok(OutMsg::Terminate {
                    filled: filled_64(lo, hi),
                })
            }
            CHARCMD_INVALID => Ok(OutMsg::Invalid),
            _ => Err(SnapError::InvalidArgument),
        }
    }

    /// Decode a drained read() buffer into the notifications it carries.
    pub fn decode_all(buf: &[u8]) -> Result<Vec<OutMsg>> {
        let mut cur = Cursor::new(buf);
        let mut out = Vec::new();
        while cur.remaining() > 0 {
            out.push(OutMsg::decode(&mut cur)?);
        }
        Ok(out)
    }
}
