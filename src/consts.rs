//! Shared constants: page/sector geometry and the control-channel wire.

// -------- Pages / sectors --------
// Both sizes are powers of two; the addressing arithmetic in pagebuf
// relies on it (shift/mask instead of div/mod).
pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT; // 4096

pub const SECTOR_SHIFT: u32 = 9;
pub const SECTOR_SIZE: usize = 1 << SECTOR_SHIFT; // 512

/// Sectors that fit in one page (8 with the default geometry).
pub const SECTORS_PER_PAGE: u64 = (PAGE_SIZE / SECTOR_SIZE) as u64;

pub const fn to_sectors(bytes: u64) -> u64 {
    bytes >> SECTOR_SHIFT
}

pub const fn from_sectors(sectors: u64) -> u64 {
    sectors << SECTOR_SHIFT
}

// -------- Control channel wire --------
// Every record is a sequence of 32-bit LE words, word 0 = opcode.
// Values match the original character-device protocol, so an unmodified
// user-space daemon keeps working.

// Inbound (daemon -> engine)
pub const CHARCMD_INITIATE: u32 = 0x21;
pub const CHARCMD_NEXT_PORTION: u32 = 0x22;
pub const CHARCMD_NEXT_PORTION_MULTIDEV: u32 = 0x23;

// Outbound (engine -> daemon)
pub const CHARCMD_ACKNOWLEDGE: u32 = 0x01;
pub const CHARCMD_HALFFILL: u32 = 0x41;
pub const CHARCMD_OVERFLOW: u32 = 0x42;
pub const CHARCMD_TERMINATE: u32 = 0x43;
pub const CHARCMD_INVALID: u32 = 0xFF;

/// Capacity of the outbound per-channel FIFO, in bytes.
pub const CMD_TO_USER_FIFO_SIZE: usize = 1024;

/// Wire size of one block-range record: [ofs u64][cnt u64], sector units.
pub const RANGE_REC_SIZE: usize = 16;

/// Wire size of one device id pair: [major i32][minor i32].
pub const DEV_ID_SIZE: usize = 8;

// -------- Descriptor pool --------
/// Slots reserved per pool growth step; keeps add() O(1) amortized on the
/// CoW write path.
pub const POOL_CHUNK: usize = 128;
