//! pagebuf — page-granular staging buffer for CoW payload.
//!
//! A `PageBuf` is an ordered sequence of individually allocated 4 KiB pages.
//! It is the unit in which snapshotted data is staged for transfer between
//! the engine and linear caller memory, and it doubles as the scatter-gather
//! buffer used to receive large range arrays on the control channel.
//!
//! Contracts:
//! - page count is fixed at creation (bytes rounded up to whole pages);
//! - bulk copies start at an arbitrary byte offset, cross page boundaries
//!   transparently and return the number of bytes actually transferred —
//!   a transfer that runs past the page sequence stops short, and the caller
//!   must check the returned count (deliberate partial-failure contract);
//! - indexed access (element/sector/word/byte) is bounds-checked and fails
//!   with `BadIndex` instead of touching memory past the buffer;
//! - element and sector sizes are powers of two, so an element never
//!   straddles a page boundary.
//!
//! A buffer is owned exclusively by its creator for the duration of a
//! transfer; there is no internal locking.

use log::error;

use crate::consts::{from_sectors, PAGE_SHIFT, PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SHIFT, SECTOR_SIZE};
use crate::errors::{Result, SnapError};

/// u64 slots that fit in one page (the original stored raw pointers here).
pub const WORDS_PER_PAGE: usize = PAGE_SIZE / 8;

/// Pages needed to hold `byte_count` bytes.
pub fn page_count_for_bytes(byte_count: usize) -> usize {
    let mut count = byte_count >> PAGE_SHIFT;
    if byte_count & (PAGE_SIZE - 1) != 0 {
        count += 1;
    }
    count
}

/// Pages needed to hold a run of `sector_count` sectors.
///
/// Like the original, only the count participates: the range is staged from
/// its first sector, not from its in-page offset.
pub fn page_count_for_sectors(_start_sector: u64, sector_count: u64) -> usize {
    let mut count = sector_count / SECTORS_PER_PAGE;
    if sector_count & (SECTORS_PER_PAGE - 1) != 0 {
        count += 1;
    }
    count as usize
}

pub struct PageBuf {
    pages: Vec<Box<[u8]>>,
}

/// One fallible 4 KiB allocation, zero-filled.
fn alloc_page() -> Result<Box<[u8]>> {
    let mut v: Vec<u8> = Vec::new();
    if v.try_reserve_exact(PAGE_SIZE).is_err() {
        return Err(SnapError::NoMemory);
    }
    v.resize(PAGE_SIZE, 0);
    Ok(v.into_boxed_slice())
}

impl PageBuf {
    /// Allocate a buffer holding at least `byte_count` bytes, rounded up to
    /// whole pages. Each page is allocated individually; if any single page
    /// fails, everything allocated so far is released and the call fails
    /// with `NoMemory`. A zero-byte request yields a zero-page buffer.
    pub fn alloc(byte_count: usize) -> Result<PageBuf> {
        let count = page_count_for_bytes(byte_count);
        let mut pages: Vec<Box<[u8]>> = Vec::new();
        if pages.try_reserve_exact(count).is_err() {
            error!("failed to allocate page buffer: no room for {} page slots", count);
            return Err(SnapError::NoMemory);
        }
        for _ in 0..count {
            match alloc_page() {
                Ok(p) => pages.push(p),
                Err(e) => {
                    // partial pages drop here
                    error!("failed to allocate page {} of {}", pages.len(), count);
                    return Err(e);
                }
            }
        }
        Ok(PageBuf { pages })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn byte_capacity(&self) -> usize {
        self.pages.len() * PAGE_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Copy out of the buffer, starting at byte offset `ofs` (may be
    /// unaligned), into `dst`. Returns the bytes transferred; stops short
    /// when the page sequence runs out before `dst` is full.
    pub fn copy_to_slice(&self, ofs: usize, dst: &mut [u8]) -> usize {
        let mut page_inx = ofs >> PAGE_SHIFT;
        let mut processed = 0usize;

        let unaligned = ofs & (PAGE_SIZE - 1);
        if unaligned != 0 {
            if page_inx >= self.pages.len() {
                return 0;
            }
            let n = (PAGE_SIZE - unaligned).min(dst.len());
            dst[..n].copy_from_slice(&self.pages[page_inx][unaligned..unaligned + n]);
            page_inx += 1;
            processed += n;
        }

        while processed < dst.len() && page_inx < self.pages.len() {
            let n = PAGE_SIZE.min(dst.len() - processed);
            dst[processed..processed + n].copy_from_slice(&self.pages[page_inx][..n]);
            page_inx += 1;
            processed += n;
        }

        processed
    }

    /// Copy into the buffer, starting at byte offset `ofs`. Same partial
    /// transfer contract as [`copy_to_slice`](Self::copy_to_slice).
    pub fn copy_from_slice(&mut self, ofs: usize, src: &[u8]) -> usize {
        let mut page_inx = ofs >> PAGE_SHIFT;
        let mut processed = 0usize;

        let unaligned = ofs & (PAGE_SIZE - 1);
        if unaligned != 0 {
            if page_inx >= self.pages.len() {
                return 0;
            }
            let n = (PAGE_SIZE - unaligned).min(src.len());
            self.pages[page_inx][unaligned..unaligned + n].copy_from_slice(&src[..n]);
            page_inx += 1;
            processed += n;
        }

        while processed < src.len() && page_inx < self.pages.len() {
            let n = PAGE_SIZE.min(src.len() - processed);
            self.pages[page_inx][..n].copy_from_slice(&src[processed..processed + n]);
            page_inx += 1;
            processed += n;
        }

        processed
    }

    /// Borrow the `index`-th element of `size` bytes, treating the page
    /// sequence as a dense array. `size` must be a power of two no larger
    /// than a page.
    pub fn element(&self, index: usize, size: usize) -> Result<&[u8]> {
        debug_assert!(size.is_power_of_two() && size <= PAGE_SIZE);
        let per_page = PAGE_SIZE / size;
        let page_inx = index / per_page;
        self.check_page(index, page_inx)?;
        let ofs = (index & (per_page - 1)) * size;
        Ok(&self.pages[page_inx][ofs..ofs + size])
    }

    /// Mutable variant of [`element`](Self::element).
    pub fn element_mut(&mut self, index: usize, size: usize) -> Result<&mut [u8]> {
        debug_assert!(size.is_power_of_two() && size <= PAGE_SIZE);
        let per_page = PAGE_SIZE / size;
        let page_inx = index / per_page;
        self.check_page(index, page_inx)?;
        let ofs = (index & (per_page - 1)) * size;
        Ok(&mut self.pages[page_inx][ofs..ofs + size])
    }

    /// Borrow one sector at a sector-unit offset into the buffer.
    pub fn sector(&self, sector_ofs: u64) -> Result<&[u8]> {
        let page_inx = (sector_ofs >> (PAGE_SHIFT - SECTOR_SHIFT)) as usize;
        self.check_page(sector_ofs as usize, page_inx)?;
        let ofs = from_sectors(sector_ofs & (SECTORS_PER_PAGE - 1)) as usize;
        Ok(&self.pages[page_inx][ofs..ofs + SECTOR_SIZE])
    }

    /// Mutable variant of [`sector`](Self::sector).
    pub fn sector_mut(&mut self, sector_ofs: u64) -> Result<&mut [u8]> {
        let page_inx = (sector_ofs >> (PAGE_SHIFT - SECTOR_SHIFT)) as usize;
        self.check_page(sector_ofs as usize, page_inx)?;
        let ofs = from_sectors(sector_ofs & (SECTORS_PER_PAGE - 1)) as usize;
        Ok(&mut self.pages[page_inx][ofs..ofs + SECTOR_SIZE])
    }

    /// Whole-buffer memset.
    pub fn fill(&mut self, value: u8) {
        for page in &mut self.pages {
            page.fill(value);
        }
    }

    /// Page-wise copy from `src`; stops at the shorter of the two buffers.
    pub fn copy_pages_from(&mut self, src: &PageBuf) {
        let count = self.pages.len().min(src.pages.len());
        for inx in 0..count {
            self.pages[inx].copy_from_slice(&src.pages[inx]);
        }
    }

    /// Read the `inx`-th u64 word (LE), flat across pages.
    pub fn word_at(&self, inx: usize) -> Result<u64> {
        let page_inx = inx / WORDS_PER_PAGE;
        self.check_page(inx, page_inx)?;
        let pos = (inx & (WORDS_PER_PAGE - 1)) * 8;
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.pages[page_inx][pos..pos + 8]);
        Ok(u64::from_le_bytes(b))
    }

    /// Store the `inx`-th u64 word (LE).
    pub fn set_word(&mut self, inx: usize, value: u64) -> Result<()> {
        let page_inx = inx / WORDS_PER_PAGE;
        self.check_page(inx, page_inx)?;
        let pos = (inx & (WORDS_PER_PAGE - 1)) * 8;
        self.pages[page_inx][pos..pos + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Read one byte at a flat byte index.
    pub fn byte_at(&self, inx: usize) -> Result<u8> {
        let page_inx = inx >> PAGE_SHIFT;
        self.check_page(inx, page_inx)?;
        Ok(self.pages[page_inx][inx & (PAGE_SIZE - 1)])
    }

    /// Store one byte at a flat byte index.
    pub fn set_byte(&mut self, inx: usize, value: u8) -> Result<()> {
        let page_inx = inx >> PAGE_SHIFT;
        self.check_page(inx, page_inx)?;
        self.pages[page_inx][inx & (PAGE_SIZE - 1)] = value;
        Ok(())
    }

    fn check_page(&self, index: usize, page_inx: usize) -> Result<()> {
        if page_inx >= self.pages.len() {
            error!(
                "invalid index {}: page {} >= page count {}",
                index,
                page_inx,
                self.pages.len()
            );
            return Err(SnapError::BadIndex {
                index,
                page_inx,
                page_cnt: self.pages.len(),
            });
        }
        Ok(())
    }
}
