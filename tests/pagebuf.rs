use snapstore::consts::{PAGE_SIZE, SECTOR_SIZE};
use snapstore::pagebuf::{page_count_for_bytes, page_count_for_sectors, PageBuf, WORDS_PER_PAGE};
use snapstore::SnapError;

// Pseudo-random byte pattern, reproducible per test.
fn pattern(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = oorandom::Rand32::new(seed);
    (0..len).map(|_| rng.rand_u32() as u8).collect()
}

#[test]
fn alloc_rounds_up_to_whole_pages() {
    for (bytes, pages) in [
        (1usize, 1usize),
        (PAGE_SIZE - 1, 1),
        (PAGE_SIZE, 1),
        (PAGE_SIZE + 1, 2),
        (3 * PAGE_SIZE, 3),
        (3 * PAGE_SIZE + 7, 4),
    ] {
        let buf = PageBuf::alloc(bytes).expect("alloc");
        assert_eq!(buf.page_count(), pages, "bytes={}", bytes);
        assert_eq!(buf.byte_capacity(), pages * PAGE_SIZE);
    }
}

#[test]
fn zero_byte_alloc_is_empty() {
    let buf = PageBuf::alloc(0).expect("alloc");
    assert!(buf.is_empty());
    assert_eq!(buf.page_count(), 0);

    // transfers against an empty buffer move nothing
    let mut probe = [0u8; 16];
    assert_eq!(buf.copy_to_slice(0, &mut probe), 0);
    // release of a never-filled buffer is a plain drop
    drop(buf);
}

#[test]
fn page_count_helpers() {
    assert_eq!(page_count_for_bytes(0), 0);
    assert_eq!(page_count_for_bytes(1), 1);
    assert_eq!(page_count_for_bytes(PAGE_SIZE), 1);
    assert_eq!(page_count_for_bytes(PAGE_SIZE + 1), 2);

    let sectors_per_page = (PAGE_SIZE / SECTOR_SIZE) as u64;
    assert_eq!(page_count_for_sectors(0, 0), 0);
    assert_eq!(page_count_for_sectors(0, 1), 1);
    assert_eq!(page_count_for_sectors(3, sectors_per_page), 1);
    assert_eq!(page_count_for_sectors(0, sectors_per_page + 1), 2);
}

#[test]
fn roundtrip_at_aligned_and_unaligned_offsets() {
    let mut buf = PageBuf::alloc(4 * PAGE_SIZE).expect("alloc");

    // offsets chosen to hit: page start, mid-page, last byte of a page,
    // and a transfer crossing two page boundaries
    for (seed, ofs, len) in [
        (1u64, 0usize, 64usize),
        (2, 17, 100),
        (3, PAGE_SIZE - 1, 2),
        (4, PAGE_SIZE, PAGE_SIZE),
        (5, PAGE_SIZE + 33, 2 * PAGE_SIZE + 500),
    ] {
        let data = pattern(seed, len);
        assert_eq!(buf.copy_from_slice(ofs, &data), len, "write ofs={}", ofs);

        let mut back = vec![0u8; len];
        assert_eq!(buf.copy_to_slice(ofs, &mut back), len, "read ofs={}", ofs);
        assert_eq!(back, data, "ofs={} len={}", ofs, len);
    }
}

#[test]
fn transfer_past_the_end_is_partial() {
    let mut buf = PageBuf::alloc(2 * PAGE_SIZE).expect("alloc");

    // starts on the last page, wants two: only one page moves
    let data = pattern(7, 2 * PAGE_SIZE);
    assert_eq!(buf.copy_from_slice(PAGE_SIZE, &data), PAGE_SIZE);

    let mut back = vec![0u8; 2 * PAGE_SIZE];
    assert_eq!(buf.copy_to_slice(PAGE_SIZE, &mut back), PAGE_SIZE);
    assert_eq!(&back[..PAGE_SIZE], &data[..PAGE_SIZE]);

    // unaligned start beyond the last page moves nothing
    assert_eq!(buf.copy_from_slice(2 * PAGE_SIZE + 1, &data), 0);
    assert_eq!(buf.copy_to_slice(2 * PAGE_SIZE + 1, &mut back), 0);
}

#[test]
fn element_addressing_matches_flat_layout() {
    let mut buf = PageBuf::alloc(2 * PAGE_SIZE).expect("alloc");
    let data = pattern(11, 2 * PAGE_SIZE);
    assert_eq!(buf.copy_from_slice(0, &data), data.len());

    // 16-byte elements: 256 per page; index 256 is the first of page 1
    for inx in [0usize, 1, 255, 256, 300] {
        let e = buf.element(inx, 16).expect("element");
        assert_eq!(e, &data[inx * 16..inx * 16 + 16], "inx={}", inx);
    }

    // past the end fails explicitly, no clamping
    let err = buf.element(2 * 256, 16).unwrap_err();
    assert!(matches!(err, SnapError::BadIndex { .. }));
}

#[test]
fn sector_addressing() {
    let mut buf = PageBuf::alloc(2 * PAGE_SIZE).expect("alloc");
    let data = pattern(13, 2 * PAGE_SIZE);
    assert_eq!(buf.copy_from_slice(0, &data), data.len());

    let sectors_per_page = (PAGE_SIZE / SECTOR_SIZE) as u64;
    for sect in [0u64, 1, sectors_per_page - 1, sectors_per_page, sectors_per_page + 3] {
        let s = buf.sector(sect).expect("sector");
        let flat = sect as usize * SECTOR_SIZE;
        assert_eq!(s, &data[flat..flat + SECTOR_SIZE], "sector={}", sect);
    }

    assert!(buf.sector(2 * sectors_per_page).is_err());
}

#[test]
fn word_and_byte_accessors() {
    let mut buf = PageBuf::alloc(2 * PAGE_SIZE).expect("alloc");

    buf.set_word(0, 0xDEAD_BEEF_0BAD_F00D).expect("set word 0");
    buf.set_word(WORDS_PER_PAGE, 42).expect("set first word of page 1");
    assert_eq!(buf.word_at(0).expect("word 0"), 0xDEAD_BEEF_0BAD_F00D);
    assert_eq!(buf.word_at(WORDS_PER_PAGE).expect("word"), 42);

    buf.set_byte(PAGE_SIZE + 5, 0xA5).expect("set byte");
    assert_eq!(buf.byte_at(PAGE_SIZE + 5).expect("byte"), 0xA5);

    // bounds violations are explicit errors
    assert!(matches!(
        buf.word_at(2 * WORDS_PER_PAGE),
        Err(SnapError::BadIndex { .. })
    ));
    assert!(matches!(
        buf.set_byte(2 * PAGE_SIZE, 0),
        Err(SnapError::BadIndex { .. })
    ));
}

#[test]
fn fill_and_page_copy() {
    let mut src = PageBuf::alloc(3 * PAGE_SIZE).expect("alloc src");
    src.fill(0x5C);

    // dst shorter than src: copy stops at dst's page count
    let mut dst = PageBuf::alloc(2 * PAGE_SIZE).expect("alloc dst");
    dst.copy_pages_from(&src);
    for inx in [0usize, PAGE_SIZE, 2 * PAGE_SIZE - 1] {
        assert_eq!(dst.byte_at(inx).expect("byte"), 0x5C);
    }

    // dst longer than src: the tail is untouched
    let mut long = PageBuf::alloc(4 * PAGE_SIZE).expect("alloc long");
    long.fill(0xFF);
    long.copy_pages_from(&src);
    assert_eq!(long.byte_at(3 * PAGE_SIZE).expect("byte"), 0xFF);
    assert_eq!(long.byte_at(3 * PAGE_SIZE - 1).expect("byte"), 0x5C);
}
