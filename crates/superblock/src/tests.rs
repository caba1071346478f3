use super::*;
use fram_config::Config;
use fram_hal::MockHal;

const BASE: u32 = 0;
const DEV_SIZE: u32 = STORAGE_SIZE as u32 + 4096;

fn device() -> Device<MockHal> {
    let hal = MockHal::new(DEV_SIZE);
    Device::new(hal, &Config::default()).unwrap()
}

fn sample_parts() -> Vec<PartRecord> {
    vec![PartRecord {
        name: "ring".into(),
        offset: STORAGE_SIZE as u32,
        size: 2048,
        flags: 0,
    }]
}

#[test]
fn golden_byte_layout_sizes() {
    assert_eq!(PART_RECORD_SIZE, 28);
    assert_eq!(HEADER_SIZE, 16);
    assert_eq!(SUPERBLOCK_SIZE, 16 + 28 * 16 + 8);
    assert_eq!(STORAGE_SIZE, SUPERBLOCK_SIZE * 2);
}

#[test]
fn first_write_lands_in_copy_a_at_seq_one() {
    let dev = device();
    let sb = Superblock::new(DEV_SIZE, sample_parts());
    write(&dev, BASE, &sb).unwrap();

    let mut raw_a = vec![0u8; SUPERBLOCK_SIZE];
    dev.read(BASE, &mut raw_a).unwrap();
    assert!(is_valid(&raw_a, DEV_SIZE));

    let read_back = read(&dev, BASE).unwrap();
    assert_eq!(read_back.seq, 1);
    assert_eq!(read_back.parts.len(), 1);
    assert_eq!(read_back.parts[0].name, "ring");
}

#[test]
fn second_write_rotates_to_copy_b_and_bumps_seq() {
    let dev = device();
    let sb = Superblock::new(DEV_SIZE, sample_parts());
    write(&dev, BASE, &sb).unwrap();
    write(&dev, BASE, &sb).unwrap();

    let mut raw_b = vec![0u8; SUPERBLOCK_SIZE];
    dev.read(BASE + SUPERBLOCK_SIZE as u32, &mut raw_b).unwrap();
    assert!(is_valid(&raw_b, DEV_SIZE));

    let read_back = read(&dev, BASE).unwrap();
    assert_eq!(read_back.seq, 2);
}

#[test]
fn read_prefers_higher_seq_copy() {
    let dev = device();
    let sb = Superblock::new(DEV_SIZE, sample_parts());
    write(&dev, BASE, &sb).unwrap(); // -> A seq 1
    write(&dev, BASE, &sb).unwrap(); // -> B seq 2
    write(&dev, BASE, &sb).unwrap(); // -> A seq 3

    let read_back = read(&dev, BASE).unwrap();
    assert_eq!(read_back.seq, 3);
}

#[test]
fn corrupted_copy_a_falls_back_to_copy_b() {
    let dev = device();
    let sb = Superblock::new(DEV_SIZE, sample_parts());
    write(&dev, BASE, &sb).unwrap();
    write(&dev, BASE, &sb).unwrap();

    // Flip a byte inside copy A's header (still within bounds of both
    // copies, so this only corrupts A).
    let mut raw_a = vec![0u8; SUPERBLOCK_SIZE];
    dev.read(BASE, &mut raw_a).unwrap();
    raw_a[4] ^= 0xFF;
    dev.write(BASE, &raw_a).unwrap();

    let read_back = read(&dev, BASE).unwrap();
    assert_eq!(read_back.seq, 2);
}

#[test]
fn no_valid_copy_is_not_found() {
    let dev = device();
    assert!(matches!(read(&dev, BASE), Err(FramError::NotFound)));
}

#[test]
fn size_bytes_mismatch_invalidates_copy() {
    let dev = device();
    let wrong_size_sb = Superblock::new(DEV_SIZE + 1, sample_parts());
    // bypass the public write() guard to store an inconsistent copy directly
    let mut published = wrong_size_sb;
    published.seq = 1;
    let encoded = published.encode();
    dev.write(BASE, &encoded).unwrap();

    assert!(matches!(read(&dev, BASE), Err(FramError::NotFound)));
}
