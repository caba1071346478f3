use super::*;
use fram_device::Device;
use fram_hal::{FixedClock, MockHal};
use fram_partition::Partition;

const MAGIC: u32 = 0x5241_4E47; // "RANG"

fn config(max_payload: u32) -> Config {
    Config {
        ring_max_payload: max_payload,
        ..Config::default()
    }
}

fn ring_with_capacity(slots: u32, max_payload: u32) -> (Arc<PartitionManager<MockHal>>, Ring<MockHal>) {
    let entry_size = HEADER_SIZE + max_payload + 1;
    let part_size = entry_size * slots;
    let hal = MockHal::new(part_size + 64);
    let device = Device::new(hal, &Config::default()).unwrap();
    let pm = Arc::new(
        PartitionManager::new(device, vec![Partition::new("ring", 0, part_size)], &Config::default())
            .unwrap(),
    );
    let ring = Ring::new(pm.clone(), "ring", MAGIC, &config(max_payload)).unwrap();
    (pm, ring)
}

#[test]
fn fresh_ring_is_empty() {
    let (_pm, ring) = ring_with_capacity(4, 16);
    assert!(ring.is_empty());
    assert_eq!(ring.count(), 0);
    assert!(matches!(ring.peek_oldest(), Err(FramError::NotFound)));
    assert!(matches!(ring.peek_newest_len(), Err(FramError::NotFound)));
}

#[test]
fn append_then_peek_newest_and_oldest() {
    let (_pm, ring) = ring_with_capacity(4, 16);
    let clock = FixedClock(100);
    ring.append(b"one", &clock).unwrap();
    ring.append(b"two", &clock).unwrap();

    let (payload, meta) = ring.peek_newest().unwrap();
    assert_eq!(payload, b"two");
    assert_eq!(meta.seq, 1);

    let (payload, meta) = ring.peek_oldest().unwrap();
    assert_eq!(payload, b"one");
    assert_eq!(meta.seq, 0);
    assert_eq!(meta.ts_us, 100);
}

#[test]
fn overflow_advances_tail_and_overwrites_oldest() {
    let (_pm, ring) = ring_with_capacity(3, 8);
    let clock = FixedClock(1);
    for i in 0..5u8 {
        ring.append(&[i], &clock).unwrap();
    }
    assert!(ring.is_full());
    assert_eq!(ring.count(), 3);

    let (oldest, meta) = ring.peek_oldest().unwrap();
    assert_eq!(oldest, vec![2]);
    assert_eq!(meta.seq, 2);

    let (newest, _) = ring.peek_newest().unwrap();
    assert_eq!(newest, vec![4]);
}

#[test]
fn peek_len_matches_payload_length_without_returning_it() {
    let (_pm, ring) = ring_with_capacity(4, 16);
    let clock = FixedClock(1);
    ring.append(b"a", &clock).unwrap();
    ring.append(b"bbbb", &clock).unwrap();

    assert_eq!(ring.peek_oldest_len().unwrap(), 1);
    assert_eq!(ring.peek_newest_len().unwrap(), 4);
}

#[test]
fn iterate_walks_oldest_to_newest() {
    let (_pm, ring) = ring_with_capacity(4, 8);
    let clock = FixedClock(1);
    ring.append(b"a", &clock).unwrap();
    ring.append(b"bb", &clock).unwrap();
    ring.append(b"ccc", &clock).unwrap();

    let mut seen = Vec::new();
    ring.iterate(|seq, _ts, payload| {
        seen.push((seq, payload.to_vec()));
        Ok(())
    })
    .unwrap();

    assert_eq!(
        seen,
        vec![
            (0, b"a".to_vec()),
            (1, b"bb".to_vec()),
            (2, b"ccc".to_vec()),
        ]
    );
}

#[test]
fn iterate_propagates_callback_error() {
    let (_pm, ring) = ring_with_capacity(4, 8);
    let clock = FixedClock(1);
    ring.append(b"a", &clock).unwrap();
    ring.append(b"b", &clock).unwrap();

    let result = ring.iterate(|_, _, _| Err(FramError::InvalidArgument("stop")));
    assert!(matches!(result, Err(FramError::InvalidArgument(_))));
}

#[test]
fn clear_resets_to_empty() {
    let (_pm, ring) = ring_with_capacity(4, 8);
    let clock = FixedClock(1);
    ring.append(b"a", &clock).unwrap();
    ring.clear().unwrap();
    assert!(ring.is_empty());
    assert!(matches!(ring.peek_newest(), Err(FramError::NotFound)));
}

#[test]
fn oversized_payload_is_rejected() {
    let (_pm, ring) = ring_with_capacity(4, 4);
    let clock = FixedClock(1);
    assert!(matches!(
        ring.append(b"way too long", &clock),
        Err(FramError::InvalidSize(_))
    ));
}

#[test]
fn recovery_reconstructs_state_from_media() {
    let entry_size = HEADER_SIZE + 8 + 1;
    let part_size = entry_size * 4;
    let hal = MockHal::new(part_size + 64);
    let device = Device::new(hal, &Config::default()).unwrap();
    let pm = Arc::new(
        PartitionManager::new(device, vec![Partition::new("ring", 0, part_size)], &Config::default())
            .unwrap(),
    );

    {
        let ring = Ring::new(pm.clone(), "ring", MAGIC, &config(8)).unwrap();
        let clock = FixedClock(42);
        ring.append(b"a", &clock).unwrap();
        ring.append(b"bb", &clock).unwrap();
    }

    // Mount a fresh Ring over the same backing partition manager: recovery
    // must rebuild head/tail/count/head_seq purely from what's on media.
    let recovered = Ring::new(pm, "ring", MAGIC, &config(8)).unwrap();
    assert_eq!(recovered.count(), 2);
    let (payload, meta) = recovered.peek_newest().unwrap();
    assert_eq!(payload, b"bb");
    assert_eq!(meta.seq, 1);
}

#[test]
fn torn_slot_truncates_recovery_and_loses_older_entries() {
    let entry_size = HEADER_SIZE + 8 + 1;
    let part_size = entry_size * 4;
    let hal = MockHal::new(part_size + 64);
    let device = Device::new(hal, &Config::default()).unwrap();
    let pm = Arc::new(
        PartitionManager::new(device, vec![Partition::new("ring", 0, part_size)], &Config::default())
            .unwrap(),
    );

    let part = pm.find("ring").unwrap().clone();
    {
        let ring = Ring::new(pm.clone(), "ring", MAGIC, &config(8)).unwrap();
        let clock = FixedClock(7);
        ring.append(b"a", &clock).unwrap();
        ring.append(b"bb", &clock).unwrap();
        ring.append(b"ccc", &clock).unwrap();
    }

    // Corrupt slot 1's commit byte (the middle record, seq=1) to simulate
    // a crash that never finished publishing it.
    let commit_offset = entry_size * 1 + HEADER_SIZE + 8;
    pm.write(&part, commit_offset, &[0x00]).unwrap();

    let recovered = Ring::new(pm, "ring", MAGIC, &config(8)).unwrap();
    // seq=2 ("ccc") is still the highest valid slot, but walking backward
    // from it immediately hits the torn seq=1 slot, so only seq=2 survives.
    assert_eq!(recovered.count(), 1);
    let (payload, meta) = recovered.peek_newest().unwrap();
    assert_eq!(payload, b"ccc");
    assert_eq!(meta.seq, 2);
}
