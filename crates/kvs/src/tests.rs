use super::*;
use fram_device::Device;
use fram_hal::MockHal;
use fram_partition::Partition;

const MAGIC: u32 = 0x4B56_5331; // "KVS1"

fn mount(part_size: u32) -> (Arc<PartitionManager<MockHal>>, Kvs<MockHal>) {
    let hal = MockHal::new(part_size + 64);
    let device = Device::new(hal, &Config::default()).unwrap();
    let pm = Arc::new(
        PartitionManager::new(device, vec![Partition::new("kvs", 0, part_size)], &Config::default())
            .unwrap(),
    );
    let kvs = Kvs::new(pm.clone(), "kvs", MAGIC, &Config::default()).unwrap();
    (pm, kvs)
}

#[test]
fn get_on_empty_store_is_not_found() {
    let (_pm, kvs) = mount(4096);
    assert!(matches!(kvs.get("missing"), Err(FramError::NotFound)));
    assert!(!kvs.exists("missing"));
}

#[test]
fn set_then_get_round_trips() {
    let (_pm, kvs) = mount(4096);
    kvs.set("greeting", b"hello").unwrap();
    assert_eq!(kvs.get("greeting").unwrap(), b"hello");
    assert!(kvs.exists("greeting"));
    assert_eq!(kvs.get_len("greeting").unwrap(), 5);
}

#[test]
fn later_set_shadows_earlier_value_for_same_key() {
    let (_pm, kvs) = mount(4096);
    kvs.set("k", b"v1").unwrap();
    kvs.set("k", b"v2").unwrap();
    assert_eq!(kvs.get("k").unwrap(), b"v2");
}

#[test]
fn delete_hides_the_key() {
    let (_pm, kvs) = mount(4096);
    kvs.set("k", b"v1").unwrap();
    kvs.delete("k").unwrap();
    assert!(matches!(kvs.get("k"), Err(FramError::NotFound)));
    assert!(!kvs.exists("k"));
}

#[test]
fn set_after_delete_resurrects_the_key() {
    let (_pm, kvs) = mount(4096);
    kvs.set("k", b"v1").unwrap();
    kvs.delete("k").unwrap();
    kvs.set("k", b"v2").unwrap();
    assert_eq!(kvs.get("k").unwrap(), b"v2");
}

#[test]
fn rejects_empty_and_overlong_keys() {
    let (_pm, kvs) = mount(4096);
    assert!(matches!(kvs.set("", b"x"), Err(FramError::InvalidArgument(_))));
    let long_key = "a".repeat(16);
    assert!(matches!(
        kvs.set(&long_key, b"x"),
        Err(FramError::InvalidArgument(_))
    ));
}

#[test]
fn recovery_rebuilds_state_from_media_across_restarts() {
    let part_size = 4096;
    let hal = MockHal::new(part_size + 64);
    let device = Device::new(hal, &Config::default()).unwrap();
    let pm = Arc::new(
        PartitionManager::new(device, vec![Partition::new("kvs", 0, part_size)], &Config::default())
            .unwrap(),
    );

    {
        let kvs = Kvs::new(pm.clone(), "kvs", MAGIC, &Config::default()).unwrap();
        kvs.set("a", b"1").unwrap();
        kvs.set("b", b"2").unwrap();
        kvs.delete("a").unwrap();
    }

    let recovered = Kvs::new(pm.clone(), "kvs", MAGIC, &Config::default()).unwrap();
    assert!(matches!(recovered.get("a"), Err(FramError::NotFound)));
    assert_eq!(recovered.get("b").unwrap(), b"2");

    // New writes land after the recovered tail, not over old records.
    recovered.set("c", b"3").unwrap();
    assert_eq!(recovered.get("c").unwrap(), b"3");
}

#[test]
fn corrupted_record_stops_scan_and_hides_everything_after_it() {
    let part_size = 4096;
    let hal = MockHal::new(part_size + 64);
    let device = Device::new(hal, &Config::default()).unwrap();
    let pm = Arc::new(
        PartitionManager::new(device, vec![Partition::new("kvs", 0, part_size)], &Config::default())
            .unwrap(),
    );
    let part = pm.find("kvs").unwrap().clone();

    {
        let kvs = Kvs::new(pm.clone(), "kvs", MAGIC, &Config::default()).unwrap();
        kvs.set("a", b"1").unwrap();
        kvs.set("b", b"22").unwrap();
    }

    // Corrupt a byte inside the *first* record's value-adjacent region so
    // its CRC no longer matches; everything after it, including "b",
    // must become unreachable once the store re-scans.
    let first_record_key_offset = HEADER_SIZE;
    pm.write(&part, first_record_key_offset, &[0xFF]).unwrap();

    let recovered = Kvs::new(pm, "kvs", MAGIC, &Config::default()).unwrap();
    assert!(matches!(recovered.get("a"), Err(FramError::NotFound)));
    assert!(matches!(recovered.get("b"), Err(FramError::NotFound)));

    // The store treats the corrupted tail as free space and will reuse it.
    recovered.set("a", b"fresh").unwrap();
    assert_eq!(recovered.get("a").unwrap(), b"fresh");
}

#[test]
fn full_partition_rejects_further_writes() {
    let (_pm, kvs) = mount(HEADER_SIZE + 1 + 1); // room for exactly one 1-byte-key record
    kvs.set("a", b"").unwrap();
    assert!(matches!(kvs.set("b", b""), Err(FramError::NoMemory(_))));
}

#[test]
fn value_over_configured_max_is_rejected() {
    let hal = MockHal::new(8192);
    let device = Device::new(hal, &Config::default()).unwrap();
    let pm = Arc::new(
        PartitionManager::new(device, vec![Partition::new("kvs", 0, 8192)], &Config::default())
            .unwrap(),
    );
    let small_value_config = Config {
        kvs_max_value: 4,
        ..Config::default()
    };
    let kvs = Kvs::new(pm, "kvs", MAGIC, &small_value_config).unwrap();
    assert!(matches!(
        kvs.set("k", b"too long"),
        Err(FramError::InvalidSize(_))
    ));
}
