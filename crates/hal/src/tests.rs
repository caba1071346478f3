use super::*;

#[test]
fn write_then_read_round_trips() {
    let mut hal = MockHal::new(64);
    hal.init().unwrap();
    hal.probe().unwrap();

    hal.write(10, b"fram").unwrap();
    let mut buf = [0u8; 4];
    hal.read(10, &mut buf).unwrap();
    assert_eq!(&buf, b"fram");
}

#[test]
fn probe_before_init_fails() {
    let mut hal = MockHal::new(16);
    assert!(matches!(hal.probe(), Err(FramError::InvalidState(_))));
}

#[test]
fn out_of_range_access_is_rejected() {
    let mut hal = MockHal::new(16);
    hal.init().unwrap();

    let mut buf = [0u8; 4];
    assert!(matches!(
        hal.read(14, &mut buf),
        Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange))
    ));
    assert!(matches!(
        hal.write(16, &[1, 2]),
        Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange))
    ));
}

#[test]
fn fail_after_trips_transport_error() {
    let mut hal = MockHal::new(32);
    hal.init().unwrap();

    hal.write(0, b"ok").unwrap();
    hal.fail_after(1);

    assert!(matches!(
        hal.write(2, b"no"),
        Err(FramError::Transport(_))
    ));
    // The first call counted toward op_count before the fault armed.
    assert_eq!(hal.op_count(), 2);
}

#[test]
fn clear_fault_restores_normal_operation() {
    let mut hal = MockHal::new(32);
    hal.init().unwrap();
    hal.fail_after(0);
    assert!(hal.write(0, b"x").is_err());

    hal.clear_fault();
    hal.write(0, b"x").unwrap();
}

#[test]
fn inject_error_corrupts_stored_bytes() {
    let mut hal = MockHal::new(16);
    hal.init().unwrap();
    hal.write(0, &[0x11; 8]).unwrap();

    hal.inject_error(2, 3);

    let mut buf = [0u8; 8];
    hal.read(0, &mut buf).unwrap();
    assert_eq!(&buf[0..2], &[0x11, 0x11]);
    assert_eq!(&buf[2..5], &[0xEE, 0xEE, 0xEE]);
    assert_eq!(&buf[5..8], &[0x11, 0x11, 0x11]);
}

#[test]
fn max_transfer_defaults_are_reported() {
    let hal = MockHal::new(64);
    assert_eq!(hal.capacity(), 64);
    assert_eq!(hal.max_transfer(), 4096);

    let chunked = MockHal::with_max_transfer(64, 8);
    assert_eq!(chunked.max_transfer(), 8);
}

#[test]
fn fixed_clock_is_deterministic() {
    let clock = FixedClock(42);
    assert_eq!(clock.now_us(), 42);
    assert_eq!(clock.now_us(), 42);
}

#[test]
fn range_in_bounds_rejects_overflowing_len() {
    assert!(range_in_bounds(0, 16, 16));
    assert!(!range_in_bounds(1, 16, 16));
    assert!(!range_in_bounds(0, 17, 16));
    assert!(range_in_bounds(16, 0, 16));
}
