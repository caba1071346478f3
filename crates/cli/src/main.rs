//! # CLI — interactive shell over an in-memory FRAM device
//!
//! A REPL-style command-line demo for the `fram` crate. Since there is no
//! real SPI-attached FRAM chip to plug into a terminal session, this shell
//! formats a [`fram_hal::MockHal`] once at startup and exercises the ring
//! log, versioned slot store, and key-value store against it for the
//! lifetime of the process. Reads commands from stdin, prints results to
//! stdout.
//!
//! ## Commands
//!
//! ```text
//! RING.APPEND text        Append a record to the ring log
//! RING.NEWEST              Print the newest live ring record
//! RING.OLDEST               Print the oldest live ring record
//! RING.LIST                 Print every live ring record, oldest first
//! VSLOT.SAVE text           Save a new version of the config blob
//! VSLOT.LOAD                Print the active config blob
//! KVS.SET key value         Insert or update a key
//! KVS.GET key                Look up a key (prints value or "(nil)")
//! KVS.DEL key                 Delete a key (writes a tombstone)
//! STATS                      Print device counters and health
//! EXIT / QUIT                Shut down
//! ```
//!
//! ## Configuration
//!
//! ```text
//! FRAM_DEVICE_BYTES   Backing MockHal capacity    (default: 65536)
//! FRAM_RING_BYTES     "log" partition size        (default: 4096)
//! FRAM_VSLOT_BYTES    "cfg" partition size        (default: 2048)
//! FRAM_KVS_BYTES      "kv" partition size         (default: remainder)
//! ```
use std::io::{self, BufRead, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use fram::{Config, Fram, Partition};
use fram_hal::{Clock, MockHal};

const RING_MAGIC: u32 = 0x4C4F_4747; // "LOGG"
const VSLOT_MAGIC: u32 = 0x5653_4C54; // "VSLT"
const KVS_MAGIC: u32 = 0x4B56_5331; // "KVS1"
const SUPERBLOCK_BASE: u32 = 0;

/// Stamps every ring/vslot write with the wall-clock microsecond count.
/// The core crates never depend on `SystemTime` directly (tests use
/// `FixedClock` for determinism); this is the one place a real clock is
/// appropriate, at the edge of the demo binary.
struct SystemClock;

impl Clock for SystemClock {
    fn now_us(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_or(key, &default.to_string())
        .parse()
        .unwrap_or(default)
}

fn main() -> Result<()> {
    env_logger::init();

    let ring_bytes = env_u32("FRAM_RING_BYTES", 4096);
    let vslot_bytes = env_u32("FRAM_VSLOT_BYTES", 2048);
    let kv_bytes = env_u32("FRAM_KVS_BYTES", 8192);
    let superblock_storage = fram::SUPERBLOCK_STORAGE_SIZE as u32;
    let device_bytes = env_u32(
        "FRAM_DEVICE_BYTES",
        superblock_storage + ring_bytes + vslot_bytes + kv_bytes,
    );

    let ring_offset = superblock_storage;
    let vslot_offset = ring_offset + ring_bytes;
    let kv_offset = vslot_offset + vslot_bytes;

    let partitions = vec![
        Partition::new("log", ring_offset, ring_bytes),
        Partition::new("cfg", vslot_offset, vslot_bytes),
        Partition::new("kv", kv_offset, kv_bytes),
    ];

    let hal = MockHal::new(device_bytes);
    let fram = Fram::format(hal, SUPERBLOCK_BASE, partitions, Config::default())
        .context("failed to format the in-memory FRAM device")?;

    let ring = fram
        .open_ring("log", RING_MAGIC)
        .context("failed to open ring log")?;
    let vslot = fram
        .open_vslot("cfg", VSLOT_MAGIC, 2)
        .context("failed to open config slot store")?;
    let kvs = fram
        .open_kvs("kv", KVS_MAGIC)
        .context("failed to open key-value store")?;
    let clock = SystemClock;

    println!(
        "fram demo started (device={device_bytes}B, log={ring_bytes}B, cfg={vslot_bytes}B, kv={kv_bytes}B)"
    );
    println!("Commands: RING.APPEND text | RING.NEWEST | RING.OLDEST | RING.LIST");
    println!("          VSLOT.SAVE text | VSLOT.LOAD");
    println!("          KVS.SET key value | KVS.GET key | KVS.DEL key");
    println!("          STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "RING.APPEND" => {
                    let text: String = parts.collect::<Vec<&str>>().join(" ");
                    if text.is_empty() {
                        println!("ERR usage: RING.APPEND text");
                    } else {
                        match ring.append(text.as_bytes(), &clock) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR append failed: {e}"),
                        }
                    }
                }
                "RING.NEWEST" => match ring.peek_newest() {
                    Ok((payload, meta)) => println!(
                        "seq={} ts_us={} {}",
                        meta.seq,
                        meta.ts_us,
                        String::from_utf8_lossy(&payload)
                    ),
                    Err(e) => println!("ERR {e}"),
                },
                "RING.OLDEST" => match ring.peek_oldest() {
                    Ok((payload, meta)) => println!(
                        "seq={} ts_us={} {}",
                        meta.seq,
                        meta.ts_us,
                        String::from_utf8_lossy(&payload)
                    ),
                    Err(e) => println!("ERR {e}"),
                },
                "RING.LIST" => {
                    let mut printed = 0u32;
                    let result = ring.iterate(|seq, ts_us, payload| {
                        println!("seq={seq} ts_us={ts_us} {}", String::from_utf8_lossy(payload));
                        printed += 1;
                        Ok(())
                    });
                    if let Err(e) = result {
                        println!("ERR {e}");
                    } else if printed == 0 {
                        println!("(empty)");
                    } else {
                        println!("({printed} entries)");
                    }
                }
                "VSLOT.SAVE" => {
                    let text: String = parts.collect::<Vec<&str>>().join(" ");
                    if text.is_empty() {
                        println!("ERR usage: VSLOT.SAVE text");
                    } else {
                        match vslot.save(text.as_bytes(), &clock) {
                            Ok(()) => println!("OK (version {})", vslot.version()),
                            Err(e) => println!("ERR save failed: {e}"),
                        }
                    }
                }
                "VSLOT.LOAD" => match vslot.load() {
                    Ok(payload) => println!("{}", String::from_utf8_lossy(&payload)),
                    Err(e) => println!("ERR {e}"),
                },
                "KVS.SET" => {
                    if let Some(k) = parts.next() {
                        let v: String = parts.collect::<Vec<&str>>().join(" ");
                        match kvs.set(k, v.as_bytes()) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR set failed: {e}"),
                        }
                    } else {
                        println!("ERR usage: KVS.SET key value");
                    }
                }
                "KVS.GET" => {
                    if let Some(k) = parts.next() {
                        match kvs.get(k) {
                            Ok(v) => println!("{}", String::from_utf8_lossy(&v)),
                            Err(_) => println!("(nil)"),
                        }
                    } else {
                        println!("ERR usage: KVS.GET key");
                    }
                }
                "KVS.DEL" => {
                    if let Some(k) = parts.next() {
                        match kvs.delete(k) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR del failed: {e}"),
                        }
                    } else {
                        println!("ERR usage: KVS.DEL key");
                    }
                }
                "STATS" => {
                    let stats = fram.device_stats();
                    println!(
                        "reads={} writes={} errors={} healthy={} ring_count={}/{} vslot_version={}",
                        stats.read_count,
                        stats.write_count,
                        stats.error_count,
                        stats.healthy,
                        ring.count(),
                        ring.capacity(),
                        vslot.version(),
                    );
                }
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => {
                    println!("unknown command: {other}");
                }
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    Ok(())
}
