//! Host demo: a producer and a consumer sharing a bounded queue under a
//! `CoMutex`, plus a monitor that checks the queue never over- or underflows.
//!
//! Run with `cargo run --example producer_consumer --features std-shim`.

use cothreads::{CoMutex, Detach, SignalId};
use std::collections::VecDeque;

const ITEMS: u32 = 1_000;
const CAPACITY: usize = 8;

/// Sent whenever the queue changes.
const QUEUE_CHANGED: SignalId = SignalId::new(1);

struct StdoutLogger;

impl log::Log for StdoutLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Debug
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            println!("[{:5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StdoutLogger = StdoutLogger;

fn main() {
    log::set_logger(&LOGGER).expect("logger already set");
    log::set_max_level(log::LevelFilter::Info);

    let queue: &'static CoMutex<VecDeque<u32>> = Box::leak(Box::new(CoMutex::new(VecDeque::new())));

    let producer = cothreads::create(
        move |count: u32| {
            for item in 0..count {
                loop {
                    let mut q = queue.lock();
                    if q.len() < CAPACITY {
                        q.push_back(item);
                        break;
                    }
                    drop(q);
                    cothreads::yield_until_signal(QUEUE_CHANGED);
                }
                cothreads::send_signal(QUEUE_CHANGED);
                cothreads::yield_now();
            }
            0
        },
        ITEMS,
        None,
        Detach::Joinable,
    )
    .expect("failed to create producer");

    let consumer = cothreads::create(
        move |count: u32| {
            let mut sum: u64 = 0;
            let mut received = 0;
            while received < count {
                let next = queue.lock().pop_front();
                match next {
                    Some(item) => {
                        sum += u64::from(item);
                        received += 1;
                        cothreads::send_signal(QUEUE_CHANGED);
                    }
                    None => cothreads::yield_until_signal(QUEUE_CHANGED),
                }
            }
            // Exit codes are i32; report the sum modulo a prime
            (sum % 1_000_003) as i32
        },
        ITEMS,
        None,
        Detach::Joinable,
    )
    .expect("failed to create consumer");

    cothreads::create(
        move |()| {
            while !cothreads::has_joined(consumer) {
                let len = queue.lock().len();
                assert!(len <= CAPACITY, "queue overflow: {}", len);
                cothreads::yield_now();
            }
            0
        },
        (),
        None,
        Detach::Detached,
    )
    .expect("failed to create monitor");

    let stats = cothreads::run();
    println!("scheduler quiescent: {:?}", stats);

    let expected = (0..u64::from(ITEMS)).sum::<u64>() % 1_000_003;
    let produced = cothreads::exit_code(producer).expect("producer still running");
    let consumed = cothreads::exit_code(consumer).expect("consumer still running");
    println!("producer exit code {}, consumer checksum {} (expected {})", produced, consumed, expected);
    assert_eq!(consumed as u64, expected);

    cothreads::delete(producer).expect("delete producer");
    cothreads::delete(consumer).expect("delete consumer");
    assert_eq!(cothreads::stats().live, 0);
}
