//! End-to-end scenarios: two OS threads, one shared region, a wake-signal
//! doorbell.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ringline::{
    ConsumerStream, ProducerStream, RingContext, SharedRegion, WakeResult, WakeSignal,
};

const RING_XFER_SIZE: usize = 16384;

/// Standard harness: client doorbell feeds the server's unavailable-read
/// through a capacity-one rendezvous.
fn streams(region: &Arc<SharedRegion>) -> (ProducerStream, ConsumerStream) {
    let signal = Arc::new(WakeSignal::new());

    let bell = Arc::clone(&signal);
    let client = ProducerStream::new(Arc::clone(region), move || bell.signal());

    let wait = Arc::clone(&signal);
    let server = ConsumerStream::new(Arc::clone(region), move || {
        wait.wait();
        WakeResult::Woken
    });

    (client, server)
}

#[test]
fn basic() {
    const SENDS: usize = 1024;
    const SEND_SIZE: usize = 384;

    let region = SharedRegion::create_anonymous(RING_XFER_SIZE).unwrap();
    let (mut client, mut server) = streams(&region);

    let client_thread = thread::spawn(move || {
        for _ in 0..SENDS {
            client.alloc(SEND_SIZE).fill(0xff);
        }
        client.flush();
    });

    let server_thread = thread::spawn(move || {
        let mut buf = [0u8; SEND_SIZE];
        for _ in 0..SENDS {
            let mut read = 0;
            while read < SEND_SIZE {
                read += server.read(&mut buf[read..]);
            }
            assert!(buf.iter().all(|&b| b == 0xff));
        }
        server.stats()
    });

    client_thread.join().unwrap();
    let stats = server_thread.join().unwrap();
    assert_eq!(stats.total_bytes, (SENDS * SEND_SIZE) as u64);
}

#[test]
fn round_trip() {
    const ROUND_TRIPS: usize = 1024;
    const SEND_SIZE: usize = 384;

    let region = SharedRegion::create_anonymous(RING_XFER_SIZE).unwrap();
    let (mut client, mut server) = streams(&region);

    let client_thread = thread::spawn(move || {
        let mut echo = [0u8; SEND_SIZE];
        for _ in 0..ROUND_TRIPS {
            client.alloc(SEND_SIZE).fill(0xff);
            assert_eq!(client.readback(&mut echo), SEND_SIZE);
            assert!(echo.iter().all(|&b| b == 0xff));
        }
    });

    let server_thread = thread::spawn(move || {
        let mut buf = [0u8; SEND_SIZE];
        for _ in 0..ROUND_TRIPS {
            let mut read = 0;
            while read < SEND_SIZE {
                read += server.read(&mut buf[read..]);
            }
            assert_eq!(server.write_fully(&buf), SEND_SIZE);
        }
    });

    client_thread.join().unwrap();
    server_thread.join().unwrap();
}

#[derive(Clone, Copy)]
enum TrafficKind {
    Write,
    Read,
}

#[derive(Clone, Copy)]
struct Traffic {
    kind: TrafficKind,
    size: usize,
    byte_val: u8,
}

#[test]
fn random_traffic() {
    const OPS: usize = 1024;

    let mut rng = StdRng::seed_from_u64(0);
    let traffics: Arc<Vec<Traffic>> = Arc::new(
        (0..OPS)
            .map(|_| Traffic {
                kind: if rng.gen_bool(0.01) {
                    TrafficKind::Read
                } else {
                    TrafficKind::Write
                },
                size: rng.gen_range(1..=8190),
                byte_val: rng.gen_range(0..=255u32) as u8,
            })
            .collect(),
    );

    let region = SharedRegion::create_anonymous(RING_XFER_SIZE).unwrap();
    let (mut client, mut server) = streams(&region);

    let client_traffic = Arc::clone(&traffics);
    let client_thread = thread::spawn(move || {
        let mut readback = Vec::new();
        for t in client_traffic.iter() {
            match t.kind {
                TrafficKind::Write => {
                    client.alloc(t.size).fill(t.byte_val);
                }
                TrafficKind::Read => {
                    readback.resize(t.size, 0);
                    assert_eq!(client.readback(&mut readback), t.size);
                    assert!(readback.iter().all(|&b| b == t.byte_val));
                }
            }
        }
        client.flush();
    });

    let server_traffic = Arc::clone(&traffics);
    let server_thread = thread::spawn(move || {
        let mut buf = Vec::new();
        for t in server_traffic.iter() {
            match t.kind {
                TrafficKind::Write => {
                    buf.resize(t.size, 0);
                    let mut read = 0;
                    while read < t.size {
                        read += server.read(&mut buf[read..]);
                    }
                    assert!(buf.iter().all(|&b| b == t.byte_val));
                }
                TrafficKind::Read => {
                    buf.clear();
                    buf.resize(t.size, t.byte_val);
                    assert_eq!(server.write_fully(&buf), t.size);
                }
            }
        }
    });

    client_thread.join().unwrap();
    server_thread.join().unwrap();
}

#[test]
fn large_transfer() {
    const TOTAL: usize = 65535;

    let region = SharedRegion::create_anonymous(RING_XFER_SIZE).unwrap();
    let (mut client, mut server) = streams(&region);

    let client_thread = thread::spawn(move || {
        let payload = vec![0xaa; TOTAL];
        client.write_fully(&payload)
    });

    let watch_region = Arc::clone(&region);
    let server_thread = thread::spawn(move || {
        // SAFETY: read-only observation of the shared config block.
        let ctx = unsafe { RingContext::bind(watch_region.base(), watch_region.xfer_buffer_size()) };

        let mut received = Vec::with_capacity(TOTAL);
        let mut buf = [0u8; 4096];
        let mut saw_announcement = false;
        while received.len() < TOTAL {
            let n = server.read(&mut buf);
            received.extend_from_slice(&buf[..n]);
            if ctx.config().transfer_size.load(Ordering::Acquire) > 0 {
                saw_announcement = true;
            }
        }
        (received, saw_announcement, ctx)
    });

    assert_eq!(client_thread.join().unwrap(), TOTAL);
    let (received, saw_announcement, ctx) = server_thread.join().unwrap();

    assert_eq!(received.len(), TOTAL);
    assert!(received.iter().all(|&b| b == 0xaa));
    assert!(saw_announcement);
    assert_eq!(ctx.config().transfer_size.load(Ordering::Acquire), 0);
}

#[test]
fn producer_side_shutdown() {
    const TOTAL: usize = 1024 * 1024;
    const CONSUME: usize = 100 * 1024;

    let region = SharedRegion::create_anonymous(RING_XFER_SIZE).unwrap();
    let (mut client, mut server) = streams(&region);

    let client_thread = thread::spawn(move || {
        let payload = vec![0x11; TOTAL];
        client.write_fully(&payload)
    });

    let server_thread = thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let mut read = 0;
        while read < CONSUME {
            read += server.read(&mut buf);
        }
        server.announce_exit();
        read
    });

    let consumed = server_thread.join().unwrap();
    let sent = client_thread.join().unwrap();

    assert!(consumed >= CONSUME);
    assert!(sent >= CONSUME);
    assert!(sent <= TOTAL);
}

#[test]
fn consumer_side_shutdown() {
    let region = SharedRegion::create_anonymous(RING_XFER_SIZE).unwrap();
    let mut client = ProducerStream::new(Arc::clone(&region), || {});
    let mut server = ConsumerStream::new(region, || WakeResult::Shutdown);

    // One packet flows normally.
    client.alloc(64).fill(0x3c);
    client.flush();
    let mut buf = [0u8; 64];
    assert_eq!(server.read_raw(&mut buf), Some(64));

    // The producer goes quiet; after the bounded spin the callback
    // reports shutdown and the stream is terminal.
    assert_eq!(server.read_raw(&mut buf), None);
    assert_eq!(server.read_raw(&mut buf), None);
}
