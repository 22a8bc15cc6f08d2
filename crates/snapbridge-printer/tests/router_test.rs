//! Packet router behavior over a real TCP pair.

use parking_lot::Mutex;
use snapbridge_printer::PacketRouter;
use snapbridge_sacp::Packet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, server) = tokio::join!(TcpStream::connect(addr), async {
        listener.accept().await.map(|(s, _)| s)
    });
    (client.unwrap(), server.unwrap())
}

fn response(sequence: u16, data: Vec<u8>) -> Packet {
    Packet {
        sender_id: 1,
        attribute: 1,
        sequence,
        command_set: 0x01,
        command_id: 0x35,
        data,
        ..Default::default()
    }
}

type Pushes = Arc<Mutex<Vec<(u8, u8, Vec<u8>)>>>;

fn start_router(
    stream: TcpStream,
) -> (Arc<PacketRouter>, Pushes, Arc<AtomicBool>, tokio::net::tcp::OwnedWriteHalf) {
    let (read_half, write_half) = stream.into_split();

    let pushes: Pushes = Arc::new(Mutex::new(Vec::new()));
    let pushes_in = pushes.clone();
    let disconnected = Arc::new(AtomicBool::new(false));
    let disconnected_in = disconnected.clone();

    let router = PacketRouter::start(
        read_half,
        Arc::new(move |set, id, data: &[u8]| {
            pushes_in.lock().push((set, id, data.to_vec()));
        }),
        Arc::new(move || {
            disconnected_in.store(true, Ordering::SeqCst);
        }),
    );
    // The write half keeps our side of the socket open for the test's
    // lifetime.
    (router, pushes, disconnected, write_half)
}

// Two callers waiting concurrently each receive their own response, even
// when the printer answers in the opposite order.
#[tokio::test]
async fn responses_route_by_sequence() {
    let (client, mut server) = tcp_pair().await;
    let (router, _, _, _keep) = start_router(client);

    let ra = router.clone();
    let a = tokio::spawn(async move { ra.wait_for_response(10, Duration::from_secs(2)).await });
    let rb = router.clone();
    let b = tokio::spawn(async move { rb.wait_for_response(11, Duration::from_secs(2)).await });

    // Let both waiters register.
    tokio::time::sleep(Duration::from_millis(50)).await;

    server
        .write_all(&response(11, vec![0xB]).encode())
        .await
        .unwrap();
    server
        .write_all(&response(10, vec![0xA]).encode())
        .await
        .unwrap();

    let got_a = a.await.unwrap().unwrap();
    let got_b = b.await.unwrap().unwrap();
    assert_eq!(got_a.sequence, 10);
    assert_eq!(got_a.data, vec![0xA]);
    assert_eq!(got_b.sequence, 11);
    assert_eq!(got_b.data, vec![0xB]);
}

// A push arriving while nobody waits does not block later waiters.
#[tokio::test]
async fn pushes_do_not_starve_waiters() {
    let (client, mut server) = tcp_pair().await;
    let (router, pushes, _, _keep) = start_router(client);

    let push = Packet {
        sequence: 999,
        command_set: 0x01,
        command_id: 0xA0,
        data: vec![0, 2],
        ..Default::default()
    };
    server.write_all(&push.encode()).await.unwrap();

    let waiter = {
        let router = router.clone();
        tokio::spawn(async move { router.wait_for_response(20, Duration::from_secs(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.write_all(&response(20, vec![0]).encode()).await.unwrap();

    let got = waiter.await.unwrap().unwrap();
    assert_eq!(got.sequence, 20);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let recorded = pushes.lock();
    assert!(recorded.iter().any(|(set, id, _)| (*set, *id) == (0x01, 0xA0)));
}

#[tokio::test]
async fn timeout_releases_the_pending_entry() {
    let (client, mut server) = tcp_pair().await;
    let (router, pushes, _, _keep) = start_router(client);

    let err = router
        .wait_for_response(30, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "timeout waiting for response seq=30");

    // A late response for the abandoned sequence is subscription data now.
    server.write_all(&response(30, vec![0]).encode()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pushes.lock().iter().any(|(set, id, _)| (*set, *id) == (0x01, 0x35)));
}

// Transport failure drains every waiter and fires the disconnect callback.
#[tokio::test]
async fn broken_connection_drains_waiters() {
    let (client, server) = tcp_pair().await;
    let (router, _, disconnected, _keep) = start_router(client);

    let waiter = {
        let router = router.clone();
        tokio::spawn(async move { router.wait_for_response(40, Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    drop(server);

    let err = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter not drained in time")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.to_string(), "connection closed while waiting for response");
    assert!(disconnected.load(Ordering::SeqCst));
}

// Stopping after loop exit hands the read half back exactly once.
#[tokio::test]
async fn stop_reclaims_the_read_half() {
    let (client, server) = tcp_pair().await;
    let (router, _, _, _keep) = start_router(client);

    drop(server);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(router.stop().await.is_some());
    assert!(router.stop().await.is_none());
    assert!(router.is_stopped());
}

// A malformed frame is dropped; the stream continues.
#[tokio::test]
async fn malformed_frames_are_skipped() {
    let (client, mut server) = tcp_pair().await;
    let (router, _, disconnected, _keep) = start_router(client);

    // Valid magic and length, corrupted payload checksum.
    let mut bad = response(50, vec![0]).encode();
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;
    server.write_all(&bad).await.unwrap();

    let waiter = {
        let router = router.clone();
        tokio::spawn(async move { router.wait_for_response(51, Duration::from_secs(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.write_all(&response(51, vec![0]).encode()).await.unwrap();

    assert_eq!(waiter.await.unwrap().unwrap().sequence, 51);
    assert!(!disconnected.load(Ordering::SeqCst));
}
