//! End-to-end mesh scenarios over loopback TCP.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use weft_data::{Filter, Topic, Value};
use weft_endpoint::{
    Endpoint, EndpointConfig, EndpointError, ErrorCode, Event, PeerStatus, Status, StatusCode,
    StatusSubscriber, Subscriber,
};
use weft_protocol::{codec, Frame, DEFAULT_MAX_FRAME_BYTES};

const TICK: Duration = Duration::from_millis(10);
const PATIENCE: Duration = Duration::from_secs(5);

fn test_config() -> EndpointConfig {
    EndpointConfig {
        keepalive_interval: Duration::from_millis(500),
        keepalive_timeout: Duration::from_secs(5),
        ..EndpointConfig::default()
    }
}

fn endpoint() -> Endpoint {
    Endpoint::new(test_config())
}

fn filter(topics: &[&str]) -> Filter {
    topics.iter().map(|t| t.parse::<Topic>().unwrap()).collect()
}

fn topic(t: &str) -> Topic {
    t.parse().unwrap()
}

/// Wait until every peer of `ep` is peered and has announced a
/// non-empty filter.
async fn wait_filters(ep: &Endpoint, peers: usize) {
    let deadline = Instant::now() + PATIENCE;
    loop {
        let records = ep.peers().await.unwrap();
        let ready = records
            .iter()
            .filter(|p| p.status == PeerStatus::Peered && !p.filter.is_empty())
            .count();
        if ready >= peers {
            return;
        }
        assert!(Instant::now() < deadline, "peer filters never arrived");
        tokio::time::sleep(TICK).await;
    }
}

/// Collect `n` messages from a subscriber, polling with a deadline.
async fn collect(sub: &Subscriber, n: usize) -> Vec<(String, Value)> {
    let deadline = Instant::now() + PATIENCE;
    let mut got = Vec::new();
    while got.len() < n {
        match sub.try_pop() {
            Some(m) => got.push((m.topic.as_str().to_owned(), m.value)),
            None => {
                assert!(
                    Instant::now() < deadline,
                    "only {} of {n} messages arrived",
                    got.len()
                );
                tokio::time::sleep(TICK).await;
            }
        }
    }
    got
}

/// Wait for a specific status code, skipping unrelated events.
async fn expect_status(sub: &mut StatusSubscriber, code: StatusCode) -> Status {
    let deadline = Instant::now() + PATIENCE;
    loop {
        let event = sub
            .recv_deadline(deadline)
            .await
            .unwrap_or_else(|| panic!("timed out waiting for {code}"));
        if let Event::Status(status) = event {
            if status.code == code {
                return status;
            }
        }
    }
}

/// Wait for a specific error code, skipping unrelated events.
async fn expect_error(sub: &mut StatusSubscriber, code: ErrorCode) {
    let deadline = Instant::now() + PATIENCE;
    loop {
        let event = sub
            .recv_deadline(deadline)
            .await
            .unwrap_or_else(|| panic!("timed out waiting for {code}"));
        if let Event::Error(error) = event {
            if error.code == code {
                return;
            }
        }
    }
}

// S1: triangle prefix routing. V and E peer to M; V subscribes to a
// prefix of E's subscription; M publishes on topics below both.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn triangle_prefix_routing() {
    let m = endpoint();
    let v = endpoint();
    let e = endpoint();
    let port = m.listen("127.0.0.1", 0).await.unwrap();

    let m_sub = m.subscribe(filter(&["unrelated"])).await.unwrap();
    let v_sub = v.subscribe(filter(&["zeek/events"])).await.unwrap();
    let e_sub = e.subscribe(filter(&["zeek/events/errors"])).await.unwrap();

    v.peer("127.0.0.1", port, None).await.unwrap();
    e.peer("127.0.0.1", port, None).await.unwrap();
    wait_filters(&m, 2).await;

    for (t, value) in [
        ("zeek/events/errors", Value::from("oops")),
        ("zeek/events/errors", Value::from("sorry!")),
        ("zeek/events/data", Value::Count(123)),
        ("zeek/events/data", Value::Count(456)),
    ] {
        m.publish(topic(t), value).await.unwrap();
    }

    let v_got = collect(&v_sub, 4).await;
    assert_eq!(
        v_got,
        vec![
            ("zeek/events/errors".to_owned(), Value::from("oops")),
            ("zeek/events/errors".to_owned(), Value::from("sorry!")),
            ("zeek/events/data".to_owned(), Value::Count(123)),
            ("zeek/events/data".to_owned(), Value::Count(456)),
        ]
    );

    let e_got = collect(&e_sub, 2).await;
    assert_eq!(
        e_got,
        vec![
            ("zeek/events/errors".to_owned(), Value::from("oops")),
            ("zeek/events/errors".to_owned(), Value::from("sorry!")),
        ]
    );

    // M itself had no covering subscription.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(m_sub.available(), 0);
}

// S2: unpeer event pairs, double unpeer, unpeer of an unknown host.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unpeer_events() {
    let m = endpoint();
    let v = endpoint();
    let e = endpoint();
    let port = m.listen("127.0.0.1", 0).await.unwrap();

    v.peer("127.0.0.1", port, None).await.unwrap();
    e.peer("127.0.0.1", port, None).await.unwrap();

    // Subscribe after peering so the earlier peer_added noise is gone.
    let mut m_status = m.status_subscriber(false);
    let mut v_status = v.status_subscriber(true);
    let mut e_status = e.status_subscriber(false);

    v.unpeer("127.0.0.1", port).await.unwrap();

    let removed = expect_status(&mut v_status, StatusCode::PeerRemoved).await;
    assert_eq!(removed.network.unwrap().port, port);
    let lost = expect_status(&mut m_status, StatusCode::PeerLost).await;
    assert_eq!(lost.peer, Some(v.id()));

    // A second unpeer is an error, locally only.
    let err = v.unpeer("127.0.0.1", port).await.unwrap_err();
    assert!(matches!(err, EndpointError::PeerInvalid(_)));
    expect_error(&mut v_status, ErrorCode::PeerInvalid).await;

    // Unpeering a host nobody ever peered with.
    let err = v.unpeer("sun", 123).await.unwrap_err();
    assert!(matches!(err, EndpointError::PeerInvalid(_)));
    expect_error(&mut v_status, ErrorCode::PeerInvalid).await;

    // E saw none of it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(e_status.try_recv().is_none());
}

// S3: peer with retry before the listener exists; the peering resolves
// once the listener appears.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connection_retry() {
    let m = endpoint();
    let v = endpoint();

    // Find a port that is free right now.
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let mut m_status = m.status_subscriber(false);
    let mut v_status = v.status_subscriber(true);

    let dial = {
        let v = v.clone();
        tokio::spawn(async move {
            v.peer("127.0.0.1", port, Some(Duration::from_millis(200)))
                .await
        })
    };

    // At least one failed attempt before the listener exists.
    expect_error(&mut v_status, ErrorCode::PeerUnavailable).await;

    m.listen("127.0.0.1", port).await.unwrap();

    let info = dial.await.unwrap().unwrap();
    assert_eq!(info.status, PeerStatus::Peered);
    assert_eq!(info.id, Some(m.id()));

    expect_status(&mut v_status, StatusCode::PeerAdded).await;
    let added = expect_status(&mut m_status, StatusCode::PeerAdded).await;
    assert_eq!(added.peer, Some(v.id()));
}

// Without retry, a refused connection fails the peer() call.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peer_without_retry_fails_fast() {
    let v = endpoint();
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let err = v.peer("127.0.0.1", port, None).await.unwrap_err();
    assert!(matches!(err, EndpointError::PeerUnavailable(_)));
}

// Connecting to our own listener is refused as peer_invalid.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn self_peer_rejected() {
    let m = endpoint();
    let port = m.listen("127.0.0.1", 0).await.unwrap();
    let mut status = m.status_subscriber(true);

    let err = m.peer("127.0.0.1", port, None).await.unwrap_err();
    assert!(matches!(err, EndpointError::PeerInvalid(_)));
    expect_error(&mut status, ErrorCode::PeerInvalid).await;

    // No peering came out of it.
    let peered = m
        .peers()
        .await
        .unwrap()
        .into_iter()
        .filter(|p| p.status == PeerStatus::Peered)
        .count();
    assert_eq!(peered, 0);
}

// A HELLO with an alien protocol version tears the session down with
// peer_incompatible and never emits peer_added.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn version_mismatch_rejected() {
    let m = endpoint();
    let port = m.listen("127.0.0.1", 0).await.unwrap();
    let mut status = m.status_subscriber(true);

    let mut socket = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let hello = Frame::hello(99, [7; 16], vec![]);
    let bytes = codec::encode(&hello, DEFAULT_MAX_FRAME_BYTES).unwrap();
    socket.write_all(&bytes).await.unwrap();

    expect_error(&mut status, ErrorCode::PeerIncompatible).await;

    // The acceptor hangs up without answering.
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(PATIENCE, socket.read(&mut buf))
        .await
        .expect("acceptor kept the socket open");
    assert_eq!(read.unwrap(), 0);
}

// A subscription created after peering propagates via FILTER_UPDATE.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_subscription_propagates() {
    let m = endpoint();
    let v = endpoint();
    let port = m.listen("127.0.0.1", 0).await.unwrap();
    v.peer("127.0.0.1", port, None).await.unwrap();

    let v_sub = v.subscribe(filter(&["weft/late"])).await.unwrap();
    wait_filters(&m, 1).await;

    m.publish(topic("weft/late/news"), Value::from("made it"))
        .await
        .unwrap();

    let got = collect(&v_sub, 1).await;
    assert_eq!(got[0].0, "weft/late/news");

    // Narrowing works too: drop the topic and nothing else arrives.
    v_sub.remove_topic(topic("weft/late")).await.unwrap();
    let deadline = Instant::now() + PATIENCE;
    loop {
        let subs = m.peer_subscriptions().await.unwrap();
        if !subs.covers("weft/late/news") {
            break;
        }
        assert!(Instant::now() < deadline, "filter removal never propagated");
        tokio::time::sleep(TICK).await;
    }
    m.publish(topic("weft/late/news"), Value::from("missed it"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(v_sub.available(), 0);
}

// Messages forwarded through a peer session preserve publish order
// even under subscriber backpressure.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn forwarded_order_preserved() {
    const TOTAL: u64 = 200;
    let m = endpoint();
    let v = endpoint();
    let port = m.listen("127.0.0.1", 0).await.unwrap();

    let v_sub = v
        .subscribe_with_capacity(filter(&["seq"]), 4)
        .await
        .unwrap();
    v.peer("127.0.0.1", port, None).await.unwrap();
    wait_filters(&m, 1).await;

    let publisher = {
        let m = m.clone();
        tokio::spawn(async move {
            for i in 0..TOTAL {
                m.publish(topic("seq"), Value::Count(i)).await.unwrap();
            }
        })
    };

    let got = collect(&v_sub, TOTAL as usize).await;
    publisher.await.unwrap();
    for (i, (_, value)) in got.iter().enumerate() {
        assert_eq!(value, &Value::Count(i as u64));
    }
}
