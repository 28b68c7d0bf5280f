//! End-to-end tests: client channel → service → mock origin.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use request_service::protocol::{max_chunk_payload, RequestId, ServiceEvent};
use request_service::request::{ErrorKind, Headers};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use common::{events_until_done, spawn_origin, test_config, Reply, TestService};

const WITHIN: Duration = Duration::from_secs(10);

fn body_of(events: &[ServiceEvent], id: RequestId) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            ServiceEvent::DataChunk { request_id, bytes } if *request_id == id => Some(bytes.to_vec()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn failure_of(events: &[ServiceEvent]) -> Option<ErrorKind> {
    events.iter().find_map(|e| match e {
        ServiceEvent::RequestFailed { error_kind, .. } => Some(*error_kind),
        _ => None,
    })
}

#[tokio::test]
async fn two_chunk_body_arrives_in_order() {
    let origin = spawn_origin(|_| Reply::status(200).chunked(&["o", "k"], Duration::from_millis(50))).await;
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut client = service.connect();

    let id = client.start_request(1, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();
    let events = events_until_done(&mut client, id, WITHIN).await;

    assert_eq!(events.len(), 4, "{:?}", events);
    assert!(matches!(&events[0], ServiceEvent::HeadersAvailable { request_id, status: 200, .. } if *request_id == id));
    assert_eq!(events[1], ServiceEvent::DataChunk { request_id: id, bytes: Bytes::from_static(b"o") });
    assert_eq!(events[2], ServiceEvent::DataChunk { request_id: id, bytes: Bytes::from_static(b"k") });
    assert_eq!(events[3], ServiceEvent::RequestComplete { request_id: id });
}

#[tokio::test]
async fn redirect_chain_reports_only_final_response() {
    let origin = spawn_origin(|seen| match seen.target.as_str() {
        "/start" => Reply::redirect(302, "/one"),
        "/one" => Reply::redirect(302, "/two"),
        "/two" => Reply::redirect(302, "/final"),
        _ => Reply::ok("landed").header("X-Final", "yes"),
    })
    .await;
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut client = service.connect();

    let id = client.start_request(1, "GET", &origin.url("/start"), Headers::new(), None).await.unwrap();
    let events = events_until_done(&mut client, id, WITHIN).await;

    let headers: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ServiceEvent::HeadersAvailable { status, headers, .. } => Some((*status, headers.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].0, 200);
    assert_eq!(headers[0].1.get("x-final"), Some("yes"));
    assert_eq!(body_of(&events, id), b"landed");
    assert_eq!(events.last(), Some(&ServiceEvent::RequestComplete { request_id: id }));

    let targets: Vec<_> = origin.seen().into_iter().map(|s| s.target).collect();
    assert_eq!(targets, vec!["/start", "/one", "/two", "/final"]);
}

#[tokio::test]
async fn endless_redirects_fail() {
    let origin = spawn_origin(|_| Reply::redirect(302, "/again")).await;
    let mut config = test_config();
    config.redirects.max_redirects = 3;
    let service = TestService::trusting_test_ca(config).await;
    let mut client = service.connect();

    let id = client.start_request(1, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();
    let events = events_until_done(&mut client, id, WITHIN).await;

    assert_eq!(events.len(), 1);
    assert_eq!(failure_of(&events), Some(ErrorKind::TooManyRedirects));
    assert_eq!(origin.seen().len(), 4);
}

#[tokio::test]
async fn redirects_delivered_when_following_disabled() {
    let origin = spawn_origin(|_| Reply::redirect(301, "/elsewhere")).await;
    let mut config = test_config();
    config.redirects.follow = false;
    let service = TestService::trusting_test_ca(config).await;
    let mut client = service.connect();

    let id = client.start_request(1, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();
    let exchange = client.collect(id).await.unwrap();
    assert_eq!(exchange.status, Some(301));
    assert_eq!(exchange.headers.get("location"), Some("/elsewhere"));
    assert_eq!(origin.seen().len(), 1);
}

#[tokio::test]
async fn see_other_turns_post_into_get() {
    let origin = spawn_origin(|seen| match seen.target.as_str() {
        "/submit" => Reply::redirect(303, "/result"),
        _ => Reply::ok("done"),
    })
    .await;
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut client = service.connect();

    let headers: Headers = [("Content-Type", "text/plain"), ("Accept", "*/*")].into_iter().collect();
    let id = client
        .start_request(1, "POST", &origin.url("/submit"), headers, Some(Bytes::from_static(b"payload")))
        .await
        .unwrap();
    let exchange = client.collect(id).await.unwrap();
    assert!(exchange.is_success());

    let seen = origin.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].body, b"payload");
    assert_eq!(seen[1].method, "GET");
    assert!(seen[1].body.is_empty());
    assert_eq!(seen[1].header("content-type"), None);
    assert_eq!(seen[1].header("accept"), Some("*/*"));
}

#[tokio::test]
async fn host_header_comes_from_url() {
    let origin = spawn_origin(|_| Reply::ok("")).await;
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut client = service.connect();

    let headers: Headers = [("Host", "evil.test")].into_iter().collect();
    let id = client.start_request(1, "GET", &origin.url("/h?x=1"), headers, None).await.unwrap();
    client.collect(id).await.unwrap();

    let seen = origin.seen();
    assert_eq!(seen[0].target, "/h?x=1");
    assert_eq!(seen[0].header("host"), Some(format!("127.0.0.1:{}", origin.addr.port()).as_str()));
}

#[tokio::test]
async fn unresolvable_host_fails_with_dns() {
    let mut config = test_config();
    config.timeouts.connect_secs = 30;
    let service = TestService::trusting_test_ca(config).await;
    let mut client = service.connect();

    let id = client
        .start_request(1, "GET", "http://no-such-host.invalid/", Headers::new(), None)
        .await
        .unwrap();
    let events = events_until_done(&mut client, id, Duration::from_secs(40)).await;
    assert_eq!(failure_of(&events), Some(ErrorKind::Dns));
}

#[tokio::test]
async fn refused_connection_fails_with_connect() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut client = service.connect();

    let url = format!("http://127.0.0.1:{}/", port);
    let id = client.start_request(1, "GET", &url, Headers::new(), None).await.unwrap();
    let events = events_until_done(&mut client, id, WITHIN).await;
    assert_eq!(events.len(), 1);
    assert_eq!(failure_of(&events), Some(ErrorKind::Connect));
}

#[tokio::test]
async fn invalid_requests_fail_without_network() {
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut client = service.connect();

    for (id, method, url) in [(1, "GET", "not a url"), (2, "GET", "ftp://a.test/"), (3, "B A D", "http://a.test/")] {
        let id = client.start_request(id, method, url, Headers::new(), None).await.unwrap();
        let events = events_until_done(&mut client, id, WITHIN).await;
        assert_eq!(failure_of(&events), Some(ErrorKind::InvalidRequest), "{} {}", method, url);
    }

    // The id was never registered, so it can be used again.
    let id = client.start_request(1, "GET", "gopher://a.test/", Headers::new(), None).await.unwrap();
    let events = events_until_done(&mut client, id, WITHIN).await;
    assert_eq!(failure_of(&events), Some(ErrorKind::InvalidRequest));
}

#[tokio::test]
async fn sequential_requests_reuse_connection() {
    let origin = spawn_origin(|_| Reply::ok("again")).await;
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut client = service.connect();

    for id in 1..=3 {
        let id = client.start_request(id, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();
        let exchange = client.collect(id).await.unwrap();
        assert_eq!(&exchange.body[..], b"again");
    }
    assert_eq!(origin.accepted(), 1);
}

#[tokio::test]
async fn connection_close_prevents_reuse() {
    let origin = spawn_origin(|_| Reply::ok("bye").header("Connection", "close")).await;
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut client = service.connect();

    for id in 1..=2 {
        let id = client.start_request(id, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();
        assert!(client.collect(id).await.unwrap().is_success());
    }
    assert_eq!(origin.accepted(), 2);
}

#[tokio::test]
async fn idle_connections_expire() {
    let origin = spawn_origin(|_| Reply::ok("x")).await;
    let mut config = test_config();
    config.timeouts.idle_secs = 1;
    let service = TestService::trusting_test_ca(config).await;
    let mut client = service.connect();

    let id = client.start_request(1, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();
    client.collect(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let id = client.start_request(2, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();
    client.collect(id).await.unwrap();

    assert_eq!(origin.accepted(), 2);
}

#[tokio::test]
async fn cancelled_request_goes_quiet_and_its_connection_is_not_reused() {
    let origin = spawn_origin(|seen| match seen.target.as_str() {
        "/slow" => Reply::status(200).chunked(&["first", "never"], Duration::from_secs(2)),
        _ => Reply::ok("fast"),
    })
    .await;
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut client = service.connect();

    let slow = client.start_request(1, "GET", &origin.url("/slow"), Headers::new(), None).await.unwrap();
    let first = client.next_event().await.unwrap().unwrap();
    assert!(matches!(first, ServiceEvent::HeadersAvailable { status: 200, .. }));
    client.cancel_request(slow).await.unwrap();

    let fast = client.start_request(2, "GET", &origin.url("/fast"), Headers::new(), None).await.unwrap();
    let events = events_until_done(&mut client, fast, WITHIN).await;
    assert!(events.iter().all(|e| e.request_id() == fast), "{:?}", events);
    assert_eq!(body_of(&events, fast), b"fast");
    assert_eq!(origin.accepted(), 2);

    // Nothing more arrives for the cancelled request.
    let late = tokio::time::timeout(Duration::from_secs(3), client.next_event()).await;
    assert!(late.is_err(), "unexpected event {:?}", late);
}

#[tokio::test]
async fn cancel_of_unknown_request_is_ignored() {
    let origin = spawn_origin(|_| Reply::ok("fine")).await;
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut client = service.connect();

    client.cancel_request(RequestId(99)).await.unwrap();
    let id = client.start_request(1, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();
    assert!(client.collect(id).await.unwrap().is_success());
}

#[tokio::test]
async fn request_ids_are_scoped_per_session() {
    let origin = spawn_origin(|seen| Reply::ok(&seen.target)).await;
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut a = service.connect();
    let mut b = service.connect();

    let id_a = a.start_request(1, "GET", &origin.url("/a"), Headers::new(), None).await.unwrap();
    let id_b = b.start_request(1, "GET", &origin.url("/b"), Headers::new(), None).await.unwrap();

    assert_eq!(&a.collect(id_a).await.unwrap().body[..], b"/a");
    assert_eq!(&b.collect(id_b).await.unwrap().body[..], b"/b");
}

#[tokio::test]
async fn disconnecting_one_session_leaves_others_running() {
    let origin = spawn_origin(|seen| match seen.target.as_str() {
        "/hang" => Reply::hang(),
        _ => Reply::status(200).chunked(&["a", "b"], Duration::from_millis(200)),
    })
    .await;
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut doomed = service.connect();
    let mut survivor = service.connect();

    doomed.start_request(1, "GET", &origin.url("/hang"), Headers::new(), None).await.unwrap();
    let id = survivor.start_request(1, "GET", &origin.url("/stream"), Headers::new(), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(doomed);

    let events = events_until_done(&mut survivor, id, WITHIN).await;
    assert_eq!(body_of(&events, id), b"ab");

    let id = survivor.start_request(2, "GET", &origin.url("/again"), Headers::new(), None).await.unwrap();
    assert!(survivor.collect(id).await.unwrap().is_success());
}

#[tokio::test]
async fn malformed_frame_closes_only_that_channel() {
    let origin = spawn_origin(|_| Reply::ok("still here")).await;
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut bad = service.connect();
    let mut good = service.connect();

    bad.send_raw(&[0, 0, 0, 3, b'x', b'y', b'z']).await.unwrap();
    let closed = tokio::time::timeout(WITHIN, bad.next_event()).await.unwrap().unwrap();
    assert_eq!(closed, None);

    let id = good.start_request(1, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();
    assert_eq!(&good.collect(id).await.unwrap().body[..], b"still here");
}

#[tokio::test]
async fn duplicate_live_request_id_closes_channel() {
    let origin = spawn_origin(|_| Reply::hang()).await;
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut client = service.connect();

    client.start_request(7, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();
    client.start_request(7, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();

    let closed = tokio::time::timeout(WITHIN, client.next_event()).await.unwrap().unwrap();
    assert_eq!(closed, None);
}

#[tokio::test]
async fn missing_response_times_out() {
    let origin = spawn_origin(|_| Reply::hang()).await;
    let mut config = test_config();
    config.timeouts.response_secs = 1;
    let service = TestService::trusting_test_ca(config).await;
    let mut client = service.connect();

    let id = client.start_request(1, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();
    let events = events_until_done(&mut client, id, WITHIN).await;
    assert_eq!(failure_of(&events), Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn shutdown_frame_stops_the_service() {
    let origin = spawn_origin(|_| Reply::hang()).await;
    let service = TestService::trusting_test_ca(test_config()).await;
    let mut client = service.connect();

    client.start_request(1, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();
    client.shutdown().await.unwrap();

    let mut service = service;
    tokio::time::timeout(WITHIN, &mut service.task).await.unwrap().unwrap();
    assert_eq!(client.next_event().await.unwrap(), None);
    assert!(service.handle.attach(tokio::io::duplex(64).0).is_err());
}

#[tokio::test]
async fn body_larger_than_frame_limit_arrives_in_pieces() {
    let payload: String = (0..8192).map(|i| (b'a' + (i % 26) as u8) as char).collect();
    let served = payload.clone();
    let origin = spawn_origin(move |_| Reply::ok(&served)).await;
    let mut config = test_config();
    config.listener.max_frame_bytes = 4096;
    let service = TestService::trusting_test_ca(config).await;
    let mut client = service.connect();

    let id = client.start_request(1, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();
    let events = events_until_done(&mut client, id, WITHIN).await;

    assert_eq!(body_of(&events, id), payload.as_bytes());
    let limit = max_chunk_payload(4096);
    let chunks: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            ServiceEvent::DataChunk { bytes, .. } => Some(bytes.len()),
            _ => None,
        })
        .collect();
    assert!(chunks.len() >= 3, "{:?}", chunks);
    assert!(chunks.iter().all(|len| *len <= limit), "{:?}", chunks);
    assert_eq!(events.last(), Some(&ServiceEvent::RequestComplete { request_id: id }));
}

#[tokio::test]
async fn event_too_large_for_a_frame_closes_channel() {
    let origin = spawn_origin(|seen| match seen.target.as_str() {
        "/big" => Reply::ok("x").header("X-Padding", &"p".repeat(5000)),
        _ => Reply::ok("small"),
    })
    .await;
    let mut config = test_config();
    config.listener.max_frame_bytes = 4096;
    let service = TestService::trusting_test_ca(config).await;

    let mut doomed = service.connect();
    doomed.start_request(1, "GET", &origin.url("/big"), Headers::new(), None).await.unwrap();
    let closed = tokio::time::timeout(WITHIN, doomed.next_event()).await.unwrap().unwrap();
    assert_eq!(closed, None);

    let mut other = service.connect();
    let id = other.start_request(1, "GET", &origin.url("/"), Headers::new(), None).await.unwrap();
    assert_eq!(&other.collect(id).await.unwrap().body[..], b"small");
}

#[tokio::test]
async fn stalled_client_stalls_the_origin() {
    const TOTAL: usize = 64 * 1024 * 1024;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://127.0.0.1:{}/", listener.local_addr().unwrap().port());
    let written = Arc::new(AtomicUsize::new(0));
    let counter = written.clone();
    let origin = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut head = [0u8; 4096];
        let _ = socket.read(&mut head).await;
        let status = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", TOTAL);
        if socket.write_all(status.as_bytes()).await.is_err() {
            return;
        }
        let block = vec![b'z'; 64 * 1024];
        while counter.load(Ordering::SeqCst) < TOTAL {
            if socket.write_all(&block).await.is_err() {
                return;
            }
            counter.fetch_add(block.len(), Ordering::SeqCst);
        }
    });

    let service = TestService::trusting_test_ca(test_config()).await;
    let mut client = service.connect();
    let id = client.start_request(1, "GET", &url, Headers::new(), None).await.unwrap();
    let first = tokio::time::timeout(WITHIN, client.next_event()).await.unwrap().unwrap();
    assert!(matches!(first, Some(ServiceEvent::HeadersAvailable { request_id, .. }) if request_id == id));

    // Stop reading and let every buffer between client and origin fill up.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let stalled = written.load(Ordering::SeqCst);
    assert!(stalled < TOTAL / 2, "origin wrote {} of {} bytes to a stalled client", stalled, TOTAL);

    tokio::time::timeout(WITHIN, async {
        while written.load(Ordering::SeqCst) <= stalled {
            client.next_event().await.unwrap().expect("channel closed early");
        }
    })
    .await
    .expect("origin did not resume once the client read again");
    origin.abort();
}
