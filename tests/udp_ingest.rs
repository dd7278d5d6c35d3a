use std::net::SocketAddr;
use std::time::Duration;

use http_body_util::{BodyExt, Collected, Empty};
use hyper::body::{Buf, Bytes};
use hyper::{StatusCode, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use tokio::net::{TcpListener, UdpSocket};

use statsd_bridge::BridgeBuilder;

const MAPPING: &str = r#"
defaults:
  ttl: 0
mappings:
  - match: "test.dispatcher.*"
    name: "dispatcher_events_total"
    help: "Dispatcher outcomes."
    labels:
      outcome: "$1"
"#;

#[tokio::test]
async fn udp_ingest_to_scrape() {
    let udp_address = available_udp_address().await;
    let http_address = available_tcp_address().await;

    let (bridge, _handle) = BridgeBuilder::new()
        .udp_listen_address(Some(udp_address))
        .http_listen_address(http_address)
        .mapping_yaml(MAPPING)
        .expect("mapping should parse")
        .build()
        .expect("configuration should be valid");
    tokio::spawn(bridge.run());

    let health_uri: Uri = format!("http://{http_address}/health").parse().expect("valid uri");
    wait_for_health(&health_uri).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("client socket");
    for line in ["test.dispatcher.succeeded:2|c", "foo.bar:320|ms", "bar:5|g|#host:a"] {
        socket.send_to(line.as_bytes(), udp_address).await.expect("send datagram");
    }

    let metrics_uri: Uri = format!("http://{http_address}/metrics").parse().expect("valid uri");
    let expected = [
        "# HELP dispatcher_events_total Dispatcher outcomes.",
        "# TYPE dispatcher_events_total counter",
        "dispatcher_events_total{outcome=\"succeeded\"} 2\n",
        "# TYPE foo_bar summary",
        "foo_bar_sum 0.32\n",
        "foo_bar_count 1\n",
        "bar{host=\"a\"} 5\n",
        "statsd_bridge_udp_packets_total 3\n",
    ];

    let mut body = String::new();
    for _ in 0..100 {
        let (status, bytes) = read_from(&metrics_uri).await;
        assert_eq!(status, StatusCode::OK);
        body = String::from_utf8(bytes).expect("exposition output is utf-8");
        if expected.iter().all(|fragment| body.contains(fragment)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let missing: Vec<_> =
        expected.iter().filter(|fragment| !body.contains(*fragment)).collect();
    panic!("scrape output never converged; missing {missing:?} in:\n{body}");
}

async fn wait_for_health(uri: &Uri) {
    for _ in 0..100 {
        let (status, body) = read_from(uri).await;
        if status == StatusCode::OK && body == b"OK" {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("scrape endpoint never became healthy at {uri}");
}

async fn available_udp_address() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("probe bind");
    socket.local_addr().expect("probe local addr")
}

async fn available_tcp_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("probe bind");
    listener.local_addr().expect("probe local addr")
}

async fn read_from(endpoint: &Uri) -> (StatusCode, Vec<u8>) {
    let client =
        Client::builder(hyper_util::rt::TokioExecutor::new()).build(HttpConnector::new());

    let request = hyper::Request::builder()
        .uri(endpoint.to_string())
        .body(Empty::<Bytes>::new())
        .unwrap_or_else(|e| panic!("failed building request: {e:?}"));

    let response = match client.request(request).await {
        Ok(response) => response,
        // The server side may not be accepting yet.
        Err(_) => return (StatusCode::SERVICE_UNAVAILABLE, Vec::new()),
    };

    let status = response.status();
    let mut body = response
        .into_body()
        .collect()
        .await
        .map(Collected::aggregate)
        .unwrap_or_else(|e| panic!("error reading response: {e:?}"));
    let bytes = body.copy_to_bytes(body.remaining()).to_vec();

    (status, bytes)
}
