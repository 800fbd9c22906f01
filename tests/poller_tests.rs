use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use icomfort::{Command, CredentialConfig, IComfortClient, Poller};
use serde_json::json;
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> IComfortClient {
    IComfortClient::builder()
        .base_url(server.uri())
        .credentials(CredentialConfig::new("user", "pass", "WS123"))
        .build()
        .unwrap()
}

async fn mount_refresh(server: &MockServer, delay: Duration) {
    Mock::given(method("GET"))
        .and(path("/GetTStatInfoList"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"ReturnStatus": "SUCCESS", "tStatInfo": []}))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

fn counting(poller: Poller) -> (Poller, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let poller = poller.on_outcome(move |outcome| {
        assert!(outcome.is_ok(), "{:?}", outcome.error);
        c.fetch_add(1, Ordering::SeqCst);
    });
    (poller, count)
}

#[tokio::test(flavor = "multi_thread")]
async fn ticks_until_stopped() {
    let server = MockServer::start().await;
    mount_refresh(&server, Duration::ZERO).await;

    let client = Arc::new(client_for(&server));
    let (poller, count) = counting(Poller::new(client, Duration::from_millis(50)).unwrap());
    let handle = poller.start();

    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.stop().await;
    let seen = count.load(Ordering::SeqCst);
    assert!(seen >= 2, "expected at least two ticks, saw {seen}");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count.load(Ordering::SeqCst), seen);
}

#[tokio::test(flavor = "multi_thread")]
async fn first_tick_waits_one_interval() {
    let server = MockServer::start().await;
    mount_refresh(&server, Duration::ZERO).await;

    let client = Arc::new(client_for(&server));
    let (poller, count) = counting(Poller::new(client, Duration::from_secs(10)).unwrap());
    let handle = poller.start();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handle.is_running());
    handle.stop().await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_delivers_in_flight_tick() {
    let server = MockServer::start().await;
    mount_refresh(&server, Duration::from_millis(250)).await;

    let client = Arc::new(client_for(&server));
    let (poller, count) = counting(Poller::new(client, Duration::from_millis(20)).unwrap());
    let handle = poller.start();

    tokio::time::sleep(Duration::from_millis(80)).await;
    handle.stop().await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn polls_configured_command() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/GetSystemsInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Systems": []})))
        .mount(&server)
        .await;

    let client = Arc::new(client_for(&server));
    let poller = Poller::new(client, Duration::from_millis(30))
        .unwrap()
        .command(Command::SystemInfo);
    let (poller, count) = counting(poller);
    let handle = poller.start();

    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.stop().await;
    assert!(count.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn polling_disabled_by_default() {
    let server = MockServer::start().await;
    let client = Arc::new(client_for(&server));
    assert!(Poller::from_options(client).is_none());

    let client = IComfortClient::builder()
        .base_url(server.uri())
        .polling(60)
        .build()
        .unwrap();
    assert!(Poller::from_options(Arc::new(client)).is_some());
}

#[tokio::test]
async fn zero_interval_never_polls() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = Arc::new(client_for(&server));
    assert!(Poller::new(client.clone(), Duration::ZERO).is_none());
    assert!(Poller::new(client, Duration::from_millis(1)).is_some());
}
