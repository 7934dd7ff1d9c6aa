mod common;

use std::time::Duration;

use callbox::{CallError, CallOptions, Client, Params, TransportError};
use common::{MockTransport, Scripted, params};
use serde_json::json;
use tokio::time::timeout;

#[tokio::test(start_paused = true)]
async fn identical_calls_share_one_invocation() {
    let transport = MockTransport::echo(Duration::from_millis(20));
    let client = Client::new(transport.clone());

    let first = client.get("/posts", params(json!({"page": 1, "tag": "rust"})), CallOptions::new());
    // Same params in another order.
    let second = client.get("/posts", params(json!({"tag": "rust", "page": 1})), CallOptions::new());
    assert!(second.is_shared());

    let (first, second) = tokio::join!(first, second);
    assert_eq!(first, Ok(json!({"page": 1, "tag": "rust"})));
    assert_eq!(first, second);
    assert_eq!(transport.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn shared_failure_reaches_every_caller() {
    let transport = MockTransport::new(|_, _| Scripted::status(500));
    let client = Client::new(transport.clone());

    let (a, b) = tokio::join!(
        client.get("/flaky", Params::new(), CallOptions::new()),
        client.get("/flaky", Params::new(), CallOptions::new()),
    );
    let expected = Err(CallError::Transport(TransportError::Status {
        status: 500,
        body: None,
    }));
    assert_eq!(a, expected);
    assert_eq!(b, expected);
    assert_eq!(transport.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn raw_calls_run_independently() {
    let transport = MockTransport::echo(Duration::from_millis(20));
    let client = Client::new(transport.clone());

    let first = client.get("/posts", Params::new(), CallOptions::new().raw());
    let second = client.get("/posts", Params::new(), CallOptions::new().raw());
    assert!(!first.is_shared());

    let (first, second) = tokio::join!(first, second);
    assert_eq!(first, second);
    assert_eq!(transport.count(), 2);
    assert_eq!(transport.peak(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelling_raw_call_drops_its_invocation() {
    let transport = MockTransport::new(|_, _| Scripted::Hang);
    let client = Client::new(transport.clone());

    let mut handle = client.get("/slow", Params::new(), CallOptions::new().raw());
    assert!(timeout(Duration::from_millis(10), &mut handle).await.is_err());
    assert_eq!(transport.active(), 1);

    handle.cancel();
    assert_eq!(transport.active(), 0);
    assert_eq!(transport.dropped(), 1);
}

#[tokio::test(start_paused = true)]
async fn shared_call_survives_until_last_caller_detaches() {
    let transport = MockTransport::new(|_, _| Scripted::Hang);
    let client = Client::new(transport.clone());

    let mut first = client.get("/slow", Params::new(), CallOptions::new());
    let second = client.get("/slow", Params::new(), CallOptions::new());
    assert!(timeout(Duration::from_millis(10), &mut first).await.is_err());
    assert_eq!(transport.active(), 1);

    first.cancel();
    assert_eq!(transport.active(), 1, "second caller still attached");

    second.cancel();
    assert_eq!(transport.active(), 0);
    assert_eq!(transport.dropped(), 1);

    // The torn-down operation is not replayed.
    let mut third = client.get("/slow", Params::new(), CallOptions::new());
    assert!(!third.is_ready());
    assert!(timeout(Duration::from_millis(10), &mut third).await.is_err());
    assert_eq!(transport.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn settled_call_is_not_replayed() {
    let transport = MockTransport::new(|_, index| Scripted::ok(json!(index)));
    let client = Client::new(transport.clone());

    let first = client.get("/counter", Params::new(), CallOptions::new()).await;
    let second = client.get("/counter", Params::new(), CallOptions::new()).await;
    assert_eq!(first, Ok(json!(0)));
    assert_eq!(second, Ok(json!(1)));
}

#[tokio::test(start_paused = true)]
async fn different_bodies_do_not_share() {
    let transport = MockTransport::echo(Duration::from_millis(5));
    let client = Client::new(transport.clone());

    let (a, b) = tokio::join!(
        client.post("/items", json!({"name": "a"}), CallOptions::new()),
        client.post("/items", json!({"name": "b"}), CallOptions::new()),
    );
    assert_eq!(a, Ok(json!({"name": "a"})));
    assert_eq!(b, Ok(json!({"name": "b"})));
    assert_eq!(transport.count(), 2);
}
