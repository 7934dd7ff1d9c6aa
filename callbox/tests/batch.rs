mod common;

use std::time::Duration;

use callbox::options::{BatchOptions, RetryOptions};
use callbox::{CallError, CallOptions, Client, HttpMethod, TransportError};
use common::{MockTransport, Scripted};
use serde_json::{Value, json};
use tokio::time::Instant;

/// Answers a list of ids with `{id, name}` records in reverse order.
fn directory() -> MockTransport {
    MockTransport::new(|request, _| {
        let ids = request
            .body
            .clone()
            .or_else(|| request.params.get("id").cloned())
            .unwrap_or(Value::Null);
        let mut records: Vec<Value> = ids
            .as_array()
            .into_iter()
            .flatten()
            .map(|entry| {
                let id = entry.get("id").unwrap_or(entry).clone();
                json!({"id": id, "name": format!("user-{id}")})
            })
            .collect();
        records.reverse();
        Scripted::ok(Value::Array(records))
    })
}

fn by_id(response: &Value, payload: &Value, _index: usize) -> Result<Value, String> {
    response
        .as_array()
        .and_then(|records| records.iter().find(|record| record["id"] == payload["id"]))
        .cloned()
        .ok_or_else(|| format!("no record for {payload}"))
}

fn batched(batch: BatchOptions) -> CallOptions {
    CallOptions::new().batch(batch)
}

#[tokio::test(start_paused = true)]
async fn distinct_payloads_share_one_invocation() {
    let transport = directory();
    let client = Client::new(transport.clone());
    let options = batched(BatchOptions::enabled().size(10).interval(Duration::ZERO).selector(by_id));

    let (a, b, c) = tokio::join!(
        client.post("/users/lookup", json!({"id": 1}), options.clone()),
        client.post("/users/lookup", json!({"id": 2}), options.clone()),
        client.post("/users/lookup", json!({"id": 3}), options),
    );

    assert_eq!(transport.count(), 1);
    assert_eq!(
        transport.calls()[0].request.body,
        Some(json!([{"id": 1}, {"id": 2}, {"id": 3}]))
    );
    assert_eq!(a, Ok(json!({"id": 1, "name": "user-1"})));
    assert_eq!(b, Ok(json!({"id": 2, "name": "user-2"})));
    assert_eq!(c, Ok(json!({"id": 3, "name": "user-3"})));
}

#[tokio::test(start_paused = true)]
async fn bodyless_batches_send_ids_as_query() {
    let transport = MockTransport::new(|request, _| {
        let ids = request.params["id"].as_array().cloned().unwrap_or_default();
        Scripted::ok(Value::Array(
            ids.iter().map(|id| json!(format!("user-{id}"))).collect(),
        ))
    });
    let client = Client::new(transport.clone());
    let options = CallOptions::new()
        .method(HttpMethod::Get)
        .batch(BatchOptions::enabled().interval(Duration::ZERO));

    let (a, b, c) = tokio::join!(
        client.send("/users", Some(json!(1)), options.clone()),
        client.send("/users", Some(json!(2)), options.clone()),
        client.send("/users", Some(json!(3)), options),
    );

    let request = &transport.calls()[0].request;
    assert_eq!(request.body, None);
    assert_eq!(request.params["id"], json!([1, 2, 3]));
    assert_eq!(
        (a, b, c),
        (Ok(json!("user-1")), Ok(json!("user-2")), Ok(json!("user-3")))
    );
}

#[tokio::test(start_paused = true)]
async fn full_buffer_flushes_without_waiting() {
    let transport = directory();
    let client = Client::new(transport.clone());
    let options = batched(
        BatchOptions::enabled()
            .size(2)
            .interval(Duration::from_secs(3600))
            .selector(by_id),
    );
    let origin = Instant::now();

    let (a, b) = tokio::join!(
        client.post("/users/lookup", json!({"id": 1}), options.clone()),
        client.post("/users/lookup", json!({"id": 2}), options),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(transport.starts_since(origin), vec![Duration::ZERO]);
}

#[tokio::test(start_paused = true)]
async fn quiet_period_flush_waits_for_the_last_arrival() {
    let transport = directory();
    let client = Client::new(transport.clone());
    let options = batched(BatchOptions::enabled().interval(Duration::from_millis(50)).selector(by_id));
    let origin = Instant::now();

    let first = client.post("/users/lookup", json!({"id": 1}), options.clone());
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = client.post("/users/lookup", json!({"id": 2}), options);

    let (first, second) = tokio::join!(first, second);
    assert!(first.is_ok() && second.is_ok());
    assert_eq!(transport.starts_since(origin), vec![Duration::from_millis(80)]);
}

#[tokio::test(start_paused = true)]
async fn flush_failure_reaches_every_item_without_retry() {
    let transport = MockTransport::new(|_, _| Scripted::status(502));
    let client = Client::new(transport.clone());
    let options = batched(BatchOptions::enabled().interval(Duration::ZERO))
        .retry(RetryOptions::new(3).fallback_value(json!("ignored")));

    let (a, b) = tokio::join!(
        client.post("/jobs", json!({"job": "a"}), options.clone()),
        client.post("/jobs", json!({"job": "b"}), options),
    );
    let expected = Err(CallError::Transport(TransportError::Status {
        status: 502,
        body: None,
    }));
    assert_eq!(a, expected);
    assert_eq!(b, expected);
    assert_eq!(transport.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn selector_failure_is_scoped_to_its_item() {
    let transport = MockTransport::ok(json!([{"id": 1, "name": "user-1"}]));
    let client = Client::new(transport.clone());
    let options = batched(BatchOptions::enabled().interval(Duration::ZERO).selector(by_id));

    let (found, missing) = tokio::join!(
        client.post("/users/lookup", json!({"id": 1}), options.clone()),
        client.post("/users/lookup", json!({"id": 9}), options),
    );
    assert_eq!(found, Ok(json!({"id": 1, "name": "user-1"})));
    assert!(matches!(missing, Err(CallError::Selector(_))));
}

#[tokio::test(start_paused = true)]
async fn identical_payloads_are_sent_once() {
    let transport = directory();
    let client = Client::new(transport.clone());
    let options = batched(BatchOptions::enabled().interval(Duration::ZERO).selector(by_id));

    let first = client.post("/users/lookup", json!({"id": 7}), options.clone());
    let second = client.post("/users/lookup", json!({"id": 7}), options);
    assert!(second.is_shared());

    let (first, second) = tokio::join!(first, second);
    assert_eq!(first, second);
    assert_eq!(transport.calls()[0].request.body, Some(json!([{"id": 7}])));
}

#[tokio::test(start_paused = true)]
async fn dropped_item_still_takes_part() {
    let transport = directory();
    let client = Client::new(transport.clone());
    let options = batched(BatchOptions::enabled().interval(Duration::from_millis(20)).selector(by_id));

    let abandoned = client.post("/users/lookup", json!({"id": 1}), options.clone());
    let kept = client.post("/users/lookup", json!({"id": 2}), options);
    abandoned.cancel();

    assert_eq!(kept.await, Ok(json!({"id": 2, "name": "user-2"})));
    assert_eq!(
        transport.calls()[0].request.body,
        Some(json!([{"id": 1}, {"id": 2}]))
    );
}

#[tokio::test(start_paused = true)]
async fn timeout_bounds_the_combined_call() {
    let transport = MockTransport::new(|_, _| Scripted::Hang);
    let client = Client::new(transport.clone());
    let options = batched(BatchOptions::enabled().interval(Duration::ZERO))
        .timeout(Duration::from_millis(40));

    let (a, b) = tokio::join!(
        client.post("/slow", json!(1), options.clone()),
        client.post("/slow", json!(2), options),
    );
    let expected = Err(CallError::Timeout(Duration::from_millis(40)));
    assert_eq!(a, expected);
    assert_eq!(b, expected);
    assert_eq!(transport.dropped(), 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_key_endpoint_and_combine() {
    let transport = MockTransport::new(|request, _| {
        let ids = request.body.as_ref().map(|body| body["ids"].clone()).unwrap_or_default();
        Scripted::ok(json!({"ids": ids}))
    });
    let client = Client::new(transport.clone());
    let options = batched(
        BatchOptions::enabled()
            .key("lookups")
            .endpoint("/bulk")
            .interval(Duration::ZERO)
            .combine(|payloads| json!({"ids": payloads}))
            .selector(|response, _, index| Ok(response["ids"][index].clone())),
    );

    let (user, post) = tokio::join!(
        client.post("/users", json!("u1"), options.clone()),
        client.post("/posts", json!("p1"), options),
    );
    assert_eq!((user, post), (Ok(json!("u1")), Ok(json!("p1"))));

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].request.endpoint, "/bulk");
    assert_eq!(calls[0].request.body, Some(json!({"ids": ["u1", "p1"]})));
}

#[tokio::test(start_paused = true)]
async fn cached_bodyless_items_keep_their_own_entries() {
    let transport = directory();
    let client = Client::new(transport.clone());
    let options = CallOptions::new()
        .method(HttpMethod::Get)
        .cache_for(Duration::from_secs(30))
        .batch(BatchOptions::enabled().interval(Duration::ZERO).selector(by_id));

    let (first, second) = tokio::join!(
        client.send("/users", Some(json!({"id": 1})), options.clone()),
        client.send("/users", Some(json!({"id": 2})), options.clone()),
    );
    assert_eq!(first, Ok(json!({"id": 1, "name": "user-1"})));
    assert_eq!(second, Ok(json!({"id": 2, "name": "user-2"})));
    assert_eq!(client.cache().len(), 2);

    let again = client.send("/users", Some(json!({"id": 2})), options.clone());
    assert!(again.is_ready());
    assert_eq!(again.await, Ok(json!({"id": 2, "name": "user-2"})));

    // An id nobody asked for yet is not answered from another item's entry.
    let other = client.send("/users", Some(json!({"id": 3})), options);
    assert!(!other.is_ready());
    assert_eq!(other.await, Ok(json!({"id": 3, "name": "user-3"})));
    assert_eq!(transport.count(), 2);
}
