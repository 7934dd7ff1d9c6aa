mod common;

use std::time::Duration;

use callbox::options::{Priority, QueueOptions};
use callbox::{AdmissionQueue, CallOptions, Client, Params};
use common::{MockTransport, Scripted};
use serde_json::json;
use tokio::time::Instant;

const LATENCY: Duration = Duration::from_millis(100);

fn slow_transport() -> MockTransport {
    MockTransport::new(|request, _| Scripted::delayed(LATENCY, Ok(json!(request.endpoint))))
}

#[tokio::test(start_paused = true)]
async fn sequential_runs_one_at_a_time_in_submission_order() {
    let transport = slow_transport();
    let client = Client::new(transport.clone());
    let options = CallOptions::new().queue(QueueOptions::sequential());
    let origin = Instant::now();

    let (a, b, c) = tokio::join!(
        client.get("/1", Params::new(), options.clone()),
        client.get("/2", Params::new(), options.clone()),
        client.get("/3", Params::new(), options),
    );
    assert_eq!((a, b, c), (Ok(json!("/1")), Ok(json!("/2")), Ok(json!("/3"))));

    let calls = transport.calls();
    let order: Vec<_> = calls.iter().map(|call| call.request.endpoint.as_str()).collect();
    assert_eq!(order, ["/1", "/2", "/3"]);
    assert_eq!(
        transport.starts_since(origin),
        vec![Duration::ZERO, LATENCY, 2 * LATENCY]
    );
    for pair in calls.windows(2) {
        assert!(pair[1].started >= pair[0].finished.unwrap());
    }
    assert_eq!(transport.peak(), 1);
}

#[tokio::test(start_paused = true)]
async fn parallel_admits_up_to_the_limit() {
    let transport = slow_transport();
    let client = Client::new(transport.clone());
    let options = CallOptions::new().queue(QueueOptions::parallel(2));
    let origin = Instant::now();

    let _ = tokio::join!(
        client.get("/1", Params::new(), options.clone()),
        client.get("/2", Params::new(), options.clone()),
        client.get("/3", Params::new(), options),
    );
    assert_eq!(
        transport.starts_since(origin),
        vec![Duration::ZERO, Duration::ZERO, LATENCY]
    );
    assert_eq!(transport.peak(), 2);
}

#[tokio::test(start_paused = true)]
async fn higher_priority_waiters_go_first() {
    let transport = slow_transport();
    let client = Client::new(transport.clone());
    let at = |priority| CallOptions::new().queue(QueueOptions::sequential().priority(priority));

    let _ = tokio::join!(
        client.get("/blocker", Params::new(), at(Priority::Normal)),
        client.get("/low", Params::new(), at(Priority::Low)),
        client.get("/normal-1", Params::new(), at(Priority::Normal)),
        client.get("/high", Params::new(), at(Priority::High)),
        client.get("/normal-2", Params::new(), at(Priority::Normal)),
    );
    let order: Vec<_> = transport
        .calls()
        .into_iter()
        .map(|call| call.request.endpoint)
        .collect();
    assert_eq!(order, ["/blocker", "/high", "/normal-1", "/normal-2", "/low"]);
}

#[tokio::test(start_paused = true)]
async fn concurrency_override_is_queue_wide() {
    let transport = slow_transport();
    let client = Client::new(transport.clone());
    assert_eq!(client.queue().limit(), 4);

    client
        .get("/a", Params::new(), CallOptions::new().queue(QueueOptions::parallel(2)))
        .await
        .unwrap();
    assert_eq!(client.queue().limit(), 2);

    client
        .get("/b", Params::new(), CallOptions::new().queue(QueueOptions::sequential()))
        .await
        .unwrap();
    assert_eq!(client.queue().limit(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_calls_release_their_permit() {
    let transport = MockTransport::new(|_, _| Scripted::status(500));
    let queue = AdmissionQueue::new(1);
    let client = Client::builder()
        .transport(transport.clone())
        .queue(queue.clone())
        .build();
    let options = CallOptions::new().queue(QueueOptions::sequential());

    for endpoint in ["/a", "/b", "/c"] {
        assert!(client.get(endpoint, Params::new(), options.clone()).await.is_err());
    }
    assert_eq!(transport.count(), 3);
    assert_eq!(queue.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_waiter_gives_up_its_place() {
    let transport = slow_transport();
    let client = Client::new(transport.clone());
    let options = CallOptions::new().queue(QueueOptions::sequential());

    let mut running = client.get("/running", Params::new(), options.clone());
    let mut waiting = client.get("/waiting", Params::new(), options.clone());
    let last = client.get("/last", Params::new(), options);

    let _ = tokio::time::timeout(Duration::from_millis(10), &mut running).await;
    let _ = tokio::time::timeout(Duration::from_millis(10), &mut waiting).await;
    waiting.cancel();

    let (running, last) = tokio::join!(running, last);
    assert!(running.is_ok() && last.is_ok());
    let order: Vec<_> = transport
        .calls()
        .into_iter()
        .map(|call| call.request.endpoint)
        .collect();
    assert_eq!(order, ["/running", "/last"]);
    assert_eq!(client.queue().active(), 0);
}
