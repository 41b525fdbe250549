//! Ordered process map over a worker pool sharing one hub.

use sb_dispatch::plan;
use sb_test_utils::TestHub;
use serde_json::{Value, json};
use statebus::protocol::Kwargs;
use statebus::{MapItemError, MapOptions, TaskRegistry, process_map, run_worker};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

const RESULT_LIMIT: Duration = Duration::from_secs(5);

fn square(item: &Value, _args: &[Value], _kwargs: &Kwargs) -> Result<Value, statebus::TaskFault> {
    let n = item
        .as_i64()
        .ok_or_else(|| statebus::TaskFault::new("square: integer item required"))?;
    Ok(json!(n * n))
}

fn reciprocal(
    item: &Value,
    _args: &[Value],
    _kwargs: &Kwargs,
) -> Result<Value, statebus::TaskFault> {
    let n = item.as_f64().unwrap_or(0.0);
    if n == 0.0 {
        panic!("division by zero");
    }
    Ok(json!(1.0 / n))
}

fn scale(item: &Value, args: &[Value], _kwargs: &Kwargs) -> Result<Value, statebus::TaskFault> {
    let n = item.as_i64().unwrap_or(0);
    let factor = args.first().and_then(Value::as_i64).unwrap_or(1);
    Ok(json!(n * factor))
}

fn math_registry() -> Arc<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    registry.register("square", square);
    registry.register("reciprocal", reciprocal);
    registry.register("scale", scale);
    Arc::new(registry)
}

fn options(workers: usize) -> MapOptions {
    MapOptions {
        workers: Some(workers),
        result_timeout: Some(RESULT_LIMIT),
        ..MapOptions::default()
    }
}

/// Test: squares come back in input order.
#[tokio::test]
async fn squares_arrive_in_input_order() {
    let hub = TestHub::start().await;

    let items = vec![json!(1), json!(2), json!(3), json!(4)];
    let stream = process_map(hub.endpoints(), math_registry(), "square", items, options(2))
        .await
        .unwrap();
    let values = stream.collect().await.unwrap();
    assert_eq!(values, vec![json!(1), json!(4), json!(9), json!(16)]);

    hub.stop().await;
}

/// Test: output order is the input order under every partitioning.
#[tokio::test]
async fn every_partitioning_preserves_order() {
    let hub = TestHub::start().await;

    let items: Vec<Value> = (0..10).map(|i| json!(i)).collect();
    let expected: Vec<Value> = (0..10).map(|i| json!(i * i)).collect();
    for workers in [1, 2, 3, 8, 16] {
        let mut stream = process_map(
            hub.endpoints(),
            math_registry(),
            "square",
            items.clone(),
            options(workers),
        )
        .await
        .unwrap();

        let mut values = Vec::new();
        while let Some(item) = stream.next().await {
            values.push(item.unwrap());
        }
        assert_eq!(values, expected, "workers = {workers}");
    }

    hub.stop().await;
}

/// Test: a failing item surfaces as an error at its input position, and the
/// stream continues past it.
#[tokio::test]
async fn failures_surface_at_their_position() {
    let hub = TestHub::start().await;

    let items = vec![json!(1), json!(0), json!(2)];
    let mut stream = process_map(
        hub.endpoints(),
        math_registry(),
        "reciprocal",
        items,
        options(2),
    )
    .await
    .unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap(), json!(1.0));
    match stream.next().await.unwrap() {
        Err(MapItemError::Task(failure)) => {
            assert_eq!(failure.index, 1);
            assert!(failure.message.contains("division by zero"));
        }
        other => panic!("expected a task failure at position 1, got {:?}", other),
    }
    assert_eq!(stream.next().await.unwrap().unwrap(), json!(0.5));
    assert!(stream.next().await.is_none());

    hub.stop().await;
}

/// Test: common positional arguments reach every invocation.
#[tokio::test]
async fn common_args_reach_every_task() {
    let hub = TestHub::start().await;

    let opts = MapOptions {
        workers: Some(2),
        args: vec![json!(10)],
        result_timeout: Some(RESULT_LIMIT),
        ..MapOptions::default()
    };
    let items = vec![json!(1), json!(2), json!(3)];
    let stream = process_map(hub.endpoints(), math_registry(), "scale", items, opts)
        .await
        .unwrap();
    assert_eq!(
        stream.collect().await.unwrap(),
        vec![json!(10), json!(20), json!(30)]
    );

    hub.stop().await;
}

/// Test: an empty input yields an empty stream without touching the state.
#[tokio::test]
async fn empty_input_yields_nothing() {
    let hub = TestHub::start().await;

    let mut stream = process_map(hub.endpoints(), math_registry(), "square", vec![], options(4))
        .await
        .unwrap();
    assert!(stream.next().await.is_none());

    let mut proxy = hub.proxy().await;
    let (entries, revision) = proxy.snapshot().await.unwrap();
    assert!(entries.is_empty());
    assert_eq!(revision, 0);

    hub.stop().await;
}

/// Test: a dispatch naming an unregistered task fails every position.
#[tokio::test]
async fn unknown_task_fails_every_position() {
    let hub = TestHub::start().await;

    let items = vec![json!(1), json!(2)];
    let mut stream = process_map(hub.endpoints(), math_registry(), "nonesuch", items, options(2))
        .await
        .unwrap();

    for index in 0..2 {
        match stream.next().await.unwrap() {
            Err(MapItemError::Task(failure)) => {
                assert_eq!(failure.index, index);
                assert!(failure.message.contains("unknown task"));
            }
            other => panic!("expected a task failure, got {:?}", other),
        }
    }
    assert!(stream.next().await.is_none());

    hub.stop().await;
}

/// Test: a consumed dispatch removes its bookkeeping keys from the state.
#[tokio::test]
async fn finished_dispatch_cleans_up_its_keys() {
    let hub = TestHub::start().await;

    let items = vec![json!(1), json!(2), json!(3)];
    let stream = process_map(hub.endpoints(), math_registry(), "square", items, options(3))
        .await
        .unwrap();
    stream.collect().await.unwrap();

    let mut proxy = hub.proxy().await;
    let (entries, _revision) = proxy.snapshot().await.unwrap();
    let leftovers: Vec<&String> = entries
        .keys()
        .filter(|key| key.starts_with(plan::TASK_KEY_PREFIX))
        .collect();
    assert!(leftovers.is_empty(), "leftover keys: {leftovers:?}");

    hub.stop().await;
}

static CANCELLED_CALLS: AtomicUsize = AtomicUsize::new(0);

fn counting(item: &Value, _args: &[Value], _kwargs: &Kwargs) -> Result<Value, statebus::TaskFault> {
    CANCELLED_CALLS.fetch_add(1, Ordering::SeqCst);
    Ok(item.clone())
}

/// Test: a worker that finds the cancel flag set at its chunk boundary
/// computes nothing and writes no result.
#[tokio::test]
async fn cancel_before_chunk_start_skips_compute() {
    let hub = TestHub::start().await;
    let mut proxy = hub.proxy().await;

    let task_id = Uuid::new_v4();
    let spec = plan::ChunkSpec {
        handler: "count".to_owned(),
        start: 0,
        items: vec![json!(1), json!(2)],
        args: vec![],
        kwargs: Kwargs::new(),
    };
    proxy
        .set(&plan::cancel_key(task_id), json!(true))
        .await
        .unwrap();
    proxy
        .set(&plan::chunk_key(task_id, 0), serde_json::to_value(&spec).unwrap())
        .await
        .unwrap();

    let mut registry = TaskRegistry::new();
    registry.register("count", counting);
    run_worker(hub.endpoints().clone(), Arc::new(registry), task_id, 0)
        .await
        .unwrap();

    assert_eq!(CANCELLED_CALLS.load(Ordering::SeqCst), 0);
    assert_eq!(proxy.get(&plan::result_key(task_id, 0)).await.unwrap(), None);

    hub.stop().await;
}

/// Test: cancelling a stream raises the flag workers poll.
#[tokio::test]
async fn cancel_raises_the_shared_flag() {
    let hub = TestHub::start().await;

    let items = vec![json!(1)];
    let mut stream = process_map(hub.endpoints(), math_registry(), "square", items, options(1))
        .await
        .unwrap();
    stream.cancel().await.unwrap();

    let mut proxy = hub.proxy().await;
    let flagged = proxy
        .snapshot()
        .await
        .unwrap()
        .0
        .into_iter()
        .any(|(key, value)| key.ends_with("/cancel") && value == json!(true));
    assert!(flagged);

    hub.stop().await;
}
