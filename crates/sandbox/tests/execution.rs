//! End-to-end execution tests over the in-memory connectors.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use quasar_binding::MemoryFactory;
use quasar_core::{
    ConnectionDescriptor, ErrorCode, ExecutionLimits, ExecutionRequest, Instance, InstanceId,
    InstanceKind, MemoryDirectory, ScopeHint,
};
use quasar_resource::PoolConfig;
use quasar_sandbox::{Sandbox, SandboxConfig};

struct Harness {
    sandbox: Sandbox,
    factory: MemoryFactory,
    instance_id: InstanceId,
}

/// `RUST_LOG=quasar_sandbox=debug cargo test` shows the pipeline's tracing.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn postgres_harness(factory: MemoryFactory) -> Harness {
    harness(factory, InstanceKind::Postgres, None, SandboxConfig::default())
}

fn mongo_harness(factory: MemoryFactory, default_db: Option<&str>) -> Harness {
    harness(factory, InstanceKind::Mongodb, default_db, SandboxConfig::default())
}

fn harness(
    factory: MemoryFactory,
    kind: InstanceKind,
    default_db: Option<&str>,
    config: SandboxConfig,
) -> Harness {
    init_tracing();
    let mut descriptor = match kind {
        InstanceKind::Postgres => ConnectionDescriptor::new("postgresql://localhost/app"),
        InstanceKind::Mongodb => ConnectionDescriptor::new("mongodb://localhost:27017"),
    };
    if let Some(db) = default_db {
        descriptor = descriptor.with_default_database(db);
    }

    let instance = Instance::new(InstanceId::random(), "test-instance", kind, descriptor);
    let instance_id = instance.id;

    let directory = Arc::new(MemoryDirectory::new());
    directory.insert(instance);

    let sandbox = Sandbox::with_config(directory, Arc::new(factory.clone()), config);
    Harness {
        sandbox,
        factory,
        instance_id,
    }
}

fn request(harness: &Harness, script: &str) -> ExecutionRequest {
    ExecutionRequest::new(harness.instance_id, script)
}

// ---------------------------------------------------------------------------
// success paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_io_script_returns_empty_result() {
    let h = postgres_harness(MemoryFactory::new());
    let result = h.sandbox.execute(&request(&h, "let x = 1 + 1")).await.unwrap();
    assert!(result.logs.is_empty());
    assert!(result.value.is_none());
    assert!(result.summary().is_none());
}

#[tokio::test]
async fn log_lines_are_captured_in_call_order() {
    let h = postgres_harness(MemoryFactory::new());
    let script = r"
        console.log('one');
        console.log('two', 2);
        console.log('three');
    ";
    let result = h.sandbox.execute(&request(&h, script)).await.unwrap();
    assert_eq!(result.logs, vec!["one", "two 2", "three"]);
    assert_eq!(result.summary(), Some("three"));
    assert!(result.value.is_none());
}

#[tokio::test]
async fn postgres_scenario_users_and_count() {
    let factory = MemoryFactory::new()
        .with_sql_rows(
            "SELECT * FROM users",
            vec![
                json!({"id": 1, "name": "ada"}),
                json!({"id": 2, "name": "grace"}),
                json!({"id": 3, "name": "edsger"}),
            ],
        )
        .with_sql_rows("SELECT COUNT(*) as total FROM users", vec![json!({"total": 3})]);
    let h = postgres_harness(factory);

    let script = "return { users: await query('SELECT * FROM users'), \
                  totalUsers: (await query('SELECT COUNT(*) as total FROM users'))[0].total }";
    let result = h.sandbox.execute(&request(&h, script)).await.unwrap();

    assert!(result.logs.is_empty());
    let value = result.value.unwrap();
    assert_eq!(value["totalUsers"], json!(3));
    assert_eq!(value["users"].as_array().unwrap().len(), 3);
    assert_eq!(value["users"][0], json!({"id": 1, "name": "ada"}));
}

#[tokio::test]
async fn client_query_returns_rows_object_where_query_returns_rows() {
    let factory = MemoryFactory::new()
        .with_sql_rows("SELECT 1 as one", vec![json!({"one": 1})]);
    let h = postgres_harness(factory);

    let script = r"
        const direct = await query('SELECT 1 as one');
        const wrapped = await client.query('SELECT 1 as one');
        return {
            direct,
            wrappedRows: wrapped.rows,
            rowCount: wrapped.rowCount,
            sameShape: direct == wrapped.rows
        }
    ";
    let result = h.sandbox.execute(&request(&h, script)).await.unwrap();
    let value = result.value.unwrap();
    assert_eq!(value["direct"], json!([{"one": 1}]));
    assert_eq!(value["wrappedRows"], json!([{"one": 1}]));
    assert_eq!(value["rowCount"], json!(1));
    assert_eq!(value["sameShape"], json!(true));
}

#[tokio::test]
async fn transactions_run_on_the_scripts_own_connection() {
    let factory = MemoryFactory::new().with_sql_affected("UPDATE accounts SET x = 1", 2);
    let h = postgres_harness(factory);

    let script = r"
        await client.begin();
        const res = await client.query('UPDATE accounts SET x = 1');
        await client.commit();
        return res.rowCount
    ";
    let result = h.sandbox.execute(&request(&h, script)).await.unwrap();
    assert_eq!(result.value, Some(json!(2)));
    assert_eq!(
        h.factory.executed(),
        vec!["BEGIN", "UPDATE accounts SET x = 1", "COMMIT"]
    );
}

#[tokio::test]
async fn abandoned_transaction_is_rolled_back_on_release() {
    let factory = MemoryFactory::new();
    let h = postgres_harness(factory);

    h.sandbox
        .execute(&request(&h, "await client.begin()"))
        .await
        .unwrap();

    // wait for the release task to recycle the connection
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.factory.executed(), vec!["BEGIN", "ROLLBACK"]);
}

#[tokio::test]
async fn mongo_scenario_pending_orders() {
    let factory = MemoryFactory::new().with_collection(
        "app",
        "orders",
        vec![
            json!({"id": 1, "status": "pending"}),
            json!({"id": 2, "status": "shipped"}),
            json!({"id": 3, "status": "pending"}),
        ],
    );
    let h = mongo_harness(factory, Some("app"));

    let script = "return await collection('orders').find({status: 'pending'}).toArray()";
    let result = h.sandbox.execute(&request(&h, script)).await.unwrap();
    assert_eq!(
        result.value,
        Some(json!([
            {"id": 1, "status": "pending"},
            {"id": 3, "status": "pending"},
        ]))
    );
}

#[tokio::test]
async fn mongo_scope_hint_overrides_default_database() {
    let factory = MemoryFactory::new()
        .with_collection("hinted", "items", vec![json!({"from": "hinted"})])
        .with_collection("fallback", "items", vec![json!({"from": "fallback"})]);
    let h = mongo_harness(factory, Some("fallback"));

    let script = "return { db: db.name, items: await collection('items').find().toArray() }";

    let hinted = h
        .sandbox
        .execute(&request(&h, script).with_scope(ScopeHint::database("hinted")))
        .await
        .unwrap();
    assert_eq!(
        hinted.value,
        Some(json!({"db": "hinted", "items": [{"from": "hinted"}]}))
    );

    let fallback = h.sandbox.execute(&request(&h, script)).await.unwrap();
    assert_eq!(
        fallback.value,
        Some(json!({"db": "fallback", "items": [{"from": "fallback"}]}))
    );
}

#[tokio::test]
async fn mongo_writes_flow_through_the_store() {
    let factory = MemoryFactory::new().with_collection("app", "orders", vec![]);
    let h = mongo_harness(factory, Some("app"));

    let script = r"
        const orders = collection('orders');
        await orders.insertMany([{id: 1, status: 'new'}, {id: 2, status: 'new'}]);
        await orders.updateOne({id: 1}, {status: 'done'});
        await orders.deleteMany({status: 'new'});
        return { left: await orders.countDocuments() }
    ";
    let result = h.sandbox.execute(&request(&h, script)).await.unwrap();
    assert_eq!(result.value, Some(json!({"left": 1})));
    assert_eq!(
        h.factory.documents("app", "orders"),
        vec![json!({"id": 1, "status": "done"})]
    );
}

// ---------------------------------------------------------------------------
// failure classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_instance_is_not_found() {
    let h = postgres_harness(MemoryFactory::new());
    let missing = ExecutionRequest::new(InstanceId::random(), "return 1");
    let err = h.sandbox.execute(&missing).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InstanceNotFound);
}

#[test]
fn unsupported_instance_type_is_rejected_at_the_boundary() {
    let err = InstanceKind::parse("MYSQL").unwrap_err();
    assert_eq!(err.code, ErrorCode::UnsupportedInstanceType);
    assert_eq!(InstanceKind::parse("POSTGRES").unwrap(), InstanceKind::Postgres);
}

#[rstest]
#[case::forbidden_chars("bad$db")]
#[case::spaces("no spaces")]
#[case::empty("")]
#[tokio::test]
async fn invalid_scope_names_are_rejected_before_connecting(#[case] db: &str) {
    let h = mongo_harness(MemoryFactory::new(), Some("app"));
    let err = h
        .sandbox
        .execute(&request(&h, "return 1").with_scope(ScopeHint::database(db)))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidScope);
    assert_eq!(h.factory.open_connections(), 0, "no connection may be opened");
}

#[tokio::test]
async fn mongo_without_database_is_invalid_scope() {
    let h = mongo_harness(MemoryFactory::new(), None);
    let err = h.sandbox.execute(&request(&h, "return 1")).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidScope);
}

#[tokio::test]
async fn syntax_errors_fail_before_any_connection() {
    let h = postgres_harness(MemoryFactory::new());
    let err = h
        .sandbox
        .execute(&request(&h, "return {unclosed"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RuntimeError);
    assert!(err.message.contains("syntax error"));
    assert_eq!(h.factory.open_connections(), 0);
}

#[tokio::test]
async fn script_runtime_errors_carry_partial_logs() {
    let h = postgres_harness(MemoryFactory::new());
    let script = r"
        console.log('before the crash');
        return 1 / 0
    ";
    let err = h.sandbox.execute(&request(&h, script)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::RuntimeError);
    assert_eq!(err.logs, vec!["before the crash"]);
}

#[rstest]
#[case::process("return process.env")]
#[case::require("const fs = require('fs')")]
#[case::fetch("await fetch('http://example.com')")]
#[tokio::test]
async fn ambient_names_are_sandbox_violations(#[case] script: &str) {
    let h = postgres_harness(MemoryFactory::new());
    let err = h.sandbox.execute(&request(&h, script)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::SandboxViolation);
}

#[tokio::test]
async fn mongo_bindings_do_not_exist_on_postgres_instances() {
    let h = postgres_harness(MemoryFactory::new());
    let err = h
        .sandbox
        .execute(&request(&h, "return await collection('x').find().toArray()"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::SandboxViolation);
}

#[tokio::test]
async fn chatty_scripts_hit_the_output_limit_with_partial_output() {
    let config = SandboxConfig {
        limits: ExecutionLimits {
            max_log_lines: 3,
            ..Default::default()
        },
        ..Default::default()
    };
    let h = harness(MemoryFactory::new(), InstanceKind::Postgres, None, config);

    let script = r"
        let i = 0;
        while (i < 100) {
            console.log('line', i);
            i = i + 1
        }
    ";
    let err = h.sandbox.execute(&request(&h, script)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::OutputLimitExceeded);
    assert_eq!(err.logs, vec!["line 0", "line 1", "line 2"]);
}

#[tokio::test]
async fn oversized_return_value_is_an_output_limit_failure() {
    let config = SandboxConfig {
        limits: ExecutionLimits {
            max_output_bytes: 64,
            ..Default::default()
        },
        ..Default::default()
    };
    let h = harness(MemoryFactory::new(), InstanceKind::Postgres, None, config);

    let script = r"
        let s = 'xxxxxxxxxxxxxxxx';
        s = s + s; s = s + s; s = s + s;
        return s
    ";
    let err = h.sandbox.execute(&request(&h, script)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::OutputLimitExceeded);
}

// ---------------------------------------------------------------------------
// timeouts, cancellation, and release
// ---------------------------------------------------------------------------

fn quick_config(wall_clock_ms: u64) -> SandboxConfig {
    SandboxConfig {
        limits: ExecutionLimits {
            wall_clock_ms,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn looping_script_times_out() {
    let h = harness(
        MemoryFactory::new(),
        InstanceKind::Postgres,
        None,
        quick_config(100),
    );
    let err = h
        .sandbox
        .execute(&request(&h, "while (true) { }"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Timeout);
}

#[tokio::test]
async fn slow_database_call_times_out_and_releases_the_connection() {
    let factory = MemoryFactory::new().with_op_delay(Duration::from_secs(10));
    let h = harness(factory, InstanceKind::Postgres, None, quick_config(100));

    let err = h
        .sandbox
        .execute(&request(&h, "await query('SELECT pg_sleep(10)')"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Timeout);

    // the aborted worker's handles drop; the guard returns the slot
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = h.sandbox.pool_stats(h.instance_id).unwrap();
    assert_eq!(stats.active, 0, "slot must be released after abort");
}

#[tokio::test]
async fn partial_logs_survive_a_timeout() {
    let factory = MemoryFactory::new().with_op_delay(Duration::from_secs(10));
    let h = harness(factory, InstanceKind::Postgres, None, quick_config(100));

    let script = r"
        console.log('started');
        await query('SELECT 1');
    ";
    let err = h.sandbox.execute(&request(&h, script)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Timeout);
    assert_eq!(err.logs, vec!["started"]);
}

#[tokio::test]
async fn external_cancellation_stops_the_script() {
    let factory = MemoryFactory::new().with_op_delay(Duration::from_secs(10));
    let h = harness(factory, InstanceKind::Postgres, None, quick_config(60_000));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = h
        .sandbox
        .execute_with_cancellation(&request(&h, "await query('SELECT 1')"), cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Timeout);
}

// ---------------------------------------------------------------------------
// pooling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_executions_respect_the_pool_bound() {
    let factory = MemoryFactory::new().with_op_delay(Duration::from_millis(50));
    let descriptor =
        ConnectionDescriptor::new("postgresql://localhost/app").with_max_connections(2);

    let instance = Instance::new(
        InstanceId::random(),
        "bounded",
        InstanceKind::Postgres,
        descriptor,
    );
    let instance_id = instance.id;
    let directory = Arc::new(MemoryDirectory::new());
    directory.insert(instance);
    let sandbox = Arc::new(Sandbox::new(directory, Arc::new(factory.clone())));

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let sandbox = Arc::clone(&sandbox);
        tasks.push(tokio::spawn(async move {
            sandbox
                .execute(&ExecutionRequest::new(
                    instance_id,
                    "return (await query('SELECT 1')).length",
                ))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(
        factory.max_open_connections() <= 2,
        "never more than pool-size connections open, saw {}",
        factory.max_open_connections()
    );
}

#[tokio::test]
async fn pool_exhaustion_classifies_after_the_wait_timeout() {
    let factory = MemoryFactory::new().with_op_delay(Duration::from_millis(500));

    let descriptor =
        ConnectionDescriptor::new("postgresql://localhost/app").with_max_connections(1);
    let instance = Instance::new(
        InstanceId::random(),
        "one-slot",
        InstanceKind::Postgres,
        descriptor,
    );
    let instance_id = instance.id;
    let directory = Arc::new(MemoryDirectory::new());
    directory.insert(instance);

    let sandbox = Arc::new(Sandbox::with_config(
        directory,
        Arc::new(factory),
        SandboxConfig {
            pool: PoolConfig::default().with_acquire_timeout(Duration::from_millis(50)),
            ..Default::default()
        },
    ));

    let slow = {
        let sandbox = Arc::clone(&sandbox);
        tokio::spawn(async move {
            sandbox
                .execute(&ExecutionRequest::new(
                    instance_id,
                    "await query('SELECT 1')",
                ))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = sandbox
        .execute(&ExecutionRequest::new(instance_id, "return 1"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PoolExhausted);

    slow.await.unwrap().unwrap();
}

#[tokio::test]
async fn transient_connect_failure_is_retried_once() {
    let factory = MemoryFactory::new().with_connect_failures(1);
    let h = postgres_harness(factory);

    let result = h.sandbox.execute(&request(&h, "return 'ok'")).await.unwrap();
    assert_eq!(result.value, Some(json!("ok")));
}

#[tokio::test]
async fn persistent_connect_failure_surfaces_after_one_retry() {
    let factory = MemoryFactory::new().with_connect_failures(10);
    let h = postgres_harness(factory);

    let err = h.sandbox.execute(&request(&h, "return 'ok'")).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ConnectionFailed);
}

#[tokio::test]
async fn broken_idle_connections_are_replaced_between_executions() {
    let h = postgres_harness(MemoryFactory::new());

    h.sandbox.execute(&request(&h, "return 1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // the idle connection now fails its health check
    h.factory.set_broken(true);
    h.sandbox.execute(&request(&h, "return 2")).await.unwrap();

    let stats = h.sandbox.pool_stats(h.instance_id).unwrap();
    assert_eq!(stats.destroyed, 1, "broken connection must be destroyed");
    assert_eq!(stats.created, 2);
}
