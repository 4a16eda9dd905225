//! Sequential and parallel batches plus the fire-and-forget queue.

mod common;

use cmdflow_core::engine::CommandEngine;
use cmdflow_core::error::CmdflowError;
use cmdflow_core::execution::{CommandSpec, FailurePolicy};
use common::{fail, ok, test_config, HostReply, ScriptedTransport};
use serde_json::json;
use std::time::Duration;

fn scripted() -> std::sync::Arc<ScriptedTransport> {
    ScriptedTransport::new(|operation, params| match operation {
        "fail" => fail("widget rejected"),
        "explode" => HostReply::Panic("editor plugin crashed"),
        "slow" => HostReply::Delayed(Duration::from_millis(50), json!({"success": true, "result": params})),
        _ => ok(json!({"echo": operation})),
    })
}

fn specs(operations: &[&str]) -> Vec<CommandSpec> {
    operations
        .iter()
        .enumerate()
        .map(|(index, op)| CommandSpec::new(*op, json!({"index": index})))
        .collect()
}

#[tokio::test]
async fn test_sequential_batch_reports_every_command() {
    let transport = scripted();
    let engine = CommandEngine::start_with_transport(test_config(), transport.clone())
        .await
        .unwrap();

    let results = engine
        .execute_batch(specs(&["create", "fail", "connect"]), false)
        .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].success);
    assert!(!results[1].success);
    assert!(results[1].error.as_deref().unwrap().contains("widget rejected"));
    assert!(results[2].success);
    assert_eq!(transport.log().operations(), vec!["create", "fail", "connect"]);

    let stats = engine.get_stats();
    assert_eq!(stats.commands_executed, 3);
    assert_eq!(stats.failed_commands, 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_stop_on_failure_policy() {
    let transport = scripted();
    let engine = CommandEngine::start_with_transport(test_config(), transport.clone())
        .await
        .unwrap();

    let commands = vec![
        engine.new_command("create", json!({})),
        engine.new_command("fail", json!({})),
        engine.new_command("connect", json!({})),
    ];
    let results = engine
        .batch()
        .execute_sequential_with_policy(commands, FailurePolicy::StopOnFailure)
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(transport.log().operations(), vec!["create", "fail"]);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_sequential_batch_stops_inside_active_transaction() {
    let transport = scripted();
    let engine = CommandEngine::start_with_transport(test_config(), transport.clone())
        .await
        .unwrap();

    engine.transactions().begin().unwrap();
    let results = engine
        .execute_batch(specs(&["create", "fail", "connect"]), false)
        .await;

    assert_eq!(results.len(), 2);
    assert!(!results[1].success);
    engine.transactions().rollback().unwrap();
    engine.shutdown().await;
}

#[tokio::test]
async fn test_parallel_batch_isolates_faults() {
    let transport = scripted();
    let engine = CommandEngine::start_with_transport(test_config(), transport.clone())
        .await
        .unwrap();

    let commands: Vec<_> = ["a", "b", "explode", "fail", "e"]
        .iter()
        .map(|op| engine.new_command(*op, json!({})))
        .collect();
    let ids: Vec<String> = commands.iter().map(|c| c.id.clone()).collect();

    let results = engine.batch().execute_parallel(commands).await;

    assert_eq!(results.len(), 5);
    let returned: Vec<String> = results.iter().map(|r| r.command_id.clone()).collect();
    assert_eq!(returned, ids);

    assert!(!results[2].success);
    let fault = results[2].error.as_deref().unwrap();
    assert!(fault.contains("editor plugin crashed"), "fault text was {fault}");

    assert!(results[0].success);
    assert!(results[1].success);
    assert!(!results[3].success);
    assert!(results[3].error.as_deref().unwrap().contains("widget rejected"));
    assert!(results[4].success);

    // The faulted task still returned its lease
    assert_eq!(engine.pool().leased_count(), 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_parallel_batch_runs_concurrently() {
    let transport = scripted();
    let mut config = test_config();
    config.remote.max_connections = 4;
    let engine = CommandEngine::start_with_transport(config, transport.clone())
        .await
        .unwrap();

    let results = engine
        .execute_batch(specs(&["slow", "slow", "slow", "slow"]), true)
        .await;

    assert!(results.iter().all(|r| r.success));
    assert_eq!(transport.connects(), 4);
    assert_eq!(results[3].data, Some(json!({"index": 3})));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_batch_file_aliases_deserialize() {
    let raw = r#"[
        {"command_type": "spawn_actor", "params": {"name": "Cube"}, "timeout_ms": "250"},
        {"type": "delete_actor", "params": {"name": "Cube"}, "max_retries": 0}
    ]"#;
    let specs: Vec<CommandSpec> = serde_json::from_str(raw).unwrap();

    let transport = scripted();
    let engine = CommandEngine::start_with_transport(test_config(), transport.clone())
        .await
        .unwrap();
    let results = engine.execute_batch(specs, false).await;

    assert!(results.iter().all(|r| r.success));
    assert_eq!(transport.log().operations(), vec!["spawn_actor", "delete_actor"]);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_queue_processes_in_order_and_drains() {
    let transport = scripted();
    let engine = CommandEngine::start_with_transport(test_config(), transport.clone())
        .await
        .unwrap();

    let mut ids = Vec::new();
    for index in 0..5 {
        let command = engine.new_command(format!("queued_{index}"), json!({}));
        ids.push(engine.enqueue(command).unwrap());
    }
    assert_eq!(ids.len(), 5);

    engine
        .wait_until_drained(Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(
        transport.log().operations(),
        (0..5).map(|i| format!("queued_{i}")).collect::<Vec<_>>()
    );
    let stats = engine.get_stats();
    assert_eq!(stats.queue_processed, 5);
    assert_eq!(stats.queued_commands, 0);
    assert_eq!(stats.commands_executed, 5);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_enqueue_after_shutdown_is_rejected() {
    let engine = CommandEngine::start_with_transport(test_config(), scripted())
        .await
        .unwrap();
    engine.shutdown().await;

    let result = engine.enqueue(engine.new_command("late", json!({})));
    assert!(matches!(result, Err(CmdflowError::QueueClosed)));
}

#[tokio::test]
async fn test_engines_are_isolated() {
    let first = CommandEngine::start_with_transport(test_config(), scripted())
        .await
        .unwrap();
    let second = CommandEngine::start_with_transport(test_config(), scripted())
        .await
        .unwrap();

    first.transactions().begin().unwrap();
    assert!(second.transactions().begin().is_ok());

    first.execute_single_command("ping", json!({}), None).await;
    assert_eq!(first.get_stats().commands_executed, 1);
    assert_eq!(second.get_stats().commands_executed, 0);

    first.shutdown().await;
    second.shutdown().await;
}
