mod common;

use common::{complete_object, engine, test_config};
use rodwatch_core::{RepairOutcome, SkipReason, Violation, attributes};
use rodwatch_engine::{PathSource, Repairer, RunMode, TaskState};
use rodwatch_storage::backends::memory::LAST_REPLICA_CODE;
use rodwatch_storage::{MemoryZone, ObjectSpec, ReplicaSpec, StorageClient, StorageError};
use std::time::Duration;

fn walk(root: &str) -> PathSource {
    PathSource::Roots {
        roots: vec![root.to_string()],
        recursive: true,
    }
}

fn zone_with(count: usize) -> MemoryZone {
    let zone = MemoryZone::new();
    for i in 0..count {
        zone.put_object(complete_object(
            &format!("/testZone/home/run{}/file{i:03}.txt", i % 4),
            &format!("content {i}"),
        ));
    }
    zone
}

#[tokio::test]
async fn many_workers_share_a_small_pool() {
    let zone = zone_with(24);
    zone.set_latency(Duration::from_millis(2));
    zone.fail_next_calls(2);

    let mut config = test_config();
    config.num_threads = 16;
    config.num_clients = 2;
    config.max_object_attempts = 5;
    let result = engine(&zone, None, config)
        .run(walk("/testZone"), RunMode::Check)
        .await
        .unwrap();

    assert_eq!(result.totals.objects_scanned, 24);
    assert!(zone.peak_live_clients() <= 2, "peak {}", zone.peak_live_clients());
    assert_eq!(zone.shared_use_count(), 0);
    assert_eq!(zone.live_clients(), 0);
    assert!(result.succeeded(), "{:?}", result.totals);
}

#[tokio::test]
async fn failed_listing_is_reported_and_siblings_are_still_checked() {
    let zone = zone_with(8);
    zone.fail_listing("/testZone/home/run1");

    let result = engine(&zone, None, test_config())
        .run(walk("/testZone"), RunMode::Check)
        .await
        .unwrap();

    assert_eq!(result.totals.objects_scanned, 6);
    assert_eq!(result.listing_failures.len(), 1);
    assert_eq!(result.listing_failures[0].collection, "/testZone/home/run1");
    assert_eq!(result.totals.listing_failures, 1);
    assert_eq!(result.totals.objects_passed, 6);
    assert!(!result.succeeded());
}

#[tokio::test]
async fn every_object_is_visited_exactly_once() {
    let zone = zone_with(40);

    let result = engine(&zone, None, test_config())
        .run(
            PathSource::Roots {
                roots: vec![
                    "/testZone".to_string(),
                    "/testZone/home/run2".to_string(),
                    "/testZone/home/run0/file000.txt".to_string(),
                ],
                recursive: true,
            },
            RunMode::Check,
        )
        .await
        .unwrap();

    let visited: Vec<String> = result.objects.keys().cloned().collect();
    assert_eq!(visited, zone.object_paths());
    assert!(result.objects.values().all(|o| o.attempts == 1));
}

#[tokio::test]
async fn run_timeout_stops_early() {
    let zone = zone_with(200);
    zone.set_latency(Duration::from_millis(20));

    let mut config = test_config();
    config.num_threads = 1;
    config.num_clients = 1;
    config.run_timeout_secs = Some(1);
    let result = engine(&zone, None, config)
        .run(walk("/testZone"), RunMode::Check)
        .await
        .unwrap();

    assert!(result.timed_out);
    assert!(result.totals.objects_scanned < 200);
    assert!(!result.succeeded());
}

#[tokio::test]
async fn first_error_stops_run_without_best_effort() {
    let zone = MemoryZone::new();
    for name in ["a", "b", "c"] {
        zone.put_object(complete_object(&format!("/z/{name}.txt"), name));
    }
    zone.fail_fetch("/z/a.txt");

    let mut config = test_config();
    config.num_threads = 1;
    config.best_effort = false;
    let result = engine(&zone, None, config)
        .run(walk("/z"), RunMode::Check)
        .await
        .unwrap();

    assert!(result.aborted.is_some());
    assert_eq!(result.objects.len(), 1);
    let failed = &result.objects["/z/a.txt"];
    assert_eq!(failed.state, TaskState::VerifyFailed);
    assert_eq!(failed.attempts, 3);
}

#[tokio::test]
async fn best_effort_continues_past_errors() {
    let zone = MemoryZone::new();
    for name in ["a", "b", "c"] {
        zone.put_object(complete_object(&format!("/z/{name}.txt"), name));
    }
    zone.fail_fetch("/z/a.txt");

    let result = engine(&zone, None, test_config())
        .run(walk("/z"), RunMode::Check)
        .await
        .unwrap();

    assert!(result.aborted.is_none());
    assert_eq!(result.totals.objects_scanned, 3);
    assert_eq!(result.totals.objects_passed, 2);
    assert_eq!(result.totals.unexpected_errors, 1);
    assert!(!result.succeeded());
}

#[tokio::test]
async fn unreachable_storage_aborts_the_run() {
    let zone = zone_with(4);
    zone.fail_connections(100);

    let result = engine(&zone, None, test_config())
        .run(walk("/testZone"), RunMode::Check)
        .await
        .unwrap();

    assert!(result.aborted.is_some());
    assert!(result.objects.is_empty());
    assert!(!result.succeeded());
}

#[tokio::test]
async fn object_without_valid_replicas_is_not_repaired() {
    let zone = MemoryZone::new();
    let path = "/z/lost.txt";
    let mut object = complete_object(path, "x");
    object.replicas = vec![ReplicaSpec::new(0, "x").invalid()];
    object.metadata.retain(|a| a.attribute != attributes::MD5);
    zone.put_object(object);

    let result = engine(&zone, None, test_config())
        .run(walk("/z"), RunMode::Repair)
        .await
        .unwrap();

    let outcome = &result.objects[path];
    assert_eq!(
        outcome.violations,
        vec![Violation::ReplicaCountWrong {
            expected: 2,
            actual: 0
        }]
    );
    assert_eq!(outcome.state, TaskState::RepairFailed);
    assert_eq!(zone.write_count(), 0);
}

#[tokio::test]
async fn storage_refuses_to_invalidate_last_replica() {
    let zone = MemoryZone::new();
    zone.put_object(ObjectSpec::new("/z/one.txt").with_content("one"));
    let client = zone.connect().unwrap();

    match client.invalidate_replica("/z/one.txt", 0).await {
        Err(StorageError::Protocol { code, .. }) => assert_eq!(code, LAST_REPLICA_CODE),
        other => panic!("expected refusal, got {other:?}"),
    }
    assert!(zone.replicas("/z/one.txt").unwrap()[0].valid);
}

#[tokio::test]
async fn repeated_repair_reports_already_correct() {
    let zone = MemoryZone::new();
    let path = "/z/nomd5.txt";
    let mut object = complete_object(path, "hello");
    object.metadata.retain(|a| a.attribute != attributes::MD5);
    zone.put_object(object);

    let client = zone.connect().unwrap();
    let object = client.fetch_object(path).await.unwrap();
    let violation = Violation::metadata_missing(attributes::MD5);
    let repairer = Repairer::new(&test_config());

    let first = repairer.repair(&client, &object, None, &violation).await.unwrap();
    assert_eq!(first, RepairOutcome::Succeeded);
    let writes = zone.write_count();

    let second = repairer.repair(&client, &object, None, &violation).await.unwrap();
    assert_eq!(second, RepairOutcome::Skipped(SkipReason::AlreadyCorrect));
    assert_eq!(zone.write_count(), writes);
}
