use std::time::Duration;

use serde_json::json;
use tempfile::{tempdir, TempDir};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use super::Controller;
use crate::catalog::CatalogState;
use crate::change_capture::{CaptureContent, ChangeCaptureFilter, Operation};
use crate::configuration::Config;
use crate::error_handling::types::{CaptureError, ErrorStatus, ServiceError};
use crate::management::TaskState;
use crate::session_management::{SessionMode, TerminationOutcome};
use crate::traffic_recording::{
    CardinalityEntry, HistoryFilter, Label, RecordingCriteria, RecordingSettings,
    TrafficRecordKind,
};
use crate::transaction::TransactionOutcome;

struct Fixture {
    _dir: TempDir,
    controller: Controller,
}

fn fixture_with(configure: impl FnOnce(&mut Config)) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let mut config = Config::default();
    config.traffic_recording.export_directory = dir.path().join("exports");
    configure(&mut config);
    let controller = Controller::new(config).unwrap();
    controller.define_catalog("products").unwrap();
    controller.go_live("products").unwrap();
    Fixture {
        _dir: dir,
        controller,
    }
}

fn fixture() -> Fixture {
    fixture_with(|_| {})
}

fn entry(value: &str, count: u64) -> CardinalityEntry {
    CardinalityEntry {
        value: value.to_string(),
        count,
    }
}

#[tokio::test]
async fn test_product_changes_reach_matching_subscriber() {
    let f = fixture();
    let c = &f.controller;
    let writer = c
        .create_session("products", SessionMode::READ_WRITE, Vec::new())
        .unwrap();
    let reader = c
        .create_session("products", SessionMode::READ_ONLY, Vec::new())
        .unwrap();
    let mut stream = c
        .register_change_capture(
            reader.id,
            ChangeCaptureFilter::for_entity_type("product", [Operation::Upsert]),
        )
        .unwrap();

    // 99 empty transactions move the catalog to version 99
    for _ in 0..99 {
        let tx = c.open_transaction(writer.id).unwrap();
        c.close_transaction(writer.id, tx.transaction_id, true)
            .await
            .unwrap();
    }

    let tx = c.open_transaction(writer.id).unwrap();
    let upserted = c
        .upsert_entity(writer.id, "product", Some(42), None, json!({"name": "lamp"}))
        .await
        .unwrap();
    assert_eq!(upserted.transaction_id, Some(tx.transaction_id));
    c.delete_entity(writer.id, "product", 7).await.unwrap();
    let closed = c
        .close_transaction(writer.id, tx.transaction_id, true)
        .await
        .unwrap();
    assert_eq!(closed.sequence, Some(100));
    assert_eq!(closed.outcome, TransactionOutcome::Committed);
    assert_eq!(closed.mutation_count, 2);

    let event = stream.next().await.unwrap().unwrap();
    assert_eq!(event.sequence, 100);
    assert_eq!(event.primary_key, Some(42));
    assert_eq!(event.operation, Operation::Upsert);
    assert_eq!(event.body, None);
    assert!(stream.try_next().is_none());

    assert_eq!(
        c.all_entity_types(writer.id).unwrap(),
        vec!["product".to_string()]
    );
}

#[tokio::test]
async fn test_body_content_and_auto_commit() {
    let f = fixture();
    let c = &f.controller;
    let writer = c
        .create_session("products", SessionMode::BINARY_READ_WRITE, Vec::new())
        .unwrap();
    let mut filter = ChangeCaptureFilter::for_entity_type("product", Vec::<Operation>::new());
    filter.content = CaptureContent::Body;
    let mut stream = c.register_change_capture(writer.id, filter).unwrap();

    let first = c
        .upsert_entity(writer.id, "product", None, None, json!({"sku": 1}))
        .await
        .unwrap();
    let second = c
        .upsert_entity(writer.id, "product", None, None, json!({"sku": 2}))
        .await
        .unwrap();
    assert_eq!(first.primary_key, Some(1));
    assert_eq!(second.primary_key, Some(2));
    assert_eq!(first.sequence, Some(1));
    assert_eq!(second.sequence, Some(2));

    let event = stream.next().await.unwrap().unwrap();
    assert_eq!(event.body, Some(json!({"sku": 1})));
    assert_eq!(stream.next().await.unwrap().unwrap().sequence, 2);
}

#[tokio::test]
async fn test_read_only_and_double_transactions_are_rejected() {
    let f = fixture();
    let c = &f.controller;
    let reader = c
        .create_session("products", SessionMode::READ_ONLY, Vec::new())
        .unwrap();
    let err = c.open_transaction(reader.id).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::PermissionDenied);
    let err = c
        .upsert_entity(reader.id, "product", Some(1), None, json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), ErrorStatus::PermissionDenied);

    let writer = c
        .create_session("products", SessionMode::READ_WRITE, Vec::new())
        .unwrap();
    assert_ok!(c.open_transaction(writer.id));
    assert_eq!(
        c.open_transaction(writer.id).unwrap_err().status(),
        ErrorStatus::InvalidState
    );
}

#[tokio::test]
async fn test_rollback_and_closed_transaction_is_not_found() {
    let f = fixture();
    let c = &f.controller;
    let writer = c
        .create_session("products", SessionMode::READ_WRITE, Vec::new())
        .unwrap();
    let tx = c.open_transaction(writer.id).unwrap();
    c.upsert_entity(writer.id, "product", Some(5), None, json!({}))
        .await
        .unwrap();
    let closed = c
        .close_transaction(writer.id, tx.transaction_id, false)
        .await
        .unwrap();
    assert_eq!(closed.outcome, TransactionOutcome::RolledBack);
    assert_eq!(closed.sequence, None);

    let err = c
        .close_transaction(writer.id, tx.transaction_id, true)
        .await
        .unwrap_err();
    assert_eq!(err.status(), ErrorStatus::NotFound);
    assert!(c.all_entity_types(writer.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_terminate_twice_and_unregister_twice() {
    let f = fixture();
    let c = &f.controller;
    let session = c
        .create_session("products", SessionMode::READ_ONLY, Vec::new())
        .unwrap();
    let mut stream = c
        .register_change_capture(session.id, ChangeCaptureFilter::default())
        .unwrap();

    assert_eq!(
        c.unregister_change_capture(session.id, stream.id()).unwrap(),
        true
    );
    assert_eq!(
        c.unregister_change_capture(session.id, stream.id()).unwrap(),
        false
    );
    assert!(stream.next().await.is_none());

    assert_eq!(c.terminate_session(session.id), TerminationOutcome::Terminated);
    assert_eq!(
        c.terminate_session(session.id),
        TerminationOutcome::AlreadyClosed
    );
    assert_err!(c.session_info(session.id));
}

#[tokio::test]
async fn test_foreign_subscription_cannot_be_unregistered() {
    let f = fixture();
    let c = &f.controller;
    let owner = c
        .create_session("products", SessionMode::READ_ONLY, Vec::new())
        .unwrap();
    let other = c
        .create_session("products", SessionMode::READ_ONLY, Vec::new())
        .unwrap();
    let stream = c
        .register_change_capture(owner.id, ChangeCaptureFilter::default())
        .unwrap();
    assert_eq!(
        c.unregister_change_capture(other.id, stream.id())
            .unwrap_err(),
        ServiceError::Capture(CaptureError::SubscriptionNotFound(stream.id()))
    );
}

#[tokio::test]
async fn test_deleting_catalog_cancels_sessions_and_streams() {
    let f = fixture();
    let c = &f.controller;
    let session = c
        .create_session("products", SessionMode::READ_WRITE, Vec::new())
        .unwrap();
    let tx = c.open_transaction(session.id).unwrap();
    let mut stream = c
        .register_change_capture(session.id, ChangeCaptureFilter::default())
        .unwrap();

    assert!(c.delete_catalog_if_exists("products"));
    assert!(!c.delete_catalog_if_exists("products"));

    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err, CaptureError::Cancelled(stream.id()));
    assert_eq!(err.status(), ErrorStatus::Cancelled);
    assert_eq!(
        c.session_info(session.id).unwrap_err().status(),
        ErrorStatus::NotFound
    );
    let err = c
        .close_transaction(session.id, tx.transaction_id, true)
        .await
        .unwrap_err();
    assert_eq!(err.status(), ErrorStatus::NotFound);
    assert!(c.catalog_names().is_empty());
}

#[tokio::test]
async fn test_replace_catalog_moves_name() {
    let f = fixture();
    let c = &f.controller;
    c.define_catalog("products_v2").unwrap();
    let old = c
        .create_session("products", SessionMode::READ_ONLY, Vec::new())
        .unwrap();

    c.replace_catalog("products", "products_v2").unwrap();
    assert_eq!(c.catalog_names(), vec!["products".to_string()]);
    assert_eq!(c.catalog_state("products").unwrap(), CatalogState::WarmingUp);
    assert_err!(c.session_info(old.id));
    assert_eq!(
        c.catalog_state("products_v2").unwrap_err().status(),
        ErrorStatus::NotFound
    );
}

#[tokio::test]
async fn test_go_live_and_close() {
    let f = fixture();
    let c = &f.controller;
    c.define_catalog("staging").unwrap();
    assert_eq!(
        c.create_session("staging", SessionMode::READ_WRITE, Vec::new())
            .unwrap_err()
            .status(),
        ErrorStatus::InvalidState
    );
    let session = c
        .create_session("staging", SessionMode::READ_ONLY, Vec::new())
        .unwrap();
    assert_eq!(
        c.session_catalog_state(session.id).unwrap(),
        CatalogState::WarmingUp
    );
    c.go_live_and_close(session.id).unwrap();
    assert_eq!(c.catalog_state("staging").unwrap(), CatalogState::Alive);
    assert_err!(c.session_info(session.id));
}

#[tokio::test]
async fn test_label_cardinality_with_allowlist() {
    let f = fixture();
    let c = &f.controller;
    c.start_traffic_recording(
        RecordingCriteria {
            label_allowlist: vec!["clientId".to_string()],
            kinds: [TrafficRecordKind::SessionStart].into_iter().collect(),
            ..Default::default()
        },
        RecordingSettings::default(),
    )
    .unwrap();

    for client in ["X", "Y", "X", "Y", "X"] {
        c.create_session(
            "products",
            SessionMode::READ_ONLY,
            vec![Label::new("clientId", client), Label::new("region", "eu")],
        )
        .unwrap();
    }

    assert_eq!(
        c.traffic_label_values("clientId", None, 2),
        vec![entry("X", 3), entry("Y", 2)]
    );
    assert_eq!(c.traffic_label_names(None, 10), vec![entry("clientId", 5)]);
}

#[tokio::test]
async fn test_history_follows_session_activity() {
    let f = fixture();
    let c = &f.controller;
    c.start_traffic_recording(RecordingCriteria::default(), RecordingSettings::default())
        .unwrap();
    let writer = c
        .create_session("products", SessionMode::READ_WRITE, Vec::new())
        .unwrap();
    let tx = c.open_transaction(writer.id).unwrap();
    c.upsert_entity(writer.id, "product", Some(1), None, json!({"name": "chair"}))
        .await
        .unwrap();
    c.close_transaction(writer.id, tx.transaction_id, true)
        .await
        .unwrap();
    c.terminate_session(writer.id);

    let kinds: Vec<TrafficRecordKind> = c
        .traffic_history_list(&HistoryFilter::default(), 10, false)
        .into_iter()
        .map(|r| r.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TrafficRecordKind::SessionStart,
            TrafficRecordKind::TransactionOpen,
            TrafficRecordKind::Mutation,
            TrafficRecordKind::TransactionClose,
            TrafficRecordKind::SessionClose,
        ]
    );

    let reversed = c.traffic_history_list(&HistoryFilter::default(), 2, true);
    assert_eq!(reversed[0].kind, TrafficRecordKind::SessionClose);
    assert_eq!(reversed.len(), 2);

    let mutations = HistoryFilter {
        kinds: [TrafficRecordKind::Mutation].into_iter().collect(),
        fetching_more_bytes_than: Some(0),
        ..Default::default()
    };
    let streamed: Vec<_> = c.traffic_history(mutations, 10).collect();
    assert_eq!(streamed.len(), 1);
    assert_eq!(streamed[0].session_sequence, 3);
}

#[tokio::test]
async fn test_recording_export_is_downloadable() {
    let f = fixture();
    let c = &f.controller;
    let started = c
        .start_traffic_recording(
            RecordingCriteria::default(),
            RecordingSettings {
                export_file: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(
        c.start_traffic_recording(RecordingCriteria::default(), RecordingSettings::default())
            .unwrap_err()
            .status(),
        ErrorStatus::InvalidState
    );
    for _ in 0..3 {
        c.create_session("products", SessionMode::READ_ONLY, Vec::new())
            .unwrap();
    }

    let stopped = c.stop_traffic_recording(Some(started.task_id)).unwrap();
    let file = stopped.export_file.clone().unwrap();
    assert_eq!(c.stop_traffic_recording(None).unwrap(), stopped);

    let task = c.task_status(started.task_id).unwrap();
    assert_eq!(task.state, TaskState::Finished);
    assert_eq!(task.result_file, Some(file.file_id));

    let content: Vec<u8> = c
        .fetch_file(file.file_id)
        .unwrap()
        .map(|chunk| chunk.unwrap())
        .flatten()
        .collect();
    assert_eq!(String::from_utf8(content).unwrap().lines().count(), 3);

    assert_eq!(c.list_files(1, 10, None).unwrap().total, 1);
    c.delete_file(file.file_id).unwrap();
    assert_eq!(
        c.file(file.file_id).unwrap_err().status(),
        ErrorStatus::NotFound
    );
}

#[tokio::test]
async fn test_cancelling_recording_task_discards_export() {
    let f = fixture();
    let c = &f.controller;
    let started = c
        .start_traffic_recording(
            RecordingCriteria::default(),
            RecordingSettings {
                export_file: true,
                ..Default::default()
            },
        )
        .unwrap();
    c.create_session("products", SessionMode::READ_ONLY, Vec::new())
        .unwrap();

    let cancelled = c.cancel_task(started.task_id).unwrap();
    assert_eq!(cancelled.state, TaskState::Cancelled);
    assert!(!c.server_status().recording);
    assert_eq!(c.list_files(1, 10, None).unwrap().total, 0);
    assert_eq!(
        c.list_task_statuses(1, 10, &[TaskState::Cancelled])
            .unwrap()
            .items
            .len(),
        1
    );
    assert_eq!(
        c.cancel_task(started.task_id).unwrap_err().status(),
        ErrorStatus::InvalidState
    );
    assert_eq!(
        c.cancel_task(Uuid::new_v4()).unwrap_err().status(),
        ErrorStatus::NotFound
    );
}

#[tokio::test]
async fn test_cancelling_recording_that_already_stopped_reports_final_status() {
    let f = fixture();
    let c = &f.controller;
    let started = c
        .start_traffic_recording(RecordingCriteria::default(), RecordingSettings::default())
        .unwrap();
    c.stop_traffic_recording(None).unwrap();

    let status = assert_ok!(c.cancel_recording(started.task_id));
    assert_eq!(status.task_id, started.task_id);
    assert_eq!(status.state, TaskState::Finished);
    assert_eq!(
        c.cancel_recording(Uuid::new_v4()).unwrap_err().status(),
        ErrorStatus::NotFound
    );
}

#[tokio::test(start_paused = true)]
async fn test_sweep_expires_idle_sessions_and_stale_transactions() {
    let f = fixture_with(|config| {
        config.sessions.session_timeout_secs = 60;
        config.transactions.transaction_timeout_secs = 30;
    });
    let c = &f.controller;
    let idle = c
        .create_session("products", SessionMode::READ_ONLY, Vec::new())
        .unwrap();
    let busy = c
        .create_session("products", SessionMode::READ_WRITE, Vec::new())
        .unwrap();
    let tx = c.open_transaction(busy.id).unwrap();

    tokio::time::advance(Duration::from_secs(45)).await;
    c.session_info(busy.id).unwrap();
    let report = c.sweep(Instant::now());
    assert!(report.expired_sessions.is_empty());
    assert_eq!(report.expired_transactions, vec![tx.transaction_id]);

    tokio::time::advance(Duration::from_secs(20)).await;
    let report = c.sweep(Instant::now());
    assert_eq!(report.expired_sessions, vec![idle.id]);
    assert_eq!(c.server_status().active_sessions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_stops_recording_past_duration_limit() {
    let f = fixture();
    let c = &f.controller;
    let started = c
        .start_traffic_recording(
            RecordingCriteria::default(),
            RecordingSettings {
                max_duration_ms: Some(1_000),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(c.sweep(Instant::now()).recording_stopped, None);
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(
        c.sweep(Instant::now()).recording_stopped,
        Some(started.task_id)
    );
    assert!(c.traffic_recording_status().is_some_and(|s| !s.active));
}

#[tokio::test]
async fn test_management_views() {
    let f = fixture();
    let c = &f.controller;
    let session = c
        .create_session("products", SessionMode::READ_WRITE, Vec::new())
        .unwrap();
    c.register_change_capture(session.id, ChangeCaptureFilter::default())
        .unwrap();
    c.upsert_entity(session.id, "brand", None, None, json!({}))
        .await
        .unwrap();

    let status = c.server_status();
    assert_eq!(status.instance_id, c.instance_id());
    assert_eq!(status.catalog_count, 1);
    assert_eq!(status.active_sessions, 1);
    assert_eq!(status.committed_transactions, 1);
    assert_eq!(status.rolled_back_transactions, 0);
    assert!(!status.recording);
    assert_eq!(status.traffic_records, 0);

    let stats = c.catalog_statistics();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].version, 1);
    assert_eq!(stats[0].entity_types, vec!["brand".to_string()]);
    assert_eq!(stats[0].sessions.len(), 1);

    let config = c.configuration().unwrap();
    assert_eq!(config["server"]["port"], json!(5555));
    assert!(c.reserved_keywords().contains(&"catalog"));
    assert_eq!(
        c.define_catalog("catalog").unwrap_err().status(),
        ErrorStatus::InvalidArgument
    );
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let f = fixture();
    let c = &f.controller;
    let session = c
        .create_session("products", SessionMode::READ_WRITE, Vec::new())
        .unwrap();
    c.open_transaction(session.id).unwrap();
    c.start_traffic_recording(RecordingCriteria::default(), RecordingSettings::default())
        .unwrap();

    c.shutdown();
    let status = c.server_status();
    assert_eq!(status.active_sessions, 0);
    assert_eq!(status.open_transactions, 0);
    assert_eq!(status.rolled_back_transactions, 1);
    assert!(!status.recording);
    // the session close is the only record captured
    assert_eq!(status.traffic_records, 1);
}
