mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;

use appforge::core::error::RunError;
use appforge::core::generator::GenerationTask;
use appforge::core::pipeline::{PipelineSettings, RunMode, Step};
use appforge::core::progress::RunEvent;
use appforge::core::service::RunRequest;
use appforge::core::store::SqliteStore;
use appforge::core::tree::ComponentType;

use common::{
    FlakyStore, Gate, ScriptedGenerator, create_project, events, last_run_events, last_seq,
    memory_store, service_with, settings, template_service, wait_for_terminal,
};

fn edit(project_id: &str, instruction: &str) -> RunRequest {
    RunRequest::new(RunMode::Edit, instruction).for_project(project_id)
}

fn terminal_events(events: &[RunEvent]) -> Vec<&RunEvent> {
    events.iter().filter(|e| e.is_terminal()).collect()
}

fn status_steps(events: &[RunEvent]) -> Vec<Step> {
    events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Status { step, .. } => Some(*step),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn task_tracker_is_created_with_consistent_data() {
    let service = template_service();
    let outcome = service
        .run_to_completion(RunRequest::new(RunMode::Create, "a task tracker"))
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.step, Step::Complete);
    assert_eq!(outcome.version, Some(1));

    let config = outcome.config.unwrap();
    assert_eq!(
        config.pages.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["dashboard", "tasks"]
    );
    let tasks_page = &config.pages["tasks"];
    let table = &tasks_page.zones[0].components[0];
    assert_eq!(table.kind, ComponentType::DataTable);
    assert_eq!(table.resource(), Some("task"));

    let data = outcome.mock_data.unwrap();
    let records = data.get("task").unwrap();
    assert!((5..=10).contains(&records.len()), "{} records", records.len());
    let ids: HashSet<String> = records.iter().map(|r| r["id"].to_string()).collect();
    assert_eq!(ids.len(), records.len());
    for record in records {
        let status = record["status"].as_str().unwrap();
        assert!(["todo", "doing", "done"].contains(&status), "status {}", status);
        assert!(!record["title"].as_str().unwrap().is_empty());
    }

    // What clients read back is what the run reported.
    let snapshot = service
        .snapshot(&outcome.project_id, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.app_config, config);
    assert_eq!(&snapshot.mock_data, &data);
}

#[tokio::test]
async fn create_run_emits_ordered_gap_free_events() {
    let service = template_service();
    let project_id = create_project(&service, "a task tracker").await;

    let sequenced = events(&service, &project_id);
    let seqs: Vec<u64> = sequenced.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=sequenced.len() as u64).collect::<Vec<_>>());

    let run: Vec<RunEvent> = sequenced.into_iter().map(|e| e.event).collect();
    assert_eq!(status_steps(&run), RunMode::Create.steps().to_vec());
    // Every working step reports its status, then its state.
    for pair in run[..run.len() - 1].chunks(2) {
        assert_eq!(pair[0].event_type(), "status");
        assert_eq!(pair[1].event_type(), "state");
        assert_eq!(pair[0].step(), pair[1].step());
    }
    assert!(matches!(run.last(), Some(RunEvent::Complete { .. })));

    let logged = service.store().list_messages(&project_id, None).await.unwrap();
    assert_eq!(logged.len(), run.len());
    let checkpoints = service.store().list_checkpoints(&project_id).await.unwrap();
    assert_eq!(
        checkpoints.iter().map(|c| c.step.as_str()).collect::<Vec<_>>(),
        vec![
            "analyze_intent",
            "generate_use_cases",
            "generate_page_config",
            "generate_mock_data",
            "write_output"
        ]
    );
    let project = service.store().project(&project_id).await.unwrap().unwrap();
    assert_eq!(project.project_id, project_id);
}

#[tokio::test]
async fn chart_is_appended_to_the_dashboard() {
    let service = template_service();
    let project_id = create_project(&service, "a task tracker").await;
    let before = service.snapshot(&project_id, None).await.unwrap().unwrap();
    let before_components = before.app_config.pages["dashboard"].zones[0].components.clone();

    let outcome = service
        .run_to_completion(edit(&project_id, "add a chart to the dashboard"))
        .await
        .unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(outcome.version, Some(2));

    let after = service.snapshot(&project_id, None).await.unwrap().unwrap();
    let components = &after.app_config.pages["dashboard"].zones[0].components;
    assert_eq!(components.len(), before_components.len() + 1);
    assert_eq!(&components[..before_components.len()], &before_components[..]);
    assert_eq!(components.last().unwrap().kind, ComponentType::Chart);

    // Layout-only edits leave the data alone.
    assert_eq!(after.mock_data, before.mock_data);
    assert_eq!(after.app_config.entities, before.app_config.entities);

    let run = last_run_events(&service, &project_id);
    assert_eq!(status_steps(&run), RunMode::Edit.steps().to_vec());
    match run.last() {
        Some(RunEvent::Complete { message, config, .. }) => {
            assert_eq!(message, "Application updated successfully");
            assert_eq!(config, &after.app_config);
        }
        other => panic!("expected complete, got {:?}", other),
    }
}

#[tokio::test]
async fn removing_a_referenced_entity_fails_without_a_new_version() {
    let service = template_service();
    let project_id = create_project(&service, "a task tracker").await;
    let stored_before = service
        .store()
        .latest_version(&project_id)
        .await
        .unwrap()
        .unwrap();
    let bytes_before = serde_json::to_string(&stored_before.tree).unwrap();

    let outcome = service
        .run_to_completion(edit(&project_id, "remove entity task"))
        .await
        .unwrap();
    assert_eq!(outcome.step, Step::ApplyPatch);
    assert!(matches!(outcome.error, Some(RunError::Validation(_))));

    match last_run_events(&service, &project_id).last() {
        Some(RunEvent::Error { step, error }) => {
            assert_eq!(*step, Step::ApplyPatch);
            assert!(error.starts_with("ValidationError"), "{}", error);
        }
        other => panic!("expected error, got {:?}", other),
    }

    let stored_after = service
        .store()
        .latest_version(&project_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_after.version, 1);
    assert_eq!(serde_json::to_string(&stored_after.tree).unwrap(), bytes_before);
}

#[tokio::test]
async fn only_one_run_per_project_at_a_time() {
    let gate = Gate::default();
    let generator = Arc::new(ScriptedGenerator::new().gated(GenerationTask::EditIntent, gate.clone()));
    let service = service_with(generator, memory_store(), settings());
    let project_id = create_project(&service, "a task tracker").await;
    let after = last_seq(&service, &project_id);

    let started = service
        .start_run(edit(&project_id, "add a chart to the dashboard"))
        .unwrap();
    assert_eq!(started.project_id, project_id);
    gate.entered.notified().await;

    let second = service.start_run(edit(&project_id, "add a chart to the dashboard"));
    assert!(matches!(second, Err(RunError::Concurrency(_))));
    let rollback = service.rollback(&project_id, 1).await;
    assert!(matches!(rollback, Err(RunError::Concurrency(_))));

    gate.release.notify_one();
    let end = wait_for_terminal(&service, &project_id, after).await;
    assert!(matches!(end, RunEvent::Complete { .. }));
    assert!(!service.runs().is_active(&project_id));

    let versions = service.store().list_versions(&project_id).await.unwrap();
    assert_eq!(versions.iter().map(|v| v.version).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn versions_stay_gap_free_across_failed_edits() {
    let service = template_service();
    let project_id = create_project(&service, "a task tracker").await;

    for instruction in [
        "add a chart to the dashboard",
        "remove entity task",
        "add number field priority to tasks",
        "rename page tasks to Work Items",
    ] {
        service
            .run_to_completion(edit(&project_id, instruction))
            .await
            .unwrap();
    }

    let versions: Vec<u64> = service
        .store()
        .list_versions(&project_id)
        .await
        .unwrap()
        .iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
    let latest = service.snapshot(&project_id, None).await.unwrap().unwrap();
    assert_eq!(latest.app_config.pages["tasks"].title, "Work Items");
}

#[tokio::test]
async fn adding_a_field_keeps_existing_records() {
    let service = template_service();
    let project_id = create_project(&service, "a task tracker").await;
    let before = service.snapshot(&project_id, None).await.unwrap().unwrap();
    let old_records = before.mock_data.get("task").unwrap().clone();

    let outcome = service
        .run_to_completion(edit(&project_id, "add number field priority to tasks"))
        .await
        .unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.error);

    let after = service.snapshot(&project_id, None).await.unwrap().unwrap();
    assert!(
        after.app_config.entity("task").unwrap().field("priority").is_some()
    );
    let new_records = after.mock_data.get("task").unwrap();
    assert_eq!(new_records.len(), old_records.len());
    for (old, new) in old_records.iter().zip(new_records) {
        for (key, value) in old {
            assert_eq!(new.get(key), Some(value), "field {} changed", key);
        }
        assert!(new["priority"].is_number());
    }

    // The earlier version still reads back its own data.
    let v1 = service.snapshot(&project_id, Some(1)).await.unwrap().unwrap();
    assert_eq!(v1.mock_data, before.mock_data);
}

#[tokio::test]
async fn persistence_failure_halts_the_run() {
    let store = Arc::new(FlakyStore::new(SqliteStore::open_in_memory().unwrap()));
    store.fail_mock_data.store(true, Ordering::SeqCst);
    let service = service_with(
        Arc::new(ScriptedGenerator::new()),
        store.clone(),
        settings(),
    );

    let outcome = service
        .run_to_completion(RunRequest::new(RunMode::Create, "a task tracker"))
        .await
        .unwrap();
    assert_eq!(outcome.step, Step::GenerateMockData);
    assert!(matches!(outcome.error, Some(RunError::Persistence(_))));

    let run: Vec<RunEvent> = events(&service, &outcome.project_id)
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert!(!status_steps(&run).contains(&Step::WriteOutput));
    match run.last() {
        Some(RunEvent::Error { step, error }) => {
            assert_eq!(*step, Step::GenerateMockData);
            assert!(error.starts_with("PersistenceError"), "{}", error);
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert!(service.store().project(&outcome.project_id).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_version_write_leaves_history_untouched() {
    let store = Arc::new(FlakyStore::new(SqliteStore::open_in_memory().unwrap()));
    let service = service_with(
        Arc::new(ScriptedGenerator::new()),
        store.clone(),
        settings(),
    );
    let project_id = create_project(&service, "a task tracker").await;

    store.fail_versions.store(true, Ordering::SeqCst);
    let outcome = service
        .run_to_completion(edit(&project_id, "add a chart to the dashboard"))
        .await
        .unwrap();
    assert_eq!(outcome.step, Step::ApplyPatch);
    assert!(matches!(outcome.error, Some(RunError::Persistence(_))));
    let latest = service.store().latest_version(&project_id).await.unwrap().unwrap();
    assert_eq!(latest.version, 1);
    let checkpoints = service.store().list_checkpoints(&project_id).await.unwrap();
    assert!(checkpoints.iter().all(|c| c.step != "apply_patch"));
}

#[tokio::test]
async fn failed_checkpoint_takes_the_new_version_with_it() {
    let store = Arc::new(FlakyStore::new(SqliteStore::open_in_memory().unwrap()));
    let service = service_with(
        Arc::new(ScriptedGenerator::new()),
        store.clone(),
        settings(),
    );
    let project_id = create_project(&service, "a task tracker").await;

    store.fail_checkpoint_at(Step::ApplyPatch);
    let outcome = service
        .run_to_completion(edit(&project_id, "add a chart to the dashboard"))
        .await
        .unwrap();
    assert_eq!(outcome.step, Step::ApplyPatch);
    assert!(matches!(outcome.error, Some(RunError::Persistence(_))));

    let latest = service.store().latest_version(&project_id).await.unwrap().unwrap();
    assert_eq!(latest.version, 1);
    let run = last_run_events(&service, &project_id);
    assert!(
        !run.iter()
            .any(|e| matches!(e, RunEvent::State { step: Step::ApplyPatch, .. }))
    );
    match terminal_events(&run).as_slice() {
        [RunEvent::Error { step, error }] => {
            assert_eq!(*step, Step::ApplyPatch);
            assert!(error.starts_with("PersistenceError"), "{}", error);
        }
        other => panic!("expected one error event, got {:?}", other),
    }
}

#[tokio::test]
async fn unlogged_state_event_commits_no_version() {
    let store = Arc::new(FlakyStore::new(SqliteStore::open_in_memory().unwrap()));
    store.fail_message("state", Step::GeneratePageConfig);
    let service = service_with(
        Arc::new(ScriptedGenerator::new()),
        store.clone(),
        settings(),
    );

    let outcome = service
        .run_to_completion(RunRequest::new(RunMode::Create, "a task tracker"))
        .await
        .unwrap();
    assert_eq!(outcome.step, Step::GeneratePageConfig);
    assert!(matches!(outcome.error, Some(RunError::Persistence(_))));

    let project_id = outcome.project_id;
    assert!(service.store().latest_version(&project_id).await.unwrap().is_none());
    let checkpoints = service.store().list_checkpoints(&project_id).await.unwrap();
    assert_eq!(
        checkpoints.iter().map(|c| c.step.as_str()).collect::<Vec<_>>(),
        vec!["analyze_intent", "generate_use_cases"]
    );
    let run: Vec<RunEvent> = events(&service, &project_id)
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert_eq!(terminal_events(&run).len(), 1);
    assert!(matches!(
        run.last(),
        Some(RunEvent::Error { step: Step::GeneratePageConfig, .. })
    ));
}

#[tokio::test]
async fn unlogged_completion_is_reported_once_as_an_error() {
    let store = Arc::new(FlakyStore::new(SqliteStore::open_in_memory().unwrap()));
    let service = service_with(
        Arc::new(ScriptedGenerator::new()),
        store.clone(),
        settings(),
    );
    let project_id = create_project(&service, "a task tracker").await;

    store.fail_message("complete", Step::Complete);
    let outcome = service
        .run_to_completion(edit(&project_id, "add a chart to the dashboard"))
        .await
        .unwrap();
    assert_eq!(outcome.step, Step::Complete);
    assert!(matches!(outcome.error, Some(RunError::Persistence(_))));
    assert!(!service.runs().is_active(&project_id));

    let run = last_run_events(&service, &project_id);
    match terminal_events(&run).as_slice() {
        [RunEvent::Error { step, .. }] => assert_eq!(*step, Step::Complete),
        other => panic!("expected one error event, got {:?}", other),
    }
    // The log agrees with what subscribers saw.
    let logged = service.store().list_messages(&project_id, None).await.unwrap();
    assert_eq!(logged.last().unwrap().event_type, "error");
}

#[tokio::test]
async fn project_stays_busy_until_its_run_has_logged_the_end() {
    let store = Arc::new(FlakyStore::new(SqliteStore::open_in_memory().unwrap()));
    let service = service_with(
        Arc::new(ScriptedGenerator::new()),
        store.clone(),
        settings(),
    );
    let project_id = create_project(&service, "a task tracker").await;
    let after = last_seq(&service, &project_id);

    let gate = Gate::default();
    store.hold_next_message("complete", gate.clone());
    service
        .start_run(edit(&project_id, "add a chart to the dashboard"))
        .unwrap();
    gate.entered.notified().await;

    let second = service.start_run(edit(&project_id, "add number field priority to tasks"));
    assert!(matches!(second, Err(RunError::Concurrency(_))));
    assert!(matches!(
        service.rollback(&project_id, 1).await,
        Err(RunError::Concurrency(_))
    ));

    gate.release.notify_one();
    let end = wait_for_terminal(&service, &project_id, after).await;
    assert!(matches!(end, RunEvent::Complete { .. }));

    // Whoever saw the end can start the next run straight away.
    let next = service
        .run_to_completion(edit(&project_id, "add number field priority to tasks"))
        .await
        .unwrap();
    assert!(next.is_success(), "{:?}", next.error);
    assert_eq!(next.version, Some(3));
}

#[tokio::test]
async fn cancelled_run_stops_at_the_next_step() {
    let gate = Gate::default();
    let generator = Arc::new(ScriptedGenerator::new().gated(GenerationTask::UseCases, gate.clone()));
    let service = service_with(generator, memory_store(), settings());

    let started = service
        .start_run(RunRequest::new(RunMode::Create, "a task tracker"))
        .unwrap();
    gate.entered.notified().await;
    assert!(service.cancel(&started.project_id).is_some());
    gate.release.notify_one();

    match wait_for_terminal(&service, &started.project_id, None).await {
        RunEvent::Error { step, error } => {
            assert_eq!(step, Step::GeneratePageConfig);
            assert!(error.starts_with("Cancelled"), "{}", error);
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert!(
        service
            .store()
            .latest_version(&started.project_id)
            .await
            .unwrap()
            .is_none()
    );
    assert!(service.cancel(&started.project_id).is_none());
}

#[tokio::test]
async fn rollback_appends_a_copy_of_an_earlier_version() {
    let service = template_service();
    let project_id = create_project(&service, "a task tracker").await;
    let v1 = service.snapshot(&project_id, Some(1)).await.unwrap().unwrap();
    service
        .run_to_completion(edit(&project_id, "add number field priority to tasks"))
        .await
        .unwrap();

    let committed = service.rollback(&project_id, 1).await.unwrap();
    assert_eq!(committed.version, 3);
    let v3 = service.snapshot(&project_id, None).await.unwrap().unwrap();
    assert_eq!(v3.version, 3);
    assert_eq!(v3.app_config, v1.app_config);
    assert_eq!(v3.mock_data, v1.mock_data);

    // History is kept.
    let v2 = service.snapshot(&project_id, Some(2)).await.unwrap().unwrap();
    assert!(v2.app_config.entity("task").unwrap().field("priority").is_some());

    assert!(matches!(
        service.rollback(&project_id, 99).await,
        Err(RunError::Validation(_))
    ));
}

#[tokio::test]
async fn stale_base_version_is_rejected() {
    let service = template_service();
    let project_id = create_project(&service, "a task tracker").await;
    let mut request = edit(&project_id, "add a chart to the dashboard");
    request.base_version = Some(7);

    let outcome = service.run_to_completion(request).await.unwrap();
    assert_eq!(outcome.step, Step::LoadCurrentState);
    assert!(matches!(outcome.error, Some(RunError::Validation(_))));
}

#[tokio::test]
async fn edit_of_unknown_project_fails_to_load() {
    let service = template_service();
    let outcome = service
        .run_to_completion(edit("ghost", "add a chart to the dashboard"))
        .await
        .unwrap();
    assert_eq!(outcome.step, Step::LoadCurrentState);
    assert!(matches!(outcome.error, Some(RunError::Validation(_))));
}

#[tokio::test]
async fn empty_instruction_is_rejected_before_any_event() {
    let service = template_service();
    let result = service
        .run_to_completion(RunRequest::new(RunMode::Edit, "   ").for_project("p1"))
        .await;
    assert!(matches!(result, Err(RunError::Validation(_))));
    assert!(events(&service, "p1").is_empty());
}

#[tokio::test]
async fn flaky_generator_is_retried() {
    let generator = Arc::new(ScriptedGenerator::new().flaky(GenerationTask::AnalyzeIntent, 2));
    let service = service_with(generator.clone(), memory_store(), settings());
    let outcome = service
        .run_to_completion(RunRequest::new(RunMode::Create, "a task tracker"))
        .await
        .unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(generator.calls(GenerationTask::AnalyzeIntent), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let generator = Arc::new(ScriptedGenerator::new().flaky(GenerationTask::AnalyzeIntent, 10));
    let service = service_with(generator.clone(), memory_store(), settings());
    let outcome = service
        .run_to_completion(RunRequest::new(RunMode::Create, "a task tracker"))
        .await
        .unwrap();
    assert_eq!(outcome.step, Step::AnalyzeIntent);
    assert!(matches!(outcome.error, Some(RunError::Generation(_))));
    assert_eq!(generator.calls(GenerationTask::AnalyzeIntent), 3);
}

#[tokio::test]
async fn hung_generator_times_out() {
    let generator = Arc::new(ScriptedGenerator::new().hang(GenerationTask::UseCases));
    let service = service_with(
        generator.clone(),
        memory_store(),
        PipelineSettings {
            timeout: Duration::from_millis(50),
            max_retries: 1,
            ..settings()
        },
    );
    let outcome = service
        .run_to_completion(RunRequest::new(RunMode::Create, "a task tracker"))
        .await
        .unwrap();
    assert_eq!(outcome.step, Step::GenerateUseCases);
    match outcome.error {
        Some(RunError::Generation(message)) => assert!(message.contains("timed out"), "{}", message),
        other => panic!("expected a generation error, got {:?}", other),
    }
    assert_eq!(generator.calls(GenerationTask::UseCases), 2);
}

#[tokio::test]
async fn restarted_service_resumes_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("appforge.db");

    let store = Arc::new(SqliteStore::open(&path).await.unwrap());
    let service = service_with(Arc::new(ScriptedGenerator::new()), store, settings());
    let project_id = create_project(&service, "a task tracker").await;
    let first_run = events(&service, &project_id).len() as u64;
    drop(service);

    let store = Arc::new(SqliteStore::open(&path).await.unwrap());
    let service = service_with(Arc::new(ScriptedGenerator::new()), store, settings());
    let outcome = service
        .run_to_completion(edit(&project_id, "add a chart to the dashboard"))
        .await
        .unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(outcome.version, Some(2));

    let all = events(&service, &project_id);
    assert_eq!(all.first().map(|e| e.seq), Some(1));
    assert_eq!(all[first_run as usize].seq, first_run + 1);
    let payload: Value = serde_json::to_value(&all.last().unwrap().event).unwrap();
    assert_eq!(payload["type"], "complete");
}

#[tokio::test]
async fn structured_edit_instruction_is_applied() {
    let service = template_service();
    let project_id = create_project(&service, "a task tracker").await;
    let before = service.snapshot(&project_id, None).await.unwrap().unwrap();

    let instruction =
        r#"{"targetType": "component", "operation": "add", "targetPath": "dashboard.zones[0]", "payload": "Chart"}"#;
    let outcome = service
        .run_to_completion(edit(&project_id, instruction))
        .await
        .unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.error);

    let after = service.snapshot(&project_id, None).await.unwrap().unwrap();
    let old = &before.app_config.pages["dashboard"].zones[0].components;
    let new = &after.app_config.pages["dashboard"].zones[0].components;
    assert_eq!(new.len(), old.len() + 1);
    assert_eq!(&new[..old.len()], &old[..]);
    assert_eq!(new[old.len()].kind, ComponentType::Chart);
}
