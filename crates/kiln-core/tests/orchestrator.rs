//! Job orchestrator end to end, against scripted engines

use kiln_artifact::{CallerId, InMemoryVersionStore, JobId, ProjectId, VersionStore};
use kiln_core::{
    DualEngineExecutor, EngineRun, JobHandle, JobOrchestrator, JobResult, JobState, KilnConfig,
    OrchestratorError, RunMode, RunStatus, ShadowPolicy, SubmitRequest,
};
use kiln_engine::{FailureCode, GenerationEngine, Intent, Role, TimedEngine};
use kiln_stream::{CanonicalEvent, EventKind};
use kiln_test_utils::{edit_engine, files, FixedGate, FlakyStore, ScriptedEngine};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn orchestrator(engine: impl GenerationEngine + 'static) -> JobOrchestrator {
    orchestrator_with_store(engine, Arc::new(InMemoryVersionStore::new()))
}

fn orchestrator_with_store(
    engine: impl GenerationEngine + 'static,
    store: Arc<dyn VersionStore>,
) -> JobOrchestrator {
    JobOrchestrator::builder(DualEngineExecutor::new(Arc::new(engine)), store).build()
}

fn orchestrator_with_shadow(
    primary: impl GenerationEngine + 'static,
    shadow: impl GenerationEngine + 'static,
) -> JobOrchestrator {
    let executor = DualEngineExecutor::new(Arc::new(primary)).with_shadow(
        Arc::new(shadow),
        Arc::new(FixedGate::passing()),
        ShadowPolicy::all(),
    );
    JobOrchestrator::builder(executor, Arc::new(InMemoryVersionStore::new())).build()
}

/// Waits until the job's shadow run is recorded and `ready` holds for it
async fn shadow_run(orch: &JobOrchestrator, job: JobId, ready: impl Fn(&EngineRun) -> bool) -> EngineRun {
    for _ in 0..400 {
        let shadow = orch
            .executor()
            .runs()
            .for_job(job)
            .into_iter()
            .find(|r| r.mode == RunMode::Shadow && ready(r));
        if let Some(run) = shadow {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("shadow run for {job} never recorded");
}

async fn finished_shadow_run(orch: &JobOrchestrator, job: JobId) -> EngineRun {
    shadow_run(orch, job, |r| r.status != RunStatus::Running).await
}

fn request(project: &str, text: &str) -> SubmitRequest {
    SubmitRequest::new(ProjectId::new(project), CallerId::new("alice"), text)
}

fn kinds(events: &[CanonicalEvent]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind.clone()).collect()
}

async fn finish(handle: JobHandle) -> CanonicalEvent {
    let events = handle.collect().await;
    let terminal = events.last().cloned().unwrap();
    assert!(terminal.is_terminal());
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    terminal
}

#[tokio::test]
async fn edit_on_empty_project_commits_first_version() {
    let engine = edit_engine("primary", files(&[("index.html", "<canvas></canvas>")]));
    let orch = orchestrator(engine.clone());
    let project = ProjectId::new("breakout");

    let handle = orch.submit(request("breakout", "Add a pause button")).unwrap();
    assert_eq!(handle.intent(), Intent::Edit);
    let events = handle.collect().await;

    assert_eq!(
        kinds(&events),
        vec![
            EventKind::Progress,
            EventKind::Stream,
            EventKind::Stream,
            EventKind::Completed
        ]
    );
    let completed = &events[3];
    assert_eq!(completed.data["intent"], "edit");
    assert_eq!(completed.data["artifactRefs"][0], "index.html");
    assert_eq!(completed.data["summary"]["added"][0], "index.html");

    let history = orch.store().list(&project).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].parent(), None);
    assert_eq!(
        completed.data["versionId"],
        serde_json::to_value(history[0].id()).unwrap()
    );
    assert_eq!(engine.submissions()[0].files.len(), 0);
}

#[tokio::test]
async fn second_edit_sees_current_files_and_chains_parent() {
    let engine = edit_engine("primary", files(&[("index.html", "v2")]));
    let orch = orchestrator(engine.clone());
    let project = ProjectId::new("p");

    finish(orch.submit(request("p", "Add a pause button")).unwrap()).await;
    let v1 = orch.store().head(&project).await.unwrap().unwrap();
    finish(orch.submit(request("p", "make the ball faster")).unwrap()).await;

    let second = &engine.submissions()[1];
    assert_eq!(second.files.get("index.html"), Some("v2"));
    let head = orch.store().head(&project).await.unwrap().unwrap();
    assert_eq!(orch.store().get(head).await.unwrap().unwrap().parent(), Some(v1));
}

#[tokio::test]
async fn busy_project_rejects_second_submission() {
    let release = Arc::new(Notify::new());
    let engine = ScriptedEngine::new("primary")
        .wait_for(Arc::clone(&release))
        .succeed_with(files(&[("index.html", "x")]), "done");
    let orch = orchestrator(engine);

    let first = orch.submit(request("p", "Add a pause button")).unwrap();
    let err = orch.submit(request("p", "Add lives")).unwrap_err();
    match err {
        OrchestratorError::ProjectBusy { project, active } => {
            assert_eq!(project, ProjectId::new("p"));
            assert_eq!(active, first.job_id());
        }
        other => panic!("expected ProjectBusy, got {other:?}"),
    }
    assert_eq!(
        orch.active_job(&ProjectId::new("p")).map(|(job, _)| job),
        Some(first.job_id())
    );

    release.notify_one();
    assert_eq!(finish(first).await.kind, EventKind::Completed);
}

#[tokio::test]
async fn projects_run_independently() {
    let engine = ScriptedEngine::new("primary").stall();
    let orch = orchestrator(engine);

    let p = orch.submit(request("p", "Add a pause button")).unwrap();
    let q = orch.submit(request("q", "Add a pause button")).unwrap();
    assert_ne!(p.job_id(), q.job_id());
    assert!(orch.active_job(&ProjectId::new("p")).is_some());
    assert!(orch.active_job(&ProjectId::new("q")).is_some());
}

#[tokio::test]
async fn lock_is_free_once_terminal_event_is_seen() {
    let orch = orchestrator(ScriptedEngine::new("primary").answer("it bounces"));
    let project = ProjectId::new("p");

    let mut handle = orch.submit(request("p", "Why does the ball stop?")).unwrap();
    while let Some(event) = handle.next_event().await {
        if event.is_terminal() {
            assert_eq!(orch.active_job(&project), None);
            orch.submit(request("p", "what is the score?")).unwrap();
            break;
        }
    }
}

#[tokio::test]
async fn chat_answers_without_committing() {
    let engine = ScriptedEngine::new("primary")
        .chunk("It stops because")
        .answer("It stops because speed is zero");
    let orch = orchestrator(engine.clone());

    let handle = orch.submit(request("p", "Why does the ball stop?")).unwrap();
    assert_eq!(handle.intent(), Intent::Chat);
    let terminal = finish(handle).await;

    assert_eq!(terminal.kind, EventKind::Completed);
    assert_eq!(terminal.data["versionId"], serde_json::Value::Null);
    assert_eq!(terminal.data["message"], "It stops because speed is zero");
    assert!(orch.store().list(&ProjectId::new("p")).await.unwrap().is_empty());
}

#[tokio::test]
async fn prior_turns_are_sent_as_context() {
    let engine = ScriptedEngine::new("primary").answer("because");
    let orch = orchestrator(engine.clone());

    finish(orch.submit(request("p", "Why does the ball stop?")).unwrap()).await;
    finish(orch.submit(request("p", "how is the score computed")).unwrap()).await;

    let context = &engine.submissions()[1].context;
    assert_eq!(context.len(), 2);
    assert_eq!(context[0].role, Role::User);
    assert_eq!(context[0].text, "Why does the ball stop?");
    assert_eq!(context[1].role, Role::Assistant);
    assert!(engine.submissions()[0].context.is_empty());
}

#[tokio::test]
async fn restore_appends_copy_of_parent() {
    let orch = orchestrator(
        ScriptedEngine::new("primary").succeed_with(files(&[("index.html", "new")]), "edit"),
    );
    let project = ProjectId::new("p");
    let store = Arc::clone(orch.store());
    let v1 = store
        .commit(kiln_artifact::NewVersion::new(
            project.clone(),
            None,
            files(&[("index.html", "old")]),
            kiln_artifact::JobId::new(),
        ))
        .await
        .unwrap();
    finish(orch.submit(request("p", "Add a pause button")).unwrap()).await;

    let handle = orch.submit(request("p", "Undo that change")).unwrap();
    assert_eq!(handle.intent(), Intent::Restore);
    let terminal = finish(handle).await;
    assert_eq!(terminal.kind, EventKind::Completed);

    let history = store.list(&project).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].files().get("index.html"), Some("old"));
    assert_eq!(history[2].files_hash(), store.get(v1).await.unwrap().unwrap().files_hash());
    assert_eq!(history[2].parent(), Some(history[1].id()));
}

#[tokio::test]
async fn explicit_restore_target() {
    let orch = orchestrator(ScriptedEngine::new("primary"));
    let project = ProjectId::new("p");
    let store = Arc::clone(orch.store());
    let v1 = store
        .commit(kiln_artifact::NewVersion::new(
            project.clone(),
            None,
            files(&[("a.js", "1")]),
            kiln_artifact::JobId::new(),
        ))
        .await
        .unwrap();
    let v2 = store
        .commit(kiln_artifact::NewVersion::new(
            project.clone(),
            Some(v1),
            files(&[("a.js", "2")]),
            kiln_artifact::JobId::new(),
        ))
        .await
        .unwrap();
    store
        .commit(kiln_artifact::NewVersion::new(
            project.clone(),
            Some(v2),
            files(&[("a.js", "3")]),
            kiln_artifact::JobId::new(),
        ))
        .await
        .unwrap();

    let handle = orch
        .submit(request("p", "put it back like the first one").with_restore_to(v1))
        .unwrap();
    assert_eq!(handle.intent(), Intent::Restore);
    finish(handle).await;

    let head = store.head(&project).await.unwrap().unwrap();
    assert_eq!(store.get(head).await.unwrap().unwrap().files().get("a.js"), Some("1"));
}

#[tokio::test]
async fn restore_without_history_fails() {
    let orch = orchestrator(ScriptedEngine::new("primary"));
    let terminal = finish(orch.submit(request("p", "Undo that change")).unwrap()).await;
    assert_eq!(terminal.kind, EventKind::Failed);
    assert_eq!(terminal.str_field("code"), Some("RESTORE_TARGET_MISSING"));
}

#[tokio::test]
async fn restore_target_from_another_project_fails() {
    let orch = orchestrator(ScriptedEngine::new("primary"));
    let foreign = orch
        .store()
        .commit(kiln_artifact::NewVersion::new(
            ProjectId::new("other"),
            None,
            files(&[("a.js", "1")]),
            kiln_artifact::JobId::new(),
        ))
        .await
        .unwrap();

    let handle = orch.submit(request("p", "restore").with_restore_to(foreign)).unwrap();
    let terminal = finish(handle).await;
    assert_eq!(terminal.str_field("code"), Some("RESTORE_TARGET_MISSING"));
    assert!(orch.store().list(&ProjectId::new("p")).await.unwrap().is_empty());
}

#[tokio::test]
async fn edit_without_files_is_empty_result() {
    let orch = orchestrator(ScriptedEngine::new("primary").answer("nothing to do"));
    let handle = orch.submit(request("p", "Add a pause button")).unwrap();
    let job = handle.job_id();
    let terminal = finish(handle).await;

    assert_eq!(terminal.str_field("code"), Some("EMPTY_RESULT"));
    assert!(orch.store().list(&ProjectId::new("p")).await.unwrap().is_empty());
    assert_eq!(orch.executor().runs().for_job(job).len(), 1);
}

#[tokio::test]
async fn engine_failure_code_is_relayed() {
    let orch = orchestrator(
        ScriptedEngine::new("primary")
            .progress("planning")
            .fail(FailureCode::EngineRejected, "model overloaded"),
    );
    let events = orch.submit(request("p", "Add a pause button")).unwrap().collect().await;

    assert_eq!(kinds(&events), vec![EventKind::Progress, EventKind::Failed]);
    assert_eq!(events[1].str_field("code"), Some("ENGINE_REJECTED"));
    assert_eq!(events[1].str_field("message"), Some("model overloaded"));
}

#[tokio::test]
async fn rejected_submission_fails_job_and_frees_project() {
    let orch = orchestrator(ScriptedEngine::new("primary").reject_with(503));
    let handle = orch.submit(request("p", "Add a pause button")).unwrap();
    let terminal = finish(handle).await;
    assert_eq!(terminal.str_field("code"), Some("ENGINE_REJECTED"));
    assert_eq!(orch.active_job(&ProjectId::new("p")), None);
}

#[tokio::test]
async fn stream_without_terminal_is_stream_ended() {
    let orch = orchestrator(ScriptedEngine::new("primary").chunk("<canvas"));
    let terminal = finish(orch.submit(request("p", "Add a pause button")).unwrap()).await;
    assert_eq!(terminal.str_field("code"), Some("STREAM_ENDED"));
}

#[tokio::test]
async fn commit_failure_is_reported_after_generation() {
    let store = Arc::new(FlakyStore::new());
    store.set_failing(true);
    let orch = orchestrator_with_store(
        edit_engine("primary", files(&[("index.html", "x")])),
        Arc::clone(&store) as Arc<dyn VersionStore>,
    );

    let handle = orch.submit(request("p", "Add a pause button")).unwrap();
    let terminal = finish(handle).await;
    assert_eq!(terminal.str_field("code"), Some("VERSION_COMMIT_FAILED"));

    store.set_failing(false);
    let terminal = finish(orch.submit(request("p", "Add a pause button")).unwrap()).await;
    assert_eq!(terminal.kind, EventKind::Completed);
}

#[tokio::test]
async fn panicking_engine_fails_internal_and_frees_project() {
    let orch = orchestrator(ScriptedEngine::new("primary").panicking());
    let handle = orch.submit(request("p", "Add a pause button")).unwrap();
    let terminal = finish(handle).await;

    assert_eq!(terminal.str_field("code"), Some("INTERNAL"));
    assert_eq!(orch.active_job(&ProjectId::new("p")), None);
}

#[tokio::test(start_paused = true)]
async fn stalled_engine_times_out_and_is_cancelled() {
    let engine = ScriptedEngine::new("primary").progress("planning").stall();
    let timed = TimedEngine::new(Arc::new(engine.clone()), Duration::from_secs(180));
    let orch = orchestrator(timed);

    let handle = orch.submit(request("p", "Add a pause button")).unwrap();
    let events = handle.collect().await;
    assert_eq!(kinds(&events), vec![EventKind::Progress, EventKind::Failed]);
    assert_eq!(events[1].str_field("code"), Some("TIMEOUT"));

    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(engine.cancels(), 1);
}

#[tokio::test]
async fn dropped_handle_still_commits() {
    let release = Arc::new(Notify::new());
    let engine = ScriptedEngine::new("primary")
        .wait_for(Arc::clone(&release))
        .chunk("<canvas>")
        .succeed_with(files(&[("index.html", "x")]), "done");
    let orch = orchestrator(engine);
    let project = ProjectId::new("p");

    let handle = orch.submit(request("p", "Add a pause button")).unwrap();
    let job_id = handle.job_id();
    let join = tokio::spawn(handle.join());
    release.notify_one();

    let job = join.await.unwrap().unwrap();
    assert_eq!(job.id(), job_id);
    assert_eq!(job.state(), JobState::Completed);
    assert!(matches!(job.result(), Some(JobResult::Success { version: Some(_) })));
    assert_eq!(orch.store().list(&project).await.unwrap().len(), 1);
}

#[tokio::test]
async fn joined_job_records_failure() {
    let orch = orchestrator(ScriptedEngine::new("primary").fail(FailureCode::Timeout, "slow"));
    let job = orch.submit(request("p", "Add a pause button")).unwrap().join().await.unwrap();
    assert_eq!(job.state(), JobState::Failed);
    match job.result() {
        Some(JobResult::Failure { code, message }) => {
            assert_eq!(*code, FailureCode::Timeout);
            assert_eq!(message, "slow");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn shadow_files_never_reach_history() {
    let shadow = edit_engine(
        "candidate",
        files(&[("index.html", "<p>candidate</p>"), ("extra.js", "1")]),
    );
    let orch = orchestrator_with_shadow(
        edit_engine("primary", files(&[("index.html", "<p>primary</p>")])),
        shadow.clone(),
    );
    let project = ProjectId::new("p");

    let handle = orch.submit(request("p", "Add a pause button")).unwrap();
    let job = handle.job_id();
    let terminal = finish(handle).await;
    assert_eq!(terminal.kind, EventKind::Completed);
    assert_eq!(terminal.data["artifactRefs"], serde_json::json!(["index.html"]));

    let run = finished_shadow_run(&orch, job).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.engine.name, "candidate");
    assert_eq!(shadow.submissions().len(), 1);

    let history = orch.store().list(&project).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].files().get("index.html"), Some("<p>primary</p>"));
    assert_eq!(history[0].files().get("extra.js"), None);
}

#[tokio::test]
async fn failing_shadow_leaves_completed_job_intact() {
    let orch = orchestrator_with_shadow(
        edit_engine("primary", files(&[("index.html", "x")])),
        ScriptedEngine::new("candidate").fail(FailureCode::EngineRejected, "boom"),
    );

    let handle = orch.submit(request("p", "Add a pause button")).unwrap();
    let job = handle.job_id();
    let terminal = finish(handle).await;
    assert_eq!(terminal.kind, EventKind::Completed);

    let run = finished_shadow_run(&orch, job).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_code, Some(FailureCode::EngineRejected));
    assert_eq!(orch.executor().shadow_health().failed, 1);
    assert_eq!(orch.store().list(&ProjectId::new("p")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn stalled_shadow_does_not_hold_the_project() {
    let orch = orchestrator_with_shadow(
        edit_engine("primary", files(&[("index.html", "x")])),
        ScriptedEngine::new("candidate").stall(),
    );
    let project = ProjectId::new("p");

    let handle = orch.submit(request("p", "Add a pause button")).unwrap();
    let job = handle.job_id();
    let terminal = tokio::time::timeout(Duration::from_secs(5), finish(handle))
        .await
        .unwrap();
    assert_eq!(terminal.kind, EventKind::Completed);
    assert_eq!(orch.active_job(&project), None);

    let second = orch.submit(request("p", "Add a pause button")).unwrap();
    assert_eq!(finish(second).await.kind, EventKind::Completed);
    assert_eq!(orch.store().list(&project).await.unwrap().len(), 2);

    let run = shadow_run(&orch, job, |_| true).await;
    assert_eq!(run.status, RunStatus::Running);
}

#[tokio::test]
async fn configured_run_log_capacity_is_applied() {
    let mut config = KilnConfig::new();
    config.shadow.run_log_capacity = 8;
    let orch = JobOrchestrator::from_config(&config).await.unwrap();
    assert_eq!(orch.executor().runs().capacity(), 8);
}
