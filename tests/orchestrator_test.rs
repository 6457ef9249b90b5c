//! End-to-end tests of the orchestrator with scripted runners

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use takopi::orchestrator::{InboundMessage, OrchestratorSettings};
use takopi::queue::{Admission, CancelOutcome, SessionState};
use takopi::{ActionEvent, EngineId, ResumeToken, SessionKey, ThreadId};

#[tokio::test]
async fn test_fresh_run_delivers_answer_with_resume_line() {
    let runner = Arc::new(ScriptedRunner::codex(vec![
        started("codex", "t-1"),
        answer("codex", "t-1", "All tests pass."),
    ]));
    let orchestrator = orchestrator_with(vec![runner.clone()]);
    let sink = RecordingSink::new();

    let submitted = orchestrator
        .submit(InboundMessage::new("42", "run the tests"), sink.clone())
        .await
        .unwrap();
    assert!(matches!(submitted.admission, Admission::Started { .. }));
    assert_eq!(submitted.key, SessionKey::new(ThreadId::new("42"), None));

    sink.wait_ended(1).await;
    let finished = sink.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].resume_line.as_deref(), Some("`codex resume t-1`"));
    assert_eq!(finished[0].message(), "All tests pass.\n\n`codex resume t-1`");
    assert_eq!(runner.prompts(), vec!["run the tests".to_string()]);
}

#[tokio::test]
async fn test_cancel_yields_one_cancelled_result_and_frees_slot() {
    let runner = Arc::new(ScriptedRunner::codex(vec![
        started("codex", "t-1"),
        Step::UntilCancelled,
    ]));
    let orchestrator = orchestrator_with(vec![runner.clone()]);
    let sink = RecordingSink::new();

    let submitted = orchestrator
        .submit(InboundMessage::new("42", "long job"), sink.clone())
        .await
        .unwrap();
    sink.wait_started(1).await;

    assert_eq!(orchestrator.cancel_key(&submitted.key), CancelOutcome::Requested);
    assert_eq!(
        orchestrator.cancel_key(&submitted.key),
        CancelOutcome::AlreadyCancelling
    );

    sink.wait_ended(1).await;
    wait_until(|| orchestrator.queue().is_idle()).await;

    let finished = sink.finished();
    assert_eq!(finished.len(), 1);
    assert!(finished[0].completed.is_cancelled());
    assert_eq!(finished[0].message(), "cancelled\n\n`codex resume t-1`");
    assert_eq!(
        orchestrator.queue().state(&submitted.key),
        SessionState::Idle
    );
    assert_eq!(orchestrator.cancel_key(&submitted.key), CancelOutcome::NotRunning);
}

#[tokio::test]
async fn test_cancel_by_replying_to_fresh_sessions_resume_line() {
    let runner = Arc::new(ScriptedRunner::codex(vec![
        started("codex", "t-9"),
        Step::UntilCancelled,
    ]));
    let orchestrator = orchestrator_with(vec![runner]);
    let sink = RecordingSink::new();

    orchestrator
        .submit(InboundMessage::new("42", "long job"), sink.clone())
        .await
        .unwrap();
    sink.wait_started(1).await;

    let outcome = orchestrator.cancel(&ThreadId::new("42"), Some("working...\n`codex resume t-9`"));
    assert_eq!(outcome, CancelOutcome::Requested);
    sink.wait_ended(1).await;
    assert!(sink.finished()[0].completed.is_cancelled());
}

#[tokio::test]
async fn test_same_session_requests_are_serialized_in_order() {
    let runner = Arc::new(ScriptedRunner::codex(vec![
        Step::Sleep(Duration::from_millis(30)),
        started("codex", "t-1"),
        answer("codex", "t-1", "ok"),
    ]));
    let orchestrator = orchestrator_with(vec![runner.clone()]);
    let sink = RecordingSink::new();

    let reply = "done\n\n`codex resume t-1`";
    let first = orchestrator
        .submit(InboundMessage::new("42", "first").reply_to(reply), sink.clone())
        .await
        .unwrap();
    let second = orchestrator
        .submit(InboundMessage::new("42", "second").reply_to(reply), sink.clone())
        .await
        .unwrap();
    let third = orchestrator
        .submit(InboundMessage::new("42", "third").reply_to(reply), sink.clone())
        .await
        .unwrap();

    assert!(matches!(first.admission, Admission::Started { .. }));
    assert!(matches!(second.admission, Admission::Queued { position: 1, .. }));
    assert!(matches!(third.admission, Admission::Queued { position: 2, .. }));
    assert_eq!(first.key, second.key);

    sink.wait_ended(3).await;
    assert_eq!(runner.max_active(), 1);
    assert_eq!(runner.prompts(), vec!["first", "second", "third"]);
    let token = ResumeToken::new(EngineId::new("codex"), "t-1");
    assert!(runner.resumes().iter().all(|r| r.as_ref() == Some(&token)));

    let queued: Vec<_> = sink
        .records()
        .into_iter()
        .filter_map(|(_, r)| match r {
            Record::Queued(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(queued, vec![1, 2]);
}

#[tokio::test]
async fn test_different_threads_run_concurrently() {
    let runner = Arc::new(ScriptedRunner::codex(vec![
        started("codex", "t-1"),
        Step::Sleep(Duration::from_millis(100)),
        answer("codex", "t-1", "ok"),
    ]));
    let orchestrator = orchestrator_with(vec![runner.clone()]);
    let sink = RecordingSink::new();

    for thread in ["1", "2"] {
        let submitted = orchestrator
            .submit(InboundMessage::new(thread, "go"), sink.clone())
            .await
            .unwrap();
        assert!(matches!(submitted.admission, Admission::Started { .. }));
    }
    sink.wait_ended(2).await;
    assert_eq!(runner.max_active(), 2);
}

#[tokio::test]
async fn test_stream_without_completion_is_reported_incomplete() {
    let runner = Arc::new(ScriptedRunner::codex(vec![started("codex", "t-1")]));
    let orchestrator = orchestrator_with(vec![runner]);
    let sink = RecordingSink::new();

    orchestrator
        .submit(InboundMessage::new("42", "go"), sink.clone())
        .await
        .unwrap();
    sink.wait_ended(1).await;
    wait_until(|| orchestrator.queue().is_idle()).await;

    let records = sink.records();
    assert_eq!(records.last().unwrap().1, Record::Incomplete);
    assert!(sink.finished().is_empty());
}

#[tokio::test]
async fn test_actions_are_forwarded_in_order() {
    let engine = EngineId::new("codex");
    let action = |id: &str| {
        Step::Emit(
            ActionEvent::started(
                engine.clone(),
                takopi::Action::new(id, takopi::ActionKind::Command, "ls"),
            )
            .into(),
        )
    };
    let runner = Arc::new(ScriptedRunner::codex(vec![
        started("codex", "t-1"),
        action("a1"),
        action("a2"),
        answer("codex", "t-1", "ok"),
    ]));
    let orchestrator = orchestrator_with(vec![runner]);
    let sink = RecordingSink::new();

    orchestrator
        .submit(InboundMessage::new("42", "go"), sink.clone())
        .await
        .unwrap();
    sink.wait_ended(1).await;

    let kinds: Vec<_> = sink.records().into_iter().map(|(_, r)| r).collect();
    assert_eq!(kinds[0], Record::Started("t-1".to_string()));
    assert_eq!(kinds[1], Record::Action("a1".to_string()));
    assert_eq!(kinds[2], Record::Action("a2".to_string()));
    assert!(matches!(kinds[3], Record::Finished(_)));
}

#[tokio::test]
async fn test_reply_selects_engine_of_the_resume_line() {
    let codex = Arc::new(ScriptedRunner::codex(vec![answer("codex", "t-1", "codex")]));
    let claude = Arc::new(ScriptedRunner::new(
        "claude",
        "--resume",
        vec![started("claude", "s-1"), answer("claude", "s-1", "claude")],
    ));
    let orchestrator = orchestrator_with(vec![codex.clone(), claude.clone()]);
    let sink = RecordingSink::new();

    let submitted = orchestrator
        .submit(
            InboundMessage::new("42", "continue").reply_to("`claude --resume s-1`"),
            sink.clone(),
        )
        .await
        .unwrap();
    assert_eq!(submitted.engine, "claude");
    sink.wait_ended(1).await;

    assert!(codex.prompts().is_empty());
    assert_eq!(claude.prompts(), vec!["continue"]);
    assert_eq!(
        sink.finished()[0].resume_line.as_deref(),
        Some("`claude --resume s-1`")
    );
}

#[tokio::test]
async fn test_idle_timeout_cancels_silent_run() {
    let runner = Arc::new(ScriptedRunner::codex(vec![
        started("codex", "t-1"),
        Step::UntilCancelled,
    ]));
    let settings = OrchestratorSettings {
        idle_timeout: Some(Duration::from_millis(50)),
        ..OrchestratorSettings::default()
    };
    let orchestrator = orchestrator_with_settings(vec![runner], settings);
    let sink = RecordingSink::new();

    orchestrator
        .submit(InboundMessage::new("42", "go"), sink.clone())
        .await
        .unwrap();
    sink.wait_ended(1).await;

    let finished = sink.finished();
    assert_eq!(finished.len(), 1);
    assert!(finished[0].completed.is_cancelled());
}

#[tokio::test]
async fn test_full_queue_rejects_request() {
    let runner = Arc::new(ScriptedRunner::codex(vec![Step::UntilCancelled]));
    let settings = OrchestratorSettings {
        max_pending: Some(1),
        ..OrchestratorSettings::default()
    };
    let orchestrator = orchestrator_with_settings(vec![runner], settings);
    let sink = RecordingSink::new();

    for _ in 0..2 {
        orchestrator
            .submit(InboundMessage::new("42", "go"), sink.clone())
            .await
            .unwrap();
    }
    let rejected = orchestrator
        .submit(InboundMessage::new("42", "go"), sink.clone())
        .await;
    assert!(rejected.is_err());

    let key = SessionKey::new(ThreadId::new("42"), None);
    assert_eq!(orchestrator.cancel_key(&key), CancelOutcome::Requested);
    // The queued request still runs once the first one is gone
    wait_until(|| orchestrator.queue().pending(&key) == 0).await;
    assert_eq!(orchestrator.cancel_key(&key), CancelOutcome::Requested);
    sink.wait_ended(2).await;
}

#[tokio::test]
async fn test_cancel_targets_session_owner_before_follow_up() {
    let runner = Arc::new(ScriptedRunner::codex(vec![
        started("codex", "t-1"),
        Step::UntilCancelled,
    ]));
    let orchestrator = orchestrator_with(vec![runner]);
    let sink = RecordingSink::new();

    let fresh = orchestrator
        .submit(InboundMessage::new("42", "first"), sink.clone())
        .await
        .unwrap();
    sink.wait_started(1).await;
    let follow_up = orchestrator
        .submit(
            InboundMessage::new("42", "second").reply_to("`codex resume t-1`"),
            sink.clone(),
        )
        .await
        .unwrap();
    assert_ne!(fresh.key, follow_up.key);
    sink.wait_started(2).await;

    let reply = "working...\n`codex resume t-1`";
    let thread = ThreadId::new("42");
    assert_eq!(orchestrator.cancel(&thread, Some(reply)), CancelOutcome::Requested);
    sink.wait_ended(1).await;
    let ended: Vec<_> = sink
        .records()
        .into_iter()
        .filter(|(_, r)| matches!(r, Record::Finished(_)))
        .map(|(key, _)| key)
        .collect();
    assert_eq!(ended, vec![fresh.key.clone()]);

    // With the owner gone the same reply reaches the follow-up
    assert_eq!(orchestrator.cancel(&thread, Some(reply)), CancelOutcome::Requested);
    sink.wait_ended(2).await;
    let last = sink.records().last().cloned().unwrap();
    assert_eq!(last.0, follow_up.key);
    assert!(matches!(last.1, Record::Finished(ref f) if f.completed.is_cancelled()));
}

#[tokio::test]
async fn test_queued_notice_precedes_start_of_queued_run() {
    let runner = Arc::new(ScriptedRunner::codex(vec![
        Step::Sleep(Duration::from_millis(10)),
        started("codex", "t-1"),
        answer("codex", "t-1", "ok"),
    ]));
    let orchestrator = orchestrator_with(vec![runner]);
    let sink = RecordingSink::with_queued_delay(Duration::from_millis(100));

    let reply = "`codex resume t-1`";
    for prompt in ["first", "second"] {
        orchestrator
            .submit(InboundMessage::new("42", prompt).reply_to(reply), sink.clone())
            .await
            .unwrap();
    }
    sink.wait_ended(2).await;

    let records: Vec<_> = sink.records().into_iter().map(|(_, r)| r).collect();
    let queued = records.iter().position(|r| *r == Record::Queued(1)).unwrap();
    let second_start = records
        .iter()
        .enumerate()
        .filter(|(_, r)| matches!(r, Record::Started(_)))
        .nth(1)
        .map(|(i, _)| i)
        .unwrap();
    assert!(queued < second_start, "{:?}", records);
}
