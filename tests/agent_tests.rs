//! Behavior of the stateful `Agent` actor.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::*;
use roci_agent::agent_loop::SKIPPED_BY_STEERING;
use roci_agent::config::RuntimeConfig;
use roci_agent::error::AgentError;
use roci_agent::prelude::*;

#[tokio::test]
async fn prompt_appends_prompt_and_reply_to_history() {
    let model = ScriptedModel::new(vec![Turn::Text("hello there".into())]);
    let agent = Agent::spawn(agent_options(&model).with_system_prompt("be nice"));
    let (_subscription, mut events) = agent.subscribe_channel().await.unwrap();

    let run_id = agent.prompt_text("hi").await.unwrap();
    let seen = collect_until_terminal(&mut events).await;
    agent.wait_for_idle(Some(WAIT)).await.unwrap();

    assert_eq!(kinds(&seen).first(), Some(&"agent_start"));
    assert!(matches!(seen.last(), Some(AgentEvent::AgentEnd { run_id: id, .. }) if *id == run_id));

    let snapshot = agent.snapshot().await.unwrap();
    assert_eq!(snapshot.status, AgentStatus::Idle);
    assert_eq!(snapshot.run_id, None);
    assert_eq!(
        summarize(&snapshot.messages),
        vec![("user", "hi".to_string()), ("assistant", "hello there".to_string())]
    );
    assert_eq!(model.requests()[0].0.system_prompt.as_deref(), Some("be nice"));
}

#[tokio::test]
async fn empty_prompt_is_rejected() {
    let model = ScriptedModel::new(vec![]);
    let agent = Agent::spawn(agent_options(&model));
    let err = agent.prompt(Vec::new()).await.unwrap_err();
    assert!(matches!(err, AgentError::InvalidArgument(_)));
    assert_eq!(model.request_count(), 0);
}

#[tokio::test]
async fn history_survives_a_tiny_event_queue() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let tools = ToolSet::new().with(sleepy_tool("work", Duration::ZERO, log));
    let model = ScriptedModel::new(vec![
        Turn::ToolCalls(vec![
            call("1", "work", json!({})),
            call("2", "work", json!({})),
            call("3", "work", json!({})),
        ]),
        Turn::Text("finished".into()),
    ]);
    let runtime = RuntimeConfig {
        event_queue_capacity: 4,
        ..runtime()
    };
    let agent = Agent::spawn(
        agent_options(&model)
            .with_tools(tools)
            .with_runtime_config(runtime),
    );
    let (_subscription, mut events) = agent.subscribe_channel().await.unwrap();

    agent.prompt_text("go").await.unwrap();
    let seen = collect_until_terminal(&mut events).await;
    assert_eq!(kinds(&seen).last(), Some(&"agent_end"));
    agent.wait_for_idle(Some(WAIT)).await.unwrap();

    let snapshot = agent.snapshot().await.unwrap();
    assert_eq!(
        summarize(&snapshot.messages),
        vec![
            ("user", "go".to_string()),
            ("assistant", String::new()),
            ("tool_result", "done:1".to_string()),
            ("tool_result", "done:2".to_string()),
            ("tool_result", "done:3".to_string()),
            ("assistant", "finished".to_string()),
        ]
    );
    assert_eq!(snapshot.error, None);
}

#[tokio::test]
async fn concurrent_prompts_start_exactly_one_run() {
    let model = ScriptedModel::new(vec![Turn::SlowText("one".into(), Duration::from_millis(50))]);
    let agent = Agent::spawn(agent_options(&model));

    let (first, second) = tokio::join!(agent.prompt_text("a"), agent.prompt_text("b"));
    let results = [first, second];
    let started = results.iter().filter(|result| result.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|result| matches!(result, Err(AgentError::AlreadyStreaming)))
        .count();
    assert_eq!((started, rejected), (1, 1));

    agent.wait_for_idle(Some(WAIT)).await.unwrap();
    let snapshot = agent.snapshot().await.unwrap();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(model.request_count(), 1);
}

#[tokio::test]
async fn mutators_are_rejected_while_streaming() {
    let model = ScriptedModel::new(vec![Turn::SlowText("slow".into(), Duration::from_millis(100))]);
    let agent = Agent::spawn(agent_options(&model));
    agent.prompt_text("go").await.unwrap();
    assert_eq!(agent.status(), AgentStatus::Streaming);

    assert!(matches!(
        agent.set_system_prompt(Some("x".into())).await,
        Err(AgentError::Busy(_))
    ));
    assert!(matches!(
        agent.set_model(ModelRef::new("other", "model")).await,
        Err(AgentError::Busy(_))
    ));
    assert!(matches!(
        agent.replace_messages(Vec::new()).await,
        Err(AgentError::Busy(_))
    ));
    assert!(matches!(agent.continue_run().await, Err(AgentError::AlreadyStreaming)));

    agent.wait_for_idle(Some(WAIT)).await.unwrap();
    agent.set_model(ModelRef::new("other", "model")).await.unwrap();
    agent.set_tools(ToolSet::new()).await.unwrap();
    let snapshot = agent.snapshot().await.unwrap();
    assert_eq!(snapshot.model, ModelRef::new("other", "model"));
}

#[tokio::test]
async fn wait_for_idle_times_out_while_run_is_stuck() {
    let model = ScriptedModel::new(vec![Turn::Hang]);
    let agent = Agent::spawn(agent_options(&model));
    agent.prompt_text("go").await.unwrap();

    let err = agent
        .wait_for_idle(Some(Duration::from_millis(30)))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Timeout(30)));

    agent.abort(None).await.unwrap();
    agent.wait_for_idle(Some(WAIT)).await.unwrap();
}

#[tokio::test]
async fn abort_cancels_run_and_keeps_agent_usable() {
    let model = ScriptedModel::new(vec![Turn::Hang, Turn::Text("back".into())]);
    let agent = Agent::spawn(agent_options(&model));
    let (_subscription, mut events) = agent.subscribe_channel().await.unwrap();

    agent.prompt_text("go").await.unwrap();
    loop {
        let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if matches!(event, AgentEvent::MessageStart { .. }) {
            break;
        }
    }
    agent.abort(Some("stop")).await.unwrap();
    let rest = collect_until_terminal(&mut events).await;
    assert!(matches!(rest.last(), Some(AgentEvent::Canceled { reason, .. }) if reason == "stop"));
    agent.wait_for_idle(Some(WAIT)).await.unwrap();

    let snapshot = agent.snapshot().await.unwrap();
    let last = snapshot.messages.last().and_then(AgentMessage::as_assistant).unwrap();
    assert_eq!(last.stop_reason, StopReason::Aborted);

    assert!(matches!(agent.continue_run().await, Err(AgentError::InvalidState(_))));
    agent.append_message(AgentMessage::user("please continue")).await.unwrap();
    agent.continue_run().await.unwrap();
    agent.wait_for_idle(Some(WAIT)).await.unwrap();
    let snapshot = agent.snapshot().await.unwrap();
    assert_eq!(snapshot.messages.last().unwrap().text(), "back");
}

#[tokio::test]
async fn abort_while_idle_is_a_no_op() {
    let model = ScriptedModel::new(vec![Turn::Text("fine".into())]);
    let agent = Agent::spawn(agent_options(&model));
    agent.abort(Some("nothing running")).await.unwrap();

    agent.prompt_text("go").await.unwrap();
    agent.wait_for_idle(Some(WAIT)).await.unwrap();
    let snapshot = agent.snapshot().await.unwrap();
    assert_eq!(snapshot.messages.last().unwrap().text(), "fine");
}

#[tokio::test]
async fn crashing_model_reports_error_and_returns_to_idle() {
    let model = ScriptedModel::new(vec![Turn::Panic("bad adapter".into()), Turn::Text("ok".into())]);
    let agent = Agent::spawn(agent_options(&model));
    let (_subscription, mut events) = agent.subscribe_channel().await.unwrap();

    agent.prompt_text("go").await.unwrap();
    let seen = collect_until_terminal(&mut events).await;
    match seen.last() {
        Some(AgentEvent::Error { reason, .. }) => assert!(reason.starts_with("producer_crashed")),
        other => panic!("unexpected terminal: {other:?}"),
    }
    agent.wait_for_idle(Some(WAIT)).await.unwrap();
    let snapshot = agent.snapshot().await.unwrap();
    assert_eq!(snapshot.status, AgentStatus::Idle);
    assert!(snapshot.error.as_deref().unwrap_or_default().starts_with("producer_crashed"));

    agent.prompt_text("again").await.unwrap();
    agent.wait_for_idle(Some(WAIT)).await.unwrap();
    let snapshot = agent.snapshot().await.unwrap();
    assert_eq!(snapshot.error, None);
    assert_eq!(snapshot.messages.last().unwrap().text(), "ok");
}

#[tokio::test]
async fn reset_during_run_discards_its_late_messages() {
    let model = ScriptedModel::new(vec![Turn::SlowText("late".into(), Duration::from_millis(80))]);
    let agent = Agent::spawn(agent_options(&model));
    let (_subscription, mut events) = agent.subscribe_channel().await.unwrap();

    agent.prompt_text("go").await.unwrap();
    agent.follow_up(AgentMessage::user("queued")).await.unwrap();
    agent.reset().await.unwrap();

    let seen = collect_until_terminal(&mut events).await;
    assert_eq!(kinds(&seen).last(), Some(&"agent_end"));
    agent.wait_for_idle(Some(WAIT)).await.unwrap();

    let snapshot = agent.snapshot().await.unwrap();
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.follow_up_queue_len, 0);
    assert_eq!(model.request_count(), 1);
}

#[tokio::test]
async fn follow_up_sent_at_turn_end_is_not_lost() {
    const TRIALS: usize = 20;
    assert_eq!(runtime().follow_up_grace_ms, 50);

    let mut picked_up = 0;
    for _ in 0..TRIALS {
        let model = ScriptedModel::new(vec![Turn::Text("first".into()), Turn::Text("second".into())]);
        let agent = Agent::spawn(agent_options(&model));
        let (_subscription, mut events) = agent.subscribe_channel().await.unwrap();

        agent.prompt_text("go").await.unwrap();
        loop {
            let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
            if matches!(event, AgentEvent::TurnEnd { .. }) {
                break;
            }
        }
        agent.follow_up(AgentMessage::user("one more")).await.unwrap();
        agent.wait_for_idle(Some(WAIT)).await.unwrap();

        let snapshot = agent.snapshot().await.unwrap();
        if summarize(&snapshot.messages)
            == vec![
                ("user", "go".to_string()),
                ("assistant", "first".to_string()),
                ("user", "one more".to_string()),
                ("assistant", "second".to_string()),
            ]
        {
            picked_up += 1;
        }
    }
    assert!(
        picked_up >= TRIALS - 1,
        "follow-up picked up in only {picked_up} of {TRIALS} runs"
    );
}

#[tokio::test]
async fn follow_up_modes_control_batching() {
    for (mode, expected_requests) in [(QueueMode::OneAtATime, 3), (QueueMode::All, 2)] {
        let model = ScriptedModel::new(vec![Turn::SlowText("a".into(), Duration::from_millis(50))]);
        let agent = Agent::spawn(agent_options(&model).with_follow_up_mode(mode));
        agent.prompt_text("go").await.unwrap();
        agent.follow_up(AgentMessage::user("f1")).await.unwrap();
        agent.follow_up(AgentMessage::user("f2")).await.unwrap();
        agent.wait_for_idle(Some(WAIT)).await.unwrap();

        assert_eq!(model.request_count(), expected_requests, "mode {mode}");
        let snapshot = agent.snapshot().await.unwrap();
        assert_eq!(snapshot.follow_up_queue_len, 0);
        assert_eq!(agent.follow_up_mode().await.unwrap(), mode);
    }
}

#[tokio::test]
async fn steering_through_agent_skips_remaining_tools() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let tools = ToolSet::new().with(sleepy_tool("work", Duration::from_millis(50), log.clone()));
    let model = ScriptedModel::new(vec![
        Turn::ToolCalls(vec![
            call("1", "work", json!({})),
            call("2", "work", json!({})),
            call("3", "work", json!({})),
        ]),
        Turn::Text("adjusted".into()),
    ]);
    let runtime = RuntimeConfig {
        max_tool_concurrency: Some(1),
        ..runtime()
    };
    let agent = Agent::spawn(
        agent_options(&model)
            .with_tools(tools)
            .with_runtime_config(runtime),
    );
    let (_subscription, mut events) = agent.subscribe_channel().await.unwrap();

    agent.prompt_text("go").await.unwrap();
    loop {
        let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if matches!(&event, AgentEvent::ToolExecutionStart { tool_call_id, .. } if tool_call_id == "1") {
            break;
        }
    }
    agent.steer(AgentMessage::user("do something else")).await.unwrap();
    agent.wait_for_idle(Some(WAIT)).await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["1"]);
    let snapshot = agent.snapshot().await.unwrap();
    assert_eq!(
        summarize(&snapshot.messages),
        vec![
            ("user", "go".to_string()),
            ("assistant", String::new()),
            ("tool_result", "done:1".to_string()),
            ("user", "do something else".to_string()),
            ("tool_result", SKIPPED_BY_STEERING.to_string()),
            ("tool_result", SKIPPED_BY_STEERING.to_string()),
            ("assistant", "adjusted".to_string()),
        ]
    );
    assert_eq!(snapshot.steering_queue_len, 0);
}

#[tokio::test]
async fn queue_controls_work_while_idle() {
    let model = ScriptedModel::new(vec![]);
    let agent = Agent::spawn(agent_options(&model));

    agent.steer(AgentMessage::user("s")).await.unwrap();
    agent.follow_up(AgentMessage::user("f")).await.unwrap();
    let snapshot = agent.snapshot().await.unwrap();
    assert_eq!((snapshot.steering_queue_len, snapshot.follow_up_queue_len), (1, 1));

    agent.clear_steering_queue().await.unwrap();
    agent.clear_follow_up_queue().await.unwrap();
    agent.set_steering_mode(QueueMode::All).await.unwrap();
    let snapshot = agent.snapshot().await.unwrap();
    assert_eq!((snapshot.steering_queue_len, snapshot.follow_up_queue_len), (0, 0));
    assert_eq!(agent.steering_mode().await.unwrap(), QueueMode::All);
}

#[tokio::test]
async fn thinking_level_and_session_reach_the_model() {
    let model = ScriptedModel::new(vec![Turn::Text("ok".into()), Turn::Text("ok".into())]);
    let agent = Agent::spawn(agent_options(&model).with_session_id("session-1"));

    agent.set_thinking_level(ThinkingLevel::High).await.unwrap();
    agent.prompt_text("think").await.unwrap();
    agent.wait_for_idle(Some(WAIT)).await.unwrap();

    agent.set_thinking_level(ThinkingLevel::Off).await.unwrap();
    agent.set_session_id(None).await.unwrap();
    agent.prompt_text("quick").await.unwrap();
    agent.wait_for_idle(Some(WAIT)).await.unwrap();

    let requests = model.requests();
    assert_eq!(requests[0].1.reasoning, Some(ThinkingLevel::High));
    assert_eq!(requests[0].1.session_id.as_deref(), Some("session-1"));
    assert_eq!(requests[1].1.reasoning, None);
    assert_eq!(requests[1].1.session_id, None);
}

#[tokio::test]
async fn custom_messages_stay_out_of_model_context() {
    let model = ScriptedModel::new(vec![Turn::Text("ok".into())]);
    let agent = Agent::spawn(agent_options(&model).with_messages(vec![AgentMessage::Custom {
        kind: "note".into(),
        payload: json!({ "pinned": true }),
    }]));

    agent.prompt_text("hi").await.unwrap();
    agent.wait_for_idle(Some(WAIT)).await.unwrap();

    let (context, _) = &model.requests()[0];
    assert_eq!(summarize(&context.messages), vec![("user", "hi".to_string())]);
    assert_eq!(agent.snapshot().await.unwrap().messages.len(), 3);
}

#[tokio::test]
async fn callback_can_unsubscribe_itself() {
    let model = ScriptedModel::new(vec![Turn::Text("ok".into())]);
    let agent = Agent::spawn(agent_options(&model));
    let calls = Arc::new(AtomicUsize::new(0));
    let handle: Arc<OnceLock<Subscription>> = Arc::default();

    let subscription = {
        let calls = calls.clone();
        let handle = handle.clone();
        agent
            .subscribe(move |_event| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(subscription) = handle.get() {
                    subscription.unsubscribe();
                }
            })
            .await
            .unwrap()
    };
    let _ = handle.set(subscription.clone());

    agent.prompt_text("go").await.unwrap();
    agent.wait_for_idle(Some(WAIT)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!subscription.is_active());
    subscription.unsubscribe();
}

#[tokio::test]
async fn every_subscriber_sees_the_same_events() {
    let model = ScriptedModel::new(vec![Turn::Text("ok".into())]);
    let agent = Agent::spawn(agent_options(&model));
    let (a, mut first) = agent.subscribe_channel().await.unwrap();
    let (b, mut second) = agent.subscribe_channel().await.unwrap();
    assert_ne!(a.id(), b.id());

    agent.prompt_text("go").await.unwrap();
    let seen_first = collect_until_terminal(&mut first).await;
    let seen_second = collect_until_terminal(&mut second).await;
    assert_eq!(seen_first, seen_second);
}

#[tokio::test]
async fn shutdown_makes_every_call_unavailable() {
    let model = ScriptedModel::new(vec![Turn::Hang]);
    let agent = Agent::spawn(agent_options(&model));
    let (_subscription, mut events) = agent.subscribe_channel().await.unwrap();
    agent.prompt_text("go").await.unwrap();

    agent.shutdown().await.unwrap();
    assert!(!agent.is_running());
    assert!(matches!(agent.prompt_text("again").await, Err(AgentError::Unavailable)));
    assert!(matches!(agent.snapshot().await, Err(AgentError::Unavailable)));
    assert!(matches!(
        agent.steer(AgentMessage::user("x")).await,
        Err(AgentError::Unavailable)
    ));
    assert!(matches!(agent.wait_for_idle(None).await, Err(AgentError::Unavailable)));

    // Subscribers are dropped with the actor, so the channel closes.
    let closed = tokio::time::timeout(WAIT, async {
        while events.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok());
}
