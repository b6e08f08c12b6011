//! End-to-end tests for the tool loop driven through a conversation.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::*;
use steploop::agent_loop::{LoopEvent, ToolLoop, TurnOutcome};
use steploop::config::{AllowedTool, LoopConfig};
use steploop::error::{ApprovalError, StepLoopError};
use steploop::history::History;
use steploop::session::{Conversation, TurnHandle};
use steploop::transport::TurnCancellation;
use steploop::types::*;
use tokio::sync::{mpsc, Mutex};

/// Read events until an approval is requested; returns the events so far.
async fn until_approval(handle: &mut TurnHandle) -> (Vec<LoopEvent>, ToolApproval) {
    let mut seen = Vec::new();
    while let Some(event) = handle.next_event().await {
        if let LoopEvent::ApprovalRequested { approval, .. } = &event {
            let approval = approval.clone();
            seen.push(event);
            return (seen, approval);
        }
        seen.push(event);
    }
    panic!("turn ended without an approval request: {seen:?}");
}

#[tokio::test]
async fn plain_question_completes_in_one_step() {
    let provider = ScriptedProvider::new(vec![Script::text(&["4"])]);
    let (registry, _) = registry_with_counter();
    let conversation = Conversation::new(provider.clone(), registry);

    let events = conversation.submit("2+2?", &config()).await.unwrap().collect().await;

    assert_eq!(text_of(&events), "4");
    assert_eq!(outcome_of(&events), TurnOutcome::Completed);
    assert_eq!(step_count(&events), 1);
    assert!(matches!(events[events.len() - 2], LoopEvent::ProcessingTime { .. }));

    let history = conversation.history_snapshot().await;
    assert_eq!(
        history.turns(),
        &[Turn::user("2+2?"), Turn::assistant_text("4")]
    );
    assert_eq!(conversation.total_usage().total_input(), Some(10));
}

#[tokio::test]
async fn auto_tool_result_feeds_a_second_invocation() {
    let provider = ScriptedProvider::new(vec![
        Script::tool_call("c1", "weather", json!({"location": "Oslo"})),
        Script::text(&["Chilly in Oslo."]),
    ]);
    let (registry, _) = registry_with_counter();
    let conversation = Conversation::new(provider.clone(), registry);

    let events = conversation
        .submit("Weather in Oslo?", &config())
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(outcome_of(&events), TurnOutcome::Completed);
    assert_eq!(provider.invocations(), 2);
    assert_eq!(step_count(&events), 2);

    let activity = events
        .iter()
        .position(|e| matches!(e, LoopEvent::ToolActivity { call_id, is_error: false, .. } if call_id == "c1"))
        .expect("tool activity");
    let second_step = events
        .iter()
        .position(|e| *e == LoopEvent::StepStarted { step: 2 })
        .expect("second step");
    assert!(activity < second_step);

    let second = &provider.requests()[1];
    assert!(second
        .messages
        .iter()
        .any(|t| matches!(t, Turn::Tool { call_id, output, .. } if call_id == "c1" && output["location"] == "Oslo")));
    assert!(second.messages.iter().all(|t| !t.is_ephemeral()));
    assert_eq!(second.tools.len(), 2);

    let history = conversation.history_snapshot().await;
    assert!(history
        .turns()
        .iter()
        .any(|t| matches!(t, Turn::ToolResultDisplay { payload } if payload.name == "weather")));
}

#[tokio::test]
async fn denied_approval_is_answered_without_running_the_tool() {
    let provider = ScriptedProvider::new(vec![
        Script::tool_call("c1", "send_message", json!({"channel": "ops", "text": "deploy done"})),
        Script::text(&["Okay, I did not send it."]),
    ]);
    let (registry, sent) = registry_with_counter();
    let conversation = Conversation::new(provider.clone(), registry);
    let config = config();

    let mut handle = conversation.submit("Tell ops the deploy is done", &config).await.unwrap();
    let (_, approval) = until_approval(&mut handle).await;
    assert_eq!(approval.call.name, "send_message");
    assert_eq!(provider.invocations(), 1);

    let resumed = conversation
        .decide(ApprovalDecision::deny(&approval.approval_id), &config)
        .await
        .unwrap();
    assert!(resumed.is_none(), "decision goes to the running turn");

    let rest = handle.collect().await;
    assert_eq!(outcome_of(&rest), TurnOutcome::Completed);
    assert_eq!(sent.load(Ordering::SeqCst), 0);

    let history = conversation.history_snapshot().await;
    let denial = history
        .turns()
        .iter()
        .find_map(|t| match t {
            Turn::Tool { call_id, output, is_error, .. } if call_id == "c1" => Some((output.clone(), *is_error)),
            _ => None,
        })
        .expect("synthetic result");
    assert_eq!(denial, (json!({"error": "approval declined"}), true));
    assert!(history.turns().contains(&Turn::ToolApprovalResponse {
        approval_id: approval.approval_id.clone(),
        approved: false,
    }));
    assert!(history.outstanding_approvals().is_empty());
}

#[tokio::test]
async fn approved_call_runs_exactly_once() {
    let provider = ScriptedProvider::new(vec![
        Script::tool_call("c1", "send_message", json!({"channel": "ops", "text": "hi"})),
        Script::text(&["Sent."]),
    ]);
    let (registry, sent) = registry_with_counter();
    let conversation = Conversation::new(provider.clone(), registry);
    let config = config();

    let mut handle = conversation.submit("Say hi to ops", &config).await.unwrap();
    let (_, approval) = until_approval(&mut handle).await;
    assert_eq!(sent.load(Ordering::SeqCst), 0, "nothing runs before the decision");

    conversation
        .decide(ApprovalDecision::approve(&approval.approval_id), &config)
        .await
        .unwrap();
    let rest = handle.collect().await;

    assert_eq!(outcome_of(&rest), TurnOutcome::Completed);
    assert_eq!(text_of(&rest), "Sent.");
    assert_eq!(sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn step_budget_ends_the_turn_after_running_tools() {
    let provider = ScriptedProvider::new(vec![Script::tool_call("c1", "weather", json!({"location": "Rome"}))]);
    let (registry, _) = registry_with_counter();
    let conversation = Conversation::new(provider.clone(), registry);
    let config = LoopConfig {
        max_steps: 1,
        ..config()
    };

    let events = conversation.submit("Weather in Rome?", &config).await.unwrap().collect().await;

    assert_eq!(outcome_of(&events), TurnOutcome::StepLimitReached);
    assert_eq!(provider.invocations(), 1);
    let history = conversation.history_snapshot().await;
    assert!(history
        .turns()
        .iter()
        .any(|t| matches!(t, Turn::Tool { call_id, is_error: false, .. } if call_id == "c1")));
}

#[tokio::test]
async fn cancellation_keeps_only_the_delivered_text() {
    let provider = ScriptedProvider::new(vec![Script::hanging(vec![
        StreamEvent::text("Once upon"),
        StreamEvent::text(" a time"),
    ])]);
    let (registry, _) = registry_with_counter();
    let conversation = Conversation::new(provider.clone(), registry);

    let mut handle = conversation.submit("Tell me a story", &config()).await.unwrap();
    let mut deltas = 0;
    while deltas < 2 {
        if let Some(LoopEvent::Delta { .. }) = handle.next_event().await {
            deltas += 1;
        }
    }
    handle.cancel();
    let rest = handle.collect().await;

    assert_eq!(outcome_of(&rest), TurnOutcome::Cancelled);
    assert_eq!(step_count(&rest), 0);
    assert_eq!(text_of(&rest), "");
    assert_eq!(provider.invocations(), 1);

    let history = conversation.history_snapshot().await;
    assert_eq!(
        history.turns().last(),
        Some(&Turn::Assistant {
            content: vec![AssistantContent::text("Once upon a time")],
            incomplete: true,
        })
    );
}

#[tokio::test]
async fn cancelling_before_any_text_appends_nothing() {
    let provider = ScriptedProvider::new(vec![Script::hanging(Vec::new())]);
    let (registry, _) = registry_with_counter();
    let conversation = Conversation::new(provider, registry);

    let mut handle = conversation.submit("hello", &config()).await.unwrap();
    assert_eq!(handle.next_event().await, Some(LoopEvent::StepStarted { step: 1 }));
    handle.cancel();
    let rest = handle.collect().await;

    assert_eq!(outcome_of(&rest), TurnOutcome::Cancelled);
    assert_eq!(conversation.history_snapshot().await.turns(), &[Turn::user("hello")]);
}

#[tokio::test]
async fn second_submission_is_rejected_while_a_turn_runs() {
    let provider = ScriptedProvider::new(vec![Script::text(&["one"]), Script::text(&["two"])]);
    let (registry, _) = registry_with_counter();
    let conversation = Conversation::new(provider, registry);

    let first = conversation.submit("first", &config()).await.unwrap();
    let err = conversation.submit("second", &config()).await.unwrap_err();
    assert!(matches!(err, StepLoopError::TurnInFlight));
    assert_eq!(conversation.history_snapshot().await.len(), 1);

    first.collect().await;
    let events = conversation.submit("second", &config()).await.unwrap().collect().await;
    assert_eq!(text_of(&events), "two");
}

#[tokio::test]
async fn dropping_a_handle_frees_the_conversation() {
    let provider = ScriptedProvider::new(vec![Script::text(&["later"])]);
    let (registry, _) = registry_with_counter();
    let conversation = Conversation::new(provider, registry);

    drop(conversation.submit("first", &config()).await.unwrap());
    assert!(!conversation.is_busy());
    assert!(conversation.submit("again", &config()).await.is_ok());
}

#[tokio::test]
async fn provider_errors_fail_the_turn_without_an_assistant_turn() {
    let provider = ScriptedProvider::new(vec![Script::events(vec![
        StreamEvent::text("partial"),
        StreamEvent::Error {
            payload: json!({"error": {"message": "model overloaded"}}),
        },
    ])]);
    let (registry, _) = registry_with_counter();
    let conversation = Conversation::new(provider, registry);

    let events = conversation.submit("hi", &config()).await.unwrap().collect().await;

    assert_eq!(outcome_of(&events), TurnOutcome::failed("model overloaded"));
    assert_eq!(text_of(&events), "partialError: model overloaded");
    assert!(events.contains(&LoopEvent::Error {
        message: "model overloaded".into()
    }));
    assert_eq!(conversation.history_snapshot().await.turns(), &[Turn::user("hi")]);
}

#[tokio::test]
async fn missing_response_fails_the_turn() {
    let provider = ScriptedProvider::new(Vec::new());
    let (registry, _) = registry_with_counter();
    let conversation = Conversation::new(provider, registry);

    let events = conversation.submit("hi", &config()).await.unwrap().collect().await;
    assert!(outcome_of(&events).is_failed());
    assert!(text_of(&events).starts_with("Error: "));
}

#[tokio::test]
async fn tools_outside_the_allow_list_are_not_exposed() {
    let provider = ScriptedProvider::new(vec![
        Script::tool_call("c1", "send_message", json!({"channel": "ops", "text": "x"})),
        Script::text(&["done"]),
    ]);
    let (registry, sent) = registry_with_counter();
    let conversation = Conversation::new(provider.clone(), registry);
    let config = LoopConfig {
        tools: Some(vec![AllowedTool::new("weather")]),
        ..config()
    };

    let events = conversation.submit("go", &config).await.unwrap().collect().await;

    assert_eq!(outcome_of(&events), TurnOutcome::Completed);
    assert_eq!(provider.requests()[0].tools.len(), 1);
    assert_eq!(sent.load(Ordering::SeqCst), 0);
    assert!(events.iter().any(|e| matches!(e, LoopEvent::ToolActivity { is_error: true, .. })));
}

#[tokio::test]
async fn allow_list_can_waive_approval() {
    let provider = ScriptedProvider::new(vec![
        Script::tool_call("c1", "send_message", json!({"channel": "ops", "text": "x"})),
        Script::text(&["done"]),
    ]);
    let (registry, sent) = registry_with_counter();
    let conversation = Conversation::new(provider, registry);
    let config = LoopConfig {
        tools: Some(vec![AllowedTool::requiring_approval("send_message", false)]),
        ..config()
    };

    let events = conversation.submit("go", &config).await.unwrap().collect().await;
    assert!(!events.iter().any(|e| matches!(e, LoopEvent::ApprovalRequested { .. })));
    assert_eq!(sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn decision_after_the_run_ended_resumes_from_history() {
    let call = ToolCall::new("c1", "send_message", json!({"channel": "ops", "text": "hi"}));
    let history = History::from_turns(vec![
        Turn::user("Say hi to ops"),
        Turn::assistant(vec![
            AssistantContent::ToolCall(call),
            AssistantContent::ToolApprovalRequest {
                approval_id: "a1".into(),
                call_id: "c1".into(),
            },
        ]),
    ]);
    let provider = ScriptedProvider::new(vec![Script::text(&["Sent."])]);
    let (registry, sent) = registry_with_counter();
    let conversation = Conversation::with_history(provider.clone(), registry, history);

    let handle = conversation
        .decide(ApprovalDecision::approve("a1"), &config())
        .await
        .unwrap()
        .expect("a resumed run");
    let events = handle.collect().await;

    assert_eq!(outcome_of(&events), TurnOutcome::Completed);
    assert_eq!(sent.load(Ordering::SeqCst), 1);
    let first = &provider.requests()[0];
    assert!(first
        .messages
        .iter()
        .any(|t| matches!(t, Turn::Tool { call_id, is_error: false, .. } if call_id == "c1")));
}

#[tokio::test]
async fn decisions_for_expired_or_unknown_approvals_are_rejected() {
    let call = ToolCall::new("c1", "send_message", json!({}));
    let history = History::from_turns(vec![
        Turn::user("first"),
        Turn::assistant(vec![
            AssistantContent::ToolCall(call),
            AssistantContent::ToolApprovalRequest {
                approval_id: "old".into(),
                call_id: "c1".into(),
            },
        ]),
        Turn::user("never mind"),
    ]);
    let provider = ScriptedProvider::new(Vec::new());
    let (registry, _) = registry_with_counter();
    let conversation = Conversation::with_history(provider, registry, history);

    let err = conversation
        .decide(ApprovalDecision::approve("old"), &config())
        .await
        .unwrap_err();
    assert!(matches!(err, StepLoopError::Approval(ApprovalError::Expired(_))));

    let err = conversation
        .decide(ApprovalDecision::approve("nope"), &config())
        .await
        .unwrap_err();
    assert!(matches!(err, StepLoopError::Approval(ApprovalError::Unknown(_))));
    assert_eq!(conversation.history_snapshot().await.len(), 3);
}

#[tokio::test]
async fn closed_decision_queue_leaves_the_turn_awaiting_approval() {
    let provider = ScriptedProvider::new(vec![Script::tool_call(
        "c1",
        "send_message",
        json!({"channel": "ops", "text": "x"}),
    )]);
    let (registry, sent) = registry_with_counter();
    let history = Arc::new(Mutex::new(History::from_turns(vec![Turn::user("go")])));
    let tool_loop = ToolLoop::new(provider, registry);

    let (decisions, receiver) = mpsc::channel(1);
    drop(decisions);
    let events: Vec<LoopEvent> = futures::StreamExt::collect(tool_loop.run(
        Arc::clone(&history),
        config(),
        TurnCancellation::new(),
        receiver,
    ))
    .await;

    assert_eq!(outcome_of(&events), TurnOutcome::AwaitingApproval);
    assert_eq!(sent.load(Ordering::SeqCst), 0);
    assert_eq!(history.lock().await.outstanding_approvals().len(), 1);
}

#[tokio::test]
async fn replaying_the_same_script_gives_the_same_events() {
    async fn run_once() -> Vec<LoopEvent> {
        let provider = ScriptedProvider::new(vec![
            Script::tool_call("c1", "weather", json!({"location": "Lima"})),
            Script::text(&["Warm", " in Lima."]),
        ]);
        let (registry, _) = registry_with_counter();
        let conversation = Conversation::new(provider, registry);
        conversation
            .submit("Weather in Lima?", &config())
            .await
            .unwrap()
            .collect()
            .await
            .into_iter()
            .filter(|e| !matches!(e, LoopEvent::ProcessingTime { .. }))
            .collect()
    }

    assert_eq!(run_once().await, run_once().await);
}

#[tokio::test]
async fn resumed_turn_keeps_the_steps_it_already_spent() {
    let provider = ScriptedProvider::new(vec![
        Script::tool_call("c1", "send_message", json!({"channel": "ops", "text": "hi"})),
        Script::text(&["Sent."]),
    ]);
    let (registry, sent) = registry_with_counter();
    let conversation = Conversation::new(provider.clone(), registry);
    let config = LoopConfig {
        max_steps: 1,
        ..config()
    };

    let mut handle = conversation.submit("Say hi to ops", &config).await.unwrap();
    let (_, approval) = until_approval(&mut handle).await;
    drop(handle);
    assert!(!conversation.is_busy());

    let events = conversation
        .decide(ApprovalDecision::approve(&approval.approval_id), &config)
        .await
        .unwrap()
        .expect("a resumed run")
        .collect()
        .await;

    assert_eq!(outcome_of(&events), TurnOutcome::StepLimitReached);
    assert_eq!(step_count(&events), 0);
    assert_eq!(provider.invocations(), 1);
    assert_eq!(sent.load(Ordering::SeqCst), 1, "the approved call still runs");
}

#[tokio::test(start_paused = true)]
async fn every_approval_of_a_step_is_needed_before_it_resumes() {
    let provider = ScriptedProvider::new(vec![
        Script::events(vec![
            StreamEvent::ToolCall(ToolCall::new("c1", "send_message", json!({"channel": "ops", "text": "one"}))),
            StreamEvent::ToolCall(ToolCall::new("c2", "send_message", json!({"channel": "dev", "text": "two"}))),
            StreamEvent::finish(FinishReason::ToolCalls, Some(usage(8, 4))),
        ]),
        Script::text(&["Both sent."]),
    ]);
    let (registry, sent) = registry_with_counter();
    let conversation = Conversation::new(provider.clone(), registry);
    let config = config();

    let mut handle = conversation.submit("Tell ops and dev", &config).await.unwrap();
    let (_, first) = until_approval(&mut handle).await;
    let (_, second) = until_approval(&mut handle).await;
    assert_eq!(first.call.call_id, "c1");
    assert_eq!(second.call.call_id, "c2");

    let resumed = conversation
        .decide(ApprovalDecision::approve(&first.approval_id), &config)
        .await
        .unwrap();
    assert!(resumed.is_none());
    let idle = tokio::time::timeout(Duration::from_secs(1), handle.next_event()).await;
    assert!(idle.is_err(), "the step waits for the second decision");
    assert_eq!(sent.load(Ordering::SeqCst), 0);
    assert_eq!(provider.invocations(), 1);

    conversation
        .decide(ApprovalDecision::approve(&second.approval_id), &config)
        .await
        .unwrap();
    let rest = handle.collect().await;

    assert_eq!(outcome_of(&rest), TurnOutcome::Completed);
    assert_eq!(sent.load(Ordering::SeqCst), 2);
    assert_eq!(provider.invocations(), 2);
    let requests = provider.requests();
    let answered: Vec<&str> = requests[1]
        .messages
        .iter()
        .filter_map(|t| match t {
            Turn::Tool { call_id, is_error: false, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(answered, vec!["c1", "c2"]);
}

#[tokio::test]
async fn decisions_for_other_steps_leave_the_gate_closed() {
    use futures::StreamExt;

    let provider = ScriptedProvider::new(vec![
        Script::tool_call("c1", "send_message", json!({"channel": "ops", "text": "x"})),
        Script::text(&["Sent."]),
    ]);
    let (registry, sent) = registry_with_counter();
    let history = Arc::new(Mutex::new(History::from_turns(vec![Turn::user("go")])));
    let tool_loop = ToolLoop::new(provider.clone(), registry);

    let (decisions, receiver) = mpsc::channel(4);
    let mut events = tool_loop.run(Arc::clone(&history), config(), TurnCancellation::new(), receiver);
    let approval = loop {
        match events.next().await {
            Some(LoopEvent::ApprovalRequested { approval, .. }) => break approval,
            Some(_) => continue,
            None => panic!("turn ended without an approval request"),
        }
    };

    decisions.send(ApprovalDecision::approve("from-another-step")).await.unwrap();
    decisions.send(ApprovalDecision::deny(&approval.approval_id)).await.unwrap();
    let rest: Vec<LoopEvent> = events.collect().await;

    assert_eq!(outcome_of(&rest), TurnOutcome::Completed);
    assert_eq!(sent.load(Ordering::SeqCst), 0);
    assert_eq!(provider.invocations(), 2);
    let history = history.lock().await;
    assert!(!history
        .turns()
        .iter()
        .any(|t| matches!(t, Turn::ToolApprovalResponse { approval_id, .. } if approval_id == "from-another-step")));
    assert!(history.turns().contains(&Turn::ToolApprovalResponse {
        approval_id: approval.approval_id.clone(),
        approved: false,
    }));
}
