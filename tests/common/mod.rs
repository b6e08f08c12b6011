//! Shared test helpers and scripted provider.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use steploop::agent_loop::{LoopEvent, TurnOutcome};
use steploop::config::{AllowedTool, LoopConfig};
use steploop::error::{Result, StepLoopError};
use steploop::provider::{ModelProvider, ModelRequest};
use steploop::tools::{builtin, AgentTool, AgentToolParameters, Tool, ToolRegistry};
use steploop::transport::TurnCancellation;
use steploop::types::*;

/// One scripted model response.
#[derive(Debug, Clone)]
pub struct Script {
    events: Vec<StreamEvent>,
    hang: bool,
}

impl Script {
    pub fn events(events: Vec<StreamEvent>) -> Self {
        Self { events, hang: false }
    }

    /// Text deltas followed by a `stop` finish.
    pub fn text(parts: &[&str]) -> Self {
        let mut events: Vec<StreamEvent> = parts.iter().map(|p| StreamEvent::text(*p)).collect();
        events.push(StreamEvent::finish(FinishReason::Stop, Some(usage(10, 2))));
        Self::events(events)
    }

    /// One tool call followed by a `tool-calls` finish.
    pub fn tool_call(call_id: &str, name: &str, input: Value) -> Self {
        Self::events(vec![
            StreamEvent::ToolCall(ToolCall::new(call_id, name, input)),
            StreamEvent::finish(FinishReason::ToolCalls, Some(usage(8, 4))),
        ])
    }

    /// The events, then a stream that never ends.
    pub fn hanging(events: Vec<StreamEvent>) -> Self {
        Self { events, hang: true }
    }
}

/// A provider that replays scripted responses in order and records every
/// request it receives.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn invocations(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, request: &ModelRequest, _cancel: TurnCancellation) -> Result<EventStream> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| StepLoopError::provider("no scripted response left"))?;

        let events = stream::iter(script.events.into_iter().map(Ok));
        if script.hang {
            Ok(events.chain(stream::pending()).boxed())
        } else {
            Ok(events.boxed())
        }
    }
}

pub fn usage(input: u64, output: u64) -> Usage {
    Usage {
        model: Some("test-model".into()),
        input: InputUsage {
            no_cache: Some(input),
            ..InputUsage::default()
        },
        output: OutputUsage {
            text: Some(output),
            ..OutputUsage::default()
        },
    }
}

/// Built-in tools plus a `send_message` replacement that counts executions.
pub fn registry_with_counter() -> (ToolRegistry, Arc<AtomicUsize>) {
    let sent = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&sent);
    let send: Arc<dyn Tool> = Arc::new(
        AgentTool::new(
            "send_message",
            "Post a message to a chat channel",
            AgentToolParameters::object()
                .string("channel", "Channel name", true)
                .string("text", "Message body", true)
                .build(),
            move |_args, _ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({ "delivered": true }))
                }
            },
        )
        .with_approval(),
    );
    let registry = ToolRegistry::new().with(builtin::weather_tool()).with(send);
    (registry, sent)
}

pub fn config() -> LoopConfig {
    LoopConfig::builder()
        .model("test-model")
        .tools(vec![AllowedTool::new("weather"), AllowedTool::new("send_message")])
        .build()
}

pub fn text_of(events: &[LoopEvent]) -> String {
    events.iter().filter_map(LoopEvent::delta_text).collect()
}

pub fn outcome_of(events: &[LoopEvent]) -> TurnOutcome {
    match events.last() {
        Some(LoopEvent::Finished { outcome }) => outcome.clone(),
        other => panic!("expected Finished last, got {other:?}"),
    }
}

pub fn step_count(events: &[LoopEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, LoopEvent::StepStarted { .. }))
        .count()
}
