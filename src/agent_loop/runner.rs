//! The step loop: invoke the model, gate and run tools, repeat.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregator::{DeltaAggregator, StepMessage, TurnStatus};
use crate::config::LoopConfig;
use crate::error::describe_provider_error;
use crate::history::History;
use crate::provider::{ModelProvider, ModelRequest};
use crate::tools::{ToolRegistry, ToolSet};
use crate::transport::{cancellable, TurnCancellation};
use crate::types::{
    ApprovalDecision, AssistantContent, StreamEvent, ToolApproval, ToolCall, ToolCallPayload, Turn,
};

use super::approvals::{ApprovalGate, GateVerdict};
use super::events::LoopEvent;
use super::tooling::{execute_parallel_tool_calls, execute_tool_call, ToolOutcome};
use super::types::{LoopState, TurnOutcome};

/// History shared between a conversation and its in-flight run.
pub type SharedHistory = Arc<Mutex<History>>;

/// Drives one user turn through as many model invocations as it needs.
#[derive(Clone)]
pub struct ToolLoop {
    provider: Arc<dyn ModelProvider>,
    registry: ToolRegistry,
}

enum Phase {
    Invoke,
    Approvals(ApprovalGate),
}

/// What a step handed back after its Turns were appended.
struct StepPlan {
    content: Vec<AssistantContent>,
    auto_calls: Vec<ToolCall>,
    approvals: Vec<ToolApproval>,
    provider_results: Vec<ToolOutcome>,
}

impl ToolLoop {
    pub fn new(provider: Arc<dyn ModelProvider>, registry: ToolRegistry) -> Self {
        Self { provider, registry }
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    /// Run the current turn of `history`.
    ///
    /// The stream is lazy: nothing happens until it is polled. Approvals
    /// left undecided by an earlier run are settled first, and the step budget
    /// counts the invocations earlier runs spent on the same user turn.
    /// Decisions arrive on `decisions`; they are recorded in history if the
    /// caller has not done so already. The last item is always [`LoopEvent::Finished`].
    pub fn run(
        &self,
        history: SharedHistory,
        config: LoopConfig,
        cancel: TurnCancellation,
        mut decisions: mpsc::Receiver<ApprovalDecision>,
    ) -> BoxStream<'static, LoopEvent> {
        let provider = Arc::clone(&self.provider);
        let tools = self.registry.expose(config.tools.as_deref());

        let stream = async_stream::stream! {
            let started = Instant::now();
            let mut aggregator = DeltaAggregator::new();
            let mut state = LoopState::Idle;
            let (mut steps, mut phase) = {
                let guard = history.lock().await;
                let steps = guard.steps_taken();
                let gate = ApprovalGate::new(steps, unsettled_approvals(&guard));
                if gate.is_empty() {
                    (steps, Phase::Invoke)
                } else {
                    debug!(steps, "resuming with unsettled approvals");
                    (steps, Phase::Approvals(gate))
                }
            };

            info!(
                model = %config.model,
                provider = provider.provider_name(),
                max_steps = config.max_steps,
                steps_taken = steps,
                tools = tools.len(),
                "turn started"
            );

            let outcome = 'run: loop {
                match phase {
                    Phase::Invoke => {
                        if cancel.is_cancelled() {
                            break 'run TurnOutcome::Cancelled;
                        }
                        if steps >= config.max_steps {
                            info!(max_steps = config.max_steps, "step budget exhausted");
                            break 'run TurnOutcome::StepLimitReached;
                        }
                        steps += 1;
                        let step = steps;
                        transition(&mut state, LoopState::AwaitingModel);
                        yield LoopEvent::StepStarted { step };

                        let request = {
                            let guard = history.lock().await;
                            ModelRequest {
                                model: config.model.clone(),
                                instructions: config.instructions.clone(),
                                messages: guard.replayable(config.replay_mode),
                                tools: tools.definitions(),
                                stream: config.stream,
                                settings: config.settings.clone(),
                            }
                        };
                        debug!(step, messages = request.messages.len(), "invoking model");

                        let events = match cancel.run(provider.invoke(&request, cancel.clone())).await {
                            None => break 'run TurnOutcome::Cancelled,
                            Some(Ok(events)) => events,
                            Some(Err(err)) => {
                                let message = err.to_string();
                                warn!(step, error = %message, "model invocation failed");
                                yield LoopEvent::Delta { text: aggregator.fail(&message) };
                                yield LoopEvent::Error { message: message.clone() };
                                break 'run TurnOutcome::failed(message);
                            }
                        };
                        transition(&mut state, LoopState::Streaming);

                        let mut events = cancellable(events, cancel.clone());
                        while let Some(item) = events.next().await {
                            let event = match item {
                                Ok(event) => event,
                                Err(err) => {
                                    let message = err.to_string();
                                    warn!(step, error = %message, "response stream failed");
                                    yield LoopEvent::Delta { text: aggregator.fail(&message) };
                                    yield LoopEvent::Error { message: message.clone() };
                                    break 'run TurnOutcome::failed(message);
                                }
                            };
                            match &event {
                                StreamEvent::Error { payload } => {
                                    let message = describe_provider_error(payload);
                                    warn!(step, error = %message, "provider reported an error");
                                    yield LoopEvent::Delta { text: aggregator.fail(&message) };
                                    yield LoopEvent::Error { message: message.clone() };
                                    break 'run TurnOutcome::failed(message);
                                }
                                StreamEvent::TextDelta { text } => {
                                    aggregator.apply(&event);
                                    yield LoopEvent::Delta { text: text.clone() };
                                }
                                StreamEvent::ReasoningDelta { text } => {
                                    aggregator.apply(&event);
                                    yield LoopEvent::ReasoningDelta { text: text.clone() };
                                }
                                StreamEvent::ToolResult { call_id, name, input, output } => {
                                    aggregator.apply(&event);
                                    yield LoopEvent::ToolActivity {
                                        call_id: call_id.clone().unwrap_or_default(),
                                        payload: ToolCallPayload::completed(name, input, output),
                                        is_error: false,
                                    };
                                }
                                _ => aggregator.apply(&event),
                            }
                        }

                        if cancel.is_cancelled() {
                            if aggregator.has_partial_text() {
                                let partial = Turn::Assistant {
                                    content: vec![AssistantContent::text(aggregator.step().text.clone())],
                                    incomplete: true,
                                };
                                let appended = history.lock().await.append(vec![partial]);
                                if let Err(err) = appended {
                                    warn!(error = %err, "could not keep partial assistant text");
                                }
                            }
                            break 'run TurnOutcome::Cancelled;
                        }

                        let message = aggregator.take_step();
                        if !message.finished {
                            debug!(step, "response ended without a finish event");
                        }

                        let plan = plan_step(message, &tools);
                        let mut turns = Vec::new();
                        if !plan.content.is_empty() {
                            turns.push(Turn::assistant(plan.content.clone()));
                        }
                        for outcome in &plan.provider_results {
                            turns.extend(outcome.turns());
                        }
                        let appended = history.lock().await.append(turns);
                        if let Err(err) = appended {
                            yield LoopEvent::Error { message: err.to_string() };
                            break 'run TurnOutcome::failed(err.to_string());
                        }
                        if !plan.content.is_empty() {
                            yield LoopEvent::AssistantContentProduced { step, content: plan.content };
                        }

                        if !plan.auto_calls.is_empty() {
                            debug!(step, count = plan.auto_calls.len(), "running tools");
                            let outcomes = execute_parallel_tool_calls(&tools, &plan.auto_calls, &cancel).await;
                            let turns: Vec<Turn> = outcomes.iter().flat_map(ToolOutcome::turns).collect();
                            let appended = history.lock().await.append(turns);
                            if let Err(err) = appended {
                                yield LoopEvent::Error { message: err.to_string() };
                                break 'run TurnOutcome::failed(err.to_string());
                            }
                            for outcome in &outcomes {
                                yield outcome.event();
                            }
                            if cancel.is_cancelled() {
                                break 'run TurnOutcome::Cancelled;
                            }
                        }

                        let gate = ApprovalGate::new(step, plan.approvals);
                        if !gate.is_empty() {
                            let displays = gate
                                .unresolved()
                                .map(|approval| Turn::ToolApprovalRequestDisplay {
                                    approval_id: approval.approval_id.clone(),
                                    payload: ToolCallPayload::pending(&approval.call),
                                })
                                .collect();
                            let appended = history.lock().await.append(displays);
                            if let Err(err) = appended {
                                yield LoopEvent::Error { message: err.to_string() };
                                break 'run TurnOutcome::failed(err.to_string());
                            }
                            phase = Phase::Approvals(gate);
                        } else if plan.auto_calls.is_empty() {
                            break 'run TurnOutcome::Completed;
                        } else {
                            phase = Phase::Invoke;
                        }
                    }

                    Phase::Approvals(mut gate) => {
                        let step = gate.step();
                        transition(&mut state, LoopState::AwaitingApproval);
                        gate.absorb_history(history.lock().await.turns());

                        let waiting: Vec<ToolApproval> = gate.unresolved().cloned().collect();
                        for approval in waiting {
                            info!(step, approval_id = %approval.approval_id, tool = %approval.call.name, "approval requested");
                            yield LoopEvent::ApprovalRequested { step, approval };
                        }

                        while !gate.is_settled() {
                            let decision = match cancel.run(decisions.recv()).await {
                                None => break 'run TurnOutcome::Cancelled,
                                Some(None) => {
                                    debug!(step, "decision queue closed with approvals outstanding");
                                    break 'run TurnOutcome::AwaitingApproval;
                                }
                                Some(Some(decision)) => decision,
                            };
                            if gate.decide(&decision) != GateVerdict::Accepted {
                                continue;
                            }
                            if let Err(err) = record_decision(&history, &decision).await {
                                warn!(approval_id = %decision.approval_id, error = %err, "decision rejected by history");
                            }
                        }

                        let answered = answered_calls(&*history.lock().await);
                        let mut outcomes = Vec::new();
                        for resolved in gate.into_resolved() {
                            let call = &resolved.approval.call;
                            if answered.contains(&call.call_id) {
                                continue;
                            }
                            let outcome = if resolved.approved {
                                execute_tool_call(&tools, call, &cancel).await
                            } else {
                                debug!(tool = %call.name, call_id = %call.call_id, "call denied");
                                ToolOutcome::declined(call)
                            };
                            outcomes.push(outcome);
                        }

                        let turns: Vec<Turn> = outcomes.iter().flat_map(ToolOutcome::turns).collect();
                        let appended = history.lock().await.append(turns);
                        if let Err(err) = appended {
                            yield LoopEvent::Error { message: err.to_string() };
                            break 'run TurnOutcome::failed(err.to_string());
                        }
                        for outcome in &outcomes {
                            yield outcome.event();
                        }
                        phase = Phase::Invoke;
                    }
                }
            };

            aggregator.close(match &outcome {
                TurnOutcome::Failed { .. } => TurnStatus::Failed,
                TurnOutcome::Cancelled => TurnStatus::Cancelled,
                _ => TurnStatus::Finished,
            });
            transition(&mut state, outcome.final_state());

            let usage = aggregator.live().usage.clone();
            if !usage.is_empty() {
                yield LoopEvent::Usage { usage };
            }
            let ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            info!(steps, ?outcome, ms, "turn finished");
            yield LoopEvent::ProcessingTime { ms };
            yield LoopEvent::Finished { outcome };
        };
        Box::pin(stream)
    }
}

impl std::fmt::Debug for ToolLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolLoop")
            .field("provider", &self.provider.provider_name())
            .field("registry", &self.registry)
            .finish()
    }
}

fn transition(state: &mut LoopState, next: LoopState) {
    if *state == next {
        return;
    }
    if !state.can_transition_to(next) {
        warn!(from = %state, to = %next, "unexpected loop state transition");
    }
    debug!(from = %state, to = %next, "loop state");
    *state = next;
}

/// Split a finished step into what is appended, what runs now, and what
/// waits for a human.
fn plan_step(message: StepMessage, tools: &ToolSet) -> StepPlan {
    let StepMessage {
        mut content,
        tool_calls,
        approval_requests,
        tool_results,
        ..
    } = message;

    let provider_results: Vec<ToolOutcome> = tool_results
        .into_iter()
        .filter_map(|result| {
            let call_id = result.call_id?;
            Some(ToolOutcome {
                call: ToolCall::new(call_id, result.name, result.input),
                output: result.output,
                is_error: false,
            })
        })
        .collect();

    let gated: HashSet<&str> = approval_requests
        .iter()
        .map(|a| a.call.call_id.as_str())
        .collect();
    let mut auto_calls = Vec::new();
    let mut approvals = approval_requests.clone();

    for call in tool_calls {
        if gated.contains(call.call_id.as_str())
            || provider_results.iter().any(|r| r.call.call_id == call.call_id)
        {
            continue;
        }
        if tools.get(&call.name).is_some_and(|t| t.needs_approval()) {
            let approval_id = Uuid::new_v4().to_string();
            content.push(AssistantContent::ToolApprovalRequest {
                approval_id: approval_id.clone(),
                call_id: call.call_id.clone(),
            });
            approvals.push(ToolApproval { approval_id, call });
        } else {
            auto_calls.push(call);
        }
    }

    StepPlan {
        content,
        auto_calls,
        approvals,
        provider_results,
    }
}

/// Approvals of the current turn that still lack a tool result.
fn unsettled_approvals(history: &History) -> Vec<ToolApproval> {
    let mut approvals: Vec<ToolApproval> = history
        .pending_tool_calls()
        .into_iter()
        .map(|resolved| resolved.approval)
        .collect();
    approvals.extend(history.outstanding_approvals());
    approvals
}

fn answered_calls(history: &History) -> HashSet<String> {
    history
        .turns()
        .iter()
        .filter_map(|turn| match turn {
            Turn::Tool { call_id, .. } => Some(call_id.clone()),
            _ => None,
        })
        .collect()
}

async fn record_decision(history: &SharedHistory, decision: &ApprovalDecision) -> crate::error::Result<()> {
    let mut guard = history.lock().await;
    let recorded = guard.turns().iter().any(|turn| {
        matches!(turn, Turn::ToolApprovalResponse { approval_id, .. } if *approval_id == decision.approval_id)
    });
    if recorded {
        return Ok(());
    }
    guard.append(vec![Turn::approval_response(decision)])
}
