//! Canonical conversation history and replay reconciliation.
//!
//! [`History`] is the single owner of the ordered Turn list and
//! [`History::append`] its only mutator. What the model sees on the next
//! invocation is derived from it by the pure [`compute_replayable`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use crate::error::{ApprovalError, Result};
use crate::types::{AssistantContent, ToolApproval, ToolCall, Turn};

/// How much of the history is replayed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ReplayMode {
    /// The whole reconciled conversation.
    #[default]
    Interactive,
    /// System turns plus the newest user turn and everything after it.
    SingleShot,
}

/// An approval request that has a recorded decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedApproval {
    pub approval: ToolApproval,
    pub approved: bool,
}

/// Append-only list of Turns for one conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from previously persisted turns.
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Drop the whole conversation.
    pub fn reset(&mut self) {
        self.turns.clear();
    }

    /// Append a batch of turns.
    ///
    /// Approval responses are validated against the history and the earlier
    /// part of the batch: the approval must exist, must not be resolved yet,
    /// must not predate the latest user turn, and must appear once. If any
    /// check fails nothing is appended.
    pub fn append(&mut self, turns: Vec<Turn>) -> Result<()> {
        let mut seen = HashSet::new();
        for (offset, turn) in turns.iter().enumerate() {
            let Turn::ToolApprovalResponse { approval_id, .. } = turn else {
                continue;
            };
            if !seen.insert(approval_id.as_str()) {
                return Err(ApprovalError::Duplicate(approval_id.clone()).into());
            }

            let combined = || self.turns.iter().chain(turns[..offset].iter());
            let Some(request_at) = combined().position(|t| requests_approval(t, approval_id)) else {
                return Err(ApprovalError::Unknown(approval_id.clone()).into());
            };
            if combined().any(|t| responds_to(t, approval_id)) {
                return Err(ApprovalError::AlreadyResolved(approval_id.clone()).into());
            }
            let latest_user = combined()
                .enumerate()
                .filter(|(_, t)| matches!(t, Turn::User { .. }))
                .map(|(i, _)| i)
                .last();
            if latest_user.is_some_and(|user_at| request_at < user_at) {
                return Err(ApprovalError::Expired(approval_id.clone()).into());
            }
        }

        debug!(count = turns.len(), "appending turns");
        self.turns.extend(turns);
        Ok(())
    }

    fn current_turn_start(&self) -> usize {
        latest_user_index(&self.turns).unwrap_or(0)
    }

    /// Model invocations already spent on the current user turn.
    ///
    /// Every invocation that produced output left one assistant turn, a
    /// cancelled one included.
    pub fn steps_taken(&self) -> usize {
        self.turns[self.current_turn_start()..]
            .iter()
            .filter(|t| matches!(t, Turn::Assistant { .. }))
            .count()
    }

    /// Approval requests of the current user turn that have no decision yet.
    pub fn outstanding_approvals(&self) -> Vec<ToolApproval> {
        let current = &self.turns[self.current_turn_start()..];
        approval_requests(current)
            .into_iter()
            .filter(|approval| !current.iter().any(|t| responds_to(t, &approval.approval_id)))
            .collect()
    }

    /// Decided approvals of the current user turn whose call has no result.
    pub fn pending_tool_calls(&self) -> Vec<ResolvedApproval> {
        let current = &self.turns[self.current_turn_start()..];
        approval_requests(current)
            .into_iter()
            .filter(|approval| !has_tool_result(current, &approval.call.call_id))
            .filter_map(|approval| {
                let approved = current.iter().find_map(|t| match t {
                    Turn::ToolApprovalResponse {
                        approval_id,
                        approved,
                    } if *approval_id == approval.approval_id => Some(*approved),
                    _ => None,
                })?;
                Some(ResolvedApproval { approval, approved })
            })
            .collect()
    }

    /// Reconciled replay view of this history.
    pub fn replayable(&self, mode: ReplayMode) -> Vec<Turn> {
        compute_replayable(&self.turns, mode)
    }
}

fn latest_user_index(turns: &[Turn]) -> Option<usize> {
    turns.iter().rposition(|t| matches!(t, Turn::User { .. }))
}

fn requests_approval(turn: &Turn, id: &str) -> bool {
    turn.assistant_content().iter().any(|part| {
        matches!(part, AssistantContent::ToolApprovalRequest { approval_id, .. } if approval_id == id)
    })
}

fn responds_to(turn: &Turn, id: &str) -> bool {
    matches!(turn, Turn::ToolApprovalResponse { approval_id, .. } if approval_id == id)
}

fn has_tool_result(turns: &[Turn], id: &str) -> bool {
    turns
        .iter()
        .any(|t| matches!(t, Turn::Tool { call_id, .. } if call_id == id))
}

fn approval_requests(turns: &[Turn]) -> Vec<ToolApproval> {
    let mut out = Vec::new();
    for turn in turns {
        let content = turn.assistant_content();
        for part in content {
            let AssistantContent::ToolApprovalRequest {
                approval_id,
                call_id,
            } = part
            else {
                continue;
            };
            let call = content
                .iter()
                .filter_map(AssistantContent::as_tool_call)
                .find(|c| c.call_id == *call_id)
                .cloned()
                .unwrap_or_else(|| ToolCall::new(call_id.clone(), String::new(), serde_json::Value::Null));
            out.push(ToolApproval {
                approval_id: approval_id.clone(),
                call,
            });
        }
    }
    out
}

/// Derive the model-facing view of `turns`.
///
/// Display turns are always removed. In completed earlier turns (before the
/// newest user turn), an assistant turn that carries text drops tool-call
/// elements that already have a result and approval requests that already
/// have a response, along with the then-orphaned result and response turns.
/// The in-progress turn is left intact so the loop can continue its steps.
/// Applying the function to its own output changes nothing.
pub fn compute_replayable(turns: &[Turn], mode: ReplayMode) -> Vec<Turn> {
    let visible: Vec<Turn> = turns.iter().filter(|t| !t.is_ephemeral()).cloned().collect();
    let pruned = prune_resolved(visible);

    match mode {
        ReplayMode::Interactive => pruned,
        ReplayMode::SingleShot => {
            let start = latest_user_index(&pruned).unwrap_or(0);
            pruned
                .into_iter()
                .enumerate()
                .filter(|(i, t)| *i >= start || matches!(t, Turn::System { .. }))
                .map(|(_, t)| t)
                .collect()
        }
    }
}

fn prune_resolved(turns: Vec<Turn>) -> Vec<Turn> {
    let Some(boundary) = latest_user_index(&turns) else {
        return turns;
    };
    let earlier = &turns[..boundary];

    let mut pruned_calls: HashSet<String> = HashSet::new();
    let mut pruned_approvals: HashSet<String> = HashSet::new();
    for turn in earlier {
        if turn.text().trim().is_empty() {
            continue;
        }
        for part in turn.assistant_content() {
            match part {
                AssistantContent::ToolCall(call) if has_tool_result(earlier, &call.call_id) => {
                    pruned_calls.insert(call.call_id.clone());
                }
                AssistantContent::ToolApprovalRequest { approval_id, .. }
                    if earlier.iter().any(|t| responds_to(t, approval_id)) =>
                {
                    pruned_approvals.insert(approval_id.clone());
                }
                _ => {}
            }
        }
    }

    if pruned_calls.is_empty() && pruned_approvals.is_empty() {
        return turns;
    }

    turns
        .into_iter()
        .enumerate()
        .filter_map(|(index, turn)| {
            if index >= boundary {
                return Some(turn);
            }
            match turn {
                Turn::Tool { ref call_id, .. } if pruned_calls.contains(call_id) => None,
                Turn::ToolApprovalResponse { ref approval_id, .. }
                    if pruned_approvals.contains(approval_id) =>
                {
                    None
                }
                Turn::Assistant {
                    content,
                    incomplete,
                } if !content.is_empty() => {
                    let content = content
                        .into_iter()
                        .filter(|part| match part {
                            AssistantContent::ToolCall(call) => !pruned_calls.contains(&call.call_id),
                            AssistantContent::ToolApprovalRequest {
                                approval_id,
                                call_id,
                            } => !pruned_approvals.contains(approval_id) && !pruned_calls.contains(call_id),
                            AssistantContent::Text { .. } => true,
                        })
                        .collect();
                    Some(Turn::Assistant { content, incomplete })
                }
                other => Some(other),
            }
        })
        .collect()
}
