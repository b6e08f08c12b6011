//! Approval gate for tool calls held behind a human decision.

use tracing::{debug, warn};

use crate::history::ResolvedApproval;
use crate::types::{ApprovalDecision, ToolApproval, Turn};

/// What the gate did with a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Accepted,
    /// The approval id belongs to another step (or to nothing).
    Unrelated,
    AlreadyDecided,
}

#[derive(Debug, Clone)]
struct GateEntry {
    approval: ToolApproval,
    decision: Option<bool>,
}

/// Collects decisions for the approvals of one step.
///
/// The loop does not resume until every entry has a decision.
#[derive(Debug, Clone)]
pub struct ApprovalGate {
    step: usize,
    entries: Vec<GateEntry>,
}

impl ApprovalGate {
    pub fn new(step: usize, approvals: Vec<ToolApproval>) -> Self {
        Self {
            step,
            entries: approvals
                .into_iter()
                .map(|approval| GateEntry {
                    approval,
                    decision: None,
                })
                .collect(),
        }
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take over decisions that are already recorded in `turns`.
    pub fn absorb_history(&mut self, turns: &[Turn]) {
        for turn in turns {
            if let Turn::ToolApprovalResponse {
                approval_id,
                approved,
            } = turn
            {
                if let Some(entry) = self.entry_mut(approval_id) {
                    entry.decision.get_or_insert(*approved);
                }
            }
        }
    }

    pub fn decide(&mut self, decision: &ApprovalDecision) -> GateVerdict {
        let step = self.step;
        let Some(entry) = self.entry_mut(&decision.approval_id) else {
            warn!(step, approval_id = %decision.approval_id, "ignoring decision for another step");
            return GateVerdict::Unrelated;
        };
        if entry.decision.is_some() {
            warn!(step, approval_id = %decision.approval_id, "approval already decided");
            return GateVerdict::AlreadyDecided;
        }
        entry.decision = Some(decision.approved);
        debug!(step, approval_id = %decision.approval_id, approved = decision.approved, "approval decided");
        GateVerdict::Accepted
    }

    /// Approvals still waiting for a decision.
    pub fn unresolved(&self) -> impl Iterator<Item = &ToolApproval> {
        self.entries
            .iter()
            .filter(|e| e.decision.is_none())
            .map(|e| &e.approval)
    }

    pub fn is_settled(&self) -> bool {
        self.entries.iter().all(|e| e.decision.is_some())
    }

    /// Decided approvals in request order. Undecided entries are left out.
    pub fn into_resolved(self) -> Vec<ResolvedApproval> {
        self.entries
            .into_iter()
            .filter_map(|e| {
                Some(ResolvedApproval {
                    approved: e.decision?,
                    approval: e.approval,
                })
            })
            .collect()
    }

    fn entry_mut(&mut self, approval_id: &str) -> Option<&mut GateEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.approval.approval_id == approval_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;
    use serde_json::json;

    fn approval(id: &str) -> ToolApproval {
        ToolApproval {
            approval_id: id.into(),
            call: ToolCall::new(format!("call-{id}"), "send_message", json!({})),
        }
    }

    #[test]
    fn settles_once_every_approval_is_decided() {
        let mut gate = ApprovalGate::new(1, vec![approval("a"), approval("b")]);
        assert!(!gate.is_settled());

        assert_eq!(gate.decide(&ApprovalDecision::approve("a")), GateVerdict::Accepted);
        assert_eq!(gate.unresolved().count(), 1);
        assert_eq!(gate.decide(&ApprovalDecision::deny("b")), GateVerdict::Accepted);
        assert!(gate.is_settled());

        let resolved = gate.into_resolved();
        assert_eq!(resolved.len(), 2);
        assert!(resolved[0].approved);
        assert!(!resolved[1].approved);
    }

    #[test]
    fn foreign_and_repeated_decisions_are_ignored() {
        let mut gate = ApprovalGate::new(2, vec![approval("a")]);
        assert_eq!(gate.decide(&ApprovalDecision::approve("zzz")), GateVerdict::Unrelated);
        assert_eq!(gate.decide(&ApprovalDecision::deny("a")), GateVerdict::Accepted);
        assert_eq!(gate.decide(&ApprovalDecision::approve("a")), GateVerdict::AlreadyDecided);
        assert!(!gate.into_resolved()[0].approved);
    }

    #[test]
    fn recorded_decisions_are_absorbed() {
        let mut gate = ApprovalGate::new(1, vec![approval("a"), approval("b")]);
        gate.absorb_history(&[Turn::approval_response(&ApprovalDecision::approve("b"))]);
        let waiting: Vec<&str> = gate.unresolved().map(|a| a.approval_id.as_str()).collect();
        assert_eq!(waiting, vec!["a"]);
    }
}
