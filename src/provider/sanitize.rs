//! Tool call / tool result pairing before a transcript goes upstream.

use std::collections::{HashMap, HashSet};

use serde_json::json;

use crate::types::{ToolCall, Turn};

/// Make every assistant tool call be followed by exactly one result.
///
/// Results are moved directly after the assistant turn that issued the
/// call, calls without a result get a synthetic error result, and results
/// that answer no preceding call are dropped. Chat-completions endpoints
/// reject transcripts that break this pairing.
pub fn pair_tool_results(turns: &[Turn]) -> Vec<Turn> {
    let mut out = Vec::with_capacity(turns.len());
    let mut answered: HashSet<String> = HashSet::new();

    let mut i = 0;
    while i < turns.len() {
        let turn = &turns[i];
        let calls: Vec<&ToolCall> = turn
            .assistant_content()
            .iter()
            .filter_map(|part| part.as_tool_call())
            .collect();

        if calls.is_empty() {
            if !matches!(turn, Turn::Tool { .. }) {
                out.push(turn.clone());
            }
            i += 1;
            continue;
        }

        let ids: HashSet<&str> = calls.iter().map(|c| c.call_id.as_str()).collect();
        let mut results: HashMap<String, Turn> = HashMap::new();
        let mut rest = Vec::new();

        let mut j = i + 1;
        while j < turns.len() {
            let next = &turns[j];
            if matches!(next, Turn::User { .. } | Turn::System { .. } | Turn::Assistant { .. }) {
                break;
            }
            match next {
                Turn::Tool { call_id, .. } => {
                    if ids.contains(call_id.as_str()) && !answered.contains(call_id) {
                        answered.insert(call_id.clone());
                        results.insert(call_id.clone(), next.clone());
                    }
                }
                other => rest.push(other.clone()),
            }
            j += 1;
        }

        out.push(turn.clone());
        for call in calls {
            match results.remove(&call.call_id) {
                Some(result) => out.push(result),
                None => out.push(Turn::tool_result(
                    call,
                    json!({ "error": "tool call was not completed" }),
                    true,
                )),
            }
        }
        out.extend(rest);
        i = j;
    }
    out
}
