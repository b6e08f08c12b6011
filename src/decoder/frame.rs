//! Line-level frame decoding.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use super::wire::{
    parse_arguments, parse_usage, AgentWireEvent, ChatChunk, ChatCompletion,
};
use crate::error::{Result, StepLoopError};
use crate::types::{
    CompletionPayload, FinishEvent, FinishReason, StepBoundaryKind, StreamEvent, ToolCall, Usage,
};

const DONE_SENTINEL: &str = "[DONE]";

/// Turns complete protocol lines into [`StreamEvent`]s.
///
/// One decoder serves exactly one response. It is not restartable.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    done: bool,
    terminated: bool,
    step_index: usize,
    model: Option<String>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    tool_calls: BTreeMap<usize, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// A terminal `finish` or `error` event has been emitted.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Decode one line (without its terminator).
    pub fn decode_line(&mut self, line: &str) -> Result<Vec<StreamEvent>> {
        if self.done {
            return Ok(Vec::new());
        }

        let line = line.trim_end();
        if line.trim().is_empty() || line.starts_with(':') {
            return Ok(Vec::new());
        }
        if ["event:", "id:", "retry:"].iter().any(|field| line.starts_with(field)) {
            return Ok(Vec::new());
        }

        let Some(data) = line.strip_prefix("data:") else {
            warn!(line, "unexpected line in response stream");
            return Err(StepLoopError::Framing(format!("unexpected line: {line}")));
        };
        let data = data.strip_prefix(' ').unwrap_or(data);

        if data.trim() == DONE_SENTINEL {
            self.done = true;
            return Ok(self.flush_pending());
        }

        let payload: Value = serde_json::from_str(data).map_err(|e| {
            warn!(error = %e, "response payload is not JSON");
            StepLoopError::Framing(format!("payload is not JSON: {e}"))
        })?;
        self.decode_payload(payload)
    }

    /// Called when the byte source ends. A stream that stops without the
    /// sentinel still finishes cleanly if a finish reason was seen.
    pub fn finish_eof(&mut self) -> Result<Vec<StreamEvent>> {
        if self.done || self.terminated {
            return Ok(Vec::new());
        }
        if self.finish_reason.is_some() {
            debug!("stream ended without sentinel after a finish reason");
            return Ok(self.flush_pending());
        }
        Err(StepLoopError::Framing(
            "stream ended before the [DONE] sentinel".to_string(),
        ))
    }

    /// Decode a complete non-streaming response body into exactly one
    /// terminal event.
    pub fn decode_document(&mut self, body: &str) -> Result<Vec<StreamEvent>> {
        let value: Value = serde_json::from_str(body).map_err(|e| {
            warn!(error = %e, "response body is not JSON");
            StepLoopError::Framing(format!("response body is not JSON: {e}"))
        })?;
        self.done = true;

        if value.get("choices").is_none() {
            if let Some(error) = value.get("error") {
                self.terminated = true;
                return Ok(vec![StreamEvent::Error {
                    payload: error.clone(),
                }]);
            }
        }

        let completion: ChatCompletion = serde_json::from_value(value).map_err(|e| {
            warn!(error = %e, "unrecognised response document");
            StepLoopError::Framing(format!("unrecognised response document: {e}"))
        })?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| StepLoopError::Framing("response document has no choices".to_string()))?;

        let message = choice.message;
        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall::new(tc.id, tc.function.name, parse_arguments(&tc.function.arguments)))
            .collect();

        let mut usage = completion.usage.as_ref().and_then(parse_usage).unwrap_or_default();
        if usage.model.is_none() {
            usage.model = completion.model.filter(|m| !m.is_empty());
        }

        self.terminated = true;
        Ok(vec![StreamEvent::Finish(FinishEvent {
            reason: choice.finish_reason.as_deref().map(FinishReason::parse_lenient),
            usage: (!usage.is_empty()).then_some(usage),
            message: Some(CompletionPayload {
                text: message.content.unwrap_or_default(),
                reasoning: message.reasoning_content.unwrap_or_default(),
                tool_calls,
            }),
        })])
    }

    fn decode_payload(&mut self, payload: Value) -> Result<Vec<StreamEvent>> {
        if payload.get("type").is_some_and(Value::is_string) {
            let event: AgentWireEvent = serde_json::from_value(payload).map_err(|e| {
                warn!(error = %e, "malformed tagged event");
                StepLoopError::Framing(format!("malformed event: {e}"))
            })?;
            return Ok(self.decode_agent_event(event));
        }
        if payload.get("choices").is_some() {
            let chunk: ChatChunk = serde_json::from_value(payload).map_err(|e| {
                warn!(error = %e, "malformed completion chunk");
                StepLoopError::Framing(format!("malformed chunk: {e}"))
            })?;
            return Ok(self.decode_chunk(chunk));
        }
        if let Some(error) = payload.get("error") {
            self.terminated = true;
            return Ok(vec![StreamEvent::Error {
                payload: error.clone(),
            }]);
        }

        warn!(%payload, "unrecognised payload shape");
        Err(StepLoopError::Framing(format!("unrecognised payload: {payload}")))
    }

    fn decode_agent_event(&mut self, event: AgentWireEvent) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        let event = match event {
            AgentWireEvent::TextDelta { text } if text.is_empty() => return Vec::new(),
            AgentWireEvent::TextDelta { text } => StreamEvent::TextDelta { text },
            AgentWireEvent::ReasoningDelta { text } if text.is_empty() => return Vec::new(),
            AgentWireEvent::ReasoningDelta { text } => StreamEvent::ReasoningDelta { text },
            AgentWireEvent::ToolCall(call) => StreamEvent::ToolCall(call.into()),
            AgentWireEvent::ToolApprovalRequest {
                approval_id,
                tool_call,
            } => StreamEvent::ToolApprovalRequest {
                approval_id,
                call: tool_call.into(),
            },
            AgentWireEvent::ToolResult {
                tool_call_id,
                tool_name,
                input,
                output,
            } => StreamEvent::ToolResult {
                call_id: tool_call_id,
                name: tool_name,
                input,
                output,
            },
            AgentWireEvent::StartStep => StreamEvent::StepBoundary {
                kind: StepBoundaryKind::Start,
                step_index: self.step_index,
            },
            AgentWireEvent::FinishStep => {
                let index = self.step_index;
                self.step_index += 1;
                StreamEvent::StepBoundary {
                    kind: StepBoundaryKind::Finish,
                    step_index: index,
                }
            }
            AgentWireEvent::Finish {
                finish_reason,
                total_usage,
                usage,
            } => {
                self.terminated = true;
                let mut usage = total_usage.or(usage).as_ref().and_then(parse_usage);
                if let Some(usage) = usage.as_mut() {
                    if usage.model.is_none() {
                        usage.model = self.model.clone();
                    }
                }
                StreamEvent::Finish(FinishEvent {
                    reason: finish_reason.as_deref().map(FinishReason::parse_lenient),
                    usage,
                    message: None,
                })
            }
            AgentWireEvent::Error { error } => {
                self.terminated = true;
                StreamEvent::Error { payload: error }
            }
            AgentWireEvent::Unknown => {
                debug!("ignoring unknown tagged event");
                return Vec::new();
            }
        };
        vec![event]
    }

    fn decode_chunk(&mut self, chunk: ChatChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(model) = chunk.model.filter(|m| !m.is_empty()) {
            if self.model.as_deref() != Some(model.as_str()) {
                self.model = Some(model.clone());
                events.push(StreamEvent::ResponseMetadata { model });
            }
        }

        if let Some(usage) = chunk.usage.as_ref().and_then(parse_usage) {
            self.usage.get_or_insert_with(Usage::default).overlay(&usage);
        }

        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(text) = delta.reasoning_content.filter(|t| !t.is_empty()) {
                    events.push(StreamEvent::ReasoningDelta { text });
                }
                if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                    events.push(StreamEvent::TextDelta { text });
                }
                for fragment in delta.tool_calls.unwrap_or_default() {
                    let index = fragment.index.unwrap_or(self.tool_calls.len());
                    let partial = self.tool_calls.entry(index).or_default();
                    if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
                        partial.id = Some(id);
                    }
                    if let Some(function) = fragment.function {
                        if let Some(name) = function.name {
                            partial.name.push_str(&name);
                        }
                        if let Some(arguments) = function.arguments {
                            partial.arguments.push_str(&arguments);
                        }
                    }
                }
            }

            if let Some(reason) = choice.finish_reason.as_deref() {
                self.finish_reason = Some(FinishReason::parse_lenient(reason));
                events.extend(self.drain_tool_calls());
            }
        }
        events
    }

    fn drain_tool_calls(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.tool_calls)
            .into_iter()
            .map(|(index, partial)| {
                let call_id = partial.id.unwrap_or_else(|| format!("call_{index}"));
                StreamEvent::ToolCall(ToolCall::new(call_id, partial.name, parse_arguments(&partial.arguments)))
            })
            .collect()
    }

    /// Emit any assembled tool calls and the single closing `finish`.
    fn flush_pending(&mut self) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        let mut events = self.drain_tool_calls();

        let mut usage = self.usage.take();
        if let Some(usage) = usage.as_mut() {
            if usage.model.is_none() {
                usage.model = self.model.clone();
            }
        }

        self.terminated = true;
        events.push(StreamEvent::Finish(FinishEvent {
            reason: self.finish_reason,
            usage,
            message: None,
        }));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn decode_all(lines: &[&str]) -> Vec<StreamEvent> {
        let mut decoder = FrameDecoder::new();
        lines
            .iter()
            .flat_map(|line| decoder.decode_line(line).unwrap())
            .collect()
    }

    #[test]
    fn comments_and_field_lines_are_skipped() {
        let events = decode_all(&[": keep-alive", "event: message", "id: 7", "retry: 100", ""]);
        assert!(events.is_empty());
    }

    #[test]
    fn data_prefix_space_is_optional() {
        let events = decode_all(&[
            r#"data:{"type":"text-delta","text":"a"}"#,
            r#"data: {"type":"text-delta","text":" b"}"#,
        ]);
        assert_eq!(events, vec![StreamEvent::text("a"), StreamEvent::text(" b")]);
    }

    #[test]
    fn tagged_events_are_decoded_with_step_indices() {
        let events = decode_all(&[
            r#"data: {"type":"start-step"}"#,
            r#"data: {"type":"tool-call","toolCallId":"c1","toolName":"weather","input":{"location":"Oslo"}}"#,
            r#"data: {"type":"finish-step"}"#,
            r#"data: {"type":"start-step"}"#,
            r#"data: {"type":"finish","finishReason":"stop","totalUsage":{"inputTokenDetails":{"noCacheTokens":3},"outputTokenDetails":{"textTokens":1}}}"#,
            "data: [DONE]",
        ]);

        assert_eq!(events.len(), 5);
        assert_eq!(
            events[1],
            StreamEvent::ToolCall(ToolCall::new("c1", "weather", json!({"location": "Oslo"})))
        );
        assert_eq!(
            events[3],
            StreamEvent::StepBoundary {
                kind: StepBoundaryKind::Start,
                step_index: 1
            }
        );
        let StreamEvent::Finish(finish) = &events[4] else {
            panic!("expected finish, got {:?}", events[4]);
        };
        assert_eq!(finish.reason, Some(FinishReason::Stop));
        assert_eq!(finish.usage.as_ref().unwrap().input.no_cache, Some(3));
    }

    #[test]
    fn chunk_finish_waits_for_trailing_usage_and_sentinel() {
        let events = decode_all(&[
            r#"data: {"model":"gpt-x","choices":[{"delta":{"content":"4"}}]}"#,
            r#"data: {"model":"gpt-x","choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            r#"data: {"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":1}}"#,
            "data: [DONE]",
        ]);

        assert_eq!(
            events,
            vec![
                StreamEvent::ResponseMetadata {
                    model: "gpt-x".into()
                },
                StreamEvent::text("4"),
                StreamEvent::Finish(FinishEvent {
                    reason: Some(FinishReason::Stop),
                    usage: Some(Usage {
                        model: Some("gpt-x".into()),
                        input: crate::types::InputUsage {
                            no_cache: Some(12),
                            cache_read: None,
                            cache_write: None,
                        },
                        output: crate::types::OutputUsage {
                            text: Some(1),
                            reasoning: None,
                        },
                    }),
                    message: None,
                }),
            ]
        );
    }

    #[test]
    fn fragmented_tool_calls_are_assembled_by_index() {
        let events = decode_all(&[
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"weather","arguments":"{\"loc"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"name":"send_message","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"ation\":\"Oslo\"}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ]);

        assert_eq!(
            events,
            vec![
                StreamEvent::ToolCall(ToolCall::new("call_a", "weather", json!({"location": "Oslo"}))),
                StreamEvent::ToolCall(ToolCall::new("call_1", "send_message", json!({}))),
                StreamEvent::Finish(FinishEvent {
                    reason: Some(FinishReason::ToolCalls),
                    usage: None,
                    message: None,
                }),
            ]
        );
    }

    #[test]
    fn non_json_payload_is_a_framing_error() {
        let mut decoder = FrameDecoder::new();
        let err = decoder.decode_line("data: {not json").unwrap_err();
        assert!(matches!(err, StepLoopError::Framing(_)));

        let err = decoder.decode_line(r#"data: {"hello":"world"}"#).unwrap_err();
        assert!(matches!(err, StepLoopError::Framing(_)));
    }

    #[test]
    fn error_payload_terminates_the_stream() {
        let events = decode_all(&[
            r#"data: {"type":"text-delta","text":"par"}"#,
            r#"data: {"error":{"message":"quota exceeded"}}"#,
            "data: [DONE]",
        ]);
        assert_eq!(
            events,
            vec![
                StreamEvent::text("par"),
                StreamEvent::Error {
                    payload: json!({"message": "quota exceeded"})
                },
            ]
        );
    }

    #[test]
    fn eof_without_sentinel_depends_on_finish_reason() {
        let mut decoder = FrameDecoder::new();
        decoder
            .decode_line(r#"data: {"choices":[{"delta":{"content":"hi"},"finish_reason":"length"}]}"#)
            .unwrap();
        let events = decoder.finish_eof().unwrap();
        assert_eq!(
            events,
            vec![StreamEvent::finish(FinishReason::Length, None)]
        );

        let mut decoder = FrameDecoder::new();
        decoder
            .decode_line(r#"data: {"choices":[{"delta":{"content":"hi"}}]}"#)
            .unwrap();
        assert!(matches!(decoder.finish_eof(), Err(StepLoopError::Framing(_))));
    }

    #[test]
    fn document_yields_exactly_one_finish_with_payload() {
        let mut decoder = FrameDecoder::new();
        let events = decoder
            .decode_document(
                r#"{"model":"m1","choices":[{"message":{"role":"assistant","content":"4"},"finish_reason":"stop"}],"usage":{"prompt_tokens":5,"completion_tokens":1}}"#,
            )
            .unwrap();

        assert_eq!(events.len(), 1);
        let StreamEvent::Finish(finish) = &events[0] else {
            panic!("expected finish");
        };
        assert_eq!(finish.message.as_ref().unwrap().text, "4");
        assert_eq!(finish.usage.as_ref().unwrap().model.as_deref(), Some("m1"));
        assert_eq!(finish.reason, Some(FinishReason::Stop));
    }
}
