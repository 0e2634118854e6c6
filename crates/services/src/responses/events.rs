//! Server-sent events for streamed responses.
//!
//! Upstream chat chunks are re-framed as `response.*` events. Every event
//! carries a `sequence_number` that increases by one per event.

use bytes::{Bytes, BytesMut};
use inference_providers::{ChatCompletionChunk, SseLine};
use serde_json::{json, Value};
use tracing::warn;

use crate::completions::streaming::event_frame;

pub const EVENT_CREATED: &str = "response.created";
pub const EVENT_IN_PROGRESS: &str = "response.in_progress";
pub const EVENT_OUTPUT_ITEM_ADDED: &str = "response.output_item.added";
pub const EVENT_OUTPUT_TEXT_DELTA: &str = "response.output_text.delta";
pub const EVENT_REASONING_TEXT_DELTA: &str = "response.reasoning_text.delta";
pub const EVENT_OUTPUT_TEXT_DONE: &str = "response.output_text.done";
pub const EVENT_COMPLETED: &str = "response.completed";
pub const EVENT_FAILED: &str = "response.failed";

/// Numbers and encodes the events of one streamed response.
#[derive(Debug)]
pub struct ResponseEvents {
    item_id: String,
    sequence: u64,
    text: String,
}

impl ResponseEvents {
    /// `item_id` is the ID the assistant message will be stored under.
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            sequence: 0,
            text: String::new(),
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    fn event(&mut self, event: &str, mut body: Value) -> Option<Bytes> {
        body["type"] = json!(event);
        body["sequence_number"] = json!(self.sequence);
        self.sequence += 1;
        match event_frame(event, &body) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(event, error = %e, "Failed to encode response event");
                None
            }
        }
    }

    /// `response.created`, `response.in_progress` and the placeholder
    /// assistant message, as one frame.
    pub fn opening(&mut self, response: Value) -> Bytes {
        let item = json!({
            "id": self.item_id,
            "type": "message",
            "status": "in_progress",
            "role": "assistant",
            "content": [],
        });
        let mut frames = BytesMut::new();
        let events = [
            self.event(EVENT_CREATED, json!({"response": response.clone()})),
            self.event(EVENT_IN_PROGRESS, json!({"response": response})),
            self.event(EVENT_OUTPUT_ITEM_ADDED, json!({"output_index": 0, "item": item})),
        ];
        for frame in events.into_iter().flatten() {
            frames.extend_from_slice(&frame);
        }
        frames.freeze()
    }

    /// Re-frames one upstream line. Content and reasoning deltas become
    /// delta events, `[DONE]` closes the text; everything else is dropped.
    pub fn translate(&mut self, line: &SseLine) -> Option<Bytes> {
        if line.is_done() {
            let text = self.text.clone();
            let item_id = self.item_id.clone();
            return self.event(
                EVENT_OUTPUT_TEXT_DONE,
                json!({"item_id": item_id, "output_index": 0, "content_index": 0, "text": text}),
            );
        }
        let chunk = serde_json::from_str::<ChatCompletionChunk>(line.data()?).ok()?;
        let delta = chunk.choices.into_iter().find_map(|c| c.delta)?;

        let mut frames = BytesMut::new();
        if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
            let item_id = self.item_id.clone();
            if let Some(frame) = self.event(
                EVENT_REASONING_TEXT_DELTA,
                json!({"item_id": item_id, "output_index": 0, "content_index": 0, "delta": reasoning}),
            ) {
                frames.extend_from_slice(&frame);
            }
        }
        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            self.text.push_str(&content);
            let item_id = self.item_id.clone();
            if let Some(frame) = self.event(
                EVENT_OUTPUT_TEXT_DELTA,
                json!({"item_id": item_id, "output_index": 0, "content_index": 0, "delta": content}),
            ) {
                frames.extend_from_slice(&frame);
            }
        }
        (!frames.is_empty()).then(|| frames.freeze())
    }

    /// `response.completed` or `response.failed` with the final record.
    pub fn closing(&mut self, event: &str, response: Value) -> Option<Bytes> {
        self.event(event, json!({"response": response}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events_of(frames: &Bytes) -> Vec<Value> {
        String::from_utf8(frames.to_vec())
            .unwrap()
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .map(|d| serde_json::from_str(d).unwrap())
            .collect()
    }

    #[test]
    fn test_events_are_numbered_in_order() {
        let mut events = ResponseEvents::new("msg_answer");
        let opening = events_of(&events.opening(json!({"id": "resp_a", "status": "running"})));
        assert_eq!(opening.len(), 3);
        assert_eq!(opening[0]["type"], EVENT_CREATED);
        assert_eq!(opening[0]["response"]["id"], "resp_a");
        assert_eq!(opening[2]["item"]["id"], "msg_answer");

        let line = SseLine::new(
            &br#"data: {"choices":[{"index":0,"delta":{"reasoning_content":"hm","content":"Hi"}}]}"#[..],
        );
        let deltas = events_of(&events.translate(&line).unwrap());
        assert_eq!(deltas[0]["type"], EVENT_REASONING_TEXT_DELTA);
        assert_eq!(deltas[1]["type"], EVENT_OUTPUT_TEXT_DELTA);
        assert_eq!(deltas[1]["delta"], "Hi");

        assert!(events.translate(&SseLine::new(&b": keep-alive"[..])).is_none());
        assert!(events.translate(&SseLine::new(&b"data: {not json"[..])).is_none());

        let done = events_of(&events.translate(&SseLine::new(&b"data: [DONE]"[..])).unwrap());
        assert_eq!(done[0]["text"], "Hi");

        let closing = events_of(&events.closing(EVENT_COMPLETED, json!({"id": "resp_a"})).unwrap());
        let sequence: Vec<u64> = opening
            .iter()
            .chain(&deltas)
            .chain(&done)
            .chain(&closing)
            .map(|e| e["sequence_number"].as_u64().unwrap())
            .collect();
        assert_eq!(sequence, (0..7).collect::<Vec<_>>());
    }
}
