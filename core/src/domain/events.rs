// Copyright (c) 2026 Isprava Engineering
//! Agent-loop streaming events and the SSE wire format (`spec.md` SS4.6,
//! "SSE wire format").
//!
//! `AgentEvent` is the value the agent loop emits as it runs; presentation
//! maps it 1:1 onto an SSE frame `data: <json>\n\n`. Batch mode drains the
//! same stream into a single `{assistantText, toolCalls}` result instead of
//! forwarding each event (`spec.md` SS4.6: "Streaming is a lazy sequence
//! generator; batch mode drains it into a single result").

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    TextDelta { text: String },
    ToolStart { name: String, id: String },
    ToolEnd { name: String, id: String },
    Done {
        #[serde(rename = "assistantText")]
        assistant_text: String,
    },
    Error { message: String },
}

impl AgentEvent {
    /// Render as one `data: <json>\n\n` SSE frame.
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"event":"error","data":{"message":"internal serialization error"}}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_matches_wire_shape() {
        let event = AgentEvent::TextDelta { text: "hi".into() };
        let json: serde_json::Value = serde_json::from_str(&event.to_sse_data()).unwrap();
        assert_eq!(json["event"], "text_delta");
        assert_eq!(json["data"]["text"], "hi");
    }

    #[test]
    fn tool_start_matches_wire_shape() {
        let event = AgentEvent::ToolStart { name: "get_sales_funnel".into(), id: "t1".into() };
        let json: serde_json::Value = serde_json::from_str(&event.to_sse_data()).unwrap();
        assert_eq!(json["event"], "tool_start");
        assert_eq!(json["data"]["name"], "get_sales_funnel");
        assert_eq!(json["data"]["id"], "t1");
    }

    #[test]
    fn done_matches_wire_shape() {
        let event = AgentEvent::Done { assistant_text: "final".into() };
        let json: serde_json::Value = serde_json::from_str(&event.to_sse_data()).unwrap();
        assert_eq!(json["event"], "done");
        assert_eq!(json["data"]["assistantText"], "final");
    }

    #[test]
    fn error_matches_wire_shape() {
        let event = AgentEvent::Error { message: "service busy".into() };
        let json: serde_json::Value = serde_json::from_str(&event.to_sse_data()).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["data"]["message"], "service busy");
    }
}
