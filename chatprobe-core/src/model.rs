use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    Length,
    ToolUse,
    EndTurn,
    ContentFilter,
    Other,
}

impl StopReason {
    /// Map an OpenAI-style `finish_reason` string.
    pub fn from_finish(s: &str) -> Self {
        match s {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "content_filter" => Self::ContentFilter,
            "tool_calls" => Self::ToolUse,
            "end_turn" => Self::EndTurn,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Single user turn.
    pub fn single(model: impl Into<String>, prompt: impl Into<String>, stream: bool) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::user(prompt)],
            stream,
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// `choices[0]` of a response body or stream chunk, if it is an object.
pub(crate) fn first_choice(body: &Value) -> Option<&serde_json::Map<String, Value>> {
    body.get("choices")?.as_array()?.first()?.as_object()
}

/// Extract `choices[0].message.content` from a complete (non-streamed) body.
/// Any missing or mistyped link in the chain yields an empty string.
pub fn extract_message_content(body: &Value) -> String {
    first_choice(body)
        .and_then(|c| c.get("message"))
        .and_then(Value::as_object)
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// `choices[0].finish_reason`, mapped.
pub fn extract_stop_reason(body: &Value) -> Option<StopReason> {
    first_choice(body)?
        .get("finish_reason")?
        .as_str()
        .map(StopReason::from_finish)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_request_wire_shape() {
        let req = ChatRequest::single("claude-3-5-sonnet-latest", "hi", true).with_max_tokens(500);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            json!({
                "model": "claude-3-5-sonnet-latest",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true,
                "max_tokens": 500
            })
        );

        let no_limit = serde_json::to_value(ChatRequest::single("m", "x", false)).unwrap();
        assert!(no_limit.get("max_tokens").is_none());
    }

    #[test]
    fn message_content_extracted() {
        let body = json!({"choices":[{"message":{"content":"x"}}]});
        assert_eq!(extract_message_content(&body), "x");
    }

    #[test]
    fn empty_choices_yield_empty_content() {
        assert_eq!(extract_message_content(&json!({"choices":[]})), "");
    }

    #[test]
    fn broken_chains_yield_empty_content() {
        for body in [
            json!({}),
            json!({"choices": {"0": {"message": {"content": "x"}}}}),
            json!({"choices": ["x"]}),
            json!({"choices": [{"message": "x"}]}),
            json!({"choices": [{"message": {"content": 7}}]}),
            json!({"choices": [{"delta": {"content": "x"}}]}),
        ] {
            assert_eq!(extract_message_content(&body), "", "body: {body}");
        }
    }

    #[test]
    fn finish_reason_matrix() {
        let cases = [
            ("stop", StopReason::Stop),
            ("length", StopReason::Length),
            ("content_filter", StopReason::ContentFilter),
            ("tool_calls", StopReason::ToolUse),
            ("end_turn", StopReason::EndTurn),
            ("weird_reason", StopReason::Other),
        ];
        for (raw, expected) in cases {
            let body = json!({"choices":[{"message":{"content":"x"},"finish_reason":raw}]});
            assert_eq!(extract_stop_reason(&body), Some(expected));
        }
        let null_reason = json!({"choices":[{"delta":{},"finish_reason":null}]});
        assert_eq!(extract_stop_reason(&null_reason), None);
    }
}
