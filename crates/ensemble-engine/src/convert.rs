//! Pure conversions between engine types and genai chat types.

use ensemble_contract::{Message, Role, ToolCall, ToolDescriptor};
use genai::chat::{ChatMessage, ChatRequest, ChatResponse, MessageContent, ToolResponse};

/// Convert a descriptor to a genai tool.
pub fn to_genai_tool(desc: &ToolDescriptor) -> genai::chat::Tool {
    genai::chat::Tool::new(&desc.name)
        .with_description(&desc.description)
        .with_schema(desc.parameters.clone())
}

/// Convert a message to a genai chat message.
pub fn to_chat_message(msg: &Message) -> ChatMessage {
    match msg.role {
        Role::System => ChatMessage::system(&msg.content),
        Role::User => ChatMessage::user(&msg.content),
        Role::Assistant => {
            if msg.requests_tools() {
                let genai_calls: Vec<genai::chat::ToolCall> = msg
                    .calls()
                    .iter()
                    .map(|c| genai::chat::ToolCall {
                        call_id: c.id.clone(),
                        fn_name: c.name.clone(),
                        fn_arguments: c.arguments.clone(),
                    })
                    .collect();

                let mut content = MessageContent::from(msg.content.as_str());
                for call in genai_calls {
                    content.push(genai::chat::ContentPart::ToolCall(call));
                }
                ChatMessage::assistant(content)
            } else {
                ChatMessage::assistant(&msg.content)
            }
        }
        Role::Tool => {
            let call_id = msg.tool_call_id.as_deref().unwrap_or("");
            let response = ToolResponse {
                call_id: call_id.to_string(),
                content: msg.content.clone(),
            };
            ChatMessage::from(response)
        }
    }
}

/// Build a genai chat request from messages and bound tool descriptors.
pub fn build_request(messages: &[Message], tools: &[ToolDescriptor]) -> ChatRequest {
    let chat_messages: Vec<ChatMessage> = messages.iter().map(to_chat_message).collect();
    let genai_tools: Vec<genai::chat::Tool> = tools.iter().map(to_genai_tool).collect();

    let mut request = ChatRequest::new(chat_messages);
    if !genai_tools.is_empty() {
        request = request.with_tools(genai_tools);
    }
    request
}

/// Extract the assistant message from a genai response.
pub fn reply_from_response(response: &ChatResponse) -> Message {
    let text = response
        .first_text()
        .map(|s| s.to_string())
        .unwrap_or_default();

    let tool_calls: Vec<ToolCall> = response
        .tool_calls()
        .into_iter()
        .map(|tc| ToolCall::new(&tc.call_id, &tc.fn_name, tc.fn_arguments.clone()))
        .collect();

    if tool_calls.is_empty() {
        Message::assistant(text)
    } else {
        Message::assistant_with_tool_calls(text, tool_calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_maps_to_genai_tool() {
        let desc = ToolDescriptor::new("calc", "Calculate expressions")
            .with_parameters(json!({"type": "object"}));
        let tool = to_genai_tool(&desc);
        assert_eq!(tool.name, "calc");
        assert_eq!(tool.description.as_deref(), Some("Calculate expressions"));
    }

    #[test]
    fn request_without_tools_has_none() {
        let messages = vec![Message::user("Hello"), Message::assistant("Hi!")];
        let request = build_request(&messages, &[]);
        assert_eq!(request.messages.len(), 2);
        assert!(request.tools.is_none());
    }

    #[test]
    fn request_with_tools_binds_them() {
        let messages = vec![Message::user("Hello")];
        let tools = vec![
            ToolDescriptor::new("a", "first"),
            ToolDescriptor::new("b", "second"),
        ];
        let request = build_request(&messages, &tools);
        assert_eq!(request.tools.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn conversation_with_tool_round_converts() {
        let messages = vec![
            Message::user("Calculate 5*5"),
            Message::assistant_with_tool_calls(
                "Working on it.",
                vec![ToolCall::new("call_1", "calc", json!({"expr": "5*5"}))],
            ),
            Message::tool("call_1", r#"{"result": 25}"#),
            Message::assistant("5*5 equals 25."),
        ];
        let request = build_request(&messages, &[]);
        assert_eq!(request.messages.len(), 4);
    }
}
