//! Wire protocol between the host and a plugin
//!
//! One JSON object per line, tagged by `type`. Worker plugins read requests
//! on stdin and answer on stdout; native plugins receive the same JSON
//! through their exported call function.

use serde::{Deserialize, Serialize};

use crate::application::errors::PluginError;
use crate::domain::entities::{CommandSpec, IncomingMessage};

/// Host to plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostRequest {
    /// The `on_load` hook
    Load { prefix: String },
    /// Run one of the plugin's commands
    Invoke {
        command: String,
        args: Vec<String>,
        message: MessageEnvelope,
    },
    /// The `on_unload` hook
    Unload,
}

/// Plugin to host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginResponse {
    Loaded {
        #[serde(default)]
        info: PluginInfo,
        #[serde(default)]
        commands: Vec<CommandSpec>,
    },
    Actions {
        #[serde(default)]
        actions: Vec<PluginAction>,
    },
    Unloaded,
    Error { message: String },
}

/// Metadata a plugin reports about itself from `on_load`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// What a plugin asks the host to do with the transport after a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PluginAction {
    /// Answer the triggering message (edit when it is ours, else send)
    Reply { text: String },
    /// Edit the triggering message
    Edit { text: String },
    /// Send a new message to any chat
    Send { chat_id: String, text: String },
    /// Delete the triggering message
    Delete,
}

/// The parts of an incoming message a plugin gets to see
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub chat_id: String,
    pub message_id: String,
    pub sender_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub reply_to_text: Option<String>,
}

impl From<&IncomingMessage> for MessageEnvelope {
    fn from(message: &IncomingMessage) -> Self {
        Self {
            chat_id: message.chat_id.clone(),
            message_id: message.id.clone(),
            sender_id: message.sender_id().map(str::to_string),
            text: message.text.clone(),
            reply_to_text: message.reply_to.as_ref().map(|m| m.text.clone()),
        }
    }
}

/// Serialize a request as a single line, without the trailing newline
pub fn encode(request: &HostRequest) -> Result<String, PluginError> {
    serde_json::to_string(request).map_err(|e| PluginError::Protocol(e.to_string()))
}

/// Parse one response line; an `error` response becomes `PluginError::Remote`
pub fn decode(line: &str) -> Result<PluginResponse, PluginError> {
    let response: PluginResponse = serde_json::from_str(line.trim()).map_err(|e| {
        PluginError::Protocol(format!("invalid response {:?}: {}", line.trim(), e))
    })?;
    match response {
        PluginResponse::Error { message } => Err(PluginError::Remote(message)),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{ArgGrammar, User};

    #[test]
    fn test_request_wire_format() {
        let line = encode(&HostRequest::Load { prefix: ".".into() }).unwrap();
        assert_eq!(line, r#"{"type":"load","prefix":"."}"#);

        let message = IncomingMessage::new("c1", ".echo hi")
            .with_id("m1")
            .with_sender(User::new("u1"));
        let line = encode(&HostRequest::Invoke {
            command: "echo".into(),
            args: vec!["hi".into()],
            message: MessageEnvelope::from(&message),
        })
        .unwrap();
        assert!(line.starts_with(r#"{"type":"invoke","command":"echo","args":["hi"],"#));
        assert!(line.contains(r#""sender_id":"u1""#));
    }

    #[test]
    fn test_decode_loaded_with_defaults() {
        let line = r#"{"type":"loaded","commands":[{"name":"echo","args":"rest"}]}"#;
        let response = decode(line).unwrap();
        match response {
            PluginResponse::Loaded { info, commands } => {
                assert_eq!(info, PluginInfo::default());
                assert_eq!(commands[0].grammar, ArgGrammar::Rest);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_decode_actions() {
        let response = decode(
            r#"{"type":"actions","actions":[{"action":"reply","text":"hi"},{"action":"delete"}]}"#,
        )
        .unwrap();
        assert_eq!(
            response,
            PluginResponse::Actions {
                actions: vec![PluginAction::Reply { text: "hi".into() }, PluginAction::Delete],
            }
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode(r#"{"type":"error","message":"boom"}"#),
            Err(PluginError::Remote(m)) if m == "boom"
        ));
        assert!(matches!(decode("print debugging"), Err(PluginError::Protocol(_))));
    }
}
