//! Streaming channel wire format
//!
//! JSON messages exchanged with the live endpoint. Outbound messages are a
//! tagged enum; inbound messages are decoded into a flat list of
//! [`ServerEvent`]s in the order the session should handle them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{FunctionDeclaration, ToolInvocation, ToolResult};

/// Message sent from the client to the live endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
    ClientContent(ClientContent),
}

impl ClientMessage {
    /// A single realtime media chunk
    #[must_use]
    pub fn media(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: mime_type.into(),
                data: data.into(),
            }],
        })
    }

    /// A batch of tool results
    #[must_use]
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::ToolResponse(ToolResponse {
            function_responses: results,
        })
    }

    /// A complete user turn carrying injected text
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(text)],
            }],
            turn_complete: true,
        })
    }

    /// Short name for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::RealtimeInput(_) => "realtimeInput",
            Self::ToolResponse(_) => "toolResponse",
            Self::ClientContent(_) => "clientContent",
        }
    }
}

/// First message on a new channel
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<ToolSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Value>,
}

impl Setup {
    /// Build a setup message for an audio-only response session
    #[must_use]
    pub fn new(
        model: impl Into<String>,
        voice: impl Into<String>,
        instruction: impl Into<String>,
        declarations: Vec<FunctionDeclaration>,
        transcripts: bool,
    ) -> Self {
        let transcription = transcripts.then(|| Value::Object(serde_json::Map::new()));
        Self {
            model: model.into(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.into(),
                        },
                    },
                },
            },
            system_instruction: Content {
                role: None,
                parts: vec![Part::text(instruction)],
            },
            tools: vec![ToolSet {
                function_declarations: declarations,
            }],
            input_audio_transcription: transcription.clone(),
            output_audio_transcription: transcription,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<ToolResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

/// Inline binary payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }
}

/// Message received from the live endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCallBatch>,
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBatch {
    #[serde(default)]
    pub function_calls: Vec<ToolInvocation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// Something that happened on the channel
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Setup acknowledged; the channel is usable
    Open,
    /// Inline audio to schedule for playback
    Audio { mime_type: String, data: String },
    /// Text part of a model turn
    Text(String),
    /// The user barged in; stop playback
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// A batch of tool calls awaiting one batched response
    ToolCalls(Vec<ToolInvocation>),
    /// Previously issued calls the engine no longer wants answered
    ToolCallsCancelled(Vec<String>),
    /// Transcript of user speech
    InputTranscript(String),
    /// Transcript of model speech
    OutputTranscript(String),
    /// The server will close the channel soon
    GoAway { time_left: Option<String> },
    /// The transport closed
    Closed { code: Option<u16>, reason: String },
    /// The transport failed
    Failed(String),
}

impl ServerMessage {
    /// Flatten into events, interruption first and turn completion last
    #[must_use]
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(ServerEvent::Open);
        }

        if let Some(content) = self.server_content {
            if content.interrupted {
                events.push(ServerEvent::Interrupted);
            }
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(blob) = part.inline_data {
                        events.push(ServerEvent::Audio {
                            mime_type: blob.mime_type,
                            data: blob.data,
                        });
                    }
                    if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                        events.push(ServerEvent::Text(text));
                    }
                }
            }
            if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
                events.push(ServerEvent::InputTranscript(t.text));
            }
            if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
                events.push(ServerEvent::OutputTranscript(t.text));
            }
            if content.turn_complete {
                events.push(ServerEvent::TurnComplete);
            }
        }

        if let Some(batch) = self.tool_call.filter(|b| !b.function_calls.is_empty()) {
            events.push(ServerEvent::ToolCalls(batch.function_calls));
        }
        if let Some(cancel) = self.tool_call_cancellation {
            events.push(ServerEvent::ToolCallsCancelled(cancel.ids));
        }
        if let Some(go_away) = self.go_away {
            events.push(ServerEvent::GoAway {
                time_left: go_away.time_left,
            });
        }

        events
    }
}

/// Decode one inbound frame into events
///
/// # Errors
///
/// Returns `Error::Protocol` if the frame is not a recognizable JSON message
pub fn decode_server_frame(frame: &[u8]) -> crate::Result<Vec<ServerEvent>> {
    serde_json::from_slice::<ServerMessage>(frame)
        .map(ServerMessage::into_events)
        .map_err(|e| crate::Error::Protocol(format!("undecodable server message: {e}")))
}
