// SPDX-License-Identifier: MIT
//! Generation service client.
//!
//! The AI collaborator is an opaque Gemini-style REST endpoint: we send the
//! conversation turns plus a snapshot of the project's files, and get back
//! a JSON envelope of {thinking, actions, message, completed}. Models are
//! sloppy JSON emitters, so parsing is layered: strip code fences, try a
//! strict parse, repair common escaping damage, and finally salvage
//! individual fields before giving up.

mod parse;
mod prompt;

pub use parse::parse_reply;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::actions::AgentAction;
use crate::config::GeneratorConfig;
use crate::error::HostError;
use crate::project::FileSnapshot;

// ─── Request/response contract ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

/// One conversation turn sent to the generator.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    /// `data:<mime>;base64,<payload>` screenshot attachment.
    pub image_data: Option<String>,
}

/// Parsed generator reply.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenerationReply {
    pub thinking: String,
    pub actions: Vec<AgentAction>,
    pub message: String,
    pub completed: bool,
    #[serde(rename = "needsMoreInfo")]
    pub needs_more_info: bool,
}

/// Seam for the external generation service, so the orchestrator can be
/// exercised without network access.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(
        &self,
        turns: &[Turn],
        snapshot: &[FileSnapshot],
    ) -> Result<GenerationReply, HostError>;
}

// ─── Gemini wire types ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireRequest {
    contents: Vec<WireMessage>,
    #[serde(rename = "systemInstruction")]
    system_instruction: WireInstruction,
    #[serde(rename = "generationConfig")]
    generation_config: WireGenerationConfig,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    parts: Vec<WirePart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WirePart {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: WireInlineData,
    },
}

#[derive(Serialize)]
struct WireInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct WireInstruction {
    parts: Vec<WirePart>,
}

#[derive(Serialize)]
struct WireGenerationConfig {
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireCandidate {
    content: WireContent,
}

#[derive(Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WireResponsePart>,
}

#[derive(Deserialize)]
struct WireResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct WireError {
    message: String,
}

// ─── Client ──────────────────────────────────────────────────────────────────

pub struct GeminiClient {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl GeminiClient {
    pub fn new(config: GeneratorConfig) -> Self {
        // No total-request timeout: generation runs are unbounded by
        // contract. Connects still fail fast.
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.config.base_url, self.config.model, self.config.api_key
        )
    }

    fn build_request(&self, turns: &[Turn], snapshot: &[FileSnapshot]) -> WireRequest {
        let contents = turns
            .iter()
            .map(|turn| {
                let mut parts = Vec::new();
                if !turn.content.is_empty() {
                    parts.push(WirePart::Text {
                        text: turn.content.clone(),
                    });
                }
                if let Some(inline) = turn.image_data.as_deref().and_then(split_data_url) {
                    parts.push(WirePart::Inline { inline_data: inline });
                }
                WireMessage {
                    role: match turn.role {
                        TurnRole::User => "user",
                        TurnRole::Assistant => "model",
                    },
                    parts,
                }
            })
            .collect();

        WireRequest {
            contents,
            system_instruction: WireInstruction {
                parts: vec![WirePart::Text {
                    text: prompt::system_instruction(snapshot),
                }],
            },
            generation_config: WireGenerationConfig {
                temperature: 0.7,
                top_p: 0.95,
                top_k: 40,
                max_output_tokens: 65536,
            },
        }
    }
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    async fn generate(
        &self,
        turns: &[Turn],
        snapshot: &[FileSnapshot],
    ) -> Result<GenerationReply, HostError> {
        if self.config.api_key.is_empty() {
            return Err(HostError::ExternalService(
                "GEMINI_API_KEY is not configured".to_string(),
            ));
        }

        let request = self.build_request(turns, snapshot);
        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| HostError::ExternalService(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "generation service rejected request");
            return Err(HostError::ExternalService(format!(
                "service returned {status}: {body}"
            )));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| HostError::ExternalService(format!("unreadable response: {e}")))?;

        if let Some(err) = wire.error {
            return Err(HostError::ExternalService(err.message));
        }
        let Some(candidate) = wire.candidates.into_iter().next() else {
            return Err(HostError::ExternalService(
                "response carried no candidates".to_string(),
            ));
        };

        let text: String = candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect();
        debug!(chars = text.len(), "generation service replied");
        parse_reply(&text)
    }
}

/// Split a `data:<mime>;base64,<payload>` URL into its inline-data parts.
fn split_data_url(data_url: &str) -> Option<WireInlineData> {
    let rest = data_url.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    if mime.is_empty() || payload.is_empty() {
        return None;
    }
    Some(WireInlineData {
        mime_type: mime.to_string(),
        data: payload.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_splits_into_mime_and_payload() {
        let inline = split_data_url("data:image/png;base64,iVBORw0KGgo=").unwrap();
        assert_eq!(inline.mime_type, "image/png");
        assert_eq!(inline.data, "iVBORw0KGgo=");
    }

    #[test]
    fn malformed_data_url_is_ignored() {
        assert!(split_data_url("not-a-data-url").is_none());
        assert!(split_data_url("data:image/png;base64,").is_none());
    }

    #[test]
    fn request_maps_assistant_turns_to_model_role() {
        let client = GeminiClient::new(GeneratorConfig::default());
        let turns = vec![
            Turn {
                role: TurnRole::User,
                content: "make a blog".into(),
                image_data: None,
            },
            Turn {
                role: TurnRole::Assistant,
                content: "done".into(),
                image_data: None,
            },
        ];
        let req = client.build_request(&turns, &[]);
        assert_eq!(req.contents[0].role, "user");
        assert_eq!(req.contents[1].role, "model");
    }
}
