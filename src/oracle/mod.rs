//! Decision oracle - the external AI policy behind an async seam
//!
//! The oracle is untrusted text generation: it may be slow, fail outright,
//! or answer with prose around a JSON payload. Nothing it returns touches
//! game state without passing through the normalizer or the merge guard.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::OracleConfig;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("oracle returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("oracle response carried no choices")]
    EmptyResponse,
    #[error("oracle is not available")]
    Unavailable,
}

/// Prompt payload handed to the oracle.
#[derive(Debug, Clone)]
pub struct OraclePrompt {
    pub system: String,
    pub user: String,
}

/// Black-box decision source for the AI side.
///
/// No contract on latency, determinism, or well-formedness of the returned
/// text; callers impose their own timeout and treat it like malformed output.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn propose(&self, prompt: &OraclePrompt) -> Result<String, OracleError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Chat-completions client for an OpenAI-compatible endpoint.
pub struct HttpOracle {
    client: reqwest::Client,
    config: OracleConfig,
}

impl HttpOracle {
    pub fn new(config: OracleConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl DecisionOracle for HttpOracle {
    async fn propose(&self, prompt: &OraclePrompt) -> Result<String, OracleError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status { status, body });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(OracleError::EmptyResponse)
    }
}

/// Test double that replays canned responses in order.
///
/// `None` entries simulate an oracle outage. Once the script runs out every
/// further call fails, which is what a dead endpoint looks like.
pub struct ScriptedOracle {
    responses: Mutex<VecDeque<Option<String>>>,
}

impl ScriptedOracle {
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| Some(s.into())).collect()),
        }
    }

    /// An oracle that always fails.
    pub fn failing() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn propose(&self, _prompt: &OraclePrompt) -> Result<String, OracleError> {
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        match responses.pop_front() {
            Some(Some(text)) => Ok(text),
            _ => Err(OracleError::Unavailable),
        }
    }
}

/// Locate the JSON object inside raw oracle output.
///
/// Prefers a ```json fenced block, then falls back to the first balanced
/// `{...}` span anywhere in the text. Returns `None` when no balanced object
/// exists; callers fall through to the deterministic policy.
pub fn extract_json(raw: &str) -> Option<String> {
    if let Some(fenced) = fenced_block(raw) {
        if let Some(span) = balanced_object(fenced) {
            return Some(span.to_string());
        }
    }
    balanced_object(raw).map(str::to_string)
}

fn fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```json")? + "```json".len();
    let rest = &raw[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}

// Scans from the first '{' tracking brace depth, skipping braces inside
// string literals and escape sequences.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json_first() {
        let raw = "thinking...\n```json\n{\"actions\": []}\n```\nand {\"other\": 1}";
        let json = extract_json(raw).unwrap();
        assert_eq!(json, "{\"actions\": []}");
    }

    #[test]
    fn falls_back_to_first_balanced_object() {
        let raw = "The plan: {\"actions\": [{\"type\": \"endTurn\"}]} done";
        let json = extract_json(raw).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["actions"][0]["type"], "endTurn");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let raw = r#"{"reasoning": "expand {aggressively}", "actions": []}"#;
        let json = extract_json(raw).unwrap();
        assert_eq!(json, raw);
    }

    #[test]
    fn plain_prose_yields_none() {
        assert!(extract_json("I surrender").is_none());
        assert!(extract_json("unbalanced { brace").is_none());
    }

    #[tokio::test]
    async fn scripted_oracle_replays_then_fails() {
        let oracle = ScriptedOracle::with_responses(["one"]);
        let prompt = OraclePrompt {
            system: String::new(),
            user: String::new(),
        };
        assert_eq!(oracle.propose(&prompt).await.unwrap(), "one");
        assert!(oracle.propose(&prompt).await.is_err());
    }
}
