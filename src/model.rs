use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::agent::{AgentError, Reasoner};
use crate::vision::image_to_data_uri;

const SYSTEM_PROMPT: &str = r#"You operate a Linux desktop through screenshots.
Reply with exactly one JSON object describing the next atomic action and nothing else.
Fields:
  "action": one of CLICK, DOUBLE_CLICK, RIGHT_CLICK, TYPE, PRESS, HOTKEY, SCROLL, WAIT, NOOP, DONE
  "x", "y": normalized screen position in [0,1] for CLICK, DOUBLE_CLICK, RIGHT_CLICK
  "text": string for TYPE
  "key": key name for PRESS (enter, tab, esc, backspace, delete, up, down, left, right, home, end, pageup, pagedown, space)
  "keys": list of key names for HOTKEY, e.g. ["ctrl", "l"]
  "direction": "up" or "down" for SCROLL
  "seconds": number for WAIT
  "why_short": a few words explaining the choice
Use DONE once the objective is achieved. Entries marked INVALID_COORDS in the history were rejected; fix them."#;

#[derive(Clone)]
pub struct VisionConfig {
    pub api_base: String, // e.g. "https://api.openai.com/v1" or a local server
    pub api_key: String,  // env OPENAI_API_KEY
    pub model: String,    // env PILOT_MODEL
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_base: env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            model: env::var("PILOT_MODEL").unwrap_or_else(|_| "gpt-4o".into()),
            temperature: 0.0,
            max_tokens: 300,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Chat-completions client for any OpenAI-compatible vision endpoint.
#[derive(Clone)]
pub struct VisionClient {
    http: Client,
    cfg: VisionConfig,
}

impl VisionClient {
    pub fn new(cfg: VisionConfig) -> Result<Self> {
        if cfg.api_key.is_empty() && cfg.api_base.contains("api.openai.com") {
            bail!("OPENAI_API_KEY missing");
        }
        let http = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, cfg })
    }

    pub async fn next_action(&self, objective: &str, frame_path: &Path, history: &[Value]) -> Result<Value> {
        let url = format!("{}/chat/completions", self.cfg.api_base.trim_end_matches('/'));
        let image_url = image_to_data_uri(frame_path).await?;
        let history_json = serde_json::to_string(history).context("failed to encode history")?;
        let req = json!({
            "model": self.cfg.model,
            "temperature": self.cfg.temperature,
            "max_tokens": self.cfg.max_tokens,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": [
                    { "type": "text", "text": format!("Objective: {objective}\nRecent actions: {history_json}") },
                    { "type": "image_url", "image_url": { "url": image_url } }
                ]}
            ]
        });

        let mut builder = self.http.post(url).json(&req);
        if !self.cfg.api_key.is_empty() {
            builder = builder.bearer_auth(&self.cfg.api_key);
        }
        let resp = builder.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            bail!("model endpoint error {}: {}", status, text);
        }
        let v: Value = serde_json::from_str(&text).context("failed to parse completion JSON")?;
        let content = v
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .context("completion has no message content")?;
        debug!(reply = %content, "model reply");
        Ok(Self::parse_reply(content))
    }

    /// Pulls the action object out of a free-form reply. Replies with no
    /// parseable object become a `NOOP` so the loop can ask again next step.
    fn parse_reply(content: &str) -> Value {
        let body = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        let parsed = match (body.find('{'), body.rfind('}')) {
            (Some(start), Some(end)) if start < end => serde_json::from_str::<Value>(&body[start..=end]).ok(),
            _ => None,
        };
        match parsed {
            Some(v @ Value::Object(_)) => v,
            _ => {
                warn!(reply = %content, "model reply is not a JSON object");
                json!({ "action": "NOOP", "why_short": "unparseable model reply" })
            }
        }
    }
}

#[async_trait]
impl Reasoner for VisionClient {
    async fn decide(
        &self,
        objective: &str,
        frame_path: &Path,
        history: &[Value],
    ) -> Result<Value, AgentError> {
        self.next_action(objective, frame_path, history)
            .await
            .map_err(|e| AgentError::Reasoner(format!("{:#}", e)))
    }
}
