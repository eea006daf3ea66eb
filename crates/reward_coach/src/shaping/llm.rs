//! Model-backed objective extraction and the Ollama-style generate client.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::time::Duration;

use super::config::LlmConfig;
use super::extractor::{
    ExtractionContext, ExtractorFailure, ObjectiveCandidate, ObjectiveExtractor,
};

// ============================================================================
// Generate Client
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f64,
}

/// Synchronous text-generation boundary. The real backend is an HTTP
/// service; tests substitute a mock.
pub trait GenerateClient {
    fn generate(&self, request: &GenerateRequest) -> Result<String, GenerateError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    BuildClient { message: String },
    Http { message: String },
    HttpStatus { code: u16, message: String },
    DecodeResponse { message: String },
    EmptyResponse,
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::BuildClient { message } => {
                write!(f, "client build failed: {message}")
            }
            GenerateError::Http { message } => write!(f, "http request failed: {message}"),
            GenerateError::HttpStatus { code, message } => {
                write!(f, "http status {code}: {message}")
            }
            GenerateError::DecodeResponse { message } => {
                write!(f, "decode response failed: {message}")
            }
            GenerateError::EmptyResponse => write!(f, "empty generation response"),
        }
    }
}

impl Error for GenerateError {}

#[derive(Debug, Serialize)]
struct GeneratePayload<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Blocking client for a local Ollama-compatible `/api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaGenerateClient {
    base_url: String,
    client: Client,
}

impl OllamaGenerateClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, GenerateError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|err| GenerateError::BuildClient {
                message: err.to_string(),
            })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

impl GenerateClient for OllamaGenerateClient {
    fn generate(&self, request: &GenerateRequest) -> Result<String, GenerateError> {
        let url = format!("{}/api/generate", self.base_url);
        let payload = GeneratePayload {
            model: request.model.as_str(),
            prompt: request.prompt.as_str(),
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
            },
        };

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .map_err(|err| GenerateError::Http {
                message: err.to_string(),
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let message = response.text().unwrap_or_else(|_| "<no body>".to_string());
            return Err(GenerateError::HttpStatus {
                code: status.as_u16(),
                message,
            });
        }

        let response: GenerateResponse =
            response
                .json()
                .map_err(|err| GenerateError::DecodeResponse {
                    message: err.to_string(),
                })?;

        if response.response.trim().is_empty() {
            return Err(GenerateError::EmptyResponse);
        }
        Ok(response.response)
    }
}

// ============================================================================
// Reply Parsing
// ============================================================================

/// The JSON object the model is asked to emit. Missing fields fall back to
/// neutral values so a sloppy completion degrades instead of failing.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapingReply {
    pub multiplier: f64,
    pub reason: String,
    pub detected_objective: Option<String>,
}

impl Default for ShapingReply {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            reason: "parse error".to_string(),
            detected_objective: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ShapingReplyWire {
    #[serde(default)]
    multiplier: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    detected_objective: Option<serde_json::Value>,
}

/// Parse the model output: direct JSON first, then the outermost embedded
/// object, then the neutral default. Never fails.
pub fn parse_shaping_reply(raw: &str) -> ShapingReply {
    if let Some(reply) = try_parse(raw) {
        return reply;
    }
    if let Some(block) = extract_json_block(raw) {
        if let Some(reply) = try_parse(block) {
            return reply;
        }
    }
    ShapingReply::default()
}

fn try_parse(input: &str) -> Option<ShapingReply> {
    let wire: ShapingReplyWire = serde_json::from_str(input.trim()).ok()?;
    Some(ShapingReply {
        multiplier: wire.multiplier.unwrap_or(1.0),
        reason: wire.reason.unwrap_or_else(|| "unknown".to_string()),
        detected_objective: normalize_objective(wire.detected_objective),
    })
}

/// The model sometimes emits the literal strings "null"/"None" instead of a
/// JSON null; all of those mean "no objective".
fn normalize_objective(value: Option<serde_json::Value>) -> Option<String> {
    match value {
        Some(serde_json::Value::String(name)) => {
            let trimmed = name.trim();
            if trimmed.is_empty()
                || trimmed.eq_ignore_ascii_case("null")
                || trimmed.eq_ignore_ascii_case("none")
            {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    }
}

fn extract_json_block(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    raw.get(start..=end)
}

// ============================================================================
// LLM Extractor
// ============================================================================

/// Model-backed extractor. The model's multiplier suggestion is deliberately
/// ignored - the model only *extracts* an objective; measuring progress and
/// choosing the boost stays with the scorer and publisher.
#[derive(Debug)]
pub struct LlmExtractor<C: GenerateClient> {
    model: String,
    temperature: f64,
    client: C,
    last_raw_output: Option<String>,
}

impl LlmExtractor<OllamaGenerateClient> {
    pub fn from_config(config: &LlmConfig) -> Result<Self, GenerateError> {
        let client = OllamaGenerateClient::from_config(config)?;
        Ok(Self::new(config, client))
    }
}

impl<C: GenerateClient> LlmExtractor<C> {
    pub fn new(config: &LlmConfig, client: C) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            client,
            last_raw_output: None,
        }
    }

    /// Raw completion from the most recent cycle, for diagnostics.
    pub fn take_last_raw_output(&mut self) -> Option<String> {
        self.last_raw_output.take()
    }

    fn build_prompt(&self, ctx: &ExtractionContext<'_>) -> String {
        let summary = state_summary(ctx);
        format!(
            "You are a coach for a reinforcement-learning agent playing a story-driven \
game world. Extract the agent's current short-term objective from the state below.\n\
\n\
Current State:\n{summary}\n\
Rules:\n\
- NO DIALOGUE means NO NEW OBJECTIVE: with no dialogue text you must return \
detected_objective=\"null\". Objectives come from observed text, never from game \
state alone.\n\
- If an ACTIVE OBJECTIVE is shown, keep its exact name unless the dialogue gives a \
clearly different, specific direction (\"go to X\", \"find Y\", \"defeat Z\").\n\
- Related dialogue lines form one chain; a line continuing the chain keeps the \
same objective.\n\
- Never replace a specific active objective with a generic one such as \
\"explore_and_talk_to_npcs\".\n\
- Farewells (\"See you!\"), ambient text (posters, televisions) and system \
messages are not objectives: return detected_objective=\"null\".\n\
- If dialogue names or clearly relates to the next pending milestone, use the \
milestone name as the objective.\n\
\n\
Respond with ONLY a JSON object:\n\
{{\"multiplier\": 1.0, \"reason\": \"short explanation\", \
\"detected_objective\": \"MILESTONE_NAME or description or null\"}}"
        )
    }
}

/// Textual state summary embedded into the prompt.
fn state_summary(ctx: &ExtractionContext<'_>) -> String {
    let snapshot = ctx.snapshot;
    let mut lines = Vec::new();

    lines.push(format!("- Current step: {}", snapshot.step));
    lines.push(format!("- Stationary steps: {}", snapshot.stationary_steps));
    lines.push(format!(
        "- Milestones completed: {}",
        snapshot.milestone_count
    ));

    // Show the frontier of the milestone order: recent done, next pending.
    let names = ctx.milestones.names();
    if !names.is_empty() {
        let completed = snapshot.milestone_count as usize;
        let start = completed.saturating_sub(2);
        let end = (completed + 5).min(names.len());
        lines.push("- Milestone progress:".to_string());
        for (index, name) in names.iter().enumerate().take(end).skip(start) {
            let marker = if index < completed { "done" } else { "pending" };
            lines.push(format!("    [{marker}] {name}"));
        }
    }

    if let Some(active) = ctx.active_objective {
        lines.push(format!("- ACTIVE OBJECTIVE: '{}'", active.name));
        lines.push(format!(
            "    set {} steps ago, started at {}",
            active.age(snapshot.step),
            active.initial_map
        ));
        match ctx.known_goal {
            Some(goal) => lines.push(format!(
                "    known location: {} at ({}, {})",
                goal.map_id, goal.position.0, goal.position.1
            )),
            None => lines.push("    location unknown - must explore to find it".to_string()),
        }
    }

    lines.push(format!("- Location: {}", snapshot.map_id));
    lines.push(format!(
        "- Position: ({}, {})",
        snapshot.position.0, snapshot.position.1
    ));
    lines.push(format!(
        "- Badges: {} | In battle: {} | Party size: {}",
        snapshot.badge_count,
        snapshot.in_battle,
        snapshot.party.len()
    ));
    if !ctx.exploration_summary.is_empty() {
        lines.push(format!("- Exploration: {}", ctx.exploration_summary));
    }

    if !ctx.dialogue_window.is_empty() {
        lines.push("- Recent dialogue chain (oldest first):".to_string());
        for (index, text) in ctx.dialogue_window.iter().enumerate() {
            lines.push(format!("    {}. \"{}\"", index + 1, text));
        }
    }
    if snapshot.has_dialogue() {
        lines.push(format!("- Current dialogue: \"{}\"", snapshot.dialogue));
    } else {
        lines.push("- Current dialogue: (none detected)".to_string());
    }

    let mut summary = lines.join("\n");
    summary.push('\n');
    summary
}

impl<C: GenerateClient> ObjectiveExtractor for LlmExtractor<C> {
    fn propose(
        &mut self,
        ctx: &ExtractionContext<'_>,
    ) -> Result<ObjectiveCandidate, ExtractorFailure> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: self.build_prompt(ctx),
            temperature: self.temperature,
        };

        let raw = self.client.generate(&request).map_err(|err| {
            self.last_raw_output = None;
            ExtractorFailure {
                message: err.to_string(),
            }
        })?;

        let reply = parse_shaping_reply(&raw);
        self.last_raw_output = Some(raw);

        Ok(ObjectiveCandidate {
            name: reply.detected_objective,
            rationale: reply.reason,
            stall: None,
        })
    }
}
