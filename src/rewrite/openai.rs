//! OpenAI chat-completions rewrite backend.
//! Connection pooling via reqwest, simple minimum-interval rate limiting,
//! and a retry ladder for 429/5xx/timeout. The service is forced to answer
//! through a `replace_words_phrases` tool call; any response without that
//! shape is "no changes", not an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{RewriteError, RewriteRequest, RewriteResponse, Rewriter, Substitution};
use crate::store::TokenUsage;

pub struct OpenAiRewriter {
    http: reqwest::Client,
    base_url: String,
    /// Simple token-bucket: tracks the next allowed request time.
    next_allowed: Arc<tokio::sync::Mutex<Instant>>,
    /// Minimum interval between requests (e.g. 100ms = 10 req/s).
    min_interval: Duration,
}

impl OpenAiRewriter {
    /// Create a new client. The API key travels with each request (it is
    /// a user setting, not process environment).
    pub fn new() -> Result<Self, RewriteError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RewriteError::Api(e.to_string()))?;

        Ok(Self {
            http,
            base_url: "https://api.openai.com".into(),
            next_allowed: Arc::new(tokio::sync::Mutex::new(Instant::now())),
            min_interval: Duration::from_millis(100), // 10 req/s
        })
    }

    /// Point the client at a different endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Wait until the rate limiter allows a request.
    async fn rate_limit_wait(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    /// Send request with retry logic.
    /// 429: Retry-After or 1s/2s/4s (max 3).
    /// 5xx: exponential backoff (max 2).
    /// Timeout: immediate retry once.
    async fn send_with_retry(
        &self,
        body: &serde_json::Value,
        api_key: &str,
    ) -> Result<reqwest::Response, RewriteError> {
        let mut attempt: u32 = 0;
        let max_429_retries: u32 = 3;
        let max_5xx_retries: u32 = 2;
        let mut timeout_retried = false;

        loop {
            let result = self
                .http
                .post(format!("{}/v1/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {api_key}"))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(resp);
                }
                Ok(resp) if resp.status().as_u16() == 429 => {
                    if attempt >= max_429_retries {
                        return Err(RewriteError::RateLimited { retry_after_ms: 0 });
                    }
                    let wait = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| Duration::from_secs(1 << attempt));
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    if attempt >= max_5xx_retries {
                        return Err(RewriteError::Api(format!(
                            "server error: {}",
                            resp.status()
                        )));
                    }
                    let wait = Duration::from_millis(500 * (1 << attempt));
                    warn!(
                        attempt,
                        status = resp.status().as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "5xx error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(RewriteError::Api(format!(
                        "unexpected status {}: {}",
                        status,
                        body_text.chars().take(200).collect::<String>()
                    )));
                }
                Err(e) if e.is_timeout() => {
                    if timeout_retried {
                        return Err(RewriteError::Timeout);
                    }
                    warn!("request timeout, retrying once");
                    timeout_retried = true;
                }
                Err(e) => {
                    return Err(RewriteError::Api(e.to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl Rewriter for OpenAiRewriter {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<RewriteResponse, RewriteError> {
        self.rate_limit_wait().await;

        let body = build_request_body(request);
        let response = self.send_with_retry(&body, &request.api_key).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RewriteError::MalformedResponse(e.to_string()))?;

        let replacements = extract_replacements(&parsed);
        debug!(
            request_id = %request.request_id,
            replacements = replacements.len(),
            "rewrite response parsed"
        );

        Ok(RewriteResponse {
            replacements,
            usage: parsed.usage,
        })
    }
}

// --- Prompt and payload construction ---

fn build_system_prompt(request: &RewriteRequest) -> String {
    let lang = &request.target_language;
    let level = request.proficiency.as_str();
    format!(
        "You will be given a sentence. Your task is to act as a polyglot weaver. \
         This means that you will leave most of the text as it is and just replace \
         some words with the corresponding {lang} words. The target language is {lang}. \
         The target level of the {lang} words used is {level}. You should translate \
         {density}% of the incoming text with {lang} words so that the whole sentence \
         is still understandable in context. Select words corresponding to the {level} \
         level of {lang}. Be aware of the context the words are in to have them with \
         correct grammar. First translate the full sentence, then pick the words \
         according to the level and then call the function.",
        density = request.density_percent,
    )
}

fn build_request_body(request: &RewriteRequest) -> serde_json::Value {
    serde_json::json!({
        "model": "gpt-4o-mini",
        "messages": [
            {
                "role": "system",
                "content": [{ "type": "text", "text": build_system_prompt(request) }]
            },
            {
                "role": "user",
                "content": [{ "type": "text", "text": request.text }]
            }
        ],
        "response_format": { "type": "text" },
        "tools": [{
            "type": "function",
            "function": {
                "name": "replace_words_phrases",
                "description": format!(
                    "Replaces words or phrases of the user's text. Be aware of the context; \
                     replace only words at {} level of {}.",
                    request.proficiency, request.target_language
                ),
                "parameters": {
                    "type": "object",
                    "required": ["replacements"],
                    "properties": {
                        "replacements": {
                            "type": "array",
                            "description": "Original words/phrases and their replacements.",
                            "items": {
                                "type": "object",
                                "required": ["original", "replacement"],
                                "properties": {
                                    "original": { "type": "string" },
                                    "replacement": { "type": "string" }
                                },
                                "additionalProperties": false
                            }
                        }
                    },
                    "additionalProperties": false
                },
                "strict": true
            }
        }],
        "tool_choice": "required",
        "temperature": 1,
        "max_completion_tokens": 2048,
        "top_p": 1,
        "frequency_penalty": 0,
        "presence_penalty": 0
    })
}

/// Pull the substitution list out of the first tool call, if the response
/// carries one. Anything short of the expected shape yields an empty list.
fn extract_replacements(response: &ChatResponse) -> Vec<Substitution> {
    let Some(call) = response
        .choices
        .first()
        .and_then(|c| c.message.tool_calls.first())
    else {
        return Vec::new();
    };
    match serde_json::from_str::<ReplacementArgs>(&call.function.arguments) {
        Ok(args) => args.replacements,
        Err(e) => {
            warn!(error = %e, "tool-call arguments unparseable, treating as no changes");
            Vec::new()
        }
    }
}

// --- Response types ---

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    arguments: String,
}

#[derive(Deserialize)]
struct ReplacementArgs {
    #[serde(default)]
    replacements: Vec<Substitution>,
}
