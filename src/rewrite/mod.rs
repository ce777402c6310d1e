//! Rewrite invoker: the seam to the external text-rewriting service.
//! The service decides which words to replace; this module owns the
//! contract around it — dedup, literal application, usage accounting,
//! caching, and the silent degrade that keeps service failures away from
//! the DOM layer.

pub mod cache;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::store::{Proficiency, SettingsStore, TokenStats, TokenUsage};
use cache::RewriteCache;

pub use openai::OpenAiRewriter;

/// One (original, replacement) pair returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub original: String,
    pub replacement: String,
}

/// A single rewrite call. Settings-derived fields are snapshotted at
/// dispatch so a mid-flight settings change can't tear a request.
#[derive(Debug, Clone)]
pub struct RewriteRequest {
    pub request_id: String,
    pub text: String,
    pub api_key: String,
    pub target_language: String,
    pub proficiency: Proficiency,
    pub density_percent: u8,
}

/// Raw service response: substitutions plus whatever usage it reported.
#[derive(Debug, Clone, Default)]
pub struct RewriteResponse {
    pub replacements: Vec<Substitution>,
    pub usage: Option<TokenUsage>,
}

/// What the pipeline consumes: the rewritten text and the (deduplicated)
/// substitutions that produced it. Never an error.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub text: String,
    pub replacements: Vec<Substitution>,
    pub cached: bool,
}

impl RewriteOutcome {
    /// Degrade path: original text, nothing replaced.
    pub fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            replacements: Vec::new(),
            cached: false,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.replacements.is_empty()
    }
}

#[derive(Debug)]
pub enum RewriteError {
    Api(String),
    RateLimited { retry_after_ms: u64 },
    Timeout,
    MalformedResponse(String),
}

impl std::fmt::Display for RewriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RewriteError::Api(msg) => write!(f, "API error: {msg}"),
            RewriteError::RateLimited { retry_after_ms } => {
                write!(f, "rate limited, retry after {retry_after_ms}ms")
            }
            RewriteError::Timeout => write!(f, "rewrite timeout"),
            RewriteError::MalformedResponse(msg) => write!(f, "malformed response: {msg}"),
        }
    }
}

/// Rewriter backend (adapter for different services).
#[async_trait]
pub trait Rewriter: Send + Sync {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<RewriteResponse, RewriteError>;
}

/// Upward-flowing notifications from the pipeline.
#[derive(Debug, Clone)]
pub enum Telemetry {
    TokenStatsUpdated { stats: TokenStats },
}

/// Collapse duplicate `original` keys to the first occurrence. Applying
/// the same original twice would double-replace downstream.
pub fn dedup_substitutions(subs: Vec<Substitution>) -> Vec<Substitution> {
    let mut seen: Vec<&str> = Vec::new();
    let mut out = Vec::with_capacity(subs.len());
    for sub in &subs {
        if seen.iter().any(|s| *s == sub.original) {
            continue;
        }
        seen.push(&sub.original);
        out.push(sub.clone());
    }
    out
}

/// Apply substitutions by literal text replacement (every occurrence,
/// no pattern interpretation).
pub fn apply_substitutions(text: &str, subs: &[Substitution]) -> String {
    let mut result = text.to_string();
    for sub in subs {
        if sub.original.is_empty() {
            continue;
        }
        result = result.replace(&sub.original, &sub.replacement);
    }
    result
}

/// The full invoker: cache in front, backend behind, usage accounting and
/// silent degrade around it.
pub struct RewriteService {
    rewriter: Arc<dyn Rewriter>,
    cache: RewriteCache,
    store: Arc<dyn SettingsStore>,
    telemetry: Option<mpsc::UnboundedSender<Telemetry>>,
}

impl RewriteService {
    /// Cache sizing: 512 entries, 10 minute TTL.
    pub fn new(rewriter: Arc<dyn Rewriter>, store: Arc<dyn SettingsStore>) -> Self {
        Self {
            rewriter,
            cache: RewriteCache::new(512, Duration::from_secs(600)),
            store,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, tx: mpsc::UnboundedSender<Telemetry>) -> Self {
        self.telemetry = Some(tx);
        self
    }

    /// Rewrite one text under the current settings. Infallible by design:
    /// any service failure degrades to the unchanged text.
    pub async fn rewrite_text(&self, text: &str) -> RewriteOutcome {
        let settings = self.store.get_settings();
        let key = RewriteCache::compute_key(
            &settings.target_language,
            settings.proficiency,
            settings.density_percent,
            text,
        );
        if let Some(hit) = self.cache.get(&key) {
            debug!("rewrite cache hit");
            return hit;
        }

        let request = RewriteRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            text: text.to_string(),
            api_key: settings.api_key.clone(),
            target_language: settings.target_language.clone(),
            proficiency: settings.proficiency,
            density_percent: settings.density_percent,
        };

        match self.rewriter.rewrite(&request).await {
            Ok(response) => {
                if let Some(usage) = response.usage {
                    let stats = self.store.update_token_stats(&usage);
                    if let Some(tx) = &self.telemetry {
                        let _ = tx.send(Telemetry::TokenStatsUpdated { stats });
                    }
                }
                let replacements = dedup_substitutions(response.replacements);
                let rewritten = apply_substitutions(text, &replacements);
                self.cache
                    .insert(key, rewritten.clone(), replacements.clone());
                RewriteOutcome {
                    text: rewritten,
                    replacements,
                    cached: false,
                }
            }
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "rewrite failed, leaving text unchanged");
                RewriteOutcome::unchanged(text)
            }
        }
    }
}

/// Deterministic rewriter backed by a word map. Used by tests and the
/// demo binary instead of the network.
pub struct StubRewriter {
    word_map: Vec<(String, String)>,
}

impl StubRewriter {
    pub fn new<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            word_map: pairs
                .into_iter()
                .map(|(o, r)| (o.into(), r.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl Rewriter for StubRewriter {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<RewriteResponse, RewriteError> {
        let replacements: Vec<Substitution> = self
            .word_map
            .iter()
            .filter(|(original, _)| request.text.contains(original.as_str()))
            .map(|(original, replacement)| Substitution {
                original: original.clone(),
                replacement: replacement.clone(),
            })
            .collect();
        let prompt_tokens = request.text.split_whitespace().count() as u64;
        let completion_tokens = replacements.len() as u64;
        Ok(RewriteResponse {
            replacements,
            usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }
}
