//! Generation gateway: alias resolution, provider dispatch and degraded
//! fallbacks for the structured helpers.
//!
//! Nothing in here returns an error to the caller. Every upstream failure is
//! folded into [`Generation::Degraded`] or a `degraded: true` structured
//! result, so callers can always tell a real answer from a fallback.

use crate::config::GatewayConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

pub mod providers;
#[cfg(test)]
pub(crate) mod testing;

use providers::{CompletionProvider, GeminiProvider, OpenRouterProvider, ProviderError, ProviderKind};

/// Alias used when the caller does not name one or names an unknown one.
pub const DEFAULT_ALIAS: &str = "fast";

/// Where an alias is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRoute {
    pub provider: ProviderKind,
    pub model: &'static str,
}

const MODEL_ALIASES: [(&str, ModelRoute); 10] = [
    ("fast", GEMINI_FLASH),
    ("gemini-flash", GEMINI_FLASH),
    ("quality", GEMINI_PRO),
    ("gemini-pro", GEMINI_PRO),
    ("open-llama", OPEN_LLAMA),
    ("llama-3-free", OPEN_LLAMA),
    ("open-mistral", OPEN_MISTRAL),
    ("mistral-free", OPEN_MISTRAL),
    ("open-gemma", OPEN_GEMMA),
    ("google-gemma-free", OPEN_GEMMA),
];

const GEMINI_FLASH: ModelRoute = ModelRoute {
    provider: ProviderKind::Gemini,
    model: "gemini-1.5-flash",
};
const GEMINI_PRO: ModelRoute = ModelRoute {
    provider: ProviderKind::Gemini,
    model: "gemini-1.5-pro",
};
const OPEN_LLAMA: ModelRoute = ModelRoute {
    provider: ProviderKind::OpenRouter,
    model: "meta-llama/llama-3-8b-instruct:free",
};
const OPEN_MISTRAL: ModelRoute = ModelRoute {
    provider: ProviderKind::OpenRouter,
    model: "mistralai/mistral-7b-instruct:free",
};
const OPEN_GEMMA: ModelRoute = ModelRoute {
    provider: ProviderKind::OpenRouter,
    model: "google/gemma-7b-it:free",
};

/// Resolve a model alias, falling back to [`DEFAULT_ALIAS`].
pub fn resolve_alias(alias: &str) -> ModelRoute {
    let wanted = alias.trim().to_ascii_lowercase();
    MODEL_ALIASES
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, route)| *route)
        .unwrap_or(GEMINI_FLASH)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    NotConfigured,
    UpstreamFailed,
}

/// Outcome of a free-form generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Generation {
    Generated {
        text: String,
        model: String,
        provider: ProviderKind,
    },
    Degraded {
        reason: DegradeReason,
        message: String,
    },
}

/// A structured helper result; `degraded` marks the fixed fallback value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Structured<T> {
    pub result: T,
    pub degraded: bool,
}

impl<T> Structured<T> {
    fn real(result: T) -> Self {
        Self {
            result,
            degraded: false,
        }
    }

    fn fallback(result: T) -> Self {
        Self {
            result,
            degraded: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Safe,
    Unsafe,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Safe => "safe",
            Verdict::Unsafe => "unsafe",
        }
    }
}

/// Models answer with any casing, so the verdict is matched as text.
#[derive(Deserialize)]
struct VerdictAnswer {
    verdict: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uniqueness {
    pub unique: bool,
    #[serde(default)]
    pub reason: String,
}

#[derive(Clone)]
pub struct GenerationGateway {
    gemini: Arc<dyn CompletionProvider>,
    openrouter: Arc<dyn CompletionProvider>,
}

impl GenerationGateway {
    pub fn new(
        gemini: Arc<dyn CompletionProvider>,
        openrouter: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self { gemini, openrouter }
    }

    /// Build both HTTP providers over one client with a bounded timeout.
    pub fn from_config(cfg: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building upstream HTTP client")?;
        let gemini = GeminiProvider::new(
            client.clone(),
            cfg.gemini_base_url.clone(),
            cfg.gemini_api_key.clone(),
        );
        let openrouter = OpenRouterProvider::new(
            client,
            cfg.openrouter_base_url.clone(),
            cfg.openrouter_api_key.clone(),
        );
        Ok(Self::new(Arc::new(gemini), Arc::new(openrouter)))
    }

    fn provider(&self, kind: ProviderKind) -> &Arc<dyn CompletionProvider> {
        match kind {
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::OpenRouter => &self.openrouter,
        }
    }

    /// `(provider, configured)` pairs for readiness reporting.
    pub fn provider_status(&self) -> [(ProviderKind, bool); 2] {
        [
            (ProviderKind::Gemini, self.gemini.is_configured()),
            (ProviderKind::OpenRouter, self.openrouter.is_configured()),
        ]
    }

    /// Send `prompt` to the model behind `alias`.
    pub async fn generate(&self, prompt: &str, alias: &str, identity: &str) -> Generation {
        let route = resolve_alias(alias);
        let provider = self.provider(route.provider);

        match provider.complete(route.model, prompt).await {
            Ok(text) => {
                debug!(%identity, provider = %provider.kind(), model = route.model, "generation succeeded");
                Generation::Generated {
                    text,
                    model: route.model.to_string(),
                    provider: route.provider,
                }
            }
            Err(err @ ProviderError::NotConfigured(_)) => Generation::Degraded {
                reason: DegradeReason::NotConfigured,
                message: err.to_string(),
            },
            Err(err) => {
                warn!(%identity, model = route.model, error = %err, "upstream generation failed");
                Generation::Degraded {
                    reason: DegradeReason::UpstreamFailed,
                    message: err.to_string(),
                }
            }
        }
    }

    /// Ask for a JSON answer and decode it, or `None` on any failure.
    async fn ask_json<T: DeserializeOwned>(&self, prompt: &str, identity: &str) -> Option<T> {
        let Generation::Generated { text, .. } = self.generate(prompt, DEFAULT_ALIAS, identity).await
        else {
            return None;
        };
        match serde_json::from_str(extract_json(&text)) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%identity, error = %err, "structured answer did not parse");
                None
            }
        }
    }

    /// Suggest a title and two-sentence description for a video topic.
    pub async fn suggest_content(&self, topic: &str, identity: &str) -> Structured<Suggestion> {
        let prompt = format!(
            "Suggest a catchy video title and a 2-sentence description for a video about: {topic}. \
             Return ONLY raw JSON with 'title' and 'description' keys."
        );
        match self.ask_json::<Suggestion>(&prompt, identity).await {
            Some(suggestion) => Structured::real(suggestion),
            None => Structured::fallback(Suggestion {
                title: format!("Exploring {topic}"),
                description: format!("A deep dive into {topic}."),
            }),
        }
    }

    /// Classify an upload. An unreadable answer counts as `safe`.
    pub async fn moderate(&self, title: &str, description: &str) -> Structured<Verdict> {
        let prompt = format!(
            "Moderation request. Title: {title}. Description: {description}. \
             Does this violate policies against nudity, hate speech, or extreme violence? \
             Return ONLY raw JSON of the form {{\"verdict\": \"safe\"}} or {{\"verdict\": \"unsafe\"}}."
        );
        let Generation::Generated { text, .. } =
            self.generate(&prompt, DEFAULT_ALIAS, "system:moderation").await
        else {
            return Structured::fallback(Verdict::Safe);
        };

        let body = extract_json(&text);
        let answer = serde_json::from_str::<VerdictAnswer>(body)
            .map(|a| a.verdict)
            .unwrap_or_else(|_| body.to_string())
            .to_lowercase();
        // "unsafe" contains "safe", so it must be checked first.
        if answer.contains("unsafe") {
            Structured::real(Verdict::Unsafe)
        } else if answer.contains("safe") {
            Structured::real(Verdict::Safe)
        } else {
            warn!("moderation answer unreadable, defaulting to safe");
            Structured::fallback(Verdict::Safe)
        }
    }

    /// Ask whether a title/description pair reads as original content.
    pub async fn check_uniqueness(
        &self,
        title: &str,
        description: &str,
        identity: &str,
    ) -> Structured<Uniqueness> {
        let prompt = format!(
            "Is the following video concept original rather than a copy of widely known content? \
             Title: {title}. Description: {description}. \
             Return ONLY raw JSON with 'unique' (boolean) and 'reason' (short string) keys."
        );
        match self.ask_json::<Uniqueness>(&prompt, identity).await {
            Some(answer) => Structured::real(answer),
            None => Structured::fallback(Uniqueness {
                unique: true,
                reason: "uniqueness check unavailable".into(),
            }),
        }
    }
}

/// Strip markdown code fences and any prose around the outermost JSON object.
fn extract_json(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the fence line, including an optional language tag.
        text = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}
