use crate::services::{quota_service::QuotaPolicy, rules::RuleBook};
use anyhow::{Context, Result};
use clap::Parser;
use std::{collections::HashSet, env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    /// Whole-request timeout applied by the router.
    pub request_timeout_secs: u64,
    /// How many days of quota rows to keep.
    pub quota_retention_days: u32,
    pub admin_identities: HashSet<String>,
    pub premium_identities: HashSet<String>,
    pub guest_daily_limit: u32,
    pub member_daily_limit: u32,
    pub premium_daily_limit: u32,
    /// Extra prohibited terms; empty means the built-in list.
    pub prohibited_terms: Vec<String>,
    /// Only enable behind a proxy that rewrites `X-Forwarded-For`.
    pub trust_forwarded_for: bool,
    pub gateway: GatewayConfig,
}

/// Upstream provider settings.
#[derive(Clone)]
pub struct GatewayConfig {
    pub gemini_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub gemini_base_url: String,
    pub openrouter_base_url: String,
    pub timeout_secs: u64,
}

// Keys stay out of the startup log line.
impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<set>"))
            .field(
                "openrouter_api_key",
                &self.openrouter_api_key.as_ref().map(|_| "<set>"),
            )
            .field("gemini_base_url", &self.gemini_base_url)
            .field("openrouter_base_url", &self.openrouter_base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// What to do after configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    /// Apply migrations and exit.
    Migrate,
    /// Prune old quota rows and exit.
    PruneQuotas,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Engagement ledger and budgeted generation gateway")]
pub struct Args {
    /// Host to bind to (overrides HUB_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides HUB_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL, sqlite:// or postgres:// (overrides HUB_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Comma-separated admin identities (overrides HUB_ADMIN_IDENTITIES)
    #[arg(long)]
    pub admin_identities: Option<String>,

    /// Daily generation limit for signed-in identities (overrides HUB_MEMBER_DAILY_LIMIT)
    #[arg(long)]
    pub member_daily_limit: Option<u32>,

    /// Upstream request timeout in seconds (overrides HUB_UPSTREAM_TIMEOUT_SECS)
    #[arg(long)]
    pub upstream_timeout_secs: Option<u64>,

    /// Key guest quotas on X-Forwarded-For (overrides HUB_TRUST_FORWARDED_FOR)
    #[arg(long)]
    pub trust_forwarded_for: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Delete quota rows older than the retention window and exit
    #[arg(long, conflicts_with = "migrate")]
    pub prune_quotas: bool,
}

/// Parse an optional env var, falling back to `default` when unset.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("HUB_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("HUB_PORT", 3000u16)?;
        let env_db = env::var("HUB_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/engagement_hub.db".into());
        let env_admins = env::var("HUB_ADMIN_IDENTITIES").unwrap_or_default();
        let env_member_limit = env_parse("HUB_MEMBER_DAILY_LIMIT", 15u32)?;
        let env_upstream_timeout = env_parse("HUB_UPSTREAM_TIMEOUT_SECS", 30u64)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            max_connections: env_parse("HUB_MAX_CONNECTIONS", 5u32)?,
            request_timeout_secs: env_parse("HUB_REQUEST_TIMEOUT_SECS", 60u64)?,
            quota_retention_days: env_parse("HUB_QUOTA_RETENTION_DAYS", 30u32)?,
            admin_identities: parse_list(&args.admin_identities.unwrap_or(env_admins))
                .into_iter()
                .collect(),
            premium_identities: parse_list(
                &env::var("HUB_PREMIUM_IDENTITIES").unwrap_or_default(),
            )
            .into_iter()
            .collect(),
            guest_daily_limit: env_parse("HUB_GUEST_DAILY_LIMIT", 3u32)?,
            member_daily_limit: args.member_daily_limit.unwrap_or(env_member_limit),
            premium_daily_limit: env_parse("HUB_PREMIUM_DAILY_LIMIT", 50u32)?,
            prohibited_terms: parse_list(&env::var("HUB_PROHIBITED_TERMS").unwrap_or_default()),
            trust_forwarded_for: args.trust_forwarded_for
                || env_parse("HUB_TRUST_FORWARDED_FOR", false)?,
            gateway: GatewayConfig {
                gemini_api_key: env_opt("GOOGLE_API_KEY"),
                openrouter_api_key: env_opt("OPENROUTER_API_KEY"),
                gemini_base_url: env_opt("HUB_GEMINI_BASE_URL").unwrap_or_else(|| {
                    "https://generativelanguage.googleapis.com/v1beta/models".into()
                }),
                openrouter_base_url: env_opt("HUB_OPENROUTER_BASE_URL")
                    .unwrap_or_else(|| "https://openrouter.ai/api/v1".into()),
                timeout_secs: args.upstream_timeout_secs.unwrap_or(env_upstream_timeout),
            },
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.prune_quotas {
            RunMode::PruneQuotas
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn quota_policy(&self) -> QuotaPolicy {
        QuotaPolicy {
            admin_identities: self.admin_identities.clone(),
            premium_identities: self.premium_identities.clone(),
            guest_limit: self.guest_daily_limit,
            member_limit: self.member_daily_limit,
            premium_limit: self.premium_daily_limit,
        }
    }

    pub fn rule_book(&self) -> RuleBook {
        if self.prohibited_terms.is_empty() {
            RuleBook::default()
        } else {
            RuleBook::new(self.prohibited_terms.iter().cloned())
        }
    }
}
