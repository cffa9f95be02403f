//! Daily per-identity budget in front of the generation gateway.
//!
//! The budget is keyed by `(identity, UTC day)`, so "reset" is just a new key
//! starting at zero. Consumption is a single upsert in the store; there is no
//! application-level locking.

use crate::services::store::{Store, StoreResult};
use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use std::{collections::HashSet, sync::Arc};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerClass {
    /// Exempt and untracked.
    Admin,
    /// No identity supplied; keyed by network origin.
    Guest,
    Member,
    Premium,
}

/// Resolved identity of whoever is asking for a generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub identity: String,
    pub class: CallerClass,
}

#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    pub admin_identities: HashSet<String>,
    pub premium_identities: HashSet<String>,
    pub guest_limit: u32,
    pub member_limit: u32,
    pub premium_limit: u32,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            admin_identities: HashSet::new(),
            premium_identities: HashSet::new(),
            guest_limit: 3,
            member_limit: 15,
            premium_limit: 50,
        }
    }
}

impl QuotaPolicy {
    pub fn is_admin(&self, identity: &str) -> bool {
        self.admin_identities.contains(identity)
    }

    /// Classify a request. A blank identity falls back to the guest key
    /// derived from `origin`.
    pub fn classify(&self, identity: Option<&str>, origin: &str) -> Caller {
        match identity.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) if self.is_admin(id) => Caller {
                identity: id.to_string(),
                class: CallerClass::Admin,
            },
            Some(id) if self.premium_identities.contains(id) => Caller {
                identity: id.to_string(),
                class: CallerClass::Premium,
            },
            Some(id) => Caller {
                identity: id.to_string(),
                class: CallerClass::Member,
            },
            None => {
                let origin = origin.trim();
                let origin = if origin.is_empty() { "unknown" } else { origin };
                Caller {
                    identity: format!("guest:{origin}"),
                    class: CallerClass::Guest,
                }
            }
        }
    }

    /// Daily limit for a class; `None` means unlimited.
    pub fn limit_for(&self, class: CallerClass) -> Option<u32> {
        match class {
            CallerClass::Admin => None,
            CallerClass::Guest => Some(self.guest_limit),
            CallerClass::Member => Some(self.member_limit),
            CallerClass::Premium => Some(self.premium_limit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Exempt,
    Allowed { used: i64, limit: u32 },
    /// Admitted without accounting because the store could not be reached.
    FailOpen { limit: u32 },
    Exceeded { limit: u32 },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub identity: String,
    pub class: CallerClass,
    pub day: NaiveDate,
    pub used: i64,
    pub limit: Option<u32>,
    pub remaining: Option<i64>,
}

#[derive(Clone)]
pub struct QuotaService {
    store: Arc<dyn Store>,
    policy: Arc<QuotaPolicy>,
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

impl QuotaService {
    pub fn new(store: Arc<dyn Store>, policy: QuotaPolicy) -> Self {
        Self {
            store,
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Take one unit of `identity`'s budget for `day` if fewer than
    /// `daily_limit` have been used. Store failures admit the request.
    pub async fn consume(&self, identity: &str, daily_limit: u32, day: NaiveDate) -> QuotaDecision {
        match self
            .store
            .consume_quota(identity, day, i64::from(daily_limit))
            .await
        {
            Ok(Some(used)) => QuotaDecision::Allowed {
                used,
                limit: daily_limit,
            },
            Ok(None) => QuotaDecision::Exceeded { limit: daily_limit },
            Err(err) => {
                warn!(%identity, error = %err, "quota store unavailable, admitting request");
                QuotaDecision::FailOpen { limit: daily_limit }
            }
        }
    }

    pub async fn check_and_consume(&self, caller: &Caller) -> QuotaDecision {
        self.check_and_consume_on(caller, today()).await
    }

    pub async fn check_and_consume_on(&self, caller: &Caller, day: NaiveDate) -> QuotaDecision {
        match self.policy.limit_for(caller.class) {
            None => QuotaDecision::Exempt,
            Some(limit) => self.consume(&caller.identity, limit, day).await,
        }
    }

    pub async fn status(&self, caller: &Caller) -> StoreResult<QuotaStatus> {
        let day = today();
        let limit = self.policy.limit_for(caller.class);
        let used = match limit {
            None => 0,
            Some(_) => self
                .store
                .quota_usage(&caller.identity, day)
                .await?
                .map(|q| q.count)
                .unwrap_or(0),
        };
        Ok(QuotaStatus {
            identity: caller.identity.clone(),
            class: caller.class,
            day,
            used,
            limit,
            remaining: limit.map(|l| (i64::from(l) - used).max(0)),
        })
    }

    /// Delete quota rows older than `retention_days` before today.
    pub async fn prune(&self, retention_days: u32) -> StoreResult<u64> {
        let cutoff = today()
            .checked_sub_days(Days::new(u64::from(retention_days)))
            .unwrap_or(NaiveDate::MIN);
        self.store.prune_quotas(cutoff).await
    }
}
