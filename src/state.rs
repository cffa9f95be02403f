//! Shared state handed to every handler.

use crate::services::{
    gateway::GenerationGateway, ledger_service::LedgerService, quota_service::QuotaService,
};

/// Built once in `main`; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub ledger: LedgerService,
    pub quota: QuotaService,
    pub gateway: GenerationGateway,
    /// Key guests on the first `X-Forwarded-For` hop instead of the peer address.
    pub trust_forwarded_for: bool,
}
