pub mod gateway;
pub mod ledger_service;
pub mod quota_service;
pub mod rules;
pub mod store;
