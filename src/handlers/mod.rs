pub mod ai_handlers;
pub mod caller;
pub mod channel_handlers;
pub mod content_handlers;
pub mod health_handlers;
