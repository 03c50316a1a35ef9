pub mod discovery_handlers;
pub mod health_handlers;
