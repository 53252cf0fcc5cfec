pub mod auth;
pub mod bot;
pub mod config;
pub mod lookup;
pub mod scrub;
pub mod store;
pub mod telegram_log;
