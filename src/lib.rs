// Library exports for the binary and integration tests
pub mod analytics;
pub mod config;
pub mod error;
pub mod logging;
pub mod pagination;
pub mod post;
pub mod refresh_log;
pub mod scraper;
pub mod server;
pub mod service;
pub mod status;
pub mod store;
pub mod teams;
pub mod timefmt;
pub mod window;
