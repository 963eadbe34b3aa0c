pub mod config;
pub mod context;
pub mod host;
pub mod logging;
