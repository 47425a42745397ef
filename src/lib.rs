pub mod aggregate;
pub mod api;
pub mod config;
pub mod connectors;
pub mod routing;
pub mod store;
pub mod sync;
pub mod types;
