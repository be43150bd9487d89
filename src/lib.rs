pub mod api_models;
pub mod evaluation;
pub mod logging;
pub mod models;
pub mod poller_modules;
pub mod server;
pub mod version;
pub mod web;
