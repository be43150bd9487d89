pub mod admin_service;
pub mod assignments;
pub mod config;
pub mod poller_service;
pub mod poller_store;
pub mod token_service;
