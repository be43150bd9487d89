pub mod communication;
pub mod config;
pub mod dns_cache;
pub mod executor;
pub mod scheduler;
pub mod shared_cache;
