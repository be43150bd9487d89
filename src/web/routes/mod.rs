pub mod admin_routes;
pub mod poller_routes;
