//! Build version shared by both binaries and the poller's outbound requests.

/// `POLLERFLEET_VERSION` at build time, else the crate version.
pub const VERSION: &str = match option_env!("POLLERFLEET_VERSION") {
    Some(version) if !version.is_empty() => version,
    _ => env!("CARGO_PKG_VERSION"),
};

/// User agent the poller sends to the coordinator and to HTTP check targets.
pub fn user_agent() -> String {
    format!("pollerfleet-poller/{VERSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(user_agent(), format!("pollerfleet-poller/{VERSION}"));
    }
}
