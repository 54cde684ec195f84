//! Server configuration, built once at startup and shared as a frozen
//! `Arc<Config>` snapshot: every exchange samples the same values, so a
//! config change made mid-flight never affects an exchange already under
//! way.

use std::time::Duration;

/// Immutable, `Clone`-cheap (via `Arc` at the call sites that hold it)
/// configuration for one server instance.
#[derive(Debug, Clone)]
pub struct Config {
    pub max_request_head_size: usize,
    pub max_header_count: usize,
    pub max_response_trailers_size: usize,
    pub max_error_recovery_attempts: u32,
    pub implement_missing_options: bool,
    pub auto_continue_expect_100: bool,
    pub timeout_idle_connection: Duration,
    pub timeout_request_head: Duration,
    pub timeout_request_body: Duration,
    pub timeout_response: Duration,
    pub reject_clients_using_1_0: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_request_head_size: 8 * 1024,
            max_header_count: 100,
            max_response_trailers_size: 8 * 1024,
            max_error_recovery_attempts: 5,
            implement_missing_options: true,
            auto_continue_expect_100: false,
            timeout_idle_connection: Duration::from_secs(75),
            timeout_request_head: Duration::from_secs(10),
            timeout_request_body: Duration::from_secs(60),
            timeout_response: Duration::from_secs(60),
            reject_clients_using_1_0: false,
        }
    }
}

/// Fluent builder over [`Config`]; every setter takes `self` by value so
/// calls chain.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> ConfigBuilder {
        ConfigBuilder { config: Config::default() }
    }

    pub fn max_request_head_size(mut self, bytes: usize) -> Self {
        self.config.max_request_head_size = bytes;
        self
    }

    pub fn max_header_count(mut self, count: usize) -> Self {
        self.config.max_header_count = count;
        self
    }

    pub fn max_response_trailers_size(mut self, bytes: usize) -> Self {
        self.config.max_response_trailers_size = bytes;
        self
    }

    pub fn max_error_recovery_attempts(mut self, attempts: u32) -> Self {
        self.config.max_error_recovery_attempts = attempts;
        self
    }

    pub fn implement_missing_options(mut self, enabled: bool) -> Self {
        self.config.implement_missing_options = enabled;
        self
    }

    pub fn auto_continue_expect_100(mut self, enabled: bool) -> Self {
        self.config.auto_continue_expect_100 = enabled;
        self
    }

    pub fn timeout_idle_connection(mut self, d: Duration) -> Self {
        self.config.timeout_idle_connection = d;
        self
    }

    pub fn timeout_request_head(mut self, d: Duration) -> Self {
        self.config.timeout_request_head = d;
        self
    }

    pub fn timeout_request_body(mut self, d: Duration) -> Self {
        self.config.timeout_request_body = d;
        self
    }

    pub fn timeout_response(mut self, d: Duration) -> Self {
        self.config.timeout_response = d;
        self
    }

    pub fn reject_clients_using_1_0(mut self, reject: bool) -> Self {
        self.config.reject_clients_using_1_0 = reject;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.max_request_head_size, 8 * 1024);
        assert_eq!(config.max_error_recovery_attempts, 5);
        assert!(config.implement_missing_options);
        assert!(!config.auto_continue_expect_100);
        assert!(!config.reject_clients_using_1_0);
    }

    #[test]
    fn builder_overrides_chain() {
        let config = ConfigBuilder::new().max_request_head_size(1024).implement_missing_options(false).build();
        assert_eq!(config.max_request_head_size, 1024);
        assert!(!config.implement_missing_options);
        assert_eq!(config.max_error_recovery_attempts, 5);
    }
}
