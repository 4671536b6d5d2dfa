use std::time::Duration;

/// Service configuration
///
/// Built once per signed-in session and handed to [`Service`](super::Service).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URI of the backend service
    pub service_uri: String,

    /// Environment reported in every request envelope
    pub environment: String,

    /// Environment version reported in every request envelope
    pub environment_version: String,

    /// Transient services keep user/token on the instance instead of the
    /// credential store, so independent instances never share session state
    pub is_transient: bool,

    /// Bootstrap token consumed by the first `initialize` call
    pub bootstrap_token: Option<String>,

    /// Default sleep when a 429 response carries no usable Retry-After
    pub rate_limit_default_delay: Duration,

    /// Request timeout for the underlying HTTP client
    pub request_timeout: Option<Duration>,
}

impl ServiceConfig {
    /// Create a new configuration for the given service URI
    pub fn new(service_uri: &str) -> Self {
        Self {
            service_uri: service_uri.to_string(),
            environment: "Web".to_string(),
            environment_version: "3".to_string(),
            is_transient: false,
            bootstrap_token: None,
            rate_limit_default_delay: Duration::from_secs(5),
            request_timeout: None,
        }
    }

    /// Set the environment name
    pub fn environment(mut self, environment: &str) -> Self {
        self.environment = environment.to_string();
        self
    }

    /// Set the environment version
    pub fn environment_version(mut self, environment_version: &str) -> Self {
        self.environment_version = environment_version.to_string();
        self
    }

    /// Mark the service as transient
    pub fn transient(mut self) -> Self {
        self.is_transient = true;
        self
    }

    /// Provide a bootstrap token for the first sign-in
    pub fn bootstrap_token(mut self, token: &str) -> Self {
        self.bootstrap_token = Some(token.to_string());
        self
    }

    /// Set the request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// The full URL for a given service method
    pub(crate) fn create_uri(&self, method: &str) -> String {
        let mut uri = self.service_uri.clone();
        if !uri.is_empty() && !uri.ends_with('/') {
            uri.push('/');
        }
        uri + method
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_uri_joins_with_single_slash() {
        let config = ServiceConfig::new("https://backend.example.com");
        assert_eq!(
            config.create_uri("GetQuery"),
            "https://backend.example.com/GetQuery"
        );

        let config = ServiceConfig::new("https://backend.example.com/");
        assert_eq!(
            config.create_uri("GetQuery"),
            "https://backend.example.com/GetQuery"
        );
    }
}
