//! Client configuration.

/// Configuration shared by every connection created from a
/// [`ClientContext`](crate::ClientContext).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Value of the `User-Agent` header when the caller has not set one.
    pub user_agent: String,

    /// Optional `ClientId` header injected into every request.
    pub client_id: Option<String>,

    /// How many automatic retries follow a non-client-initiated disconnect.
    pub max_retry_attempts: u32,

    /// Cap on a single inbound WebSocket frame payload.
    pub max_frame_payload: usize,

    /// Skip TLS certificate verification. Off by default; only enable
    /// against endpoints you control.
    pub danger_disable_tls_verification: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("webwire/", env!("CARGO_PKG_VERSION")).to_string(),
            client_id: None,
            max_retry_attempts: 1,
            max_frame_payload: 16 * 1024 * 1024,
            danger_disable_tls_verification: false,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default `User-Agent` header value.
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Inject a `ClientId` header into every request.
    #[must_use]
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Set the automatic retry budget after a disconnect.
    #[must_use]
    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Cap the accepted inbound frame payload size.
    #[must_use]
    pub fn max_frame_payload(mut self, limit: usize) -> Self {
        self.max_frame_payload = limit;
        self
    }

    /// Disable TLS certificate verification.
    #[must_use]
    pub fn danger_disable_tls_verification(mut self) -> Self {
        self.danger_disable_tls_verification = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.max_retry_attempts, 1);
        assert!(config.user_agent.starts_with("webwire/"));
        assert!(config.client_id.is_none());
        assert!(!config.danger_disable_tls_verification);
    }

    #[test]
    fn builder_chain() {
        let config = ClientConfig::new()
            .user_agent("probe/2.0")
            .client_id("unit-7")
            .max_retry_attempts(0)
            .max_frame_payload(4 * 1024)
            .danger_disable_tls_verification();
        assert_eq!(config.user_agent, "probe/2.0");
        assert_eq!(config.client_id.as_deref(), Some("unit-7"));
        assert_eq!(config.max_retry_attempts, 0);
        assert_eq!(config.max_frame_payload, 4 * 1024);
        assert!(config.danger_disable_tls_verification);
    }
}
