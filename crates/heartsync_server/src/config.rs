//! Server configuration.

/// Configuration for the in-memory remote store.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of change-log entries returned per page.
    pub page_size: usize,
    /// Maximum number of saves plus deletes accepted in one modify call.
    pub operation_limit: usize,
}

impl ServerConfig {
    /// Default page size for change fetches.
    pub const DEFAULT_PAGE_SIZE: usize = 200;
    /// Default operation ceiling for modify calls.
    pub const DEFAULT_OPERATION_LIMIT: usize = 400;

    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            page_size: Self::DEFAULT_PAGE_SIZE,
            operation_limit: Self::DEFAULT_OPERATION_LIMIT,
        }
    }

    /// Sets the change fetch page size. Values below 1 are raised to 1.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Sets the modify operation ceiling.
    pub fn with_operation_limit(mut self, limit: usize) -> Self {
        self.operation_limit = limit;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.page_size, 200);
        assert_eq!(config.operation_limit, 400);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_page_size(0)
            .with_operation_limit(10);
        assert_eq!(config.page_size, 1);
        assert_eq!(config.operation_limit, 10);
    }
}
