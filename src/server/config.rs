use std::time::Duration;

/// Server configuration.
///
/// All values except `worker_pool_size` are re-read once per exchange, so a
/// live update through [`crate::Server::set_config`] applies from the next
/// exchange on. The pool size only matters at the first server start in
/// the process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub(crate) max_request_head_size: usize,
    pub(crate) max_error_recovery_attempts: u32,
    pub(crate) worker_pool_size: usize,
    pub(crate) reject_http_1_0: bool,
    pub(crate) head_timeout: Duration,
    pub(crate) body_timeout: Duration,
    pub(crate) response_timeout: Duration,
    pub(crate) ignore_rejected_interim: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_request_head_size: 8_000,
            max_error_recovery_attempts: 5,
            worker_pool_size: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            reject_http_1_0: false,
            head_timeout: Duration::from_secs(30),
            body_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(30),
            ignore_rejected_interim: true,
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder { config: Self::default() }
    }

    /// Byte cap for the request head, terminator included.
    pub fn max_request_head_size(&self) -> usize {
        self.max_request_head_size
    }

    /// Per-exchange cap on error-handler invocations.
    pub fn max_error_recovery_attempts(&self) -> u32 {
        self.max_error_recovery_attempts
    }

    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size
    }

    /// Whether HTTP/1.0 clients are turned away with `426 Upgrade Required`.
    pub fn reject_http_1_0(&self) -> bool {
        self.reject_http_1_0
    }

    pub fn head_timeout(&self) -> Duration {
        self.head_timeout
    }

    pub fn body_timeout(&self) -> Duration {
        self.body_timeout
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Whether interim responses unsupported by the client's version are
    /// silently dropped instead of rejected.
    pub fn ignore_rejected_interim(&self) -> bool {
        self.ignore_rejected_interim
    }
}

pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn max_request_head_size(mut self, bytes: usize) -> Self {
        self.config.max_request_head_size = bytes;
        self
    }

    pub fn max_error_recovery_attempts(mut self, attempts: u32) -> Self {
        self.config.max_error_recovery_attempts = attempts;
        self
    }

    pub fn worker_pool_size(mut self, workers: usize) -> Self {
        self.config.worker_pool_size = workers.max(1);
        self
    }

    pub fn reject_http_1_0(mut self, reject: bool) -> Self {
        self.config.reject_http_1_0 = reject;
        self
    }

    pub fn head_timeout(mut self, deadline: Duration) -> Self {
        self.config.head_timeout = deadline;
        self
    }

    pub fn body_timeout(mut self, deadline: Duration) -> Self {
        self.config.body_timeout = deadline;
        self
    }

    pub fn response_timeout(mut self, deadline: Duration) -> Self {
        self.config.response_timeout = deadline;
        self
    }

    pub fn ignore_rejected_interim(mut self, ignore: bool) -> Self {
        self.config.ignore_rejected_interim = ignore;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let config = ServerConfig::default();
        assert_eq!(config.max_request_head_size(), 8_000);
        assert_eq!(config.max_error_recovery_attempts(), 5);
        assert!(config.worker_pool_size() >= 1);
        assert!(!config.reject_http_1_0());
        assert!(config.ignore_rejected_interim());
    }

    #[test]
    fn builder_overrides_stick() {
        let config = ServerConfig::builder()
            .max_request_head_size(1)
            .max_error_recovery_attempts(2)
            .reject_http_1_0(true)
            .head_timeout(Duration::from_millis(100))
            .build();
        assert_eq!(config.max_request_head_size(), 1);
        assert_eq!(config.max_error_recovery_attempts(), 2);
        assert!(config.reject_http_1_0());
        assert_eq!(config.head_timeout(), Duration::from_millis(100));
    }
}
