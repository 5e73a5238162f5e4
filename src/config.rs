//! Operator configuration.
//!
//! Command line flags with environment variable fallbacks.

use std::time::Duration;

use clap::Parser;

/// Kubernetes operator for Limitador rate limiting services
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct OperatorConfig {
    /// Only watch Limitador objects in this namespace (cluster-wide if unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Port of the health and metrics server
    #[arg(long, env = "HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    /// Seconds between periodic reconciliations of a healthy Limitador
    #[arg(long, env = "REQUEUE_SECONDS", default_value_t = 300)]
    pub requeue_seconds: u64,
}

impl OperatorConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_seconds)
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            health_port: 8080,
            requeue_seconds: 300,
        }
    }
}
