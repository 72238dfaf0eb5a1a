//! Operator settings from flags and `TETHER_*` environment variables

use std::time::Duration;

use clap::Args;
use tether_common::retry::RetryConfig;
use tether_common::telemetry::{LogFormat, TelemetryConfig};
use tether_extension_config::ControllerSettings;

/// Runtime settings for the controller
#[derive(Args, Debug, Clone)]
pub struct OperatorConfig {
    /// Only watch ExtensionConfigs labelled cluster.x-k8s.io/watch-filter=<value>
    #[arg(long, env = "TETHER_WATCH_FILTER")]
    pub watch_filter: Option<String>,

    /// Give up warming the registry after this many seconds
    #[arg(long, env = "TETHER_WARMUP_TIMEOUT_SECS", default_value_t = 300)]
    pub warmup_timeout_secs: u64,

    /// Timeout for a single discovery call, in seconds
    #[arg(long, env = "TETHER_DISCOVERY_TIMEOUT_SECS", default_value_t = 10)]
    pub discovery_timeout_secs: u64,

    /// Timeout for reading a CA Secret, in seconds
    #[arg(long, env = "TETHER_SECRET_TIMEOUT_SECS", default_value_t = 10)]
    pub secret_timeout_secs: u64,

    /// Rediscover each ExtensionConfig this often, in seconds
    #[arg(long, env = "TETHER_RESYNC_INTERVAL_SECS", default_value_t = 600)]
    pub resync_interval_secs: u64,

    /// Requeue delay after a failed reconcile, in seconds
    #[arg(long, env = "TETHER_ERROR_REQUEUE_SECS", default_value_t = 15)]
    pub error_requeue_secs: u64,

    /// Requeue delay after a failure that needs the object or extension to change, in seconds
    #[arg(long, env = "TETHER_PERMANENT_ERROR_REQUEUE_SECS", default_value_t = 300)]
    pub permanent_error_requeue_secs: u64,

    /// Log output format (json or text)
    #[arg(long, env = "TETHER_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,
}

impl OperatorConfig {
    /// Timing knobs for the reconciler
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            error_requeue: Duration::from_secs(self.error_requeue_secs),
            permanent_error_requeue: Duration::from_secs(self.permanent_error_requeue_secs),
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            discovery_timeout: self.discovery_timeout(),
            secret_timeout: Duration::from_secs(self.secret_timeout_secs),
            ..ControllerSettings::default()
        }
    }

    /// Deadline for one discovery call
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    /// Retry budget for registry warm-up
    pub fn warmup_retry(&self) -> RetryConfig {
        RetryConfig::with_deadline(Duration::from_secs(self.warmup_timeout_secs))
    }

    /// Logging setup
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            format: self.log_format,
            ..TelemetryConfig::default()
        }
    }
}
