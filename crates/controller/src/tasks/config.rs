//! Controller Configuration
//!
//! Configuration for the NetworkPerformanceTest controller, loaded from a mounted
//! ConfigMap file. Every section has defaults matching the stock deployment, so an
//! absent or partial file still yields a usable configuration.

use crate::tasks::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main controller configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Worker pod configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Reconcile loop tuning
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Optimistic-concurrency retry budget
    #[serde(default)]
    pub retry: ConflictRetryConfig,

    /// Admission webhook server
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Lease-based leader election
    #[serde(default, rename = "leaderElection")]
    pub leader_election: LeaderElectionConfig,
}

/// Worker pod configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WorkerConfig {
    /// Namespace the worker pods run in
    #[serde(default = "default_worker_namespace")]
    pub namespace: String,

    /// netperf orchestrator image run by the worker pod
    #[serde(default = "default_worker_image")]
    pub image: String,

    /// Image the orchestrator uses for its client/server pods
    #[serde(rename = "toolImage", default = "default_tool_image")]
    pub tool_image: String,

    /// ServiceAccount the worker pod runs as
    #[serde(rename = "serviceAccountName", default = "default_service_account")]
    pub service_account_name: String,

    #[serde(rename = "imagePullPolicy", default = "default_image_pull_policy")]
    pub image_pull_policy: String,
}

fn default_worker_namespace() -> String {
    "default".to_string()
}

fn default_worker_image() -> String {
    "pruthi/private-workspace:k8s-netperf".to_string()
}

fn default_tool_image() -> String {
    "pruthi/private-workspace:nptests".to_string()
}

fn default_service_account() -> String {
    crate::CONTROLLER_NAME.to_string()
}

fn default_image_pull_policy() -> String {
    "Always".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            namespace: default_worker_namespace(),
            image: default_worker_image(),
            tool_image: default_tool_image(),
            service_account_name: default_service_account(),
            image_pull_policy: default_image_pull_policy(),
        }
    }
}

/// Reconcile loop tuning
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReconcileConfig {
    /// Delay before a non-terminal test is re-evaluated
    #[serde(rename = "requeueSeconds", default = "default_requeue_seconds")]
    pub requeue_seconds: u64,

    /// Maximum number of concurrent reconciliations
    #[serde(default = "default_concurrency")]
    pub concurrency: u16,
}

fn default_requeue_seconds() -> u64 {
    5
}

fn default_concurrency() -> u16 {
    5
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            requeue_seconds: default_requeue_seconds(),
            concurrency: default_concurrency(),
        }
    }
}

impl ReconcileConfig {
    #[must_use]
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_seconds)
    }
}

/// Retry budget for read-modify-write cycles that hit a resourceVersion conflict
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ConflictRetryConfig {
    #[serde(rename = "maxAttempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(rename = "initialDelayMillis", default = "default_initial_delay_millis")]
    pub initial_delay_millis: u64,

    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Fraction of the delay added as random jitter
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_delay_millis() -> u64 {
    10
}

fn default_factor() -> f64 {
    5.0
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for ConflictRetryConfig {
    fn default() -> Self {
        ConflictRetryConfig {
            max_attempts: default_max_attempts(),
            initial_delay_millis: default_initial_delay_millis(),
            factor: default_factor(),
            jitter: default_jitter(),
        }
    }
}

impl From<&ConflictRetryConfig> for RetryConfig {
    fn from(cfg: &ConflictRetryConfig) -> Self {
        RetryConfig {
            max_attempts: cfg.max_attempts,
            initial_delay: Duration::from_millis(cfg.initial_delay_millis),
            backoff_multiplier: cfg.factor,
            jitter: cfg.jitter,
        }
    }
}

/// Admission webhook server configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_port")]
    pub port: u16,

    /// PEM certificate; TLS is only enabled when both cert and key are set
    #[serde(rename = "certPath", default)]
    pub cert_path: Option<String>,

    #[serde(rename = "keyPath", default)]
    pub key_path: Option<String>,
}

fn default_webhook_port() -> u16 {
    9876
}

impl Default for WebhookConfig {
    fn default() -> Self {
        WebhookConfig {
            port: default_webhook_port(),
            cert_path: None,
            key_path: None,
        }
    }
}

/// Lease-based leader election configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LeaderElectionConfig {
    #[serde(default = "default_leader_election_enabled")]
    pub enabled: bool,

    #[serde(default = "default_leader_election_namespace")]
    pub namespace: String,

    #[serde(rename = "leaseName", default = "default_lease_name")]
    pub lease_name: String,

    #[serde(rename = "leaseDurationSeconds", default = "default_lease_duration")]
    pub lease_duration_seconds: u64,

    #[serde(rename = "renewIntervalSeconds", default = "default_renew_interval")]
    pub renew_interval_seconds: u64,

    #[serde(rename = "retryPeriodMillis", default = "default_retry_period_millis")]
    pub retry_period_millis: u64,
}

fn default_leader_election_enabled() -> bool {
    true
}

fn default_leader_election_namespace() -> String {
    "default".to_string()
}

fn default_lease_name() -> String {
    format!("{}-leader-election", crate::CONTROLLER_NAME)
}

fn default_lease_duration() -> u64 {
    15
}

fn default_renew_interval() -> u64 {
    10
}

fn default_retry_period_millis() -> u64 {
    100
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        LeaderElectionConfig {
            enabled: default_leader_election_enabled(),
            namespace: default_leader_election_namespace(),
            lease_name: default_lease_name(),
            lease_duration_seconds: default_lease_duration(),
            renew_interval_seconds: default_renew_interval(),
            retry_period_millis: default_retry_period_millis(),
        }
    }
}

impl ControllerConfig {
    /// Validate that configuration values are usable
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.worker.image.trim().is_empty() {
            return Err(anyhow::anyhow!("worker.image must not be empty"));
        }
        if self.worker.namespace.trim().is_empty() {
            return Err(anyhow::anyhow!("worker.namespace must not be empty"));
        }
        if self.reconcile.concurrency == 0 {
            return Err(anyhow::anyhow!("reconcile.concurrency must be at least 1"));
        }
        if self.reconcile.requeue_seconds == 0 {
            return Err(anyhow::anyhow!("reconcile.requeueSeconds must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow::anyhow!("retry.maxAttempts must be at least 1"));
        }
        if !self.retry.factor.is_finite()
            || self.retry.factor < 1.0
            || !(0.0..=1.0).contains(&self.retry.jitter)
        {
            return Err(anyhow::anyhow!(
                "retry.factor must be >= 1.0 and retry.jitter within [0, 1]"
            ));
        }
        if self.webhook.cert_path.is_some() != self.webhook.key_path.is_some() {
            return Err(anyhow::anyhow!(
                "webhook.certPath and webhook.keyPath must be set together"
            ));
        }
        let le = &self.leader_election;
        if le.enabled && le.renew_interval_seconds >= le.lease_duration_seconds {
            return Err(anyhow::anyhow!(format!(
                "leaderElection.renewIntervalSeconds ({}) must be shorter than leaseDurationSeconds ({})",
                le.renew_interval_seconds, le.lease_duration_seconds
            )));
        }
        Ok(())
    }

    /// Load configuration from mounted ConfigMap file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, anyhow::Error> {
        serde_yaml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from(&self.retry)
    }
}
