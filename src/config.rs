//! Configuration types for dnsaas-core.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::model::DEFAULT_TTL;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Zone database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Request workflow and synchronizer settings.
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Zone database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file, or `:memory:` for an ephemeral store.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("dnsaas.sqlite3")
}

/// Request workflow and synchronizer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Name of the domain template applied to auto-created reverse zones
    /// when the forward domain has no `reverse_template`.
    #[serde(default)]
    pub default_reverse_template: Option<String>,

    /// TTL given to new records that do not stage one.
    #[serde(default = "default_ttl")]
    pub default_ttl: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_reverse_template: None,
            default_ttl: default_ttl(),
        }
    }
}

fn default_ttl() -> u32 {
    DEFAULT_TTL
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "dnsaas_core=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.workflow, WorkflowConfig::default());
        assert_eq!(config.workflow.default_ttl, 3600);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.database.path, PathBuf::from("dnsaas.sqlite3"));
    }

    #[test]
    fn test_partial_workflow_section() {
        let config: Config =
            serde_json::from_str(r#"{"workflow": {"default_reverse_template": "reverse"}}"#)
                .unwrap();
        assert_eq!(
            config.workflow.default_reverse_template.as_deref(),
            Some("reverse")
        );
        assert_eq!(config.workflow.default_ttl, 3600);
    }
}
