//! SQSSecret CRD: maps one rotated secret to the deployments that consume it
//!
//! When the secret named by `secretId` gets a new value, a rotation
//! notification is published to the configured SQS queue. The controller
//! drains that queue and restarts every deployment listed in
//! `deploymentNames` so their pods pick up the new value.

use std::collections::BTreeSet;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// SQSSecret ties a secret identifier to deployments in the same namespace.
///
/// Example:
/// ```yaml
/// apiVersion: secretreload.dev/v1
/// kind: SQSSecret
/// metadata:
///   name: db-credentials
///   namespace: payments
/// spec:
///   secretId: arn:aws:secretsmanager:us-east-1:123456789012:secret:db-AbCdEf
///   deploymentNames:
///     - api
///     - worker
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "secretreload.dev",
    version = "v1",
    kind = "SQSSecret",
    namespaced,
    status = "SQSSecretStatus",
    shortname = "sqss",
    printcolumn = r#"{"name":"Secret","type":"string","jsonPath":".spec.secretId"}"#,
    printcolumn = r#"{"name":"Deployments","type":"string","jsonPath":".spec.deploymentNames"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SQSSecretSpec {
    /// Identifier of the watched secret, compared verbatim against
    /// `requestParameters.secretId` of rotation events (usually an ARN)
    pub secret_id: String,

    /// Deployments to restart, in order, when the secret rotates
    #[serde(default)]
    pub deployment_names: Vec<String>,
}

impl SQSSecretSpec {
    /// Validate the spec
    ///
    /// An empty deployment list is allowed: matching notifications are then
    /// acknowledged without restarting anything.
    pub fn validate(&self) -> Result<(), String> {
        if self.secret_id.trim().is_empty() {
            return Err("secretId must not be empty".to_string());
        }

        let mut seen = BTreeSet::new();
        for name in &self.deployment_names {
            if name.trim().is_empty() {
                return Err("deploymentNames must not contain empty names".to_string());
            }
            if !seen.insert(name.as_str()) {
                return Err(format!("deployment '{}' is listed more than once", name));
            }
        }

        Ok(())
    }
}

/// SQSSecret status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SQSSecretStatus {
    /// Current phase
    #[serde(default)]
    pub phase: SQSSecretPhase,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time a rotation restarted the deployments (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_restart_at: Option<String>,
}

/// SQSSecret phase
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum SQSSecretPhase {
    /// Not reconciled yet
    #[default]
    Pending,
    /// Queue is being polled for this secret
    Watching,
    /// Last cycle could not complete
    Failed,
}

/// The immutable view of an SQSSecret used for one reconciliation cycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchedSecret {
    /// Name of the SQSSecret this was read from
    pub name: String,
    /// Secret identifier to match rotation events against
    pub secret_id: String,
    /// Deployments to restart, in order
    pub workload_names: Vec<String>,
    /// Namespace of the SQSSecret and its deployments
    pub namespace: String,
}

impl SQSSecret {
    /// Snapshot the resource into a validated [`WatchedSecret`]
    pub fn descriptor(&self) -> Result<WatchedSecret, Error> {
        let name = self.name_any();
        let namespace = self
            .namespace()
            .ok_or_else(|| Error::MissingNamespace(name.clone()))?;

        self.spec
            .validate()
            .map_err(|msg| Error::validation(&name, msg))?;

        Ok(WatchedSecret {
            name,
            secret_id: self.spec.secret_id.clone(),
            workload_names: self.spec.deployment_names.clone(),
            namespace,
        })
    }

    /// Current phase, `Pending` when no status has been written yet
    pub fn phase(&self) -> SQSSecretPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(secret_id: &str, names: &[&str]) -> SQSSecretSpec {
        SQSSecretSpec {
            secret_id: secret_id.to_string(),
            deployment_names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    #[test]
    fn parses_yaml() {
        let yaml = r#"
apiVersion: secretreload.dev/v1
kind: SQSSecret
metadata:
  name: db-credentials
  namespace: payments
spec:
  secretId: arn:aws:secretsmanager:us-east-1:123456789012:secret:db-AbCdEf
  deploymentNames:
    - api
    - worker
"#;
        let resource: SQSSecret = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(resource.spec.deployment_names, vec!["api", "worker"]);
        assert_eq!(resource.phase(), SQSSecretPhase::Pending);

        let descriptor = resource.descriptor().expect("valid descriptor");
        assert_eq!(descriptor.namespace, "payments");
        assert_eq!(descriptor.name, "db-credentials");
        assert_eq!(
            descriptor.secret_id,
            "arn:aws:secretsmanager:us-east-1:123456789012:secret:db-AbCdEf"
        );
    }

    #[test]
    fn deployment_names_default_to_empty() {
        let yaml = r#"
apiVersion: secretreload.dev/v1
kind: SQSSecret
metadata:
  name: unused
  namespace: default
spec:
  secretId: s1
"#;
        let resource: SQSSecret = serde_yaml::from_str(yaml).expect("parse");
        assert!(resource.spec.deployment_names.is_empty());
        assert!(resource.spec.validate().is_ok());
    }

    #[test]
    fn rejects_blank_secret_id() {
        assert!(spec("", &["api"]).validate().is_err());
        assert!(spec("   ", &["api"]).validate().is_err());
    }

    #[test]
    fn rejects_blank_and_duplicate_names() {
        assert!(spec("s1", &["api", ""]).validate().is_err());
        let err = spec("s1", &["api", "worker", "api"]).validate().unwrap_err();
        assert!(err.contains("api"));
    }

    #[test]
    fn descriptor_requires_namespace() {
        let resource = SQSSecret::new("no-ns", spec("s1", &["api"]));
        assert!(matches!(
            resource.descriptor(),
            Err(Error::MissingNamespace(name)) if name == "no-ns"
        ));
    }

    #[test]
    fn descriptor_rejects_invalid_spec() {
        let mut resource = SQSSecret::new("bad", spec("", &["api"]));
        resource.metadata.namespace = Some("default".to_string());
        assert!(matches!(
            resource.descriptor(),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn status_phase_round_trips() {
        let status = SQSSecretStatus {
            phase: SQSSecretPhase::Watching,
            message: None,
            last_restart_at: Some("2026-01-01T00:00:00+00:00".to_string()),
        };
        let json = serde_json::to_value(&status).expect("serialize");
        assert_eq!(json["phase"], "Watching");
        assert_eq!(json["lastRestartAt"], "2026-01-01T00:00:00+00:00");
        assert!(json.get("message").is_none());
    }
}
