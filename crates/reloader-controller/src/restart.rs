//! Workload restarts
//!
//! A restart is a merge patch on the deployment's pod template that sets
//! [`RESTART_LABEL`] to a fresh timestamp. The changed template makes the
//! deployment controller roll every pod.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use reloader_common::crd::WatchedSecret;
use reloader_common::{Error, FIELD_MANAGER, RESTART_LABEL};

/// Trait abstracting deployment access for testability
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Get a deployment, failing with [`Error::WorkloadNotFound`] if absent
    async fn get_deployment(&self, name: &str, namespace: &str) -> Result<Deployment, Error>;

    /// Set the restart label on the deployment's pod template
    async fn patch_restart_label(
        &self,
        name: &str,
        namespace: &str,
        stamp: &str,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeWorkloadClient {
    client: Client,
}

impl KubeWorkloadClient {
    /// Create a new KubeWorkloadClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadClient for KubeWorkloadClient {
    async fn get_deployment(&self, name: &str, namespace: &str) -> Result<Deployment, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await?.ok_or_else(|| Error::WorkloadNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
    }

    async fn patch_restart_label(
        &self,
        name: &str,
        namespace: &str,
        stamp: &str,
    ) -> Result<(), Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            name,
            &PatchParams {
                field_manager: Some(FIELD_MANAGER.to_string()),
                ..Default::default()
            },
            &Patch::Merge(&restart_patch(stamp)),
        )
        .await
        .map_err(|e| match e {
            kube::Error::Api(ae) if ae.code == 404 => Error::WorkloadNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            },
            e => Error::workload(name, namespace, format!("restart patch failed: {}", e)),
        })?;
        Ok(())
    }
}

/// Merge patch that sets the restart label on the pod template
pub fn restart_patch(stamp: &str) -> serde_json::Value {
    serde_json::json!({
        "spec": {
            "template": {
                "metadata": {
                    "labels": { RESTART_LABEL: stamp }
                }
            }
        }
    })
}

/// Restart every deployment of `watched`, in list order
///
/// Stops at the first deployment that cannot be fetched or patched. The
/// deployments before it stay restarted; there is no rollback.
///
/// Returns the number of deployments restarted.
#[instrument(skip(client, watched), fields(resource = %watched.name, namespace = %watched.namespace))]
pub async fn restart_workloads(
    client: &dyn WorkloadClient,
    watched: &WatchedSecret,
    stamp: &str,
) -> Result<usize, Error> {
    let namespace = watched.namespace.as_str();

    for (restarted, name) in watched.workload_names.iter().enumerate() {
        let deployment = client.get_deployment(name, namespace).await.inspect_err(|e| {
            warn!(deployment = %name, restarted, error = %e, "failed to fetch deployment");
        })?;

        let target = deployment.name_any();
        debug!(deployment = %target, "patching restart label");

        client
            .patch_restart_label(&target, namespace, stamp)
            .await
            .inspect_err(|e| {
                warn!(deployment = %target, restarted, error = %e, "failed to restart deployment");
            })?;

        info!(deployment = %target, %stamp, "deployment restarted");
    }

    Ok(watched.workload_names.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn deployment(name: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("payments".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn watched(names: &[&str]) -> WatchedSecret {
        WatchedSecret {
            name: "db".to_string(),
            secret_id: "s1".to_string(),
            workload_names: names.iter().map(|n| n.to_string()).collect(),
            namespace: "payments".to_string(),
        }
    }

    #[test]
    fn patch_only_touches_pod_template_label() {
        let patch = restart_patch("1700000000");
        assert_eq!(
            patch,
            serde_json::json!({
                "spec": {"template": {"metadata": {"labels": {
                    "secretreload.dev/redeployed-at": "1700000000"
                }}}}
            })
        );
    }

    #[tokio::test]
    async fn restarts_in_list_order() {
        let mut seq = Sequence::new();
        let mut mock = MockWorkloadClient::new();
        for name in ["api", "worker"] {
            mock.expect_get_deployment()
                .with(eq(name), eq("payments"))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|n, _| Ok(deployment(n)));
            mock.expect_patch_restart_label()
                .with(eq(name), eq("payments"), eq("42"))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Ok(()));
        }

        let restarted = restart_workloads(&mock, &watched(&["api", "worker"]), "42")
            .await
            .expect("restart succeeds");
        assert_eq!(restarted, 2);
    }

    #[tokio::test]
    async fn empty_list_is_a_no_op() {
        let mock = MockWorkloadClient::new();
        let restarted = restart_workloads(&mock, &watched(&[]), "42")
            .await
            .expect("nothing to do");
        assert_eq!(restarted, 0);
    }

    #[tokio::test]
    async fn stops_at_first_missing_deployment() {
        let mut mock = MockWorkloadClient::new();
        mock.expect_get_deployment()
            .with(eq("api"), eq("payments"))
            .times(1)
            .returning(|n, _| Ok(deployment(n)));
        mock.expect_get_deployment()
            .with(eq("missing-deploy"), eq("payments"))
            .times(1)
            .returning(|n, ns| {
                Err(Error::WorkloadNotFound {
                    name: n.to_string(),
                    namespace: ns.to_string(),
                })
            });
        mock.expect_patch_restart_label()
            .with(eq("api"), eq("payments"), eq("42"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let err = restart_workloads(
            &mock,
            &watched(&["api", "missing-deploy", "never-reached"]),
            "42",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::WorkloadNotFound { ref name, .. } if name == "missing-deploy"));
    }

    #[tokio::test]
    async fn patch_failure_aborts() {
        let mut mock = MockWorkloadClient::new();
        mock.expect_get_deployment()
            .times(1)
            .returning(|n, _| Ok(deployment(n)));
        mock.expect_patch_restart_label()
            .times(1)
            .returning(|n, ns, _| Err(Error::workload(n, ns, "conflict")));

        let err = restart_workloads(&mock, &watched(&["api", "worker"]), "42")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Workload { ref name, .. } if name == "api"));
    }
}
