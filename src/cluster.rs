//! Control-plane access using kube-rs
//!
//! All cluster reads go through small collaborator traits so the resolution
//! and supervision logic can be exercised without a live API server. The
//! `KubeControlPlane` implementation is constructed once per invocation and
//! injected into the components that need it.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{Api, DynamicObject, ListParams, LogParams};
use kube::discovery::ApiResource;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::trace;

use crate::{Error, Result};

/// Name of the cluster-resident dev environment record
const DEV_ENVIRONMENT_NAME: &str = "dev";

/// How long to wait for a ready boot Job pod before giving up
const READY_POD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Poll interval while waiting for a ready pod
const READY_POD_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The cluster-resident record describing the team's canonical source
/// repository and settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevEnvironmentRecord {
    /// Source URL of the dev environment repository
    pub source_url: String,
    /// Serialized requirements document embedded in the team settings
    pub boot_requirements: Option<String>,
}

/// Reads the dev environment record from the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DevEnvironmentSource: Send + Sync {
    /// Returns `None` when the cluster has no dev environment record
    async fn dev_environment(&self) -> Result<Option<DevEnvironmentRecord>>;
}

/// Reads secrets from the current operating namespace
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// The current operating namespace
    fn namespace(&self) -> String;

    /// Fetch a secret by name; `None` when it does not exist
    async fn get_secret(&self, name: &str) -> Result<Option<Secret>>;
}

/// A single observation of the boot Job pod, re-fetched each iteration
#[derive(Debug, Clone, PartialEq)]
pub struct PodObservation {
    /// Whether the pod has reached a completed condition
    pub completed: bool,
    /// Human-readable current status
    pub status: String,
}

/// Discovers and observes the boot Job pod
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobWatcher: Send + Sync {
    /// Block until a ready pod matches the label selector, returning its name
    async fn wait_for_ready_pod(&self, selector: &str) -> Result<String>;

    /// Follow the container's log stream, forwarding output to the operator.
    /// Returns when the stream ends.
    async fn tail_logs(&self, pod: &str, container: &str) -> Result<()>;

    /// Re-fetch the pod by name
    async fn get_pod(&self, pod: &str) -> Result<PodObservation>;
}

/// Control-plane client bound to the current namespace
pub struct KubeControlPlane {
    client: Client,
    namespace: String,
}

impl KubeControlPlane {
    /// Connect using the ambient kube configuration (in-cluster or kubeconfig)
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default().await?;
        let namespace = client.default_namespace().to_string();
        Ok(Self { client, namespace })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl DevEnvironmentSource for KubeControlPlane {
    async fn dev_environment(&self) -> Result<Option<DevEnvironmentRecord>> {
        let ar = ApiResource {
            group: "jenkins.io".to_string(),
            version: "v1".to_string(),
            kind: "Environment".to_string(),
            api_version: "jenkins.io/v1".to_string(),
            plural: "environments".to_string(),
        };
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &self.namespace, &ar);

        match api.get(DEV_ENVIRONMENT_NAME).await {
            Ok(env) => {
                let source_url = env
                    .data
                    .pointer("/spec/source/url")
                    .and_then(|u| u.as_str())
                    .unwrap_or_default()
                    .to_string();
                let boot_requirements = env
                    .data
                    .pointer("/spec/teamSettings/bootRequirements")
                    .and_then(|r| r.as_str())
                    .map(|r| r.to_string());
                Ok(Some(DevEnvironmentRecord {
                    source_url,
                    boot_requirements,
                }))
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SecretSource for KubeControlPlane {
    fn namespace(&self) -> String {
        self.namespace.clone()
    }

    async fn get_secret(&self, name: &str) -> Result<Option<Secret>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        match secrets.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl JobWatcher for KubeControlPlane {
    async fn wait_for_ready_pod(&self, selector: &str) -> Result<String> {
        let pods = self.pods();
        let params = ListParams::default().labels(selector);
        let start = Instant::now();

        loop {
            if start.elapsed() > READY_POD_TIMEOUT {
                return Err(Error::command_failed(format!(
                    "timed out waiting for a ready pod matching {selector} in namespace {}",
                    self.namespace
                )));
            }

            match pods.list(&params).await {
                Ok(list) => {
                    let ready = list
                        .items
                        .iter()
                        .find(|pod| is_pod_ready(pod))
                        .and_then(|pod| pod.metadata.name.clone());
                    if let Some(name) = ready {
                        return Ok(name);
                    }
                }
                // Listing may race with pod scheduling; retry until the timeout
                Err(e) => trace!("failed to list pods matching {selector}: {e}"),
            }

            tokio::time::sleep(READY_POD_POLL_INTERVAL).await;
        }
    }

    async fn tail_logs(&self, pod: &str, container: &str) -> Result<()> {
        let params = LogParams {
            container: Some(container.to_string()),
            follow: true,
            ..Default::default()
        };
        let mut lines = self.pods().log_stream(pod, &params).await?.lines();
        while let Some(line) = lines.try_next().await? {
            println!("{line}");
        }
        Ok(())
    }

    async fn get_pod(&self, pod: &str) -> Result<PodObservation> {
        let pod = self.pods().get(pod).await?;
        Ok(PodObservation {
            completed: is_pod_completed(&pod),
            status: pod_status(&pod),
        })
    }
}

/// Whether the pod has reached its terminal success condition
pub fn is_pod_completed(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|phase| phase == "Succeeded")
        .unwrap_or(false)
}

/// Human-readable pod status
pub fn pod_status(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| "Pending".to_string())
}

/// Whether the pod is ready to have its logs tailed.
///
/// A pod that already reached a terminal phase counts as ready so that a
/// fast-finishing job is still picked up by the supervisor.
pub fn is_pod_ready(pod: &Pod) -> bool {
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    if matches!(phase, Some("Succeeded") | Some("Failed")) {
        return true;
    }
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(status: serde_json::Value) -> Pod {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "jx-boot-abc12" },
            "status": status
        }))
        .unwrap()
    }

    #[test]
    fn succeeded_pod_is_completed() {
        let p = pod(json!({ "phase": "Succeeded" }));
        assert!(is_pod_completed(&p));
        assert!(is_pod_ready(&p));
    }

    #[test]
    fn running_pod_is_not_completed() {
        let p = pod(json!({ "phase": "Running" }));
        assert!(!is_pod_completed(&p));
    }

    #[test]
    fn failed_pod_is_not_completed_but_is_ready() {
        let p = pod(json!({ "phase": "Failed" }));
        assert!(!is_pod_completed(&p));
        assert!(is_pod_ready(&p));
    }

    #[test]
    fn running_pod_with_ready_condition_is_ready() {
        let p = pod(json!({
            "phase": "Running",
            "conditions": [
                { "type": "PodScheduled", "status": "True" },
                { "type": "Ready", "status": "True" }
            ]
        }));
        assert!(is_pod_ready(&p));
    }

    #[test]
    fn running_pod_without_ready_condition_is_not_ready() {
        let p = pod(json!({
            "phase": "Running",
            "conditions": [{ "type": "Ready", "status": "False" }]
        }));
        assert!(!is_pod_ready(&p));
    }

    #[test]
    fn pod_status_defaults_to_pending() {
        let p = pod(json!({}));
        assert_eq!(pod_status(&p), "Pending");
        assert_eq!(pod_status(&pod(json!({ "phase": "Running" }))), "Running");
    }
}
