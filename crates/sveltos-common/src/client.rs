//! Remote access to the cluster being bootstrapped
//!
//! [`RemoteAccessClient`] is the only door to the API server: typed get,
//! create and list for the handful of kinds a bootstrap touches, plus the
//! ServiceAccount `token` subresource. Keeping it narrow lets the
//! provisioner and token logic be tested against a mock.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::authentication::v1::TokenRequest;
use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{Api, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Default connection timeout for the remote API server
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for the remote API server
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Capability-limited handle to a remote cluster's API.
///
/// Errors are returned as raw `kube::Error` so callers can decide how to
/// treat 404 and 409 responses.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteAccessClient: Send + Sync {
    /// Get a Namespace by name
    async fn get_namespace(&self, name: &str) -> Result<Namespace, kube::Error>;

    /// List all Namespaces
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, kube::Error>;

    /// Create a Namespace
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, kube::Error>;

    /// Get a ServiceAccount
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceAccount, kube::Error>;

    /// List ServiceAccounts in a namespace
    async fn list_service_accounts(
        &self,
        namespace: &str,
    ) -> Result<Vec<ServiceAccount>, kube::Error>;

    /// Create a ServiceAccount in a namespace
    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error>;

    /// Create a ClusterRole
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, kube::Error>;

    /// Create a ClusterRoleBinding
    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, kube::Error>;

    /// Get a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, kube::Error>;

    /// Create a Secret
    async fn create_secret(&self, namespace: &str, secret: &Secret)
        -> Result<Secret, kube::Error>;

    /// Issue a token through the ServiceAccount `token` subresource
    async fn create_token(
        &self,
        namespace: &str,
        service_account: &str,
        request: &TokenRequest,
    ) -> Result<TokenRequest, kube::Error>;
}

/// [`RemoteAccessClient`] backed by a real `kube::Client`
#[derive(Clone)]
pub struct KubeRemoteClient {
    client: Client,
}

impl KubeRemoteClient {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from a kubeconfig and also return the endpoint it
    /// points at, which the generated kubeconfig must reuse.
    ///
    /// `path` of `None` reads the default kubeconfig (`KUBECONFIG` or
    /// `~/.kube/config`); `context` of `None` uses its current context.
    pub async fn from_kubeconfig(
        path: Option<&Path>,
        context: Option<&str>,
    ) -> Result<(Self, ClusterEndpoint), Error> {
        let kubeconfig = match path {
            Some(p) => Kubeconfig::read_from(p).map_err(|e| {
                Error::kubeconfig(format!("failed to read {}: {}", p.display(), e))
            })?,
            None => Kubeconfig::read()
                .map_err(|e| Error::kubeconfig(format!("failed to read kubeconfig: {}", e)))?,
        };

        let endpoint = ClusterEndpoint::from_kubeconfig(&kubeconfig, context)?;
        debug!(server = %endpoint.server, "resolved remote cluster endpoint");

        let options = KubeConfigOptions {
            context: context.map(str::to_string),
            ..Default::default()
        };
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| Error::kubeconfig(format!("failed to load kubeconfig: {}", e)))?;
        config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
        config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

        let client = Client::try_from(config)
            .map_err(|e| Error::kubeconfig(format!("failed to create client: {}", e)))?;
        Ok((Self::new(client), endpoint))
    }
}

#[async_trait]
impl RemoteAccessClient for KubeRemoteClient {
    async fn get_namespace(&self, name: &str) -> Result<Namespace, kube::Error> {
        Api::<Namespace>::all(self.client.clone()).get(name).await
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, kube::Error> {
        let list = Api::<Namespace>::all(self.client.clone())
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, kube::Error> {
        Api::<Namespace>::all(self.client.clone())
            .create(&PostParams::default(), namespace)
            .await
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceAccount, kube::Error> {
        Api::<ServiceAccount>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
    }

    async fn list_service_accounts(
        &self,
        namespace: &str,
    ) -> Result<Vec<ServiceAccount>, kube::Error> {
        let list = Api::<ServiceAccount>::namespaced(self.client.clone(), namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error> {
        Api::<ServiceAccount>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), service_account)
            .await
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, kube::Error> {
        Api::<ClusterRole>::all(self.client.clone())
            .create(&PostParams::default(), role)
            .await
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, kube::Error> {
        Api::<ClusterRoleBinding>::all(self.client.clone())
            .create(&PostParams::default(), binding)
            .await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, kube::Error> {
        Api::<Secret>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
    }

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, kube::Error> {
        Api::<Secret>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), secret)
            .await
    }

    async fn create_token(
        &self,
        namespace: &str,
        service_account: &str,
        request: &TokenRequest,
    ) -> Result<TokenRequest, kube::Error> {
        Api::<ServiceAccount>::namespaced(self.client.clone(), namespace)
            .create_token_request(service_account, &PostParams::default(), request)
            .await
    }
}

/// Where the remote API server lives and how to trust it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterEndpoint {
    /// Server URL exactly as written in the source kubeconfig
    pub server: String,
    /// PEM bytes of the cluster CA (empty when the kubeconfig has none)
    pub ca_data: Vec<u8>,
}

impl ClusterEndpoint {
    /// Create an endpoint from its parts
    pub fn new(server: impl Into<String>, ca_data: impl Into<Vec<u8>>) -> Self {
        Self {
            server: server.into(),
            ca_data: ca_data.into(),
        }
    }

    /// Resolve the cluster referenced by `context` (or the current context).
    ///
    /// CA bytes come from `certificate-authority-data` when present,
    /// otherwise from the `certificate-authority` file.
    pub fn from_kubeconfig(kubeconfig: &Kubeconfig, context: Option<&str>) -> Result<Self, Error> {
        let context_name = context
            .map(str::to_string)
            .or_else(|| kubeconfig.current_context.clone())
            .ok_or_else(|| Error::validation("kubeconfig has no current context"))?;

        let cluster_name = kubeconfig
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .and_then(|c| c.context.as_ref())
            .map(|c| c.cluster.clone())
            .ok_or_else(|| {
                Error::validation(format!("context {} not found in kubeconfig", context_name))
            })?;

        let cluster = kubeconfig
            .clusters
            .iter()
            .find(|c| c.name == cluster_name)
            .and_then(|c| c.cluster.as_ref())
            .ok_or_else(|| {
                Error::validation(format!("cluster {} not found in kubeconfig", cluster_name))
            })?;

        let server = cluster.server.clone().ok_or_else(|| {
            Error::validation(format!("cluster {} has no server", cluster_name))
        })?;

        let ca_data = match (&cluster.certificate_authority_data, &cluster.certificate_authority) {
            (Some(data), _) => STANDARD.decode(data.trim()).map_err(|e| {
                Error::kubeconfig(format!(
                    "cluster {} has invalid certificate-authority-data: {}",
                    cluster_name, e
                ))
            })?,
            (None, Some(path)) => std::fs::read(path).map_err(|e| {
                Error::kubeconfig(format!("failed to read CA file {}: {}", path, e))
            })?,
            (None, None) => Vec::new(),
        };

        Ok(Self { server, ca_data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: mgmt
  cluster:
    server: https://10.0.0.1:6443
    certificate-authority-data: Q0FGRQ==
- name: fleet
  cluster:
    server: https://fleet.example.com
users:
- name: admin
  user:
    token: abc
contexts:
- name: mgmt-admin
  context:
    cluster: mgmt
    user: admin
- name: fleet-admin
  context:
    cluster: fleet
    user: admin
current-context: mgmt-admin
"#;

    fn kubeconfig() -> Kubeconfig {
        Kubeconfig::from_yaml(KUBECONFIG).expect("test kubeconfig parses")
    }

    #[test]
    fn current_context_endpoint_keeps_server_verbatim() {
        let endpoint = ClusterEndpoint::from_kubeconfig(&kubeconfig(), None).unwrap();
        assert_eq!(endpoint.server, "https://10.0.0.1:6443");
        assert_eq!(endpoint.ca_data, b"CAFE".to_vec());
    }

    #[test]
    fn explicit_context_selects_other_cluster() {
        let endpoint =
            ClusterEndpoint::from_kubeconfig(&kubeconfig(), Some("fleet-admin")).unwrap();
        assert_eq!(endpoint.server, "https://fleet.example.com");
        assert!(endpoint.ca_data.is_empty());
    }

    #[test]
    fn unknown_context_is_a_validation_error() {
        let err = ClusterEndpoint::from_kubeconfig(&kubeconfig(), Some("nope")).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn missing_current_context_is_a_validation_error() {
        let mut kc = kubeconfig();
        kc.current_context = None;
        let err = ClusterEndpoint::from_kubeconfig(&kc, None).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
