//! Idempotent create-or-validate for the bootstrap identity
//!
//! Every `ensure_*` call is a single create; an "already exists" answer is
//! success and the existing object is left untouched. This is creation, not
//! reconciliation: nothing is ever updated or deleted.
//!
//! `namespace_exists`, `list_namespaces` and `list_service_accounts` are
//! read helpers for library callers; the bootstrap itself does not use them.

use k8s_openapi::api::core::v1::{Namespace, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;

use crate::client::RemoteAccessClient;
use crate::error::{is_already_exists, is_not_found};
use crate::{Error, Result};

/// API group of ClusterRole references
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Namespace used when listing ServiceAccounts without one
const DEFAULT_NAMESPACE: &str = "default";

/// Namespace object carrying only a name
pub fn namespace_object(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// ServiceAccount object carrying only a name and namespace
pub fn service_account_object(name: &str, namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// ClusterRole granting every verb on every resource and non-resource URL
pub fn cluster_role_object(name: &str) -> ClusterRole {
    let all = || Some(vec!["*".to_string()]);
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        rules: Some(vec![
            PolicyRule {
                verbs: vec!["*".to_string()],
                api_groups: all(),
                resources: all(),
                ..Default::default()
            },
            PolicyRule {
                verbs: vec!["*".to_string()],
                non_resource_urls: all(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

/// ClusterRoleBinding from one ClusterRole to one ServiceAccount
pub fn cluster_role_binding_object(
    role_name: &str,
    binding_name: &str,
    sa_namespace: &str,
    sa_name: &str,
) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(binding_name.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: role_name.to_string(),
        },
        subjects: Some(vec![Subject {
            api_group: Some(String::new()),
            kind: "ServiceAccount".to_string(),
            name: sa_name.to_string(),
            namespace: Some(sa_namespace.to_string()),
        }]),
    }
}

/// Map the outcome of a create call: conflicts are success, anything else
/// is surfaced unchanged.
fn created<T>(result: std::result::Result<T, kube::Error>, what: &str) -> Result<()> {
    match result {
        Ok(_) => {
            debug!(resource = %what, "created");
            Ok(())
        }
        Err(e) if is_already_exists(&e) => {
            debug!(resource = %what, "already exists");
            Ok(())
        }
        Err(e) => {
            debug!(resource = %what, error = %e, "create failed");
            Err(e.into())
        }
    }
}

/// Create-or-validate operations for Namespace, ServiceAccount,
/// ClusterRole and ClusterRoleBinding.
pub struct ResourceProvisioner<'a, C: ?Sized> {
    client: &'a C,
}

impl<'a, C: RemoteAccessClient + ?Sized> ResourceProvisioner<'a, C> {
    /// Create a provisioner over a remote client
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Create a Namespace unless it exists
    pub async fn ensure_namespace(&self, name: &str) -> Result<()> {
        debug!(namespace = %name, "create namespace");
        let result = self.client.create_namespace(&namespace_object(name)).await;
        created(result, &format!("Namespace {}", name))
    }

    /// Create a ServiceAccount unless it exists
    pub async fn ensure_service_account(&self, name: &str, namespace: &str) -> Result<()> {
        debug!(namespace = %namespace, service_account = %name, "create service account");
        let sa = service_account_object(name, namespace);
        let result = self.client.create_service_account(namespace, &sa).await;
        created(result, &format!("ServiceAccount {}/{}", namespace, name))
    }

    /// Create the full-access ClusterRole unless it exists
    pub async fn ensure_cluster_role(&self, name: &str) -> Result<()> {
        debug!(cluster_role = %name, "create cluster role");
        let result = self.client.create_cluster_role(&cluster_role_object(name)).await;
        created(result, &format!("ClusterRole {}", name))
    }

    /// Bind `role_name` to the ServiceAccount unless the binding exists
    pub async fn ensure_cluster_role_binding(
        &self,
        role_name: &str,
        binding_name: &str,
        sa_namespace: &str,
        sa_name: &str,
    ) -> Result<()> {
        debug!(cluster_role_binding = %binding_name, "create cluster role binding");
        let binding = cluster_role_binding_object(role_name, binding_name, sa_namespace, sa_name);
        let result = self.client.create_cluster_role_binding(&binding).await;
        created(result, &format!("ClusterRoleBinding {}", binding_name))
    }

    /// Fetch an existing Namespace; never creates it
    pub async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        self.client.get_namespace(name).await.map_err(|e| {
            if is_not_found(&e) {
                Error::not_found("Namespace", name)
            } else {
                e.into()
            }
        })
    }

    /// Fetch an existing ServiceAccount; never creates it
    pub async fn get_service_account(&self, name: &str, namespace: &str) -> Result<ServiceAccount> {
        self.client
            .get_service_account(namespace, name)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    Error::not_found_in("ServiceAccount", namespace, name)
                } else {
                    e.into()
                }
            })
    }

    /// Whether a Namespace exists
    pub async fn namespace_exists(&self, name: &str) -> Result<bool> {
        match self.get_namespace(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// List all Namespaces
    pub async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        Ok(self.client.list_namespaces().await?)
    }

    /// List ServiceAccounts in `namespace` (`default` when empty)
    pub async fn list_service_accounts(&self, namespace: &str) -> Result<Vec<ServiceAccount>> {
        let namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            namespace
        };
        Ok(self.client.list_service_accounts(namespace).await?)
    }
}
