//! Service account bootstrap for Sveltos managed clusters: provision an
//! identity on a remote cluster, obtain a bearer token for it, and package
//! both into a kubeconfig.

#![deny(missing_docs)]

pub mod bootstrap;
pub mod client;
pub mod error;
pub mod kubeconfig;
pub mod provisioner;
pub mod retry;
pub mod token;

pub use bootstrap::{BootstrapOptions, Bootstrapper};
pub use client::{ClusterEndpoint, KubeRemoteClient, RemoteAccessClient};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name of the ClusterRole and ClusterRoleBinding granted to the
/// bootstrapped ServiceAccount, and the default namespace and
/// ServiceAccount name
pub const PROJECTSVELTOS: &str = "projectsveltos";
