//! ServiceAccount bootstrap: identity, token, kubeconfig
//!
//! # Flow
//!
//! 1. `create`: ensure Namespace → ServiceAccount → ClusterRole →
//!    ClusterRoleBinding. Otherwise: require Namespace and ServiceAccount.
//! 2. Acquire a token, persistent (Secret) or ephemeral (TokenRequest).
//! 3. Render the kubeconfig and optionally write it to a sink.
//!
//! Every step is fail-fast. Nothing is rendered or written unless all
//! remote steps succeeded.

use std::io::Write;

use tracing::{debug, info, warn};

use crate::client::{ClusterEndpoint, RemoteAccessClient};
use crate::kubeconfig::build_kubeconfig;
use crate::provisioner::ResourceProvisioner;
use crate::retry::{BackoffPolicy, Cancellation};
use crate::token::{TokenAcquirer, TokenStrategy};
use crate::{Error, Result, PROJECTSVELTOS};

/// What a bootstrap should do
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootstrapOptions {
    /// Namespace holding the ServiceAccount
    pub namespace: String,
    /// ServiceAccount the kubeconfig authenticates as
    pub service_account: String,
    /// Create the identity and its grant instead of requiring them
    pub create: bool,
    /// Use a Secret-backed token instead of a TokenRequest
    pub persistent_token: bool,
    /// TokenRequest lifetime; 0 leaves it to the cluster
    pub expiration_seconds: i64,
    /// Write the kubeconfig to the sink passed to [`Bootstrapper::run`]
    pub display: bool,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            namespace: PROJECTSVELTOS.to_string(),
            service_account: PROJECTSVELTOS.to_string(),
            create: false,
            persistent_token: false,
            expiration_seconds: 0,
            display: false,
        }
    }
}

impl BootstrapOptions {
    /// Reject options that can't produce a valid bootstrap
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::validation("namespace must not be empty"));
        }
        if self.service_account.trim().is_empty() {
            return Err(Error::validation("service account name must not be empty"));
        }
        if self.expiration_seconds < 0 {
            return Err(Error::validation(format!(
                "expiration seconds must not be negative, got {}",
                self.expiration_seconds
            )));
        }
        Ok(())
    }

    fn token_strategy(&self) -> TokenStrategy {
        if self.persistent_token {
            TokenStrategy::Persistent
        } else {
            TokenStrategy::Ephemeral {
                expiration_seconds: Some(self.expiration_seconds),
            }
        }
    }
}

/// Runs bootstraps against one remote cluster
pub struct Bootstrapper<C> {
    client: C,
    endpoint: ClusterEndpoint,
    backoff: BackoffPolicy,
    cancel: Cancellation,
}

impl<C: RemoteAccessClient> Bootstrapper<C> {
    /// Create a bootstrapper for the cluster at `endpoint`
    pub fn new(client: C, endpoint: ClusterEndpoint) -> Self {
        Self {
            client,
            endpoint,
            backoff: BackoffPolicy::default(),
            cancel: Cancellation::none(),
        }
    }

    /// Override the persistent-token backoff policy
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Stop the bootstrap when `cancel` fires
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Provision (or validate) the identity, obtain a token and return the
    /// kubeconfig.
    ///
    /// Every remote step races the cancellation signal; a cancelled
    /// bootstrap makes no further remote calls.
    ///
    /// With `options.display` set, the kubeconfig and a trailing newline
    /// are written to `sink`. A failed write is logged, not returned: the
    /// kubeconfig is still handed back to the caller.
    pub async fn run(
        &self,
        options: &BootstrapOptions,
        sink: Option<&mut (dyn Write + Send)>,
    ) -> Result<String> {
        options.validate()?;
        let namespace = options.namespace.as_str();
        let sa_name = options.service_account.as_str();

        self.cancel
            .run(self.provision(options), "provision service account")
            .await??;

        let acquirer = TokenAcquirer::new(&self.client)
            .with_backoff(self.backoff.clone())
            .with_cancellation(self.cancel.clone());
        let token = self
            .cancel
            .run(
                acquirer.acquire(namespace, sa_name, options.token_strategy()),
                "acquire service account token",
            )
            .await??;

        let kubeconfig = build_kubeconfig(
            &self.endpoint.server,
            &self.endpoint.ca_data,
            sa_name,
            &token,
            namespace,
        );

        if options.display {
            match sink {
                Some(out) => {
                    if let Err(e) = writeln!(out, "{}", kubeconfig).and_then(|_| out.flush()) {
                        warn!(error = %e, "failed to write kubeconfig");
                    }
                }
                None => debug!("display requested without an output sink"),
            }
        }

        Ok(kubeconfig)
    }

    async fn provision(&self, options: &BootstrapOptions) -> Result<()> {
        let namespace = options.namespace.as_str();
        let sa_name = options.service_account.as_str();

        let provisioner = ResourceProvisioner::new(&self.client);
        if options.create {
            provisioner.ensure_namespace(namespace).await?;
            provisioner.ensure_service_account(sa_name, namespace).await?;
            provisioner.ensure_cluster_role(PROJECTSVELTOS).await?;
            provisioner
                .ensure_cluster_role_binding(PROJECTSVELTOS, PROJECTSVELTOS, namespace, sa_name)
                .await?;
            info!(namespace = %namespace, service_account = %sa_name, "identity provisioned");
        } else {
            provisioner.get_namespace(namespace).await?;
            provisioner.get_service_account(sa_name, namespace).await?;
            debug!(namespace = %namespace, service_account = %sa_name, "identity validated");
        }
        Ok(())
    }
}
