//! `register cluster`: validate a registration request and report it.
//!
//! The request names the cluster, the namespace its SveltosCluster would
//! live in, and either a kubeconfig for it or a context in the current
//! kubeconfig. Labels are given as `key1=value1,key2=value2`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;
use tracing::info;

use super::CommandErrorExt;
use crate::{CtlConfig, Error, Result};

/// Register command arguments
#[derive(Args, Debug)]
pub struct RegisterArgs {
    #[command(subcommand)]
    pub command: RegisterCommands,
}

#[derive(Subcommand, Debug)]
pub enum RegisterCommands {
    /// Register a cluster to be managed by Sveltos
    Cluster(RegisterClusterArgs),
}

/// `register cluster` arguments
#[derive(Args, Debug, Clone, Default)]
pub struct RegisterClusterArgs {
    /// Namespace for the SveltosCluster representing the cluster
    #[arg(long, default_value = "")]
    pub namespace: String,

    /// Name of the cluster within Sveltos
    #[arg(long, default_value = "")]
    pub cluster: String,

    /// Kubeconfig of the cluster to register
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Context in the current kubeconfig pointing at the cluster to register
    #[arg(long)]
    pub fleet_cluster_context: Option<String>,

    /// Register in pull mode: the managed cluster fetches its configuration
    #[arg(long)]
    pub pullmode: bool,

    /// Labels for the SveltosCluster (key1=value1,key2=value2)
    #[arg(long, value_delimiter = ',')]
    pub labels: Vec<String>,
}

/// A validated registration request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub namespace: String,
    pub cluster: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fleet_cluster_context: Option<String>,
    pub pull_mode: bool,
    pub labels: BTreeMap<String, String>,
}

/// Parse `key=value` pairs; keys and values are trimmed.
pub fn parse_labels(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            let mut parts = pair.split('=');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => {
                    Ok((key.trim().to_string(), value.trim().to_string()))
                }
                _ => Err(Error::validation(format!(
                    "invalid key-value pair format {:?}",
                    pair
                ))),
            }
        })
        .collect()
}

impl RegisterClusterArgs {
    /// Check required flags and parse labels
    pub fn validate(&self) -> Result<RegistrationRequest> {
        let no_kubeconfig = self.kubeconfig.as_ref().map_or(true, |p| p.as_os_str().is_empty());
        let no_context = self
            .fleet_cluster_context
            .as_deref()
            .map_or(true, str::is_empty);
        if no_kubeconfig && no_context {
            return Err(Error::validation(
                "no --kubeconfig or --fleet-cluster-context specified, provide at least one of them",
            ));
        }
        if self.cluster.is_empty() {
            return Err(Error::validation("cluster name must be specified"));
        }
        if self.namespace.is_empty() {
            return Err(Error::validation("namespace name must be specified"));
        }

        Ok(RegistrationRequest {
            namespace: self.namespace.clone(),
            cluster: self.cluster.clone(),
            kubeconfig: self.kubeconfig.clone(),
            fleet_cluster_context: self.fleet_cluster_context.clone(),
            pull_mode: self.pullmode,
            labels: parse_labels(&self.labels)?,
        })
    }
}

/// Run the register command
pub fn run(args: RegisterArgs, config: &CtlConfig) -> Result<()> {
    match args.command {
        RegisterCommands::Cluster(args) => {
            let request = args.validate()?;
            let rendered = serde_yaml::to_string(&request).cmd_err()?;
            if config.console_output {
                print!("{}", rendered);
            } else {
                info!(
                    cluster = %request.cluster,
                    namespace = %request.namespace,
                    pull_mode = request.pull_mode,
                    "registration request validated"
                );
            }
            Ok(())
        }
    }
}
