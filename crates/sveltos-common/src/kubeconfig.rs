//! Kubeconfig generation for a bootstrapped ServiceAccount
//!
//! The document is a fixed template: one cluster (`local`), one user named
//! after the ServiceAccount, one context (`sveltos-context`) that is also
//! the current context. Values are substituted as-is; nothing is
//! re-serialized, so the same inputs always yield the same bytes.

use base64::{engine::general_purpose::STANDARD, Engine};

/// Cluster entry name in generated kubeconfigs
pub const CLUSTER_NAME: &str = "local";

/// Context name in generated kubeconfigs
pub const CONTEXT_NAME: &str = "sveltos-context";

/// Render a kubeconfig granting `service_account` access to `server`.
///
/// `ca_data` is the raw PEM of the cluster CA; it is base64 encoded into
/// `certificate-authority-data`. The result has no trailing newline.
pub fn build_kubeconfig(
    server: &str,
    ca_data: &[u8],
    service_account: &str,
    token: &str,
    namespace: &str,
) -> String {
    let ca = STANDARD.encode(ca_data);
    format!(
        r#"apiVersion: v1
kind: Config
clusters:
- name: {CLUSTER_NAME}
  cluster:
    server: {server}
    certificate-authority-data: "{ca}"
users:
- name: {service_account}
  user:
    token: {token}
contexts:
- name: {CONTEXT_NAME}
  context:
    cluster: {CLUSTER_NAME}
    namespace: {namespace}
    user: {service_account}
current-context: {CONTEXT_NAME}"#
    )
}

#[cfg(test)]
mod tests {
    use kube::config::Kubeconfig;

    use super::*;

    const EXPECTED: &str = "apiVersion: v1
kind: Config
clusters:
- name: local
  cluster:
    server: https://10.0.0.1:6443
    certificate-authority-data: \"Q0FGRQ==\"
users:
- name: svc-sa
  user:
    token: tok-123
contexts:
- name: sveltos-context
  context:
    cluster: local
    namespace: ns1
    user: svc-sa
current-context: sveltos-context";

    fn sample() -> String {
        build_kubeconfig("https://10.0.0.1:6443", b"CAFE", "svc-sa", "tok-123", "ns1")
    }

    #[test]
    fn renders_exact_template() {
        assert_eq!(sample(), EXPECTED);
        assert!(!sample().ends_with('\n'));
    }

    #[test]
    fn output_is_deterministic() {
        let first = sample();
        let _other = build_kubeconfig("https://other", b"x", "a", "b", "c");
        assert_eq!(sample(), first);
    }

    #[test]
    fn server_is_not_normalised() {
        let out = build_kubeconfig("https://api.example.com:443/", b"", "sa", "t", "ns");
        assert!(out.contains("    server: https://api.example.com:443/\n"));
        assert!(out.contains("certificate-authority-data: \"\""));
    }

    #[test]
    fn generated_document_is_a_valid_kubeconfig() {
        let kc = Kubeconfig::from_yaml(&sample()).expect("generated kubeconfig parses");

        assert_eq!(kc.current_context.as_deref(), Some(CONTEXT_NAME));

        let cluster = kc.clusters[0].cluster.as_ref().expect("cluster body");
        assert_eq!(kc.clusters[0].name, CLUSTER_NAME);
        assert_eq!(cluster.server.as_deref(), Some("https://10.0.0.1:6443"));
        assert_eq!(cluster.certificate_authority_data.as_deref(), Some("Q0FGRQ=="));

        let context = kc.contexts[0].context.as_ref().expect("context body");
        assert_eq!(context.namespace.as_deref(), Some("ns1"));
        assert_eq!(context.cluster, CLUSTER_NAME);
        assert_eq!(kc.auth_infos[0].name, "svc-sa");
    }
}
