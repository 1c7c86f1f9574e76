//! Bearer token acquisition for a ServiceAccount
//!
//! Two strategies:
//! - **Ephemeral**: one TokenRequest against the ServiceAccount `token`
//!   subresource. Short-lived, nothing persisted, never retried.
//! - **Persistent**: create a `kubernetes.io/service-account-token` Secret
//!   and poll it until the token controller fills in `data.token`. The fill
//!   is asynchronous, so this is the one read in a bootstrap that retries.

use std::collections::BTreeMap;

use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, error, warn};

use crate::client::RemoteAccessClient;
use crate::error::{is_already_exists, is_not_found};
use crate::retry::{BackoffPolicy, Cancellation};
use crate::{Error, Result};

/// Annotation binding a token Secret to its ServiceAccount
pub const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";

/// Secret type populated by the token controller
pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

/// Data key holding the token in a service-account-token Secret
pub const TOKEN_KEY: &str = "token";

/// How to obtain the bearer token
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStrategy {
    /// TokenRequest with an optional lifetime in seconds; `None` or zero
    /// leaves the lifetime to the cluster default
    Ephemeral {
        /// Requested token lifetime
        expiration_seconds: Option<i64>,
    },
    /// Long-lived token read from a Secret bound to the ServiceAccount
    Persistent,
}

/// Secret named after the ServiceAccount that the token controller will fill
pub fn token_secret_object(namespace: &str, sa_name: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(sa_name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(BTreeMap::from([(
                SERVICE_ACCOUNT_NAME_ANNOTATION.to_string(),
                sa_name.to_string(),
            )])),
            ..Default::default()
        },
        type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
        ..Default::default()
    }
}

/// TokenRequest body; a zero or absent lifetime is left unset
pub fn token_request_object(expiration_seconds: Option<i64>) -> TokenRequest {
    TokenRequest {
        metadata: ObjectMeta::default(),
        spec: TokenRequestSpec {
            expiration_seconds: expiration_seconds.filter(|s| *s != 0),
            ..Default::default()
        },
        status: None,
    }
}

/// Outcome of one read of the token Secret
#[derive(Debug)]
enum SecretRead {
    /// `data.token` is present
    Ready(String),
    /// Secret missing, without data, or without a token yet
    Pending(&'static str),
    /// The read itself failed; counts as an attempt
    Failed(kube::Error),
}

/// Inspect a Secret for a usable token
fn token_from_secret(secret: &Secret) -> Result<Option<String>> {
    let Some(value) = secret.data.as_ref().and_then(|d| d.get(TOKEN_KEY)) else {
        return Ok(None);
    };
    if value.0.is_empty() {
        return Ok(None);
    }
    String::from_utf8(value.0.clone())
        .map(Some)
        .map_err(|_| Error::invalid_response("secret token is not valid UTF-8"))
}

/// Obtains a bearer token for a ServiceAccount using one of the
/// [`TokenStrategy`] variants.
pub struct TokenAcquirer<'a, C: ?Sized> {
    client: &'a C,
    backoff: BackoffPolicy,
    cancel: Cancellation,
}

impl<'a, C: RemoteAccessClient + ?Sized> TokenAcquirer<'a, C> {
    /// Create an acquirer with the default backoff and no cancellation
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            backoff: BackoffPolicy::default(),
            cancel: Cancellation::none(),
        }
    }

    /// Override the persistent-token backoff policy
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Stop the persistent-token poll when `cancel` fires
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Obtain a token with the given strategy
    pub async fn acquire(
        &self,
        namespace: &str,
        sa_name: &str,
        strategy: TokenStrategy,
    ) -> Result<String> {
        match strategy {
            TokenStrategy::Ephemeral { expiration_seconds } => {
                self.ephemeral(namespace, sa_name, expiration_seconds).await
            }
            TokenStrategy::Persistent => self.persistent(namespace, sa_name).await,
        }
    }

    /// Issue a short-lived token through a TokenRequest. Single attempt.
    pub async fn ephemeral(
        &self,
        namespace: &str,
        sa_name: &str,
        expiration_seconds: Option<i64>,
    ) -> Result<String> {
        debug!(namespace = %namespace, service_account = %sa_name, "create token request");
        let request = token_request_object(expiration_seconds);

        let response = self
            .client
            .create_token(namespace, sa_name, &request)
            .await
            .map_err(|e| {
                debug!(
                    namespace = %namespace,
                    service_account = %sa_name,
                    error = %e,
                    "token request failed"
                );
                Error::from(e)
            })?;

        let token = response
            .status
            .ok_or_else(|| Error::invalid_response("token response missing status"))?
            .token;

        if token.is_empty() {
            return Err(Error::invalid_response("server returned empty token"));
        }
        Ok(token)
    }

    /// Create the token Secret (if absent) and wait for it to be populated
    pub async fn persistent(&self, namespace: &str, sa_name: &str) -> Result<String> {
        self.create_token_secret(namespace, sa_name).await?;
        self.wait_for_secret_token(namespace, sa_name).await
    }

    /// Create the service-account-token Secret; conflicts are success
    pub async fn create_token_secret(&self, namespace: &str, sa_name: &str) -> Result<()> {
        debug!(namespace = %namespace, secret = %sa_name, "create token secret");
        let secret = token_secret_object(namespace, sa_name);
        match self.client.create_secret(namespace, &secret).await {
            Ok(_) => Ok(()),
            Err(e) if is_already_exists(&e) => Ok(()),
            Err(e) => {
                debug!(namespace = %namespace, secret = %sa_name, error = %e, "create secret failed");
                Err(e.into())
            }
        }
    }

    async fn read_secret(&self, namespace: &str, name: &str) -> Result<SecretRead> {
        match self.client.get_secret(namespace, name).await {
            Ok(secret) => Ok(match token_from_secret(&secret)? {
                Some(token) => SecretRead::Ready(token),
                None if secret.data.is_none() => SecretRead::Pending("secret has no data"),
                None => SecretRead::Pending("secret has no token"),
            }),
            Err(e) if is_not_found(&e) => Ok(SecretRead::Pending("secret not found")),
            Err(e) => Ok(SecretRead::Failed(e)),
        }
    }

    /// Poll the Secret until `data.token` appears, the attempt budget runs
    /// out, or the cancellation signal fires.
    ///
    /// Each attempt is exactly one read. No wait follows the final attempt.
    pub async fn wait_for_secret_token(&self, namespace: &str, name: &str) -> Result<String> {
        const OPERATION: &str = "wait for service account token";
        let max_attempts = self.backoff.max_attempts;

        for attempt in 0..max_attempts {
            let read = self
                .cancel
                .run(self.read_secret(namespace, name), OPERATION)
                .await??;

            let reason = match read {
                SecretRead::Ready(token) => {
                    debug!(namespace = %namespace, secret = %name, attempt = attempt + 1, "token available");
                    return Ok(token);
                }
                SecretRead::Pending(reason) => reason.to_string(),
                SecretRead::Failed(e) => e.to_string(),
            };

            if attempt + 1 >= max_attempts {
                break;
            }

            let delay = self.backoff.next_delay(attempt);
            warn!(
                namespace = %namespace,
                secret = %name,
                attempt = attempt + 1,
                reason = %reason,
                delay_ms = delay.as_millis() as u64,
                "token not available yet, retrying"
            );
            self.cancel.sleep(delay, OPERATION).await?;
        }

        error!(
            namespace = %namespace,
            secret = %name,
            attempts = max_attempts,
            "token never became available"
        );
        Err(Error::retries_exceeded(OPERATION, max_attempts))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use k8s_openapi::api::authentication::v1::TokenRequestStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::ByteString;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::client::MockRemoteAccessClient;
    use crate::error::api_error;

    fn secret_with(data: Option<BTreeMap<String, ByteString>>) -> Secret {
        let mut secret = token_secret_object("ns1", "sa1");
        secret.data = data;
        secret
    }

    fn populated_secret(token: &str) -> Secret {
        secret_with(Some(BTreeMap::from([(
            TOKEN_KEY.to_string(),
            ByteString(token.as_bytes().to_vec()),
        )])))
    }

    fn token_response(token: &str) -> TokenRequest {
        TokenRequest {
            status: Some(TokenRequestStatus {
                token: token.to_string(),
                expiration_timestamp: Time(Default::default()),
            }),
            ..token_request_object(None)
        }
    }

    /// Minimum total wait for the first `n` retries under the default policy
    fn min_wait(n: u32) -> Duration {
        let policy = BackoffPolicy::default();
        (0..n).map(|k| policy.delay_with_jitter(k, 0.0)).sum()
    }

    // ==========================================================================
    // Story: Object shapes
    // ==========================================================================

    #[test]
    fn token_secret_is_bound_to_service_account() {
        let secret = token_secret_object("ns1", "sa1");
        assert_eq!(secret.metadata.name.as_deref(), Some("sa1"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("ns1"));
        assert_eq!(secret.type_.as_deref(), Some(SERVICE_ACCOUNT_TOKEN_TYPE));
        assert_eq!(
            secret
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(SERVICE_ACCOUNT_NAME_ANNOTATION))
                .map(String::as_str),
            Some("sa1")
        );
        assert!(secret.data.is_none());
    }

    #[test]
    fn zero_or_absent_expiration_is_left_unset() {
        assert_eq!(token_request_object(None).spec.expiration_seconds, None);
        assert_eq!(token_request_object(Some(0)).spec.expiration_seconds, None);
        assert_eq!(
            token_request_object(Some(3600)).spec.expiration_seconds,
            Some(3600)
        );
    }

    #[test]
    fn secret_token_detection() {
        assert_eq!(token_from_secret(&secret_with(None)).unwrap(), None);
        assert_eq!(
            token_from_secret(&secret_with(Some(BTreeMap::new()))).unwrap(),
            None
        );
        assert_eq!(token_from_secret(&populated_secret("")).unwrap(), None);
        assert_eq!(
            token_from_secret(&populated_secret("tok")).unwrap().as_deref(),
            Some("tok")
        );

        let invalid = secret_with(Some(BTreeMap::from([(
            TOKEN_KEY.to_string(),
            ByteString(vec![0xff, 0xfe]),
        )])));
        assert!(matches!(
            token_from_secret(&invalid),
            Err(Error::InvalidResponse { .. })
        ));
    }

    // ==========================================================================
    // Story: Ephemeral tokens
    // ==========================================================================

    #[tokio::test]
    async fn ephemeral_token_requests_expiration_and_returns_status_token() {
        let mut client = MockRemoteAccessClient::new();
        client
            .expect_create_token()
            .withf(|ns, sa, req| {
                ns == "ns1" && sa == "sa1" && req.spec.expiration_seconds == Some(3600)
            })
            .times(1)
            .returning(|_, _, _| Ok(token_response("tok-123")));

        let token = TokenAcquirer::new(&client)
            .acquire(
                "ns1",
                "sa1",
                TokenStrategy::Ephemeral {
                    expiration_seconds: Some(3600),
                },
            )
            .await
            .unwrap();
        assert_eq!(token, "tok-123");
    }

    #[tokio::test]
    async fn ephemeral_failure_is_not_retried() {
        let mut client = MockRemoteAccessClient::new();
        client
            .expect_create_token()
            .times(1)
            .returning(|_, _, _| Err(api_error(404, "NotFound")));

        let err = TokenAcquirer::new(&client)
            .ephemeral("ns1", "missing", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Kube { .. }));
    }

    #[tokio::test]
    async fn ephemeral_empty_token_is_rejected() {
        let mut client = MockRemoteAccessClient::new();
        client
            .expect_create_token()
            .returning(|_, _, _| Ok(token_response("")));

        let err = TokenAcquirer::new(&client)
            .ephemeral("ns1", "sa1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn ephemeral_missing_status_is_rejected() {
        let mut client = MockRemoteAccessClient::new();
        client
            .expect_create_token()
            .returning(|_, _, _| Ok(token_request_object(None)));

        let err = TokenAcquirer::new(&client)
            .ephemeral("ns1", "sa1", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing status"));
    }

    // ==========================================================================
    // Story: Persistent tokens
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn persistent_token_ready_after_third_read() {
        let reads = Arc::new(AtomicU32::new(0));
        let counter = reads.clone();

        let mut client = MockRemoteAccessClient::new();
        client
            .expect_create_secret()
            .withf(|ns, s| ns == "ns1" && s.type_.as_deref() == Some(SERVICE_ACCOUNT_TOKEN_TYPE))
            .times(1)
            .returning(|_, s| Ok(s.clone()));
        client.expect_get_secret().returning(move |_, _| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(secret_with(None)),
                1 => Ok(secret_with(Some(BTreeMap::new()))),
                _ => Ok(populated_secret("long-lived")),
            }
        });

        let start = Instant::now();
        let token = TokenAcquirer::new(&client)
            .acquire("ns1", "sa1", TokenStrategy::Persistent)
            .await
            .unwrap();
        let waited = start.elapsed();

        assert_eq!(token, "long-lived");
        assert_eq!(reads.load(Ordering::SeqCst), 3);
        // two waits: [1.5s, 2.5s) then [3s, 4s)
        assert!(waited >= min_wait(2), "waited {waited:?}");
        assert!(waited < min_wait(2) + Duration::from_secs(2), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_token_tolerates_missing_secret_and_read_errors() {
        let reads = Arc::new(AtomicU32::new(0));
        let counter = reads.clone();

        let mut client = MockRemoteAccessClient::new();
        client
            .expect_create_secret()
            .returning(|_, _| Err(api_error(409, "AlreadyExists")));
        client.expect_get_secret().returning(move |_, _| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(api_error(404, "NotFound")),
                1 => Err(api_error(500, "InternalError")),
                _ => Ok(populated_secret("tok")),
            }
        });

        let token = TokenAcquirer::new(&client)
            .persistent("ns1", "sa1")
            .await
            .unwrap();
        assert_eq!(token, "tok");
        assert_eq!(reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_token_gives_up_after_five_reads() {
        let reads = Arc::new(AtomicU32::new(0));
        let counter = reads.clone();

        let mut client = MockRemoteAccessClient::new();
        client.expect_create_secret().returning(|_, s| Ok(s.clone()));
        client.expect_get_secret().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(secret_with(None))
        });

        let start = Instant::now();
        let err = TokenAcquirer::new(&client)
            .persistent("ns1", "sa1")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RetriesExceeded { attempts: 5, .. }));
        assert_eq!(reads.load(Ordering::SeqCst), 5);
        // four waits between five reads, none after the last
        let waited = start.elapsed();
        assert!(waited >= min_wait(4));
        assert!(waited < min_wait(4) + Duration::from_secs(4));
    }

    #[tokio::test]
    async fn secret_create_failure_stops_before_polling() {
        let mut client = MockRemoteAccessClient::new();
        client
            .expect_create_secret()
            .returning(|_, _| Err(api_error(403, "Forbidden")));
        client.expect_get_secret().never();

        let err = TokenAcquirer::new(&client)
            .persistent("ns1", "sa1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Kube { .. }));
    }

    #[tokio::test]
    async fn undecodable_secret_token_is_terminal() {
        let mut client = MockRemoteAccessClient::new();
        client.expect_get_secret().times(1).returning(|_, _| {
            Ok(secret_with(Some(BTreeMap::from([(
                TOKEN_KEY.to_string(),
                ByteString(vec![0xc3, 0x28]),
            )]))))
        });

        let err = TokenAcquirer::new(&client)
            .wait_for_secret_token("ns1", "sa1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResponse { .. }));
    }

    // ==========================================================================
    // Story: Cancellation
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_the_poll_mid_wait() {
        let reads = Arc::new(AtomicU32::new(0));
        let counter = reads.clone();

        let mut client = MockRemoteAccessClient::new();
        client.expect_get_secret().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(secret_with(None))
        });

        let start = Instant::now();
        let deadline = start + Duration::from_secs(4);
        let err = TokenAcquirer::new(&client)
            .with_cancellation(Cancellation::none().with_deadline(deadline))
            .wait_for_secret_token("ns1", "sa1")
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        // first wait ends before 2.5s, second ends after 4.5s
        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_any_read() {
        let mut client = MockRemoteAccessClient::new();
        client.expect_get_secret().never();

        let token = CancellationToken::new();
        token.cancel();

        let err = TokenAcquirer::new(&client)
            .with_cancellation(Cancellation::new(token, None))
            .wait_for_secret_token("ns1", "sa1")
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn custom_policy_bounds_attempts() {
        let mut client = MockRemoteAccessClient::new();
        client
            .expect_get_secret()
            .times(2)
            .returning(|_, _| Ok(secret_with(None)));

        let policy = BackoffPolicy {
            max_attempts: 2,
            base: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
        };
        let err = TokenAcquirer::new(&client)
            .with_backoff(policy)
            .wait_for_secret_token("ns1", "sa1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExceeded { attempts: 2, .. }));
    }
}
