//! HTTP Basic authentication.
//!
//! Credentials are checked against the host's account database (PAM, when the
//! `pam` feature is compiled in and the service is configured on the host) and
//! then against a single static pair taken from the environment. Every request
//! is authenticated on its own; nothing is cached between requests.

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Basic, Authorization, HeaderMapExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::FileServerError;
use crate::AppState;

/// Username/password pair lifted from a single request.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn masked_password(&self) -> String {
        mask_password(&self.password)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.masked_password())
            .finish()
    }
}

/// Keep the first two characters of a password and star out the rest.
pub fn mask_password(password: &str) -> String {
    let visible: String = password.chars().take(2).collect();
    let hidden = password.chars().count().saturating_sub(2);
    format!("{}{}", visible, "*".repeat(hidden))
}

/// A host-level account backend.
pub trait SystemAuth: Send + Sync {
    /// Backend name, announced as the Basic realm.
    fn name(&self) -> &str;

    /// Whether this backend can be used on the current host at all.
    fn is_available(&self) -> bool;

    fn verify(&self, credentials: &Credentials) -> bool;
}

#[cfg(feature = "pam")]
pub struct PamAuth {
    service: String,
}

#[cfg(feature = "pam")]
impl PamAuth {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

#[cfg(feature = "pam")]
impl SystemAuth for PamAuth {
    fn name(&self) -> &str {
        "PAM"
    }

    fn is_available(&self) -> bool {
        std::path::Path::new("/etc/pam.d")
            .join(&self.service)
            .exists()
    }

    fn verify(&self, credentials: &Credentials) -> bool {
        let mut authenticator = match pam::Authenticator::with_password(&self.service) {
            Ok(authenticator) => authenticator,
            Err(err) => {
                warn!("Failed to start PAM conversation for {}: {:?}", self.service, err);
                return false;
            }
        };
        authenticator
            .get_handler()
            .set_credentials(credentials.username.as_str(), credentials.password());

        match authenticator.authenticate() {
            Ok(()) => true,
            Err(err) => {
                debug!("PAM rejected {:?}: {:?}", credentials.username, err);
                false
            }
        }
    }
}

/// The system backend compiled into this build, if any.
#[cfg(feature = "pam")]
pub fn system_backend(config: &Config) -> Option<Arc<dyn SystemAuth>> {
    Some(Arc::new(PamAuth::new(config.pam_service.clone())))
}

#[cfg(not(feature = "pam"))]
pub fn system_backend(_config: &Config) -> Option<Arc<dyn SystemAuth>> {
    None
}

/// Single username/password pair configured through the environment.
#[derive(Clone)]
pub struct StaticCredentials {
    username: String,
    password: String,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both halves must be present and non-empty for the pair to count as
    /// configured.
    pub fn from_pair(username: Option<String>, password: Option<String>) -> Option<Self> {
        match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Self::new(username, password))
            }
            _ => None,
        }
    }

    pub fn matches(&self, credentials: &Credentials) -> bool {
        let username_ok = digest_eq(&self.username, &credentials.username);
        let password_ok = digest_eq(&self.password, credentials.password());
        username_ok & password_ok
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .field("password", &mask_password(&self.password))
            .finish()
    }
}

fn digest_eq(expected: &str, supplied: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let supplied = Sha256::digest(supplied.as_bytes());
    expected
        .iter()
        .zip(supplied.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny { realm: String },
    /// No backend is configured or usable on this host.
    Unavailable,
}

impl AuthDecision {
    pub fn into_result(self) -> Result<(), FileServerError> {
        match self {
            AuthDecision::Allow => Ok(()),
            AuthDecision::Deny { realm } => Err(FileServerError::Unauthorized { realm }),
            AuthDecision::Unavailable => Err(FileServerError::AuthUnavailable),
        }
    }
}

pub struct Authenticator {
    system: Option<Arc<dyn SystemAuth>>,
    static_pair: Option<StaticCredentials>,
    realm: String,
}

impl Authenticator {
    /// Build an authenticator. A system backend that reports itself
    /// unavailable is dropped here and never consulted.
    pub fn new(
        system: Option<Arc<dyn SystemAuth>>,
        static_pair: Option<StaticCredentials>,
        realm: impl Into<String>,
    ) -> Self {
        let system = system.filter(|backend| {
            let available = backend.is_available();
            if available {
                info!("{} authentication enabled", backend.name());
            } else {
                info!("{} authentication unavailable on this host, skipping", backend.name());
            }
            available
        });

        if system.is_none() && static_pair.is_none() {
            warn!("No authentication backend configured; all requests will be refused");
        }

        Self {
            system,
            static_pair,
            realm: realm.into(),
        }
    }

    pub fn from_config(config: &Config, static_pair: Option<StaticCredentials>) -> Self {
        Self::new(system_backend(config), static_pair, config.realm.clone())
    }

    pub fn is_available(&self) -> bool {
        self.system.is_some() || self.static_pair.is_some()
    }

    pub fn realm(&self) -> &str {
        match &self.system {
            Some(backend) => backend.name(),
            None => &self.realm,
        }
    }

    /// Decide whether `credentials` may access the server. May block on the
    /// system backend.
    pub fn authenticate(&self, credentials: Option<&Credentials>) -> AuthDecision {
        if !self.is_available() {
            return AuthDecision::Unavailable;
        }

        let Some(credentials) = credentials else {
            debug!("Request carried no Basic credentials");
            return self.deny();
        };

        debug!(
            "Authorising username {:?} with password {:?}",
            credentials.username,
            credentials.masked_password()
        );

        if let Some(backend) = &self.system {
            if backend.verify(credentials) {
                return AuthDecision::Allow;
            }
        }

        if let Some(pair) = &self.static_pair {
            if pair.matches(credentials) {
                return AuthDecision::Allow;
            }
        }

        warn!("Rejected credentials for username {:?}", credentials.username);
        self.deny()
    }

    fn deny(&self) -> AuthDecision {
        AuthDecision::Deny {
            realm: self.realm().to_string(),
        }
    }
}

/// Middleware gating every route behind [`Authenticator::authenticate`].
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, FileServerError> {
    let credentials = request
        .headers()
        .typed_get::<Authorization<Basic>>()
        .map(|header| Credentials::new(header.username(), header.password()));

    let authenticator = state.auth.clone();
    let decision =
        tokio::task::spawn_blocking(move || authenticator.authenticate(credentials.as_ref()))
            .await
            .map_err(|err| {
                FileServerError::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
            })?;

    decision.into_result()?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSystem {
        available: bool,
        username: &'static str,
        password: &'static str,
    }

    impl SystemAuth for FakeSystem {
        fn name(&self) -> &str {
            "FAKE"
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn verify(&self, credentials: &Credentials) -> bool {
            credentials.username == self.username && credentials.password() == self.password
        }
    }

    fn fake_system(available: bool) -> Option<Arc<dyn SystemAuth>> {
        Some(Arc::new(FakeSystem {
            available,
            username: "alice",
            password: "wonderland",
        }))
    }

    fn static_only() -> Authenticator {
        Authenticator::new(None, Some(StaticCredentials::new("admin", "hunter22")), "files")
    }

    #[test]
    fn test_mask_password() {
        assert_eq!(mask_password("secret"), "se****");
        assert_eq!(mask_password("ab"), "ab");
        assert_eq!(mask_password("a"), "a");
        assert_eq!(mask_password(""), "");
        assert_eq!(mask_password("pässwörd"), "pä******");
    }

    #[test]
    fn test_credentials_debug_is_masked() {
        let credentials = Credentials::new("admin", "hunter22");
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("admin"));
        assert!(debug.contains("hu******"));
        assert!(!debug.contains("hunter22"));

        let pair = StaticCredentials::new("admin", "hunter22");
        assert!(!format!("{:?}", pair).contains("hunter22"));
    }

    #[test]
    fn test_static_pair_requires_both_values() {
        assert!(StaticCredentials::from_pair(Some("u".into()), Some("p".into())).is_some());
        assert!(StaticCredentials::from_pair(Some("u".into()), None).is_none());
        assert!(StaticCredentials::from_pair(None, Some("p".into())).is_none());
        assert!(StaticCredentials::from_pair(Some("".into()), Some("p".into())).is_none());
    }

    #[test]
    fn test_static_pair_allows_valid_credentials() {
        let auth = static_only();
        let decision = auth.authenticate(Some(&Credentials::new("admin", "hunter22")));
        assert_eq!(decision, AuthDecision::Allow);
    }

    #[test]
    fn test_static_pair_denies_invalid_credentials() {
        let auth = static_only();
        for (user, pass) in [("admin", "hunter2"), ("root", "hunter22"), ("", ""), ("admin", "")] {
            let decision = auth.authenticate(Some(&Credentials::new(user, pass)));
            assert_eq!(
                decision,
                AuthDecision::Deny {
                    realm: "files".to_string()
                }
            );
        }
    }

    #[test]
    fn test_missing_credentials_are_denied() {
        let auth = static_only();
        assert!(matches!(auth.authenticate(None), AuthDecision::Deny { .. }));
    }

    #[test]
    fn test_no_backend_is_unavailable() {
        let auth = Authenticator::new(None, None, "files");
        assert!(!auth.is_available());
        assert_eq!(auth.authenticate(None), AuthDecision::Unavailable);
        assert_eq!(
            auth.authenticate(Some(&Credentials::new("admin", "hunter22"))),
            AuthDecision::Unavailable
        );
    }

    #[test]
    fn test_unavailable_system_backend_is_skipped() {
        let auth = Authenticator::new(
            fake_system(false),
            Some(StaticCredentials::new("admin", "hunter22")),
            "files",
        );
        assert_eq!(auth.realm(), "files");
        assert_eq!(
            auth.authenticate(Some(&Credentials::new("admin", "hunter22"))),
            AuthDecision::Allow
        );
        assert!(matches!(
            auth.authenticate(Some(&Credentials::new("alice", "wonderland"))),
            AuthDecision::Deny { .. }
        ));

        let auth = Authenticator::new(fake_system(false), None, "files");
        assert_eq!(auth.authenticate(None), AuthDecision::Unavailable);
    }

    #[test]
    fn test_system_backend_then_static_pair() {
        let auth = Authenticator::new(
            fake_system(true),
            Some(StaticCredentials::new("admin", "hunter22")),
            "files",
        );
        assert_eq!(auth.realm(), "FAKE");
        assert_eq!(
            auth.authenticate(Some(&Credentials::new("alice", "wonderland"))),
            AuthDecision::Allow
        );
        assert_eq!(
            auth.authenticate(Some(&Credentials::new("admin", "hunter22"))),
            AuthDecision::Allow
        );
        assert_eq!(
            auth.authenticate(Some(&Credentials::new("alice", "nope"))),
            AuthDecision::Deny {
                realm: "FAKE".to_string()
            }
        );
    }

    #[test]
    fn test_decision_maps_to_errors() {
        assert!(AuthDecision::Allow.into_result().is_ok());
        assert!(matches!(
            AuthDecision::Unavailable.into_result(),
            Err(FileServerError::AuthUnavailable)
        ));
        assert!(matches!(
            AuthDecision::Deny { realm: "x".into() }.into_result(),
            Err(FileServerError::Unauthorized { .. })
        ));
    }
}
