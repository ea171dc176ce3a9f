//! Sign-up and sign-in flows.
//!
//! Both flows are single-shot: validate, consult the credential store, and
//! hand back a signed token. Nothing is written unless every check before
//! the final `save` has passed.

use std::sync::Arc;

use serde::Deserialize;

use crate::crypto::{hash_password, verify_password, TokenIssuer};
use crate::db::{CredentialStore, Role, User};
use crate::error::{AuthError, StoreError};

#[derive(Clone, Default, Deserialize)]
pub struct SignUpRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Username and plaintext password, used only while validating a sign-in.
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    tokens: Arc<TokenIssuer>,
}

impl AuthService {
    pub fn new(store: Arc<dyn CredentialStore>, tokens: Arc<TokenIssuer>) -> Self {
        Self { store, tokens }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub async fn sign_up(&self, req: &SignUpRequest) -> Result<String, AuthError> {
        require_present(&[
            ("username", &req.username),
            ("email", &req.email),
            ("password", &req.password),
        ])?;

        if self.store.find_by_username(&req.username).await?.is_some() {
            tracing::debug!(username = %req.username, "Sign-up rejected, username taken");
            return Err(AuthError::UserAlreadyExists);
        }

        let password_hash = hash_password(&req.password)?;
        let user = User::new(&req.username, &req.email, password_hash, Role::User);

        // A concurrent sign-up can win between the lookup and the insert.
        match self.store.save(&user).await {
            Ok(()) => {}
            Err(StoreError::DuplicateUser(_)) => return Err(AuthError::UserAlreadyExists),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(username = %user.username, user_id = %user.id, "User signed up");
        Ok(self.tokens.issue(&user)?)
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> Result<String, AuthError> {
        require_present(&[
            ("username", &credentials.username),
            ("password", &credentials.password),
        ])?;

        let user = self.authenticate(credentials).await?;

        tracing::info!(username = %user.username, "User signed in");
        Ok(self.tokens.issue(&user)?)
    }

    /// Look the user up once and verify the password against the stored hash.
    ///
    /// An unknown user yields `UserNotFound` and a mismatch yields
    /// `IncorrectPassword`; `AuthenticationFailed` is reserved for a stored
    /// credential that cannot be checked at all.
    async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthError> {
        let user = self
            .store
            .find_by_username(&credentials.username)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !verify_password(&credentials.password, &user.password_hash)? {
            tracing::debug!(username = %user.username, "Sign-in rejected, wrong password");
            return Err(AuthError::IncorrectPassword);
        }

        Ok(user)
    }
}

fn require_present(fields: &[(&str, &String)]) -> Result<(), AuthError> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AuthError::InvalidData(format!("missing {}", missing.join(", "))))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::crypto::TokenAlgorithm;
    use crate::db::users::test_support::memory_pool;
    use crate::db::UserRepository;

    /// Wraps a store and counts every call made through it.
    struct CountingStore {
        inner: UserRepository,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialStore for CountingStore {
        async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_username(username).await
        }

        async fn save(&self, user: &User) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.save(user).await
        }
    }

    /// Lookups never see an existing user, so `save` is where a concurrent
    /// sign-up that got in first shows up.
    struct LateInsertStore {
        inner: UserRepository,
    }

    #[async_trait]
    impl CredentialStore for LateInsertStore {
        async fn find_by_username(&self, _username: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }

        async fn save(&self, user: &User) -> Result<(), StoreError> {
            self.inner.save(user).await
        }
    }

    async fn setup() -> (AuthService, Arc<CountingStore>) {
        let store = Arc::new(CountingStore {
            inner: UserRepository::new(memory_pool().await),
            calls: AtomicUsize::new(0),
        });
        let tokens = Arc::new(TokenIssuer::new(b"test-secret", TokenAlgorithm::HS256, 24));
        (AuthService::new(store.clone(), tokens), store)
    }

    fn signup(username: &str, email: &str, password: &str) -> SignUpRequest {
        SignUpRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    fn creds(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_sign_up_issues_user_token() {
        let (auth, store) = setup().await;

        let token = auth.sign_up(&signup("alice", "a@x.com", "pw1")).await.unwrap();

        let claims = auth.tokens().validate(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.role, Role::User);
        assert_eq!(store.inner.count().await.unwrap(), 1);

        let stored = store.inner.find_by_username("alice").await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "pw1");
    }

    #[tokio::test]
    async fn test_sign_up_duplicate_leaves_store_unchanged() {
        let (auth, store) = setup().await;
        auth.sign_up(&signup("alice", "a@x.com", "pw1")).await.unwrap();
        let before = store.inner.find_by_username("alice").await.unwrap().unwrap();

        let err = auth.sign_up(&signup("alice", "b@y.com", "pw2")).await.unwrap_err();

        assert!(matches!(err, AuthError::UserAlreadyExists));
        assert_eq!(store.inner.count().await.unwrap(), 1);
        let after = store.inner.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(after.email, before.email);
        assert_eq!(after.password_hash, before.password_hash);
    }

    #[tokio::test]
    async fn test_missing_fields_rejected_before_store_access() {
        let (auth, store) = setup().await;

        let bad_signups = [
            signup("", "a@x.com", "pw"),
            signup("alice", "", "pw"),
            signup("alice", "a@x.com", ""),
            SignUpRequest::default(),
        ];
        for req in &bad_signups {
            assert!(matches!(auth.sign_up(req).await, Err(AuthError::InvalidData(_))));
        }

        for c in [creds("", "pw"), creds("alice", ""), creds("  ", "pw")] {
            assert!(matches!(auth.sign_in(&c).await, Err(AuthError::InvalidData(_))));
        }

        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sign_in_outcomes() {
        let (auth, _store) = setup().await;
        auth.sign_up(&signup("alice", "a@x.com", "pw1")).await.unwrap();

        let token = auth.sign_in(&creds("alice", "pw1")).await.unwrap();
        assert_eq!(auth.tokens().validate(&token).unwrap().sub, "alice");

        assert!(matches!(
            auth.sign_in(&creds("alice", "wrong")).await,
            Err(AuthError::IncorrectPassword)
        ));
        assert!(matches!(
            auth.sign_in(&creds("bob", "pw1")).await,
            Err(AuthError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_unreadable_stored_hash_fails_authentication() {
        let (auth, store) = setup().await;
        store
            .inner
            .save(&User::new("legacy", "l@x.com", "plaintext".to_string(), Role::User))
            .await
            .unwrap();

        assert!(matches!(
            auth.sign_in(&creds("legacy", "plaintext")).await,
            Err(AuthError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_up_losing_insert_race_is_already_exists() {
        let inner = UserRepository::new(memory_pool().await);
        let winner = User::new("alice", "a@x.com", hash_password("pw1").unwrap(), Role::User);
        inner.save(&winner).await.unwrap();

        let store = Arc::new(LateInsertStore { inner });
        let tokens = Arc::new(TokenIssuer::new(b"test-secret", TokenAlgorithm::HS256, 24));
        let auth = AuthService::new(store.clone(), tokens);

        let err = auth.sign_up(&signup("alice", "b@y.com", "pw2")).await.unwrap_err();

        assert!(matches!(err, AuthError::UserAlreadyExists));
        assert_eq!(store.inner.count().await.unwrap(), 1);
        let stored = store.inner.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(stored.email, "a@x.com");
    }
}
