//! Authentication against the hosted identity service.
//!
//! The provider is consumed through the `IdentityProvider` trait so command
//! flows can be exercised against an in-memory fake; the real implementation
//! is the Firebase Auth REST API in `firebase.rs`.

pub mod firebase;
pub mod tokens;

pub use firebase::FirebaseAuth;
pub use tokens::StoredToken;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by the identity provider.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("email address is already registered")]
    EmailInUse,
    #[error("password is too weak (minimum 6 characters)")]
    WeakPassword,
    #[error("invalid email or password")]
    InvalidCredential,
    #[error("email address has not been verified -- check your inbox")]
    UnverifiedEmail,
    #[error("identity service request failed: {0}")]
    Network(String),
}

/// An authenticated session as returned by the identity provider.
#[derive(Debug, Clone)]
pub struct Session {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: Option<u64>,
    pub email_verified: bool,
}

/// The identity provider collaborator.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create a new account. The returned session is unverified; callers
    /// must not persist it until the address is confirmed.
    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Session, AuthError>;

    /// Sign in with email and password.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Send a verification mail for a freshly registered session.
    async fn send_verification(&self, session: &Session) -> Result<(), AuthError>;

    /// Exchange a refresh token for a fresh session.
    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError>;
}

/// Sign in and enforce the verified-address requirement client-side.
///
/// The backend issues sessions for unverified accounts; those are rejected
/// here and never persisted.
pub async fn sign_in_verified(
    provider: &dyn IdentityProvider,
    email: &str,
    password: &str,
) -> Result<Session, AuthError> {
    let session = provider.sign_in(email, password).await?;
    if !session.email_verified {
        return Err(AuthError::UnverifiedEmail);
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider {
        verified: bool,
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        async fn register(
            &self,
            email: &str,
            _password: &str,
            display_name: &str,
        ) -> Result<Session, AuthError> {
            Ok(self.session(email, display_name, false))
        }

        async fn sign_in(&self, email: &str, _password: &str) -> Result<Session, AuthError> {
            Ok(self.session(email, "Test User", self.verified))
        }

        async fn send_verification(&self, _session: &Session) -> Result<(), AuthError> {
            Ok(())
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<Session, AuthError> {
            Ok(self.session("t@example.com", "Test User", self.verified))
        }
    }

    impl FakeProvider {
        fn session(&self, email: &str, display_name: &str, verified: bool) -> Session {
            Session {
                uid: "u1".to_string(),
                email: email.to_string(),
                display_name: display_name.to_string(),
                id_token: "id".to_string(),
                refresh_token: "refresh".to_string(),
                expires_in: Some(3600),
                email_verified: verified,
            }
        }
    }

    #[tokio::test]
    async fn test_sign_in_rejects_unverified_email() {
        let provider = FakeProvider { verified: false };
        let result = sign_in_verified(&provider, "t@example.com", "pw").await;
        assert!(matches!(result, Err(AuthError::UnverifiedEmail)));
    }

    #[tokio::test]
    async fn test_sign_in_accepts_verified_email() {
        let provider = FakeProvider { verified: true };
        let session = sign_in_verified(&provider, "t@example.com", "pw")
            .await
            .unwrap();
        assert!(session.email_verified);
        assert_eq!(session.uid, "u1");
    }
}
