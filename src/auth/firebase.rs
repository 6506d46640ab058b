//! Firebase Auth REST implementation of the identity provider.
//!
//! Email/password accounts via the identitytoolkit endpoints; refresh via
//! the securetoken endpoint. All requests carry the project's web API key.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{AuthError, IdentityProvider, Session};

const IDENTITY_BASE: &str = "https://identitytoolkit.googleapis.com/v1";
const TOKEN_BASE: &str = "https://securetoken.googleapis.com/v1";

/// Firebase Auth REST client.
pub struct FirebaseAuth {
    http: reqwest::Client,
    api_key: String,
}

// -- Response types for the identity endpoints --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
    local_id: String,
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
    email: Option<String>,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    users: Option<Vec<LookupUser>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

#[derive(Debug, Deserialize)]
struct RefreshPayload {
    id_token: String,
    refresh_token: String,
    user_id: String,
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl FirebaseAuth {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
        }
    }

    /// POST to an identitytoolkit account endpoint.
    async fn accounts_post(
        &self,
        action: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, AuthError> {
        let url = format!("{}/accounts:{}?key={}", IDENTITY_BASE, action, self.api_key);
        tracing::debug!("Identity POST accounts:{}", action);

        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("accounts:{} failed: {}", action, e)))?;
        check_response(resp, action).await
    }

    /// Fetch account state (verified flag, profile) for an id token.
    async fn lookup(&self, id_token: &str) -> Result<LookupUser, AuthError> {
        let resp = self
            .accounts_post("lookup", &json!({ "idToken": id_token }))
            .await?;
        let body: LookupResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("lookup parse failed: {}", e)))?;
        body.users
            .and_then(|mut users| if users.is_empty() { None } else { Some(users.remove(0)) })
            .ok_or_else(|| AuthError::Network("lookup returned no account".to_string()))
    }
}

/// Check a response and map identity error codes onto the taxonomy.
async fn check_response(resp: reqwest::Response, action: &str) -> Result<reqwest::Response, AuthError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .ok()
        .and_then(|envelope| envelope.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| format!("HTTP {} for accounts:{}", status.as_u16(), action));
    Err(map_auth_error(&message))
}

fn map_auth_error(message: &str) -> AuthError {
    if message.starts_with("EMAIL_EXISTS") {
        AuthError::EmailInUse
    } else if message.starts_with("WEAK_PASSWORD") {
        AuthError::WeakPassword
    } else if message.starts_with("INVALID_PASSWORD")
        || message.starts_with("EMAIL_NOT_FOUND")
        || message.starts_with("INVALID_LOGIN_CREDENTIALS")
    {
        AuthError::InvalidCredential
    } else {
        AuthError::Network(message.to_string())
    }
}

fn parse_expires(expires_in: Option<&str>) -> Option<u64> {
    expires_in.and_then(|s| s.parse().ok())
}

#[async_trait]
impl IdentityProvider for FirebaseAuth {
    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Session, AuthError> {
        let resp = self
            .accounts_post(
                "signUp",
                &json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;
        let payload: TokenPayload = resp
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("signUp parse failed: {}", e)))?;

        // Attach the display name to the new account.
        self.accounts_post(
            "update",
            &json!({
                "idToken": payload.id_token,
                "displayName": display_name,
                "returnSecureToken": false,
            }),
        )
        .await?;

        Ok(Session {
            uid: payload.local_id,
            email: email.to_string(),
            display_name: display_name.to_string(),
            id_token: payload.id_token,
            refresh_token: payload.refresh_token,
            expires_in: parse_expires(payload.expires_in.as_deref()),
            email_verified: false,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let resp = self
            .accounts_post(
                "signInWithPassword",
                &json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;
        let payload: TokenPayload = resp
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("signIn parse failed: {}", e)))?;

        let account = self.lookup(&payload.id_token).await?;

        Ok(Session {
            uid: payload.local_id,
            email: account.email.or(payload.email).unwrap_or_else(|| email.to_string()),
            display_name: account
                .display_name
                .or(payload.display_name)
                .unwrap_or_default(),
            id_token: payload.id_token,
            refresh_token: payload.refresh_token,
            expires_in: parse_expires(payload.expires_in.as_deref()),
            email_verified: account.email_verified,
        })
    }

    async fn send_verification(&self, session: &Session) -> Result<(), AuthError> {
        self.accounts_post(
            "sendOobCode",
            &json!({ "requestType": "VERIFY_EMAIL", "idToken": session.id_token }),
        )
        .await?;
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let url = format!("{}/token?key={}", TOKEN_BASE, self.api_key);
        tracing::debug!("Identity POST token (refresh)");

        let resp = self
            .http
            .post(&url)
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("token refresh failed: {}", e)))?;
        let resp = check_response(resp, "token").await?;
        let payload: RefreshPayload = resp
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("refresh parse failed: {}", e)))?;

        let account = self.lookup(&payload.id_token).await?;

        Ok(Session {
            uid: payload.user_id,
            email: account.email.unwrap_or_default(),
            display_name: account.display_name.unwrap_or_default(),
            id_token: payload.id_token,
            refresh_token: payload.refresh_token,
            expires_in: parse_expires(payload.expires_in.as_deref()),
            email_verified: account.email_verified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert!(matches!(map_auth_error("EMAIL_EXISTS"), AuthError::EmailInUse));
        assert!(matches!(
            map_auth_error("WEAK_PASSWORD : Password should be at least 6 characters"),
            AuthError::WeakPassword
        ));
        assert!(matches!(
            map_auth_error("INVALID_LOGIN_CREDENTIALS"),
            AuthError::InvalidCredential
        ));
        assert!(matches!(
            map_auth_error("EMAIL_NOT_FOUND"),
            AuthError::InvalidCredential
        ));
        assert!(matches!(map_auth_error("QUOTA_EXCEEDED"), AuthError::Network(_)));
    }

    #[test]
    fn test_parse_expires() {
        assert_eq!(parse_expires(Some("3600")), Some(3600));
        assert_eq!(parse_expires(Some("bogus")), None);
        assert_eq!(parse_expires(None), None);
    }
}
