//! Azure AD (v2.0 endpoints) OpenID Connect sign-in.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use log::{debug, info};
use openid::{DiscoveredClient, Options, Token};
use rand::RngCore;
use reqwest::Url;
use serde::Deserialize;

use crate::{config::Config, entity::User, error::Error};

/// Authorize redirect plus the values that must be remembered in the session.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub nonce: String,
}

/// The identity claims this application reads from an ID token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTokenClaims {
    pub preferred_username: Option<String>,
    pub upn: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub nonce: Option<String>,
}

impl IdTokenClaims {
    /// Fails only when both sides carry a nonce and they differ.
    pub fn check_nonce(&self, expected: Option<&str>) -> Result<(), Error> {
        match (expected, self.nonce.as_deref()) {
            (Some(expected), Some(actual))
                if !expected.is_empty() && !actual.is_empty() && expected != actual =>
            {
                Err(Error::InvalidNonce)
            }
            _ => Ok(()),
        }
    }

    /// Email from `preferred_username`, `upn` or `email` (first non-empty wins);
    /// the display name falls back to the email's local part.
    pub fn resolve_user(&self) -> Result<User, Error> {
        let email = [&self.preferred_username, &self.upn, &self.email]
            .into_iter()
            .flatten()
            .find(|value| !value.is_empty())
            .cloned()
            .ok_or(Error::MissingEmail)?;

        let name = match self.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => email.split('@').next().unwrap_or_default().to_string(),
        };

        Ok(User { email, name })
    }
}

/// Parses the JWT payload into [`IdTokenClaims`].
///
/// This only checks the token's shape. The claims are not to be trusted until
/// [`OidcClient::sign_in`] has verified the signature.
pub fn read_claims(id_token: &str) -> Result<IdTokenClaims, Error> {
    let mut parts = id_token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(Error::MalformedIdToken("expected three segments".into())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::MalformedIdToken(e.to_string()))?;

    serde_json::from_slice(&bytes).map_err(|e| Error::MalformedIdToken(e.to_string()))
}

/// Sixteen random bytes, base64url encoded.
pub fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `{authority}/oauth2/v2.0/logout?post_logout_redirect_uri=<target>`.
fn logout_location(endpoint: &Url, post_logout_redirect: &str) -> String {
    let mut url = endpoint.clone();
    url.query_pairs_mut()
        .append_pair("post_logout_redirect_uri", post_logout_redirect);
    url.into()
}

pub struct OidcClient {
    client: DiscoveredClient,
    scope: String,
    logout_url: Url,
}

impl OidcClient {
    /// Reads `{OIDC_AUTHORITY}/v2.0/.well-known/openid-configuration` and the
    /// signing keys it points at.
    pub async fn discover(config: &Config) -> Result<Self, Error> {
        let issuer = Url::parse(&format!("{}/v2.0", config.oidc_authority))
            .map_err(|e| Error::Config(format!("OIDC_AUTHORITY: {e}")))?;
        let logout_url = Url::parse(&format!("{}/oauth2/v2.0/logout", config.oidc_authority))
            .map_err(|e| Error::Config(format!("OIDC_AUTHORITY: {e}")))?;

        info!("discovering identity provider at {issuer}");

        // TODO: refetch the key set when a token names an unknown `kid`; Azure AD rotates keys.
        let client = DiscoveredClient::discover(
            config.client_id.clone(),
            config.client_secret.clone(),
            Some(config.oidc_redirect_uri.to_string()),
            issuer.clone(),
        )
        .await
        .map_err(|e| Error::Config(format!("OIDC discovery at {issuer} failed: {e}")))?;

        Ok(Self {
            client,
            scope: config.oidc_scopes.join(" "),
            logout_url,
        })
    }

    /// Fresh `state` and `nonce` and the authorize URL carrying them.
    pub fn authorization_request(&self) -> AuthorizationRequest {
        let state = random_token();
        let nonce = random_token();

        let mut url = self.client.auth_url(&Options {
            scope: Some(self.scope.clone()),
            state: Some(state.clone()),
            nonce: Some(nonce.clone()),
            ..Default::default()
        });
        url.query_pairs_mut().append_pair("response_mode", "query");

        AuthorizationRequest {
            url: url.into(),
            state,
            nonce,
        }
    }

    /// Redeems `code`, verifies the ID token and resolves the user it names.
    ///
    /// Signature (against the discovered key set), issuer, audience and expiry
    /// are checked by `openid`. The nonce is compared here so that a token
    /// without one is still accepted.
    pub async fn sign_in(&self, code: &str, expected_nonce: Option<&str>) -> Result<User, Error> {
        let bearer = self
            .client
            .request_token(code)
            .await
            .map_err(|e| Error::TokenExchange(e.to_string()))?;

        let raw = bearer
            .id_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(Error::MissingIdToken)?;
        let claims = read_claims(&raw)?;

        let mut token: Token = bearer.into();
        let id_token = token.id_token.as_mut().ok_or(Error::MissingIdToken)?;
        self.client
            .decode_token(id_token)
            .map_err(|e| Error::InvalidIdToken(e.to_string()))?;

        claims.check_nonce(expected_nonce)?;
        // a nonce in the token is ours by now; openid only checks it for presence
        self.client
            .validate_token(id_token, claims.nonce.as_deref(), None)
            .map_err(|e| Error::InvalidIdToken(e.to_string()))?;
        debug!("id_token verified");

        claims.resolve_user()
    }

    pub fn logout_url(&self, post_logout_redirect: &str) -> String {
        logout_location(&self.logout_url, post_logout_redirect)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn preferred_username_and_name() {
        let token = jwt(json!({"preferred_username": "a@b.com", "name": "A B"}));
        let user = read_claims(&token).unwrap().resolve_user().unwrap();
        assert_eq!(
            user,
            User {
                email: "a@b.com".into(),
                name: "A B".into()
            }
        );
    }

    #[test]
    fn name_defaults_to_local_part() {
        let token = jwt(json!({"email": "x@y.com"}));
        let user = read_claims(&token).unwrap().resolve_user().unwrap();
        assert_eq!(user.email, "x@y.com");
        assert_eq!(user.name, "x");
    }

    #[test]
    fn email_claim_priority() {
        let claims = IdTokenClaims {
            upn: Some("upn@contoso.com".into()),
            email: Some("mail@contoso.com".into()),
            ..Default::default()
        };
        assert_eq!(claims.resolve_user().unwrap().email, "upn@contoso.com");

        let claims = IdTokenClaims {
            preferred_username: Some(String::new()),
            email: Some("mail@contoso.com".into()),
            name: Some(String::new()),
            ..Default::default()
        };
        let user = claims.resolve_user().unwrap();
        assert_eq!(user.email, "mail@contoso.com");
        assert_eq!(user.name, "mail");
    }

    #[test]
    fn no_email_claim() {
        let claims = IdTokenClaims {
            name: Some("Nobody".into()),
            ..Default::default()
        };
        assert!(matches!(claims.resolve_user(), Err(Error::MissingEmail)));
    }

    #[test]
    fn nonce_only_checked_when_both_present() {
        let claims = IdTokenClaims {
            nonce: Some("n1".into()),
            ..Default::default()
        };
        assert!(claims.check_nonce(Some("n1")).is_ok());
        assert!(claims.check_nonce(None).is_ok());
        assert!(matches!(claims.check_nonce(Some("n2")), Err(Error::InvalidNonce)));
        assert!(IdTokenClaims::default().check_nonce(Some("n1")).is_ok());
    }

    #[test]
    fn padded_payload_is_accepted() {
        let header = URL_SAFE_NO_PAD.encode(b"{}");
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"upn":"p@q.io"}"#);
        let claims = read_claims(&format!("{header}.{payload}.")).unwrap();
        assert_eq!(claims.upn.as_deref(), Some("p@q.io"));
    }

    #[test]
    fn malformed_tokens() {
        assert!(matches!(
            read_claims("not-a-jwt"),
            Err(Error::MalformedIdToken(_))
        ));
        assert!(matches!(
            read_claims("a.!!!.c"),
            Err(Error::MalformedIdToken(_))
        ));
        let not_json = format!("a.{}.c", URL_SAFE_NO_PAD.encode(b"plain"));
        assert!(matches!(
            read_claims(&not_json),
            Err(Error::MalformedIdToken(_))
        ));
    }

    #[test]
    fn state_and_nonce_are_fresh() {
        let first = random_token();
        let second = random_token();

        assert_eq!(first.len(), 22);
        assert_ne!(first, second);
    }

    #[test]
    fn logout_location_encodes_target() {
        let endpoint = Url::parse("https://login.example.com/tenant/oauth2/v2.0/logout").unwrap();
        assert_eq!(
            logout_location(&endpoint, "https://app.example.com/"),
            "https://login.example.com/tenant/oauth2/v2.0/logout?post_logout_redirect_uri=https%3A%2F%2Fapp.example.com%2F"
        );
    }
}
