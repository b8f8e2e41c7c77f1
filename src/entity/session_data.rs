use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::entity::User;

/// Server-side state behind one session cookie.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionData {
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub oauth_state: Option<String>,
    pub oauth_nonce: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl SessionData {
    pub fn new(lifetime: time::Duration) -> Self {
        Self {
            user_email: None,
            user_name: None,
            oauth_state: None,
            oauth_nonce: None,
            expires_at: OffsetDateTime::now_utc().saturating_add(lifetime),
        }
    }

    /// Restarts the expiry clock.
    pub fn renew(&mut self, lifetime: time::Duration) {
        self.expires_at = OffsetDateTime::now_utc().saturating_add(lifetime);
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= OffsetDateTime::now_utc()
    }

    /// Signed-in user, if the callback has completed for this session.
    pub fn user(&self) -> Option<User> {
        match (&self.user_email, &self.user_name) {
            (Some(email), name) if !email.is_empty() => Some(User {
                email: email.clone(),
                name: name.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }

    pub fn sign_in(&mut self, user: User) {
        self.user_email = Some(user.email);
        self.user_name = Some(user.name);
    }

    /// Takes the pending `(state, nonce)` pair out so it cannot be replayed.
    pub fn take_oauth_request(&mut self) -> (Option<String>, Option<String>) {
        (self.oauth_state.take(), self.oauth_nonce.take())
    }
}
