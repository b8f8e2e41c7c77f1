use cookie::{Cookie, CookieJar, Key, SameSite};

use crate::error::Error;

pub const SESSION_COOKIE: &str = "pbi_embed_session";

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Browser-session cookie whose value is the session id signed with `key`.
pub fn session_cookie(key: &Key, session_id: &str, secure: bool) -> Result<Cookie<'static>, Error> {
    let mut jar = CookieJar::new();
    jar.signed_mut(key)
        .add(Cookie::new(SESSION_COOKIE, session_id.to_string()));

    let signed = jar
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or_else(|| Error::Session("failed to sign session cookie".into()))?;

    Ok(Cookie::build((SESSION_COOKIE, signed))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build())
}

/// Expires the session cookie in the browser.
pub fn clear_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    cookie.make_removal();
    cookie
}

/// Session id carried by a raw cookie value, or `None` if it was not signed with `key`.
pub fn verify_session_id(key: &Key, raw: &str) -> Option<String> {
    let mut jar = CookieJar::new();
    jar.add_original(Cookie::new(SESSION_COOKIE, raw.to_string()));
    jar.signed(key)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_value_round_trips() {
        let key = Key::generate();
        let id = new_session_id();
        let cookie = session_cookie(&key, &id, false).unwrap();

        assert_ne!(cookie.value(), id);
        assert_eq!(verify_session_id(&key, cookie.value()), Some(id));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
    }

    #[test]
    fn tampered_or_foreign_cookies_are_rejected() {
        let key = Key::generate();
        let cookie = session_cookie(&key, "abc", false).unwrap();

        assert_eq!(verify_session_id(&Key::generate(), cookie.value()), None);
        assert_eq!(verify_session_id(&key, "abc"), None);
    }

    #[test]
    fn removal_cookie_expires() {
        let cookie = clear_cookie();
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(cookie::time::Duration::ZERO));
    }
}
