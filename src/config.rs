use std::{fmt, net::SocketAddr, path::PathBuf, str::FromStr};

use reqwest::Url;
use time::Duration;

use crate::error::Error;

/// One year.
const MAX_SESSION_LIFETIME_MINUTES: i64 = 525_600;

/// How the server authenticates against the Power BI REST API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationMode {
    ServicePrincipal,
    MasterUser,
}

impl FromStr for AuthenticationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serviceprincipal" => Ok(Self::ServicePrincipal),
            "masteruser" => Ok(Self::MasterUser),
            other => Err(Error::Config(format!(
                "AUTHENTICATION_MODE must be ServicePrincipal or MasterUser, got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for AuthenticationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServicePrincipal => f.write_str("ServicePrincipal"),
            Self::MasterUser => f.write_str("MasterUser"),
        }
    }
}

/// When to attach the signed-in user as an effective identity to the embed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlsMode {
    /// Only when the dataset says it requires one.
    Auto,
    On,
    Off,
}

impl FromStr for RlsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            other => Err(Error::Config(format!(
                "RLS_MODE must be auto, on or off, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Memory,
    Filesystem,
}

impl FromStr for SessionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "null" => Ok(Self::Memory),
            "filesystem" => Ok(Self::Filesystem),
            other => Err(Error::Config(format!(
                "SESSION_TYPE must be filesystem or memory, got {other:?}"
            ))),
        }
    }
}

/// Process-wide settings, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    /// `None` when `AUTHENTICATION_MODE` is set but empty.
    pub authentication_mode: Option<AuthenticationMode>,
    pub workspace_id: String,
    pub report_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope_base: Vec<String>,
    pub authority_url: String,
    pub power_bi_user: String,
    pub power_bi_pass: String,
    pub power_bi_api_url: Url,

    pub oidc_redirect_uri: Url,
    /// Tenant authority without version segment, endpoints append `/oauth2/v2.0/...`.
    pub oidc_authority: String,
    pub oidc_scopes: Vec<String>,

    pub session_secret: String,
    pub session_type: SessionType,
    pub session_dir: PathBuf,
    pub session_lifetime: Duration,
    pub secure_cookies: bool,
    pub post_logout_redirect_uri: Option<String>,

    pub rls_mode: RlsMode,
    pub rls_roles: Vec<String>,

    pub static_dir: PathBuf,
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Reads the process environment. Call `dotenv::dotenv()` first to honour `.env`.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };

        let authentication_mode = match var("AUTHENTICATION_MODE", "ServicePrincipal").trim() {
            "" => None,
            mode => Some(mode.parse()?),
        };

        let tenant_id = var("TENANT_ID", "");
        let default_oidc_authority = format!("https://login.microsoftonline.com/{tenant_id}");

        let session_secret = var("SESSION_SECRET", "");
        if !session_secret.is_empty() && session_secret.len() < 32 {
            return Err(Error::Config(
                "SESSION_SECRET must be at least 32 bytes long".into(),
            ));
        }

        let lifetime_minutes: i64 = var("SESSION_LIFETIME_MINUTES", "44640")
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("SESSION_LIFETIME_MINUTES: {e}")))?;
        if !(1..=MAX_SESSION_LIFETIME_MINUTES).contains(&lifetime_minutes) {
            return Err(Error::Config(format!(
                "SESSION_LIFETIME_MINUTES must be between 1 and {MAX_SESSION_LIFETIME_MINUTES}"
            )));
        }

        let post_logout_redirect_uri = Some(var("POST_LOGOUT_REDIRECT_URI", "http://localhost:8000/"))
            .filter(|uri| !uri.trim().is_empty());

        Ok(Self {
            authentication_mode,
            workspace_id: var("WORKSPACE_ID", ""),
            report_id: var("REPORT_ID", ""),
            tenant_id,
            client_id: var("CLIENT_ID", ""),
            client_secret: var("CLIENT_SECRET", ""),
            scope_base: split_list(&var(
                "SCOPE_BASE",
                "https://analysis.windows.net/powerbi/api/.default",
            )),
            authority_url: var(
                "AUTHORITY_URL",
                "https://login.microsoftonline.com/organizations",
            ),
            power_bi_user: var("POWER_BI_USER", ""),
            power_bi_pass: var("POWER_BI_PASS", ""),
            power_bi_api_url: parse_base_url(
                "POWER_BI_API_URL",
                &var("POWER_BI_API_URL", "https://api.powerbi.com"),
            )?,
            oidc_redirect_uri: parse_url(
                "OIDC_REDIRECT_URI",
                &var("OIDC_REDIRECT_URI", "http://localhost:8000/auth/callback"),
            )?,
            oidc_authority: var("OIDC_AUTHORITY", &default_oidc_authority)
                .trim_end_matches('/')
                .to_string(),
            oidc_scopes: split_list(&var("OIDC_SCOPES", "openid,profile,email,offline_access")),
            session_secret,
            session_type: var("SESSION_TYPE", "filesystem").trim().parse()?,
            session_dir: PathBuf::from(var("SESSION_FILE_DIR", "sessions")),
            session_lifetime: Duration::minutes(lifetime_minutes),
            secure_cookies: matches!(
                var("SESSION_COOKIE_SECURE", "").trim(),
                "1" | "true" | "TRUE" | "True"
            ),
            post_logout_redirect_uri,
            rls_mode: var("RLS_MODE", "auto").trim().parse()?,
            rls_roles: split_list(&var("RLS_ROLES", "")),
            static_dir: PathBuf::from(var("STATIC_DIR", "static")),
            bind_addr: var("BIND_ADDR", "127.0.0.1:8000")
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("BIND_ADDR: {e}")))?,
        })
    }

    /// First missing setting that makes an embed request impossible, if any.
    pub fn check_embed_config(&self) -> Option<String> {
        let Some(mode) = self.authentication_mode else {
            return Some(
                "Please specify one of the two authentication modes (AUTHENTICATION_MODE)".into(),
            );
        };

        let missing = |value: &str| value.trim().is_empty();

        if mode == AuthenticationMode::ServicePrincipal && missing(&self.tenant_id) {
            return Some("Tenant ID is not set (TENANT_ID)".into());
        }
        if missing(&self.report_id) {
            return Some("Report ID is not set (REPORT_ID)".into());
        }
        if missing(&self.workspace_id) {
            return Some("Workspace ID is not set (WORKSPACE_ID)".into());
        }
        if missing(&self.client_id) {
            return Some("Client ID is not set (CLIENT_ID)".into());
        }
        match mode {
            AuthenticationMode::MasterUser => {
                if missing(&self.power_bi_user) {
                    return Some("Master account username is not set (POWER_BI_USER)".into());
                }
                if missing(&self.power_bi_pass) {
                    return Some("Master account password is not set (POWER_BI_PASS)".into());
                }
            }
            AuthenticationMode::ServicePrincipal => {
                if missing(&self.client_secret) {
                    return Some("Client secret is not set (CLIENT_SECRET)".into());
                }
            }
        }
        if self.scope_base.is_empty() {
            return Some("Scope base is not set (SCOPE_BASE)".into());
        }
        if missing(&self.authority_url) {
            return Some("Authority URL is not set (AUTHORITY_URL)".into());
        }
        None
    }

    /// Where the identity provider sends the browser after sign-out.
    pub fn post_logout_redirect(&self) -> String {
        match &self.post_logout_redirect_uri {
            Some(uri) => uri.clone(),
            None => self
                .oidc_redirect_uri
                .join("/")
                .map(String::from)
                .unwrap_or_else(|_| self.oidc_redirect_uri.to_string()),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_url(key: &str, raw: &str) -> Result<Url, Error> {
    Url::parse(raw.trim()).map_err(|e| Error::Config(format!("{key}: {e}")))
}

/// Like [`parse_url`], with a trailing `/` so `Url::join` keeps the last segment.
fn parse_base_url(key: &str, raw: &str) -> Result<Url, Error> {
    let mut url = parse_url(key, raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
