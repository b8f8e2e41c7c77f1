use serde::Serialize;
use warp::{
    http::StatusCode,
    reject,
    reply::{self, Response},
    Reply,
};

/// Everything a request can fail with.
///
/// Display text is what the browser sees in the `errorMsg` field, so keep it
/// free of secrets.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Config(String),

    #[error("Missing code or state in OAuth callback")]
    MissingCallbackParams,

    #[error("Invalid OAuth state")]
    InvalidState,

    #[error("Identity provider returned an error: {0}")]
    ProviderError(String),

    #[error("No id_token in token response")]
    MissingIdToken,

    #[error("Malformed id_token: {0}")]
    MalformedIdToken(String),

    #[error("Invalid nonce in id_token")]
    InvalidNonce,

    #[error("Unable to determine user email from id_token")]
    MissingEmail,

    #[error("Invalid id_token: {0}")]
    InvalidIdToken(String),

    /// The authorization code could not be redeemed.
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    /// A downstream service answered with a non-success status.
    #[error("Error while {operation}\n{}:\t{body}\nRequestId:\t{request_id}", status_line(.status))]
    Upstream {
        operation: &'static str,
        /// Raw code; `reqwest` and `warp` disagree on the `http` version.
        status: u16,
        body: String,
        request_id: String,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Session store error: {0}")]
    Session(String),

    #[error("Template error: {0}")]
    Template(String),
}

impl Error {
    /// OAuth protocol and identity errors are the client's problem, the rest are ours.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingCallbackParams
            | Self::InvalidState
            | Self::ProviderError(_)
            | Self::MissingIdToken
            | Self::MalformedIdToken(_)
            | Self::InvalidIdToken(_)
            | Self::InvalidNonce
            | Self::MissingEmail => StatusCode::BAD_REQUEST,
            Self::Config(_)
            | Self::TokenExchange(_)
            | Self::Upstream { .. }
            | Self::Http(_)
            | Self::Session(_)
            | Self::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `404 Not Found` style status line for a raw status code.
fn status_line(code: &u16) -> String {
    StatusCode::from_u16(*code)
        .map(|status| status.to_string())
        .unwrap_or_else(|_| code.to_string())
}

impl reject::Reject for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Session(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Session(err.to_string())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    error_msg: &'a str,
}

/// JSON `{"errorMsg": ...}` reply with the given status.
pub fn error_reply(message: &str, status: StatusCode) -> Response {
    reply::with_status(reply::json(&ErrorBody { error_msg: message }), status).into_response()
}

impl Reply for Error {
    fn into_response(self) -> Response {
        error_reply(&self.to_string(), self.status())
    }
}
