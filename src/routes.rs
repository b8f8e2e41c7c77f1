use std::{convert::Infallible, sync::Arc};

use cookie::{Cookie, Key};
use handlebars::Handlebars;
use log::{error, info, warn};
use serde_json::json;
use warp::{
    http::{
        header::{CONTENT_TYPE, LOCATION, SET_COOKIE},
        StatusCode,
    },
    reply::{self, Response},
    Filter, Rejection, Reply,
};

use crate::{
    config::Config,
    entity::{CallbackQuery, SessionData},
    error::{error_reply, Error},
    oidc::OidcClient,
    powerbi::PbiEmbedService,
    session::{self, SessionStore, SESSION_COOKIE},
    INDEX_HTML,
};

/// How long an unauthenticated session waiting for the callback is kept.
const PENDING_LOGIN_LIFETIME: time::Duration = time::Duration::minutes(10);

/// Shared by every request.
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionStore>,
    pub oidc: OidcClient,
    pub embed: PbiEmbedService,
    templates: Handlebars<'static>,
    cookie_key: Key,
}

impl AppState {
    /// Runs OIDC discovery, so the identity provider must be reachable.
    pub async fn new(config: Config, sessions: Arc<dyn SessionStore>) -> Result<Self, Error> {
        let config = Arc::new(config);
        let http = reqwest::Client::new();

        let cookie_key = if config.session_secret.is_empty() {
            warn!("SESSION_SECRET is not set, sessions will not survive a restart");
            Key::generate()
        } else {
            Key::derive_from(config.session_secret.as_bytes())
        };

        let mut templates = Handlebars::new();
        templates
            .register_template_string("index", INDEX_HTML)
            .map_err(|e| Error::Template(e.to_string()))?;

        Ok(Self {
            oidc: OidcClient::discover(&config).await?,
            embed: PbiEmbedService::new(config.clone(), http),
            config,
            sessions,
            templates,
            cookie_key,
        })
    }
}

/// The session behind the request cookie, or a blank one.
struct Session {
    /// `None` until the session has been stored once.
    id: Option<String>,
    data: SessionData,
}

async fn load_session(
    state: Arc<AppState>,
    raw_cookie: Option<String>,
) -> Result<Session, Rejection> {
    let id = raw_cookie.and_then(|raw| session::verify_session_id(&state.cookie_key, &raw));

    if let Some(id) = id {
        match state.sessions.get(&id).await {
            Ok(Some(data)) if !data.is_expired() => {
                return Ok(Session { id: Some(id), data });
            }
            Ok(Some(_)) => {
                info!("session expired");
                if let Err(err) = state.sessions.clear(&id).await {
                    warn!("could not drop expired session: {err}");
                }
            }
            Ok(None) => {}
            Err(err) => {
                error!("session lookup failed: {err}");
                return Err(warp::reject::custom(err));
            }
        }
    }

    Ok(Session {
        id: None,
        data: SessionData::new(state.config.session_lifetime),
    })
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let static_dir = state.config.static_dir.clone();
    let favicon_path = static_dir.join("img").join("favicon.ico");

    let with_state = warp::any().map(move || state.clone());

    let with_session = with_state
        .clone()
        .and(warp::cookie::optional(SESSION_COOKIE))
        .and_then(load_session);

    let index = warp::path::end()
        .and(warp::get())
        .and(with_state.clone())
        .and(with_session.clone())
        .and_then(reply_index);

    let embed_info = warp::path!("getembedinfo")
        .and(warp::get())
        .and(with_state.clone())
        .and(with_session.clone())
        .and_then(reply_embed_info);

    let login = warp::path!("login")
        .and(warp::get())
        .and(with_state.clone())
        .and(with_session.clone())
        .and_then(reply_login);

    let callback = warp::path!("auth" / "callback")
        .and(warp::get())
        .and(with_state.clone())
        .and(with_session.clone())
        .and(warp::query::<CallbackQuery>())
        .and_then(reply_callback);

    let logout = warp::path!("logout")
        .and(warp::get())
        .and(with_state)
        .and(with_session)
        .and_then(reply_logout);

    let favicon = warp::path!("favicon.ico")
        .and(warp::get())
        .and(warp::fs::file(favicon_path))
        .map(|file| reply::with_header(file, CONTENT_TYPE, "image/vnd.microsoft.icon"));

    let assets = warp::path("static").and(warp::fs::dir(static_dir));

    index
        .or(embed_info)
        .or(login)
        .or(callback)
        .or(logout)
        .or(favicon)
        .or(assets)
        .recover(handle_rejections)
        .with(warp::log("powerbi_embed"))
}

fn redirect(location: &str) -> Response {
    reply::with_header(StatusCode::FOUND, LOCATION, location).into_response()
}

fn with_cookie(response: Response, cookie: Cookie<'static>) -> Response {
    reply::with_header(response, SET_COOKIE, cookie.to_string()).into_response()
}

/// Collapses handler errors into their JSON reply.
fn respond(result: Result<Response, Error>) -> Result<Response, Infallible> {
    Ok(result.unwrap_or_else(|err| {
        if err.status().is_server_error() {
            error!("request failed: {err}");
        } else {
            warn!("request rejected: {err}");
        }
        err.into_response()
    }))
}

async fn reply_index(state: Arc<AppState>, session: Session) -> Result<Response, Infallible> {
    let Some(user) = session.data.user() else {
        return Ok(redirect("/login"));
    };

    respond(
        state
            .templates
            .render(
                "index",
                &json!({ "user_email": user.email, "user_name": user.name }),
            )
            .map(|html| reply::html(html).into_response())
            .map_err(|e| Error::Template(e.to_string())),
    )
}

async fn reply_embed_info(state: Arc<AppState>, session: Session) -> Result<Response, Infallible> {
    let Some(user) = session.data.user() else {
        return Ok(redirect("/login"));
    };

    if let Some(problem) = state.config.check_embed_config() {
        warn!("embed configuration incomplete: {problem}");
        return Ok(error_reply(&problem, StatusCode::INTERNAL_SERVER_ERROR));
    }

    let config = &state.config;
    match state
        .embed
        .embed_params_for_single_report(&config.workspace_id, &config.report_id, Some(&user.email))
        .await
    {
        Ok(embed) => Ok(reply::json(&embed).into_response()),
        Err(err) => {
            error!("embed request failed: {err}");
            Ok(error_reply(&err.to_string(), StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

async fn reply_login(state: Arc<AppState>, session: Session) -> Result<Response, Infallible> {
    respond(start_sign_in(&state, session).await)
}

async fn start_sign_in(state: &AppState, session: Session) -> Result<Response, Error> {
    let Session { id, mut data } = session;
    let request = state.oidc.authorization_request();
    data.oauth_state = Some(request.state);
    data.oauth_nonce = Some(request.nonce);
    if data.user().is_none() {
        data.renew(PENDING_LOGIN_LIFETIME.min(state.config.session_lifetime));
    }

    let id = id.unwrap_or_else(session::new_session_id);
    state.sessions.set(&id, data).await?;
    let cookie = session::session_cookie(&state.cookie_key, &id, state.config.secure_cookies)?;

    info!("authorize: redirecting to identity provider");
    Ok(with_cookie(redirect(&request.url), cookie))
}

async fn reply_callback(
    state: Arc<AppState>,
    session: Session,
    query: CallbackQuery,
) -> Result<Response, Infallible> {
    respond(complete_sign_in(&state, session, query).await)
}

async fn complete_sign_in(
    state: &AppState,
    session: Session,
    query: CallbackQuery,
) -> Result<Response, Error> {
    let Session { id, mut data } = session;

    if let Some(error) = query.error {
        consume_oauth_request(state, id.as_deref(), &mut data).await?;
        let description = query.error_description.unwrap_or(error);
        return Err(Error::ProviderError(description));
    }

    let (code, returned_state) = match (query.code, query.state) {
        (Some(code), Some(returned)) if !code.is_empty() && !returned.is_empty() => {
            (code, returned)
        }
        _ => return Err(Error::MissingCallbackParams),
    };

    let (expected_state, expected_nonce) =
        consume_oauth_request(state, id.as_deref(), &mut data).await?;

    if expected_state.as_deref() != Some(returned_state.as_str()) {
        return Err(Error::InvalidState);
    }

    let user = state.oidc.sign_in(&code, expected_nonce.as_deref()).await?;
    info!("user {} signed in", user.email);
    data.sign_in(user);
    data.renew(state.config.session_lifetime);

    // fresh id once authenticated
    if let Some(old) = &id {
        state.sessions.clear(old).await?;
    }
    let new_id = session::new_session_id();
    state.sessions.set(&new_id, data).await?;
    let cookie = session::session_cookie(&state.cookie_key, &new_id, state.config.secure_cookies)?;

    Ok(with_cookie(redirect("/"), cookie))
}

/// Takes the pending `(state, nonce)` out of the session and persists that,
/// whatever the callback turns out to be.
async fn consume_oauth_request(
    state: &AppState,
    id: Option<&str>,
    data: &mut SessionData,
) -> Result<(Option<String>, Option<String>), Error> {
    let pending = data.take_oauth_request();
    if let Some(id) = id {
        state.sessions.set(id, data.clone()).await?;
    }
    Ok(pending)
}

async fn reply_logout(state: Arc<AppState>, session: Session) -> Result<Response, Infallible> {
    if let Some(id) = &session.id {
        if let Err(err) = state.sessions.clear(id).await {
            warn!("session deletion failed during logout: {err}");
        }
    }
    if let Some(email) = &session.data.user_email {
        info!("user {email} signed out");
    }

    let target = state.oidc.logout_url(&state.config.post_logout_redirect());
    Ok(with_cookie(redirect(&target), session::clear_cookie()))
}

async fn handle_rejections(err: Rejection) -> Result<Response, Infallible> {
    if let Some(err) = err.find::<Error>() {
        return Ok(error_reply(&err.to_string(), err.status()));
    }

    // only the callback reads a query string
    if err.find::<warp::reject::InvalidQuery>().is_some() {
        let err = Error::MissingCallbackParams;
        warn!("request rejected: {err}");
        return Ok(err.into_response());
    }

    let code = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    Ok(reply::with_status(reply::reply(), code).into_response())
}
