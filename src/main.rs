use std::{env, sync::Arc};

use log::{info, warn};
use powerbi_embed::{routes, session, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    if env::var_os("RUST_LOG").is_none() {
        // Set `RUST_LOG=powerbi_embed=debug` to see debug logs,
        // this only shows access logs and sign-in events.
        env::set_var("RUST_LOG", "powerbi_embed=info");
    }
    pretty_env_logger::init();

    let config = Config::from_env()?;
    let bind_addr = config.bind_addr;

    info!("oidc authority: {}", config.oidc_authority);
    info!("redirect: {}", config.oidc_redirect_uri);
    match config.check_embed_config() {
        Some(problem) => warn!("embedding will fail until fixed: {problem}"),
        None => info!(
            "embedding report {} from workspace {} as {}",
            config.report_id,
            config.workspace_id,
            config
                .authentication_mode
                .map(|mode| mode.to_string())
                .unwrap_or_default()
        ),
    }

    let sessions = session::open_store(&config);
    session::spawn_sweeper(sessions.clone(), session::SWEEP_INTERVAL);
    let state = Arc::new(AppState::new(config, sessions).await?);

    info!("listening on http://{bind_addr}");
    warp::serve(routes::routes(state)).run(bind_addr).await;

    Ok(())
}
