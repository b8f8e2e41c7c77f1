//! Embed token generation through the Power BI REST API.

use std::sync::Arc;

use log::{debug, info, warn};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::{
    config::{AuthenticationMode, Config, RlsMode},
    entity::{EmbedConfig, ReportConfig},
    error::Error,
};

#[derive(Debug, Deserialize)]
struct AadToken {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub name: String,
    pub embed_url: String,
    #[serde(default)]
    pub dataset_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(default)]
    pub is_effective_identity_required: bool,
    #[serde(default)]
    pub is_effective_identity_roles_required: bool,
}

#[derive(Debug, Serialize)]
struct Id<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct EffectiveIdentity<'a> {
    username: &'a str,
    #[serde(skip_serializing_if = "no_roles")]
    roles: &'a [String],
    datasets: Vec<&'a str>,
}

fn no_roles(roles: &&[String]) -> bool {
    roles.is_empty()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateTokenRequest<'a> {
    datasets: Vec<Id<'a>>,
    reports: Vec<Id<'a>>,
    target_workspaces: Vec<Id<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    identities: Vec<EffectiveIdentity<'a>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbedToken {
    token: String,
    token_id: String,
    expiration: String,
}

/// Passes successful responses through, turns anything else into [`Error::Upstream`].
async fn ensure_success(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let request_id = response
        .headers()
        .get("RequestId")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("n/a")
        .to_string();
    let body = response.text().await.unwrap_or_default();
    Err(Error::Upstream {
        operation,
        status,
        body,
        request_id,
    })
}

pub struct PbiEmbedService {
    config: Arc<Config>,
    http: reqwest::Client,
}

impl PbiEmbedService {
    pub fn new(config: Arc<Config>, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    /// Azure AD token endpoint for the configured authentication mode.
    fn token_url(&self) -> Result<Url, Error> {
        let authority = match self.config.authentication_mode {
            Some(AuthenticationMode::ServicePrincipal) => self
                .config
                .authority_url
                .replace("organizations", &self.config.tenant_id),
            _ => self.config.authority_url.clone(),
        };
        let raw = format!("{}/oauth2/v2.0/token", authority.trim_end_matches('/'));
        Url::parse(&raw).map_err(|e| Error::Config(format!("AUTHORITY_URL: {e}")))
    }

    /// Access token for the Power BI API, as the service principal or the master user.
    pub async fn access_token(&self) -> Result<String, Error> {
        let config = &self.config;
        let scope = config.scope_base.join(" ");

        let mut params = vec![
            ("client_id", config.client_id.as_str()),
            ("scope", scope.as_str()),
        ];
        match config.authentication_mode {
            Some(AuthenticationMode::MasterUser) => {
                params.push(("grant_type", "password"));
                params.push(("username", config.power_bi_user.as_str()));
                params.push(("password", config.power_bi_pass.as_str()));
                if !config.client_secret.is_empty() {
                    params.push(("client_secret", config.client_secret.as_str()));
                }
            }
            Some(AuthenticationMode::ServicePrincipal) => {
                params.push(("grant_type", "client_credentials"));
                params.push(("client_secret", config.client_secret.as_str()));
            }
            None => {
                return Err(Error::Config(
                    "Please specify one of the two authentication modes (AUTHENTICATION_MODE)"
                        .into(),
                ))
            }
        }

        let response = self
            .http
            .post(self.token_url()?)
            .form(&params)
            .send()
            .await?;
        let response = ensure_success(response, "retrieving Access token").await?;
        Ok(response.json::<AadToken>().await?.access_token)
    }

    fn api_url(&self, path: &str) -> Result<Url, Error> {
        self.config
            .power_bi_api_url
            .join(path)
            .map_err(|e| Error::Config(format!("POWER_BI_API_URL: {e}")))
    }

    pub async fn report(
        &self,
        access_token: &str,
        workspace_id: &str,
        report_id: &str,
    ) -> Result<Report, Error> {
        let url = self.api_url(&format!(
            "v1.0/myorg/groups/{workspace_id}/reports/{report_id}"
        ))?;
        let response = self.http.get(url).bearer_auth(access_token).send().await?;
        let response = ensure_success(response, "retrieving Embed URL").await?;
        Ok(response.json().await?)
    }

    pub async fn dataset(
        &self,
        access_token: &str,
        workspace_id: &str,
        dataset_id: &str,
    ) -> Result<Dataset, Error> {
        let url = self.api_url(&format!(
            "v1.0/myorg/groups/{workspace_id}/datasets/{dataset_id}"
        ))?;
        let response = self.http.get(url).bearer_auth(access_token).send().await?;
        let response = ensure_success(response, "retrieving dataset").await?;
        Ok(response.json().await?)
    }

    /// Whether the embed token must carry the signed-in user as effective identity.
    async fn needs_identity(
        &self,
        access_token: &str,
        workspace_id: &str,
        dataset_id: &str,
    ) -> Result<bool, Error> {
        match self.config.rls_mode {
            RlsMode::Off => Ok(false),
            RlsMode::On => Ok(true),
            RlsMode::Auto => {
                let dataset = self.dataset(access_token, workspace_id, dataset_id).await?;
                if dataset.is_effective_identity_roles_required && self.config.rls_roles.is_empty() {
                    warn!("dataset {dataset_id} requires RLS roles but RLS_ROLES is empty");
                }
                Ok(dataset.is_effective_identity_required)
            }
        }
    }

    /// Embed URL and embed token for one report, scoped to `user_email` when RLS applies.
    pub async fn embed_params_for_single_report(
        &self,
        workspace_id: &str,
        report_id: &str,
        user_email: Option<&str>,
    ) -> Result<EmbedConfig, Error> {
        let access_token = self.access_token().await?;
        let report = self.report(&access_token, workspace_id, report_id).await?;

        let mut identities = Vec::new();
        if let (Some(dataset_id), Some(username)) = (report.dataset_id.as_deref(), user_email) {
            if self
                .needs_identity(&access_token, workspace_id, dataset_id)
                .await?
            {
                debug!("embedding report {report_id} with effective identity");
                identities.push(EffectiveIdentity {
                    username,
                    roles: &self.config.rls_roles,
                    datasets: vec![dataset_id],
                });
            }
        }

        let body = GenerateTokenRequest {
            datasets: report
                .dataset_id
                .as_deref()
                .map(|id| vec![Id { id }])
                .unwrap_or_default(),
            reports: vec![Id { id: &report.id }],
            target_workspaces: vec![Id { id: workspace_id }],
            identities,
        };

        let response = self
            .http
            .post(self.api_url("v1.0/myorg/GenerateToken")?)
            .bearer_auth(&access_token)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response, "generating embed token").await?;
        let token: EmbedToken = response.json().await?;

        info!("embed token {} issued for report {}", token.token_id, report.id);

        Ok(EmbedConfig {
            token_id: token.token_id,
            access_token: token.token,
            token_expiry: token.expiration,
            report_config: vec![ReportConfig {
                report_id: report.id,
                report_name: report.name,
                embed_url: report.embed_url,
                dataset_id: report.dataset_id,
            }],
        })
    }
}
