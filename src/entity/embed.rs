use serde::{Deserialize, Serialize};

/// Everything the page needs to render one or more reports.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EmbedConfig {
    pub token_id: String,
    /// The embed token, not an Azure AD access token.
    pub access_token: String,
    pub token_expiry: String,
    pub report_config: Vec<ReportConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportConfig {
    pub report_id: String,
    pub report_name: String,
    pub embed_url: String,
    pub dataset_id: Option<String>,
}
