/*!
# powerbi-embed: OpenID Connect sign-in in front of an embedded Power BI report

Users sign in through an Azure AD (Entra ID) authorization-code flow. Once a
session exists, the page served at `/` asks `/getembedinfo` for an embed
token, which the server obtains from the Power BI REST API either as a
service principal or as a master user.

All settings come from the environment (a `.env` file is honoured):

```bash
export CLIENT_ID=<app registration client id>
export CLIENT_SECRET=<app registration secret>
export TENANT_ID=<tenant id>
export WORKSPACE_ID=<workspace id>
export REPORT_ID=<report id>
cargo run
```

See [`config::Config`] for the full list.
*/

pub const INDEX_HTML: &str = include_str!("index.html");

pub mod config;
pub mod entity;
pub mod error;
pub mod oidc;
pub mod powerbi;
pub mod routes;
pub mod session;

pub use config::Config;
pub use error::Error;
pub use routes::AppState;
