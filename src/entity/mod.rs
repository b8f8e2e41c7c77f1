mod callback_query;
mod embed;
mod session_data;
mod user;

pub use callback_query::CallbackQuery;
pub use embed::{EmbedConfig, ReportConfig};
pub use session_data::SessionData;
pub use user::User;
