pub mod auth;
pub mod chat;
pub mod compose;
pub mod compress;
pub mod content;
pub mod conversation;
pub mod database;
pub mod diagram;
pub mod highlight;
pub mod images;
pub mod keyring;
pub mod markdown;
pub mod settings;
pub mod workspace;

pub use auth::AuthService;
pub use database::Database;
pub use images::ImageResolver;
pub use keyring::SessionVault;
pub use settings::SettingsService;
pub use workspace::{WorkspaceState, WorkspaceUpdate};
