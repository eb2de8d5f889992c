pub mod confirm;
pub mod settings;
