pub mod chat_view;
pub mod crash_panel;
pub mod dialogs;
pub mod input_area;
pub mod login;
pub mod message_widget;
pub mod sidebar;
pub mod window;
