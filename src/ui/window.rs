use adw::prelude::*;

use crate::config;

pub fn create_shortcuts_window(parent: &adw::ApplicationWindow) {
    let window = gtk::ShortcutsWindow::builder()
        .transient_for(parent)
        .modal(true)
        .build();

    let general_group = gtk::ShortcutsGroup::builder().title("General").build();

    let new_chat = gtk::ShortcutsShortcut::builder()
        .title("New chat")
        .accelerator("<Control>n")
        .build();
    general_group.add_shortcut(&new_chat);

    let settings = gtk::ShortcutsShortcut::builder()
        .title("Settings")
        .accelerator("<Control>comma")
        .build();
    general_group.add_shortcut(&settings);

    let shortcuts_help = gtk::ShortcutsShortcut::builder()
        .title("Keyboard shortcuts")
        .accelerator("<Control>slash")
        .build();
    general_group.add_shortcut(&shortcuts_help);

    let chat_group = gtk::ShortcutsGroup::builder().title("Chat").build();

    let send = gtk::ShortcutsShortcut::builder()
        .title("Send message")
        .accelerator("Return")
        .build();
    chat_group.add_shortcut(&send);

    let newline = gtk::ShortcutsShortcut::builder()
        .title("New line")
        .accelerator("<Shift>Return")
        .build();
    chat_group.add_shortcut(&newline);

    let paste = gtk::ShortcutsShortcut::builder()
        .title("Paste image from clipboard")
        .accelerator("<Control>v")
        .build();
    chat_group.add_shortcut(&paste);

    let section = gtk::ShortcutsSection::builder()
        .title(config::APP_NAME)
        .build();
    section.add_group(&general_group);
    section.add_group(&chat_group);

    window.add_section(&section);
    window.present();
}

pub fn create_about_dialog(parent: &adw::ApplicationWindow) {
    let about = adw::AboutDialog::builder()
        .application_name(config::APP_NAME)
        .version(config::VERSION)
        .developer_name("Parley Contributors")
        .license_type(gtk::License::Gpl30)
        .comments("A native GNOME chat client for a hosted AI backend")
        .application_icon(config::APP_ID)
        .build();
    about.present(Some(parent));
}
