mod app;
mod config;
mod models;
mod providers;
mod services;
mod ui;

use gtk::prelude::*;
use relm4::prelude::*;
use tracing_subscriber::EnvFilter;

use app::App;
use config::APP_ID;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let app = adw::Application::builder()
        .application_id(APP_ID)
        .flags(gio::ApplicationFlags::HANDLES_OPEN)
        .build();

    app.connect_startup(|_| {
        let resource_bytes = glib::Bytes::from_static(include_bytes!(concat!(
            env!("OUT_DIR"),
            "/parley.gresource"
        )));
        match gio::Resource::from_data(&resource_bytes) {
            Ok(resource) => gio::resources_register(&resource),
            Err(e) => tracing::error!("Failed to load GResource: {}", e),
        }

        let Some(display) = gtk::gdk::Display::default() else {
            tracing::error!("No display available");
            return;
        };
        gtk::Window::set_default_icon_name(APP_ID);

        let provider = gtk::CssProvider::new();
        provider.load_from_resource("/com/parley/Parley/style.css");
        gtk::style_context_add_provider_for_display(
            &display,
            &provider,
            gtk::STYLE_PROVIDER_PRIORITY_APPLICATION,
        );
    });

    // The sign-in redirect arrives as a parley:// URI through GApplication::open,
    // possibly before the window exists; the app drains this channel once built.
    let (redirect_tx, redirect_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    app.connect_open(move |app, files, _hint| {
        for file in files {
            let uri = file.uri().to_string();
            if uri.starts_with("parley:") {
                let _ = redirect_tx.send(uri);
            } else {
                tracing::debug!("Ignoring opened file {}", uri);
            }
        }
        app.activate();
    });

    RelmApp::from_app(app)
        .with_args(std::env::args().collect())
        .run_async::<App>(redirect_rx);
}
