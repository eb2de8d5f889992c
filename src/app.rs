use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use adw::prelude::*;
use relm4::prelude::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{self, BackendConfig};
use crate::models::{Attachment, AttachmentRef, Conversation, Message, Sender, Session};
use crate::providers::{ChatBackend, ChatStore, HttpBackend, SupabaseAuth, SupabaseRest};
use crate::services::auth::TokenStore;
use crate::services::chat::{self, StreamResult};
use crate::services::compose::compose_outbound;
use crate::services::conversation;
use crate::services::settings::{apply_color_scheme, AppSettings};
use crate::services::workspace::Change;
use crate::services::{
    AuthService, Database, ImageResolver, SessionVault, SettingsService, WorkspaceState,
    WorkspaceUpdate,
};
use crate::ui::chat_view::{ChatView, ChatViewMsg, ChatViewOutput};
use crate::ui::crash_panel::{CrashPanel, CrashPanelMsg, CrashPanelOutput};
use crate::ui::dialogs::confirm::{self, ConfirmAction};
use crate::ui::dialogs::settings::{SettingsDialog, SettingsDialogInit, SettingsDialogOutput};
use crate::ui::login::{LoginMsg, LoginOutput, LoginPage};
use crate::ui::message_widget::MessageServices;
use crate::ui::sidebar::{Sidebar, SidebarMsg, SidebarOutput};

/// Hosted collaborators and local stores, built once configuration is known.
#[derive(Clone)]
struct Services {
    db: Database,
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn ChatStore>,
    auth: AuthService,
    images: Arc<ImageResolver>,
}

impl Services {
    async fn bootstrap() -> anyhow::Result<Self> {
        let config = BackendConfig::from_env()?;
        tracing::info!("Using backend at {}", config.backend_url);

        let db = match Database::new().await {
            Ok(db) => db,
            Err(e) => {
                tracing::warn!("Falling back to in-memory settings: {:#}", e);
                Database::new_in_memory()?
            }
        };

        let tokens: Option<Arc<dyn TokenStore>> = match SessionVault::new().await {
            Ok(vault) => Some(Arc::new(vault)),
            Err(e) => {
                tracing::warn!("Secret Service unavailable, sessions will not persist: {:#}", e);
                None
            }
        };

        let backend: Arc<dyn ChatBackend> = Arc::new(HttpBackend::new(config.backend_url.clone()));
        let store: Arc<dyn ChatStore> = Arc::new(SupabaseRest::new(
            config.supabase_url.clone(),
            config.supabase_anon_key.clone(),
        ));
        let auth = AuthService::new(
            Arc::new(SupabaseAuth::new(
                config.supabase_url.clone(),
                config.supabase_anon_key.clone(),
            )),
            tokens,
        );
        let images = Arc::new(ImageResolver::new(backend.clone(), String::new()));

        Ok(Self {
            db,
            backend,
            store,
            auth,
            images,
        })
    }
}

pub struct App {
    services: Option<Services>,
    startup_error: Option<String>,
    session: Option<Session>,
    state: WorkspaceState,
    settings: AppSettings,
    /// One token per reply in flight, keyed by chat id.
    cancel_tokens: HashMap<String, CancellationToken>,
    /// Raw text of the send in flight per chat, used to retitle on success.
    pending_titles: HashMap<String, String>,
    sidebar: Controller<Sidebar>,
    chat_view: Option<Controller<ChatView>>,
    login: Controller<LoginPage>,
    crash_panel: Controller<CrashPanel>,
    settings_dialog: Option<Controller<SettingsDialog>>,
    toast_overlay: adw::ToastOverlay,
    gate_stack: gtk::Stack,
    content_stack: gtk::Stack,
    content_title: adw::WindowTitle,
}

#[derive(Debug)]
pub enum AppMsg {
    RunSessionGate,
    SignInRequested,
    NewChat,
    ConversationSelected(String),
    SearchChanged(String),
    SendMessage {
        text: String,
        attachment: Option<Attachment>,
    },
    RequestConfirm(ConfirmAction),
    Confirmed(ConfirmAction),
    RenderFailed(String),
    ShowSettings,
    SettingsChanged(AppSettings),
    ShowAbout,
    ShowShortcuts,
}

#[derive(Debug)]
pub enum AppCmd {
    SettingsLoaded(AppSettings),
    SessionResolved(Result<Option<Session>, String>),
    RedirectReceived(String),
    SignedIn(Result<Session, String>),
    SessionRefreshed(Session),
    SessionLost(String),
    SignedOut,
    ChatsLoaded(Vec<Conversation>),
    ChatCreated(Conversation),
    MessagesLoaded {
        chat_id: String,
        messages: Vec<Message>,
    },
    ChatsDeleted(Vec<String>),
    AllCleared,
    ChatRenamed {
        chat_id: String,
        title: String,
    },
    Stream(StreamResult),
    Failed(String),
}

#[relm4::component(pub, async)]
impl AsyncComponent for App {
    /// Redirect URIs handed to the application by the desktop shell.
    type Init = mpsc::UnboundedReceiver<String>;
    type Input = AppMsg;
    type Output = ();
    type CommandOutput = AppCmd;

    view! {
        adw::ApplicationWindow {
            set_title: Some(config::APP_NAME),
            set_default_width: 1100,
            set_default_height: 760,
            set_width_request: 360,
            set_height_request: 480,

            #[local_ref]
            toast_overlay -> adw::ToastOverlay {},
        }
    }

    async fn init(
        mut redirects: Self::Init,
        root: Self::Root,
        sender: AsyncComponentSender<Self>,
    ) -> AsyncComponentParts<Self> {
        root.set_default_size(1100, 760);

        let (services, startup_error) = match Services::bootstrap().await {
            Ok(services) => (Some(services), None),
            Err(e) => {
                tracing::error!("Startup failed: {:#}", e);
                (None, Some(format!("{:#}", e)))
            }
        };

        let sidebar = Sidebar::builder()
            .launch(())
            .forward(sender.input_sender(), |output| match output {
                SidebarOutput::NewChat => AppMsg::NewChat,
                SidebarOutput::ConversationSelected(id) => AppMsg::ConversationSelected(id),
                SidebarOutput::DeleteConversation(id) => {
                    AppMsg::RequestConfirm(ConfirmAction::DeleteChat(id))
                }
                SidebarOutput::SearchChanged(term) => AppMsg::SearchChanged(term),
                SidebarOutput::SignOut => AppMsg::RequestConfirm(ConfirmAction::SignOut),
                SidebarOutput::OpenSettings => AppMsg::ShowSettings,
            });

        let chat_view = services.as_ref().map(|services| {
            ChatView::builder()
                .launch(MessageServices {
                    images: services.images.clone(),
                    db: services.db.clone(),
                })
                .forward(sender.input_sender(), |output| match output {
                    ChatViewOutput::SendMessage { text, attachment } => {
                        AppMsg::SendMessage { text, attachment }
                    }
                    ChatViewOutput::RenderFailed(reason) => AppMsg::RenderFailed(reason),
                })
        });

        let login = LoginPage::builder()
            .launch(())
            .forward(sender.input_sender(), |output| match output {
                LoginOutput::SignIn => AppMsg::SignInRequested,
            });

        let crash_panel = CrashPanel::builder()
            .launch(())
            .forward(sender.input_sender(), |output| match output {
                CrashPanelOutput::Reload => AppMsg::RunSessionGate,
            });

        let toast_overlay = adw::ToastOverlay::new();
        toast_overlay.set_hexpand(true);
        toast_overlay.set_vexpand(true);

        // Content side: empty state or the open chat
        let content_stack = gtk::Stack::new();
        content_stack.set_hexpand(true);
        content_stack.set_vexpand(true);

        let empty_page = adw::StatusPage::new();
        empty_page.set_title("No Chat Selected");
        empty_page.set_description(Some("Select a chat or create a new one to start."));
        empty_page.set_icon_name(Some("chat-bubbles-text-symbolic"));
        let new_chat_btn = gtk::Button::builder()
            .label("New Chat")
            .halign(gtk::Align::Center)
            .build();
        new_chat_btn.add_css_class("suggested-action");
        new_chat_btn.add_css_class("pill");
        let sender_btn = sender.input_sender().clone();
        new_chat_btn.connect_clicked(move |_| {
            sender_btn.emit(AppMsg::NewChat);
        });
        empty_page.set_child(Some(&new_chat_btn));
        content_stack.add_named(&empty_page, Some("empty"));

        if let Some(chat_view) = &chat_view {
            content_stack.add_named(chat_view.widget(), Some("chat"));
        }
        content_stack.set_visible_child_name("empty");

        let content_title = adw::WindowTitle::new(config::APP_NAME, "");
        let content_header = adw::HeaderBar::new();
        content_header.set_show_start_title_buttons(false);
        content_header.set_title_widget(Some(&content_title));

        let menu = gio::Menu::new();
        menu.append(Some("Settings"), Some("app.settings"));
        menu.append(Some("Keyboard Shortcuts"), Some("app.show-shortcuts"));
        menu.append(Some("About Parley"), Some("app.about"));
        let menu_button = gtk::MenuButton::builder()
            .icon_name("open-menu-symbolic")
            .menu_model(&menu)
            .build();
        content_header.pack_end(&menu_button);

        let content_toolbar = adw::ToolbarView::new();
        content_toolbar.add_top_bar(&content_header);
        content_toolbar.set_content(Some(&content_stack));

        let content_page = adw::NavigationPage::builder()
            .title("Chat")
            .tag("content")
            .child(&content_toolbar)
            .build();

        let sidebar_page = adw::NavigationPage::builder()
            .title("Chats")
            .tag("sidebar")
            .child(sidebar.widget())
            .build();

        let split_view = adw::NavigationSplitView::new();
        split_view.set_hexpand(true);
        split_view.set_vexpand(true);
        split_view.set_min_sidebar_width(220.0);
        split_view.set_max_sidebar_width(300.0);
        split_view.set_sidebar(Some(&sidebar_page));
        split_view.set_content(Some(&content_page));

        if let Ok(condition) = adw::BreakpointCondition::parse("max-width: 600px") {
            let breakpoint = adw::Breakpoint::new(condition);
            breakpoint.add_setter(&split_view, "collapsed", Some(&true.to_value()));
            breakpoint.add_setter(
                &content_header,
                "show-start-title-buttons",
                Some(&true.to_value()),
            );
            root.add_breakpoint(breakpoint);
        }

        // Session gate: exactly one page is visible at a time
        let gate_stack = gtk::Stack::new();
        gate_stack.set_transition_type(gtk::StackTransitionType::Crossfade);

        let loading_page = gtk::Box::new(gtk::Orientation::Vertical, 12);
        loading_page.set_valign(gtk::Align::Center);
        loading_page.set_halign(gtk::Align::Center);
        let spinner = gtk::Spinner::new();
        spinner.set_spinning(true);
        spinner.set_size_request(32, 32);
        loading_page.append(&spinner);
        let loading_label = gtk::Label::new(Some("Loading..."));
        loading_label.add_css_class("dim-label");
        loading_page.append(&loading_label);

        gate_stack.add_named(&loading_page, Some("loading"));
        gate_stack.add_named(login.widget(), Some("login"));
        gate_stack.add_named(&split_view, Some("workspace"));
        gate_stack.add_named(crash_panel.widget(), Some("crash"));
        gate_stack.set_visible_child_name("loading");

        toast_overlay.set_child(Some(&gate_stack));

        let model = App {
            services,
            startup_error,
            session: None,
            state: WorkspaceState::default(),
            settings: AppSettings::default(),
            cancel_tokens: HashMap::new(),
            pending_titles: HashMap::new(),
            sidebar,
            chat_view,
            login,
            crash_panel,
            settings_dialog: None,
            toast_overlay: toast_overlay.clone(),
            gate_stack,
            content_stack,
            content_title,
        };

        let widgets = view_output!();

        // App actions
        let app = relm4::main_adw_application();

        let sender_new = sender.input_sender().clone();
        let new_chat_action = gio::SimpleAction::new("new-chat", None);
        new_chat_action.connect_activate(move |_, _| {
            sender_new.emit(AppMsg::NewChat);
        });
        app.add_action(&new_chat_action);
        app.set_accels_for_action("app.new-chat", &["<Control>n"]);

        let sender_settings = sender.input_sender().clone();
        let settings_action = gio::SimpleAction::new("settings", None);
        settings_action.connect_activate(move |_, _| {
            sender_settings.emit(AppMsg::ShowSettings);
        });
        app.add_action(&settings_action);
        app.set_accels_for_action("app.settings", &["<Control>comma"]);

        let sender_about = sender.input_sender().clone();
        let about_action = gio::SimpleAction::new("about", None);
        about_action.connect_activate(move |_, _| {
            sender_about.emit(AppMsg::ShowAbout);
        });
        app.add_action(&about_action);

        let sender_shortcuts = sender.input_sender().clone();
        let shortcuts_action = gio::SimpleAction::new("show-shortcuts", None);
        shortcuts_action.connect_activate(move |_, _| {
            sender_shortcuts.emit(AppMsg::ShowShortcuts);
        });
        app.add_action(&shortcuts_action);
        app.set_accels_for_action("app.show-shortcuts", &["<Control>slash"]);

        // Forward sign-in redirects for as long as the window lives
        sender.command(move |out, _| {
            Box::pin(async move {
                while let Some(uri) = redirects.recv().await {
                    if out.send(AppCmd::RedirectReceived(uri)).is_err() {
                        break;
                    }
                }
            })
        });

        if let Some(services) = &model.services {
            let db = services.db.clone();
            sender.command(move |out, _| {
                Box::pin(async move {
                    let settings = SettingsService::load(&db).await;
                    let _ = out.send(AppCmd::SettingsLoaded(settings));
                })
            });
        }
        sender.input(AppMsg::RunSessionGate);

        AsyncComponentParts { model, widgets }
    }

    async fn update(
        &mut self,
        msg: Self::Input,
        sender: AsyncComponentSender<Self>,
        root: &Self::Root,
    ) {
        match msg {
            AppMsg::RunSessionGate => {
                self.run_session_gate(&sender);
            }
            AppMsg::SignInRequested => {
                let Some(services) = &self.services else {
                    return;
                };
                let url = services.auth.sign_in_url();
                tracing::info!("Opening browser for sign-in");
                self.login.emit(LoginMsg::SetWaiting(true));

                let login = self.login.sender().clone();
                gtk::UriLauncher::new(&url).launch(
                    Some(root),
                    None::<&gio::Cancellable>,
                    move |result| {
                        if let Err(e) = result {
                            tracing::error!("Failed to open browser: {}", e);
                            login.emit(LoginMsg::SetError(Some(
                                "Could not open the browser for sign-in.".to_string(),
                            )));
                        }
                    },
                );
            }
            AppMsg::NewChat => {
                let Some(user_id) = self.session.as_ref().map(|s| s.user.id.clone()) else {
                    return;
                };
                self.with_token(&sender, move |services, token, out| async move {
                    match conversation::create_conversation(
                        services.store.as_ref(),
                        &token,
                        &user_id,
                    )
                    .await
                    {
                        Ok(conv) => {
                            let _ = out.send(AppCmd::ChatCreated(conv));
                        }
                        Err(e) => {
                            tracing::error!("{:#}", e);
                            let _ = out.send(AppCmd::Failed("Failed to create chat".into()));
                        }
                    }
                });
            }
            AppMsg::ConversationSelected(id) => {
                self.apply(WorkspaceUpdate::Select(id), &sender);
            }
            AppMsg::SearchChanged(term) => {
                self.apply(WorkspaceUpdate::SearchChanged(term), &sender);
            }
            AppMsg::SendMessage { text, attachment } => {
                self.handle_send(text, attachment, &sender);
            }
            AppMsg::RequestConfirm(action) => {
                let input = sender.input_sender().clone();
                confirm::present(root, action, move |action| {
                    input.emit(AppMsg::Confirmed(action));
                });
            }
            AppMsg::Confirmed(action) => {
                self.handle_confirmed(action, &sender);
            }
            AppMsg::RenderFailed(reason) => {
                self.crash_panel.emit(CrashPanelMsg::SetError(reason));
                self.gate_stack.set_visible_child_name("crash");
            }
            AppMsg::ShowSettings => {
                let Some(session) = &self.session else {
                    return;
                };
                let dialog = SettingsDialog::builder()
                    .launch(SettingsDialogInit {
                        settings: self.settings.clone(),
                        email: session.user.email_or_empty().to_string(),
                    })
                    .forward(sender.input_sender(), |output| match output {
                        SettingsDialogOutput::SettingsChanged(s) => AppMsg::SettingsChanged(s),
                        SettingsDialogOutput::ClearAll => {
                            AppMsg::RequestConfirm(ConfirmAction::ClearAll)
                        }
                        SettingsDialogOutput::SignOut => {
                            AppMsg::RequestConfirm(ConfirmAction::SignOut)
                        }
                    });
                dialog.widget().present(Some(root));
                self.settings_dialog = Some(dialog);
            }
            AppMsg::SettingsChanged(settings) => {
                self.settings = settings.clone();
                apply_color_scheme(settings.color_scheme);
                if let Some(services) = &self.services {
                    let db = services.db.clone();
                    sender.command(move |_out, _| {
                        Box::pin(async move {
                            if let Err(e) = SettingsService::save(&db, &settings).await {
                                tracing::error!("Failed to save settings: {:#}", e);
                            }
                        })
                    });
                }
            }
            AppMsg::ShowAbout => {
                crate::ui::window::create_about_dialog(root);
            }
            AppMsg::ShowShortcuts => {
                crate::ui::window::create_shortcuts_window(root);
            }
        }
    }

    async fn update_cmd(
        &mut self,
        msg: Self::CommandOutput,
        sender: AsyncComponentSender<Self>,
        _root: &Self::Root,
    ) {
        match msg {
            AppCmd::SettingsLoaded(settings) => {
                apply_color_scheme(settings.color_scheme);
                self.settings = settings;
            }
            AppCmd::SessionResolved(result) => match result {
                Ok(Some(session)) => self.enter_workspace(session, &sender),
                Ok(None) => self.show_login(None),
                Err(e) => {
                    tracing::error!("Failed to restore session: {}", e);
                    self.show_login(None);
                }
            },
            AppCmd::RedirectReceived(uri) => {
                let Some(services) = self.services.clone() else {
                    return;
                };
                tracing::info!("Received sign-in redirect");
                self.login.emit(LoginMsg::SetWaiting(true));
                sender.command(move |out, _| {
                    Box::pin(async move {
                        let result = services
                            .auth
                            .complete_sign_in(&uri)
                            .await
                            .map_err(|e| format!("{:#}", e));
                        let _ = out.send(AppCmd::SignedIn(result));
                    })
                });
            }
            AppCmd::SignedIn(result) => match result {
                Ok(session) => self.enter_workspace(session, &sender),
                Err(e) => {
                    tracing::error!("Sign-in failed: {}", e);
                    self.show_login(Some(e));
                }
            },
            AppCmd::SessionRefreshed(session) => {
                if let Some(services) = &self.services {
                    services.images.set_access_token(&session.access_token);
                }
                self.session = Some(session);
            }
            AppCmd::SessionLost(reason) => {
                tracing::warn!("Session lost: {}", reason);
                self.leave_workspace(&sender);
                self.show_login(Some(
                    "Your session has expired. Please sign in again.".to_string(),
                ));
            }
            AppCmd::SignedOut => {
                self.leave_workspace(&sender);
                self.show_login(None);
            }
            AppCmd::ChatsLoaded(conversations) => {
                self.apply(WorkspaceUpdate::ChatsLoaded(conversations), &sender);
            }
            AppCmd::ChatCreated(conv) => {
                self.apply(WorkspaceUpdate::ChatCreated(conv), &sender);
            }
            AppCmd::MessagesLoaded { chat_id, messages } => {
                self.apply(WorkspaceUpdate::MessagesLoaded { chat_id, messages }, &sender);
            }
            AppCmd::ChatsDeleted(ids) => {
                for id in ids {
                    self.apply(WorkspaceUpdate::ChatDeleted(id), &sender);
                }
            }
            AppCmd::AllCleared => {
                self.apply(WorkspaceUpdate::AllCleared, &sender);
                if let Some(services) = &self.services {
                    services.images.clear();
                }
            }
            AppCmd::ChatRenamed { chat_id, title } => {
                self.apply(WorkspaceUpdate::ChatRenamed { chat_id, title }, &sender);
                self.load_chats(&sender);
            }
            AppCmd::Stream(event) => {
                self.handle_stream_event(event, &sender);
            }
            AppCmd::Failed(message) => {
                self.show_toast(&message);
            }
        }
    }
}

impl App {
    fn show_toast(&self, message: &str) {
        let toast = adw::Toast::new(message);
        toast.set_timeout(3);
        self.toast_overlay.add_toast(toast);
    }

    /// Resolve the stored session and route to the matching page.
    fn run_session_gate(&mut self, sender: &AsyncComponentSender<Self>) {
        self.leave_workspace(sender);

        let Some(services) = self.services.clone() else {
            let error = self
                .startup_error
                .clone()
                .unwrap_or_else(|| "Application is not configured".to_string());
            self.crash_panel.emit(CrashPanelMsg::SetError(error));
            self.gate_stack.set_visible_child_name("crash");
            return;
        };

        self.gate_stack.set_visible_child_name("loading");
        sender.command(move |out, _| {
            Box::pin(async move {
                let result = services
                    .auth
                    .restore()
                    .await
                    .map_err(|e| format!("{:#}", e));
                let _ = out.send(AppCmd::SessionResolved(result));
            })
        });
    }

    fn show_login(&mut self, error: Option<String>) {
        self.login.emit(LoginMsg::SetError(error));
        self.gate_stack.set_visible_child_name("login");
    }

    fn enter_workspace(&mut self, session: Session, sender: &AsyncComponentSender<Self>) {
        if let Some(services) = &self.services {
            services.images.set_access_token(&session.access_token);
        }
        self.sidebar
            .emit(SidebarMsg::SetEmail(session.user.email_or_empty().to_string()));
        self.session = Some(session);
        self.apply(WorkspaceUpdate::Reset, sender);
        self.gate_stack.set_visible_child_name("workspace");
        self.load_chats(sender);
    }

    /// Drop everything tied to the current session and stop its replies.
    fn leave_workspace(&mut self, sender: &AsyncComponentSender<Self>) {
        for (_, token) in self.cancel_tokens.drain() {
            token.cancel();
        }
        self.pending_titles.clear();
        self.session = None;
        self.settings_dialog = None;
        if let Some(services) = &self.services {
            services.images.clear();
        }
        self.apply(WorkspaceUpdate::Reset, sender);
    }

    /// Run `task` on the command runtime with a valid access token, refreshing
    /// the session first when it is about to expire.
    fn with_token<F, Fut>(&self, sender: &AsyncComponentSender<Self>, task: F)
    where
        F: FnOnce(Services, String, relm4::Sender<AppCmd>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (Some(services), Some(session)) = (self.services.clone(), self.session.clone())
        else {
            return;
        };
        sender.command(move |out, _| {
            Box::pin(async move {
                match services.auth.ensure_fresh(&session).await {
                    Ok(fresh) => {
                        if fresh.access_token != session.access_token {
                            let _ = out.send(AppCmd::SessionRefreshed(fresh.clone()));
                        }
                        task(services, fresh.access_token, out).await;
                    }
                    Err(e) => {
                        let _ = out.send(AppCmd::SessionLost(format!("{:#}", e)));
                    }
                }
            })
        });
    }

    fn load_chats(&self, sender: &AsyncComponentSender<Self>) {
        self.with_token(sender, |services, token, out| async move {
            match conversation::load_conversations(services.store.as_ref(), &token).await {
                Ok(conversations) => {
                    let _ = out.send(AppCmd::ChatsLoaded(conversations));
                }
                Err(e) => tracing::error!("{:#}", e),
            }
        });
    }

    fn load_messages(&self, chat_id: String, sender: &AsyncComponentSender<Self>) {
        self.with_token(sender, move |services, token, out| async move {
            match conversation::load_messages(services.store.as_ref(), &token, &chat_id).await {
                Ok(messages) => {
                    let _ = out.send(AppCmd::MessagesLoaded { chat_id, messages });
                }
                Err(e) => tracing::error!("{:#}", e),
            }
        });
    }

    /// Single entry point for workspace mutations; views follow the returned change.
    fn apply(&mut self, update: WorkspaceUpdate, sender: &AsyncComponentSender<Self>) {
        let change = self.state.apply(update);
        self.refresh(change, sender);
    }

    fn refresh(&mut self, change: Change, sender: &AsyncComponentSender<Self>) {
        if change.conversations || change.active {
            self.sidebar.emit(SidebarMsg::SetConversations {
                conversations: self
                    .state
                    .filtered_conversations()
                    .into_iter()
                    .cloned()
                    .collect(),
                active_id: self.state.active_id.clone(),
            });
            match self.state.active() {
                Some(active) => self.content_title.set_title(active.display_title()),
                None => self.content_title.set_title(config::APP_NAME),
            }
        }

        if change.active || change.messages {
            let streaming = self
                .state
                .active_id
                .as_deref()
                .and_then(|id| self.state.streaming_message(id))
                .cloned();
            if let Some(chat_view) = &self.chat_view {
                chat_view.emit(ChatViewMsg::SetStreaming(streaming));
                chat_view.emit(ChatViewMsg::SetComposerEnabled(self.state.can_send()));
            }
        }

        if change.messages {
            if let Some(chat_view) = &self.chat_view {
                chat_view.emit(ChatViewMsg::SyncMessages(self.state.messages.clone()));
            }
        }

        if change.active {
            let page = if self.state.active_id.is_some() {
                "chat"
            } else {
                "empty"
            };
            self.content_stack.set_visible_child_name(page);

            // Selection changes and finished replies both (re)load the transcript
            if let Some(chat_id) = self.state.active_id.clone() {
                self.load_messages(chat_id, sender);
            }
        }
    }

    fn handle_send(
        &mut self,
        text: String,
        attachment: Option<Attachment>,
        sender: &AsyncComponentSender<Self>,
    ) {
        let Some(chat_id) = self.state.active_id.clone() else {
            return;
        };
        if !self.state.can_send() {
            tracing::debug!("Ignoring send while a reply is in flight for {}", chat_id);
            return;
        }
        let Some(outbound) = compose_outbound(&text, attachment, self.settings.persona()) else {
            return;
        };

        let mut optimistic = Message::pending(Sender::User, outbound.display_text.clone());
        optimistic.attachment = outbound.attachment.clone().map(AttachmentRef::Local);
        if outbound.final_text != outbound.display_text {
            optimistic.sent_as = Some(outbound.final_text.clone());
        }
        self.apply(
            WorkspaceUpdate::SendStarted {
                chat_id: chat_id.clone(),
                message: optimistic,
            },
            sender,
        );

        let cancel_token = CancellationToken::new();
        self.cancel_tokens
            .insert(chat_id.clone(), cancel_token.clone());
        self.pending_titles
            .insert(chat_id.clone(), outbound.display_text.clone());

        tracing::info!("Sending message to chat {}", chat_id);
        self.with_token(sender, move |services, token, out| async move {
            chat::send_turn(
                services.backend.clone(),
                token,
                chat_id,
                outbound,
                cancel_token,
                move |event| {
                    let _ = out.send(AppCmd::Stream(event));
                },
            )
            .await;
        });
    }

    fn handle_stream_event(&mut self, event: StreamResult, sender: &AsyncComponentSender<Self>) {
        match event {
            StreamResult::Started {
                chat_id,
                message_id,
            } => {
                self.apply(
                    WorkspaceUpdate::ReplyStarted {
                        chat_id,
                        message_id,
                    },
                    sender,
                );
            }
            StreamResult::Progress {
                chat_id,
                message_id,
                accumulated,
            } => {
                self.apply(
                    WorkspaceUpdate::ReplyProgress {
                        chat_id,
                        message_id,
                        content: accumulated,
                    },
                    sender,
                );
            }
            StreamResult::Done {
                chat_id,
                message_id,
                full_content,
            } => {
                tracing::info!("Reply complete for chat {}", chat_id);
                self.apply(
                    WorkspaceUpdate::ReplyProgress {
                        chat_id: chat_id.clone(),
                        message_id,
                        content: full_content,
                    },
                    sender,
                );
                self.finish_send(&chat_id, sender);
                self.maybe_retitle(&chat_id, sender);
            }
            StreamResult::Failed { chat_id, error } => {
                tracing::warn!("Reply failed for chat {}: {}", chat_id, error);
                self.apply(
                    WorkspaceUpdate::ErrorAppended {
                        chat_id: chat_id.clone(),
                        message: Message::error(&error),
                    },
                    sender,
                );
                self.finish_send(&chat_id, sender);
                self.pending_titles.remove(&chat_id);
            }
            StreamResult::Cancelled { chat_id } => {
                tracing::debug!("Reply cancelled for chat {}", chat_id);
                self.finish_send(&chat_id, sender);
                self.pending_titles.remove(&chat_id);
            }
        }
    }

    fn finish_send(&mut self, chat_id: &str, sender: &AsyncComponentSender<Self>) {
        self.cancel_tokens.remove(chat_id);
        self.apply(
            WorkspaceUpdate::ReplyFinished {
                chat_id: chat_id.to_string(),
            },
            sender,
        );
    }

    /// Name a fresh chat after its first message once the reply has landed.
    fn maybe_retitle(&mut self, chat_id: &str, sender: &AsyncComponentSender<Self>) {
        let Some(raw_text) = self.pending_titles.remove(chat_id) else {
            return;
        };
        let wanted = self
            .state
            .conversation(chat_id)
            .is_some_and(|c| conversation::should_retitle(c, &raw_text));
        if !wanted {
            return;
        }

        let chat_id = chat_id.to_string();
        self.with_token(sender, move |services, token, out| async move {
            match conversation::retitle_conversation(
                services.store.as_ref(),
                &token,
                &chat_id,
                &raw_text,
            )
            .await
            {
                Ok(title) => {
                    let _ = out.send(AppCmd::ChatRenamed { chat_id, title });
                }
                Err(e) => tracing::error!("{:#}", e),
            }
        });
    }

    fn handle_confirmed(&mut self, action: ConfirmAction, sender: &AsyncComponentSender<Self>) {
        match action {
            ConfirmAction::DeleteChat(chat_id) => {
                if let Some(token) = self.cancel_tokens.remove(&chat_id) {
                    token.cancel();
                }
                self.with_token(sender, move |services, token, out| async move {
                    let ids = vec![chat_id];
                    match conversation::delete_conversations(services.store.as_ref(), &token, &ids)
                        .await
                    {
                        Ok(()) => {
                            let _ = out.send(AppCmd::ChatsDeleted(ids));
                        }
                        Err(e) => {
                            tracing::error!("{:#}", e);
                            let _ = out.send(AppCmd::Failed("Failed to delete chat".into()));
                        }
                    }
                });
            }
            ConfirmAction::ClearAll => {
                for (_, token) in self.cancel_tokens.drain() {
                    token.cancel();
                }
                let ids: Vec<String> = self
                    .state
                    .conversations
                    .iter()
                    .map(|c| c.id.clone())
                    .collect();
                self.with_token(sender, move |services, token, out| async move {
                    match conversation::delete_conversations(services.store.as_ref(), &token, &ids)
                        .await
                    {
                        Ok(()) => {
                            if let Err(e) = services.db.clear_feedback().await {
                                tracing::warn!("Failed to clear feedback: {:#}", e);
                            }
                            let _ = out.send(AppCmd::AllCleared);
                        }
                        Err(e) => {
                            tracing::error!("{:#}", e);
                            let _ = out.send(AppCmd::Failed("Failed to clear chats".into()));
                        }
                    }
                });
            }
            ConfirmAction::SignOut => {
                for (_, token) in self.cancel_tokens.drain() {
                    token.cancel();
                }
                let (Some(services), Some(session)) = (self.services.clone(), self.session.clone())
                else {
                    return;
                };
                sender.command(move |out, _| {
                    Box::pin(async move {
                        if let Err(e) = services.auth.sign_out(&session).await {
                            tracing::warn!("Failed to forget session: {:#}", e);
                        }
                        let _ = out.send(AppCmd::SignedOut);
                    })
                });
            }
        }
    }
}
