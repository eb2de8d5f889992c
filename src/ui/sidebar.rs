use adw::prelude::*;
use relm4::factory::FactoryVecDeque;
use relm4::prelude::*;

use crate::models::Conversation;

// --- ConversationRow factory component ---

#[derive(Debug)]
pub struct ConversationRowInit {
    pub conversation: Conversation,
    pub active: bool,
}

#[derive(Debug)]
pub struct ConversationRow {
    pub conversation: Conversation,
    active: bool,
}

#[derive(Debug)]
pub enum ConversationRowMsg {}

#[derive(Debug)]
pub enum ConversationRowOutput {
    Delete(String),
}

#[relm4::factory(pub)]
impl FactoryComponent for ConversationRow {
    type Init = ConversationRowInit;
    type Input = ConversationRowMsg;
    type Output = ConversationRowOutput;
    type CommandOutput = ();
    type ParentWidget = gtk::ListBox;

    view! {
        gtk::Box {
            set_orientation: gtk::Orientation::Horizontal,
            set_spacing: 8,
            set_margin_all: 6,

            gtk::Image {
                set_icon_name: Some("chat-bubble-text-symbolic"),
                add_css_class: "dim-label",
            },

            gtk::Label {
                set_label: self.conversation.display_title(),
                set_halign: gtk::Align::Start,
                set_hexpand: true,
                set_ellipsize: gtk::pango::EllipsizeMode::End,
                set_max_width_chars: 30,
            },

            // Only the active row offers deletion
            gtk::Button {
                set_icon_name: "user-trash-symbolic",
                set_tooltip_text: Some("Delete Chat"),
                set_visible: self.active,
                add_css_class: "flat",
                add_css_class: "circular",
                connect_clicked[sender, id = self.conversation.id.clone()] => move |_| {
                    let _ = sender.output(ConversationRowOutput::Delete(id.clone()));
                },
            },
        }
    }

    fn init_model(init: Self::Init, _index: &DynamicIndex, _sender: FactorySender<Self>) -> Self {
        Self {
            conversation: init.conversation,
            active: init.active,
        }
    }
}

// --- Sidebar component ---

pub struct Sidebar {
    pub conversations: FactoryVecDeque<ConversationRow>,
    email: String,
}

#[derive(Debug)]
pub enum SidebarMsg {
    /// Already filtered by the current search term, newest first.
    SetConversations {
        conversations: Vec<Conversation>,
        active_id: Option<String>,
    },
    SetEmail(String),
    NewChat,
    RowActivated(usize),
    DeleteRequested(String),
    SearchChanged(String),
    SignOut,
    OpenSettings,
}

#[derive(Debug)]
pub enum SidebarOutput {
    NewChat,
    ConversationSelected(String),
    DeleteConversation(String),
    SearchChanged(String),
    SignOut,
    OpenSettings,
}

#[relm4::component(pub)]
impl Component for Sidebar {
    type Init = ();
    type Input = SidebarMsg;
    type Output = SidebarOutput;
    type CommandOutput = ();

    view! {
        adw::ToolbarView {
            add_top_bar = &adw::HeaderBar {
                set_show_end_title_buttons: false,

                #[wrap(Some)]
                set_title_widget = &adw::WindowTitle {
                    set_title: crate::config::APP_NAME,
                },

                pack_end = &gtk::Button {
                    set_icon_name: "emblem-system-symbolic",
                    set_tooltip_text: Some("Settings"),
                    connect_clicked => SidebarMsg::OpenSettings,
                },
            },

            #[wrap(Some)]
            set_content = &gtk::Box {
                set_orientation: gtk::Orientation::Vertical,
                set_spacing: 0,

                gtk::Button {
                    set_margin_start: 8,
                    set_margin_end: 8,
                    set_margin_top: 6,
                    add_css_class: "suggested-action",
                    connect_clicked => SidebarMsg::NewChat,

                    #[wrap(Some)]
                    set_child = &adw::ButtonContent {
                        set_icon_name: "list-add-symbolic",
                        set_label: "New Chat",
                    },
                },

                gtk::SearchEntry {
                    set_placeholder_text: Some("Search conversations..."),
                    set_margin_start: 8,
                    set_margin_end: 8,
                    set_margin_top: 6,
                    set_margin_bottom: 4,
                    connect_search_changed[sender] => move |entry| {
                        sender.input(SidebarMsg::SearchChanged(entry.text().to_string()));
                    },
                },

                gtk::Label {
                    set_label: "Recent",
                    set_halign: gtk::Align::Start,
                    set_margin_start: 12,
                    set_margin_top: 6,
                    add_css_class: "dim-label",
                    add_css_class: "caption",
                    add_css_class: "sidebar-section-header",
                },

                gtk::ScrolledWindow {
                    set_hscrollbar_policy: gtk::PolicyType::Never,
                    set_vexpand: true,

                    #[local_ref]
                    conversation_list -> gtk::ListBox {
                        set_selection_mode: gtk::SelectionMode::Single,
                        add_css_class: "navigation-sidebar",
                    },
                },

                gtk::Separator {},

                // Account footer
                gtk::Box {
                    set_orientation: gtk::Orientation::Horizontal,
                    set_spacing: 8,
                    set_margin_all: 8,

                    adw::Avatar {
                        set_size: 32,
                        set_show_initials: true,
                        #[watch]
                        set_text: Some(model.email.as_str()),
                    },

                    gtk::Label {
                        #[watch]
                        set_label: &model.email,
                        set_hexpand: true,
                        set_halign: gtk::Align::Start,
                        set_ellipsize: gtk::pango::EllipsizeMode::End,
                        add_css_class: "caption",
                    },

                    gtk::Button {
                        set_icon_name: "system-log-out-symbolic",
                        set_tooltip_text: Some("Sign Out"),
                        add_css_class: "flat",
                        connect_clicked => SidebarMsg::SignOut,
                    },
                },
            },
        }
    }

    fn init(
        _init: Self::Init,
        root: Self::Root,
        sender: ComponentSender<Self>,
    ) -> ComponentParts<Self> {
        let conversations = FactoryVecDeque::builder()
            .launch(gtk::ListBox::default())
            .forward(sender.input_sender(), |output| match output {
                ConversationRowOutput::Delete(id) => SidebarMsg::DeleteRequested(id),
            });

        let model = Self {
            conversations,
            email: String::new(),
        };

        let conversation_list = model.conversations.widget();
        let widgets = view_output!();

        let sender_clone = sender.clone();
        model
            .conversations
            .widget()
            .connect_row_activated(move |_, row| {
                sender_clone.input(SidebarMsg::RowActivated(row.index() as usize));
            });

        ComponentParts { model, widgets }
    }

    fn update(&mut self, msg: Self::Input, sender: ComponentSender<Self>, _root: &Self::Root) {
        match msg {
            SidebarMsg::SetConversations {
                conversations,
                active_id,
            } => {
                let mut guard = self.conversations.guard();
                guard.clear();

                let mut active_index = None;
                for (i, conversation) in conversations.into_iter().enumerate() {
                    let active = active_id.as_deref() == Some(conversation.id.as_str());
                    if active {
                        active_index = Some(i as i32);
                    }
                    guard.push_back(ConversationRowInit {
                        conversation,
                        active,
                    });
                }
                drop(guard);

                let list = self.conversations.widget();
                match active_index.and_then(|i| list.row_at_index(i)) {
                    Some(row) => list.select_row(Some(&row)),
                    None => list.unselect_all(),
                }
            }
            SidebarMsg::SetEmail(email) => {
                self.email = email;
            }
            SidebarMsg::NewChat => {
                let _ = sender.output(SidebarOutput::NewChat);
            }
            SidebarMsg::RowActivated(index) => {
                let id = self
                    .conversations
                    .guard()
                    .get(index)
                    .map(|row| row.conversation.id.clone());
                if let Some(id) = id {
                    let _ = sender.output(SidebarOutput::ConversationSelected(id));
                }
            }
            SidebarMsg::DeleteRequested(id) => {
                let _ = sender.output(SidebarOutput::DeleteConversation(id));
            }
            SidebarMsg::SearchChanged(term) => {
                let _ = sender.output(SidebarOutput::SearchChanged(term));
            }
            SidebarMsg::SignOut => {
                let _ = sender.output(SidebarOutput::SignOut);
            }
            SidebarMsg::OpenSettings => {
                let _ = sender.output(SidebarOutput::OpenSettings);
            }
        }
    }
}
