use adw::prelude::*;
use relm4::prelude::*;

use crate::models::persona::PERSONAS;
use crate::services::settings::{apply_color_scheme, AppSettings, ColorScheme};

pub struct SettingsDialog {
    settings: AppSettings,
    email: String,
    persona_cards: Vec<(&'static str, gtk::Button)>,
}

pub struct SettingsDialogInit {
    pub settings: AppSettings,
    pub email: String,
}

#[derive(Debug)]
pub enum SettingsDialogMsg {
    ColorSchemeChanged(u32),
    PersonaSelected(&'static str),
    ClearAllClicked,
    SignOutClicked,
}

#[derive(Debug)]
pub enum SettingsDialogOutput {
    SettingsChanged(AppSettings),
    ClearAll,
    SignOut,
}

#[relm4::component(pub)]
impl Component for SettingsDialog {
    type Init = SettingsDialogInit;
    type Input = SettingsDialogMsg;
    type Output = SettingsDialogOutput;
    type CommandOutput = ();

    view! {
        adw::PreferencesDialog {
            set_title: "Settings",
            set_search_enabled: false,

            add = &adw::PreferencesPage {
                adw::PreferencesGroup {
                    set_title: "Appearance",

                    adw::ComboRow {
                        set_title: "Theme Mode",
                        set_model: Some(&gtk::StringList::new(&["System", "Light", "Dark"])),
                        set_selected: match model.settings.color_scheme {
                            ColorScheme::System => 0,
                            ColorScheme::Light => 1,
                            ColorScheme::Dark => 2,
                        },
                        connect_selected_notify[sender] => move |row| {
                            sender.input(SettingsDialogMsg::ColorSchemeChanged(row.selected()));
                        },
                    },
                },

                adw::PreferencesGroup {
                    set_title: "Intelligence Profile",
                    set_description: Some("Prepended to every message you send"),

                    #[name = "persona_grid"]
                    gtk::FlowBox {
                        set_selection_mode: gtk::SelectionMode::None,
                        set_homogeneous: true,
                        set_min_children_per_line: 2,
                        set_max_children_per_line: 3,
                        set_row_spacing: 8,
                        set_column_spacing: 8,
                    },
                },

                adw::PreferencesGroup {
                    set_title: "Account & Data",

                    adw::ActionRow {
                        set_title: "Email",
                        add_prefix = &gtk::Image {
                            set_icon_name: Some("avatar-default-symbolic"),
                        },
                        add_suffix = &gtk::Label {
                            set_label: &model.email,
                            add_css_class: "dim-label",
                        },
                    },
                },

                adw::PreferencesGroup {
                    set_title: "Session",

                    adw::ActionRow {
                        set_title: "Clear All History",
                        set_activatable: true,
                        add_css_class: "error",
                        add_prefix = &gtk::Image {
                            set_icon_name: Some("user-trash-symbolic"),
                        },
                        connect_activated => SettingsDialogMsg::ClearAllClicked,
                    },

                    adw::ActionRow {
                        set_title: "Sign Out",
                        set_activatable: true,
                        add_prefix = &gtk::Image {
                            set_icon_name: Some("system-log-out-symbolic"),
                        },
                        connect_activated => SettingsDialogMsg::SignOutClicked,
                    },
                },
            },
        }
    }

    fn init(
        init: Self::Init,
        root: Self::Root,
        sender: ComponentSender<Self>,
    ) -> ComponentParts<Self> {
        let mut model = Self {
            settings: init.settings,
            email: init.email,
            persona_cards: Vec::new(),
        };

        let widgets = view_output!();

        for persona in PERSONAS {
            let content = gtk::Box::builder()
                .orientation(gtk::Orientation::Vertical)
                .spacing(2)
                .build();
            let name = gtk::Label::new(Some(persona.name));
            name.add_css_class("heading");
            let description = gtk::Label::builder()
                .label(persona.description)
                .wrap(true)
                .justify(gtk::Justification::Center)
                .build();
            description.add_css_class("dim-label");
            description.add_css_class("caption");
            content.append(&name);
            content.append(&description);

            let card = gtk::Button::builder().child(&content).build();
            card.add_css_class("flat");
            card.add_css_class("persona-card");
            if persona.id == model.settings.persona_id {
                card.add_css_class("active");
            }

            let sender_card = sender.input_sender().clone();
            let id = persona.id;
            card.connect_clicked(move |_| {
                sender_card.emit(SettingsDialogMsg::PersonaSelected(id));
            });

            widgets.persona_grid.append(&card);
            model.persona_cards.push((persona.id, card));
        }

        ComponentParts { model, widgets }
    }

    fn update(&mut self, msg: Self::Input, sender: ComponentSender<Self>, root: &Self::Root) {
        match msg {
            SettingsDialogMsg::ColorSchemeChanged(idx) => {
                self.settings.color_scheme = match idx {
                    1 => ColorScheme::Light,
                    2 => ColorScheme::Dark,
                    _ => ColorScheme::System,
                };

                // Apply immediately
                apply_color_scheme(self.settings.color_scheme);
                let _ = sender.output(SettingsDialogOutput::SettingsChanged(self.settings.clone()));
            }
            SettingsDialogMsg::PersonaSelected(id) => {
                if self.settings.persona_id == id {
                    return;
                }
                self.settings.persona_id = id.to_string();
                for (card_id, card) in &self.persona_cards {
                    if *card_id == id {
                        card.add_css_class("active");
                    } else {
                        card.remove_css_class("active");
                    }
                }
                let _ = sender.output(SettingsDialogOutput::SettingsChanged(self.settings.clone()));
            }
            SettingsDialogMsg::ClearAllClicked => {
                root.close();
                let _ = sender.output(SettingsDialogOutput::ClearAll);
            }
            SettingsDialogMsg::SignOutClicked => {
                root.close();
                let _ = sender.output(SettingsDialogOutput::SignOut);
            }
        }
    }
}
