use adw::prelude::*;
use relm4::prelude::*;

/// Replaces the workspace after a rendering failure.
pub struct CrashPanel {
    error: String,
}

#[derive(Debug)]
pub enum CrashPanelMsg {
    SetError(String),
    ReloadClicked,
}

#[derive(Debug)]
pub enum CrashPanelOutput {
    Reload,
}

#[relm4::component(pub)]
impl Component for CrashPanel {
    type Init = ();
    type Input = CrashPanelMsg;
    type Output = CrashPanelOutput;
    type CommandOutput = ();

    view! {
        adw::ToolbarView {
            add_top_bar = &adw::HeaderBar {
                set_show_title: false,
            },

            #[wrap(Some)]
            set_content = &adw::StatusPage {
                set_icon_name: Some("dialog-error-symbolic"),
                set_title: "Something went wrong",

                #[wrap(Some)]
                set_child = &gtk::Box {
                    set_orientation: gtk::Orientation::Vertical,
                    set_spacing: 18,
                    set_halign: gtk::Align::Center,

                    gtk::Label {
                        set_wrap: true,
                        set_selectable: true,
                        set_max_width_chars: 80,
                        add_css_class: "monospace",
                        add_css_class: "card",
                        add_css_class: "crash-details",
                        #[watch]
                        set_label: &model.error,
                    },

                    gtk::Button {
                        set_label: "Reload Application",
                        set_halign: gtk::Align::Center,
                        add_css_class: "pill",
                        add_css_class: "suggested-action",
                        connect_clicked => CrashPanelMsg::ReloadClicked,
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
        let model = Self {
            error: String::new(),
        };
        let widgets = view_output!();
        ComponentParts { model, widgets }
    }

    fn update(&mut self, msg: Self::Input, sender: ComponentSender<Self>, _root: &Self::Root) {
        match msg {
            CrashPanelMsg::SetError(error) => {
                tracing::error!("Showing crash panel: {}", error);
                self.error = error;
            }
            CrashPanelMsg::ReloadClicked => {
                let _ = sender.output(CrashPanelOutput::Reload);
            }
        }
    }
}
