use adw::prelude::*;
use relm4::prelude::*;

/// Sign-in page shown while there is no session.
pub struct LoginPage {
    waiting: bool,
    error: Option<String>,
}

#[derive(Debug)]
pub enum LoginMsg {
    SignInClicked,
    /// The browser was opened and the redirect has not come back yet.
    SetWaiting(bool),
    SetError(Option<String>),
}

#[derive(Debug)]
pub enum LoginOutput {
    SignIn,
}

#[relm4::component(pub)]
impl Component for LoginPage {
    type Init = ();
    type Input = LoginMsg;
    type Output = LoginOutput;
    type CommandOutput = ();

    view! {
        adw::ToolbarView {
            add_top_bar = &adw::HeaderBar {
                set_show_title: false,
            },

            #[wrap(Some)]
            set_content = &adw::StatusPage {
                set_icon_name: Some("starred-symbolic"),
                set_title: "Welcome Back",
                set_description: Some("Sign in to continue to your AI workspace."),

                #[wrap(Some)]
                set_child = &gtk::Box {
                    set_orientation: gtk::Orientation::Vertical,
                    set_spacing: 12,
                    set_halign: gtk::Align::Center,

                    gtk::Button {
                        add_css_class: "pill",
                        add_css_class: "suggested-action",
                        #[watch]
                        set_sensitive: !model.waiting,
                        connect_clicked => LoginMsg::SignInClicked,

                        #[wrap(Some)]
                        set_child = &adw::ButtonContent {
                            set_icon_name: "system-users-symbolic",
                            set_label: "Sign in with Google",
                        },
                    },

                    gtk::Spinner {
                        #[watch]
                        set_visible: model.waiting,
                        #[watch]
                        set_spinning: model.waiting,
                    },

                    gtk::Label {
                        set_wrap: true,
                        set_justify: gtk::Justification::Center,
                        add_css_class: "error",
                        #[watch]
                        set_visible: model.error.is_some(),
                        #[watch]
                        set_label: model.error.as_deref().unwrap_or(""),
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
            waiting: false,
            error: None,
        };
        let widgets = view_output!();
        ComponentParts { model, widgets }
    }

    fn update(&mut self, msg: Self::Input, sender: ComponentSender<Self>, _root: &Self::Root) {
        match msg {
            LoginMsg::SignInClicked => {
                self.error = None;
                let _ = sender.output(LoginOutput::SignIn);
            }
            LoginMsg::SetWaiting(waiting) => {
                self.waiting = waiting;
            }
            LoginMsg::SetError(error) => {
                self.waiting = false;
                self.error = error;
            }
        }
    }
}
