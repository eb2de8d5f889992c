use std::path::PathBuf;

use gtk::prelude::*;
use relm4::prelude::*;

use crate::models::Attachment;

pub struct InputArea {
    buffer: gtk::TextBuffer,
    /// False while there is no active chat or its reply is still streaming.
    enabled: bool,
    attachment: Option<Attachment>,
    attachment_label: gtk::Label,
    char_count: i32,
}

#[derive(Debug)]
pub enum InputAreaMsg {
    SendClicked,
    SetEnabled(bool),
    AttachFile,
    AddFileFromPath(PathBuf),
    RemoveAttachment,
    // Internal
    TextChanged,
    PasteImage(Vec<u8>),
}

#[derive(Debug)]
pub enum InputAreaOutput {
    SendMessage {
        text: String,
        attachment: Option<Attachment>,
    },
}

#[relm4::component(pub)]
impl Component for InputArea {
    type Init = ();
    type Input = InputAreaMsg;
    type Output = InputAreaOutput;
    type CommandOutput = ();

    view! {
        gtk::Box {
            set_orientation: gtk::Orientation::Vertical,
            set_spacing: 0,

            // Pending attachment chip
            gtk::Box {
                set_orientation: gtk::Orientation::Horizontal,
                set_spacing: 6,
                set_halign: gtk::Align::Start,
                set_margin_start: 16,
                set_margin_top: 6,
                add_css_class: "attachment-chip",
                #[watch]
                set_visible: model.attachment.is_some(),

                gtk::Image {
                    #[watch]
                    set_icon_name: Some(if model.attachment.as_ref().is_some_and(Attachment::is_image) {
                        "image-x-generic-symbolic"
                    } else {
                        "text-x-generic-symbolic"
                    }),
                },

                #[local_ref]
                attachment_label -> gtk::Label {
                    set_max_width_chars: 32,
                    set_ellipsize: gtk::pango::EllipsizeMode::Middle,
                    add_css_class: "caption",
                },

                gtk::Button {
                    set_icon_name: "window-close-symbolic",
                    set_tooltip_text: Some("Remove attachment"),
                    add_css_class: "flat",
                    add_css_class: "circular",
                    connect_clicked => InputAreaMsg::RemoveAttachment,
                },
            },

            // Input card
            gtk::Box {
                set_orientation: gtk::Orientation::Horizontal,
                set_spacing: 4,
                set_margin_top: 8,
                set_margin_bottom: 4,
                set_margin_start: 12,
                set_margin_end: 12,
                add_css_class: "input-card",

                gtk::Button {
                    set_icon_name: "mail-attachment-symbolic",
                    set_tooltip_text: Some("Attach file"),
                    set_valign: gtk::Align::End,
                    set_margin_start: 4,
                    set_margin_bottom: 4,
                    add_css_class: "flat",
                    add_css_class: "circular",
                    #[watch]
                    set_sensitive: model.enabled,
                    connect_clicked => InputAreaMsg::AttachFile,
                },

                gtk::Overlay {
                    set_hexpand: true,

                    gtk::ScrolledWindow {
                        set_hexpand: true,
                        set_max_content_height: 150,
                        set_propagate_natural_height: true,
                        set_min_content_height: 40,

                        #[name = "text_view"]
                        gtk::TextView {
                            set_wrap_mode: gtk::WrapMode::WordChar,
                            set_accepts_tab: false,
                            set_top_margin: 8,
                            set_bottom_margin: 8,
                            set_left_margin: 8,
                            set_right_margin: 8,
                            add_css_class: "input-text-view",
                            set_buffer: Some(&model.buffer),
                            #[watch]
                            set_sensitive: model.enabled,
                        },
                    },

                    add_overlay = &gtk::Label {
                        set_label: "Type a message...",
                        set_halign: gtk::Align::Start,
                        set_valign: gtk::Align::Start,
                        set_margin_start: 12,
                        set_margin_top: 8,
                        set_can_target: false,
                        add_css_class: "dim-label",
                        #[watch]
                        set_visible: model.char_count == 0,
                    },
                },

                gtk::Button {
                    set_icon_name: "go-up-symbolic",
                    set_tooltip_text: Some("Send message (Enter)"),
                    set_valign: gtk::Align::End,
                    set_margin_end: 4,
                    set_margin_bottom: 4,
                    add_css_class: "suggested-action",
                    add_css_class: "circular",
                    #[watch]
                    set_sensitive: model.enabled && (model.char_count > 0 || model.attachment.is_some()),
                    connect_clicked => InputAreaMsg::SendClicked,
                },
            },

            gtk::Label {
                set_label: "AI can make mistakes. Please verify important information.",
                set_halign: gtk::Align::Center,
                set_margin_bottom: 6,
                add_css_class: "dim-label",
                add_css_class: "caption",
            },
        }
    }

    fn init(
        _init: Self::Init,
        root: Self::Root,
        sender: ComponentSender<Self>,
    ) -> ComponentParts<Self> {
        let buffer = gtk::TextBuffer::new(None::<&gtk::TextTagTable>);
        let attachment_label = gtk::Label::new(None);

        let model = Self {
            buffer: buffer.clone(),
            enabled: false,
            attachment: None,
            attachment_label: attachment_label.clone(),
            char_count: 0,
        };

        let widgets = view_output!();

        // Enter sends, Shift+Enter inserts a newline, Ctrl+V also tries for an image
        let sender_key = sender.clone();
        let key_controller = gtk::EventControllerKey::new();
        key_controller.connect_key_pressed(move |_, key, _code, modifier| {
            if key == gtk::gdk::Key::Return
                && !modifier.contains(gtk::gdk::ModifierType::SHIFT_MASK)
            {
                sender_key.input(InputAreaMsg::SendClicked);
                gtk::glib::Propagation::Stop
            } else if key == gtk::gdk::Key::v
                && modifier.contains(gtk::gdk::ModifierType::CONTROL_MASK)
            {
                let sender_paste = sender_key.input_sender().clone();
                if let Some(display) = gtk::gdk::Display::default() {
                    display.clipboard().read_texture_async(
                        None::<&gio::Cancellable>,
                        move |result| {
                            if let Ok(Some(texture)) = result {
                                let bytes = texture.save_to_png_bytes();
                                sender_paste.emit(InputAreaMsg::PasteImage(bytes.to_vec()));
                            }
                        },
                    );
                }
                gtk::glib::Propagation::Proceed
            } else {
                gtk::glib::Propagation::Proceed
            }
        });
        widgets.text_view.add_controller(key_controller);

        let sender_buf = sender.clone();
        buffer.connect_changed(move |_| {
            sender_buf.input(InputAreaMsg::TextChanged);
        });

        ComponentParts { model, widgets }
    }

    fn update(&mut self, msg: Self::Input, sender: ComponentSender<Self>, root: &Self::Root) {
        match msg {
            InputAreaMsg::SendClicked => {
                if !self.enabled {
                    return;
                }
                let text = self.get_text();
                if text.trim().is_empty() && self.attachment.is_none() {
                    return;
                }

                // Hand off and clear; the send itself is not awaited here.
                let attachment = self.attachment.take();
                let _ = sender.output(InputAreaOutput::SendMessage { text, attachment });
                self.buffer.set_text("");
                self.attachment_label.set_label("");
            }
            InputAreaMsg::SetEnabled(enabled) => {
                self.enabled = enabled;
            }
            InputAreaMsg::AttachFile => {
                let dialog = gtk::FileDialog::builder().title("Attach File").build();

                let sender_dlg = sender.input_sender().clone();
                if let Some(window) = root.root().and_then(|r| r.downcast::<gtk::Window>().ok()) {
                    dialog.open(Some(&window), None::<&gio::Cancellable>, move |result| {
                        if let Ok(file) = result {
                            if let Some(path) = file.path() {
                                sender_dlg.emit(InputAreaMsg::AddFileFromPath(path));
                            }
                        }
                    });
                }
            }
            InputAreaMsg::AddFileFromPath(path) => {
                self.attach_from_path(path);
            }
            InputAreaMsg::RemoveAttachment => {
                self.attachment = None;
                self.attachment_label.set_label("");
            }
            InputAreaMsg::TextChanged => {
                self.char_count = self.buffer.char_count();
            }
            InputAreaMsg::PasteImage(png_data) => {
                self.set_attachment(Attachment::new("clipboard.png", "image/png", png_data));
            }
        }
    }
}

impl InputArea {
    fn get_text(&self) -> String {
        let start = self.buffer.start_iter();
        let end = self.buffer.end_iter();
        self.buffer.text(&start, &end, false).to_string()
    }

    fn set_attachment(&mut self, attachment: Attachment) {
        self.attachment_label.set_label(&attachment.file_name);
        self.attachment = Some(attachment);
    }

    fn attach_from_path(&mut self, path: PathBuf) {
        let data = match std::fs::read(&path) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("Failed to read {}: {}", path.display(), e);
                return;
            }
        };

        let (content_type, _uncertain) = gio::content_type_guess(Some(&path), data.as_slice());
        let mime_type = gio::content_type_get_mime_type(&content_type)
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();

        let mut attachment = Attachment::new(file_name, mime_type, data);
        if let Some(modified) = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
        {
            attachment.last_modified = modified.into();
        }
        self.set_attachment(attachment);
    }
}
