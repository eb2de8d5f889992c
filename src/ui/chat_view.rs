use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use gtk::prelude::*;
use relm4::factory::FactoryVecDeque;
use relm4::prelude::*;

use crate::models::{Attachment, Message, MessageId};
use crate::ui::input_area::{InputArea, InputAreaMsg, InputAreaOutput};
use crate::ui::message_widget::{
    MessageServices, MessageWidget, MessageWidgetInit, MessageWidgetMsg, MessageWidgetOutput,
};

/// Streamed text is re-rendered at most this often.
const RENDER_INTERVAL: Duration = Duration::from_millis(80);

pub struct ChatView {
    messages: FactoryVecDeque<MessageWidget>,
    input_area: Controller<InputArea>,
    services: MessageServices,
    scrolled_window: gtk::ScrolledWindow,
    streaming_id: Option<MessageId>,
    streaming_buffer: Rc<RefCell<Option<StreamBuffer>>>,
    render_timer_active: Rc<RefCell<bool>>,
    user_scrolled_up: bool,
    container_width: i32,
    dark: bool,
}

struct StreamBuffer {
    message_id: MessageId,
    accumulated_text: String,
    needs_render: bool,
}

#[derive(Debug)]
pub enum ChatViewMsg {
    /// The active transcript changed; bring the widgets in line with it.
    SyncMessages(Vec<Message>),
    /// Id of the placeholder currently streaming in this chat, if any.
    SetStreaming(Option<MessageId>),
    SetComposerEnabled(bool),
    SetDark(bool),
    ScrollToBottom,
    UserSendMessage {
        text: String,
        attachment: Option<Attachment>,
    },
    // Internal
    RenderBuffered,
    ScrollPositionChanged,
    ContainerWidthChanged(i32),
    FileDropped(PathBuf),
    // Forwarded from MessageWidget
    CopyToClipboard(String),
    RenderFailed(String),
}

#[derive(Debug)]
pub enum ChatViewOutput {
    SendMessage {
        text: String,
        attachment: Option<Attachment>,
    },
    RenderFailed(String),
}

#[relm4::component(pub)]
impl Component for ChatView {
    type Init = MessageServices;
    type Input = ChatViewMsg;
    type Output = ChatViewOutput;
    type CommandOutput = ();

    view! {
        gtk::Box {
            set_orientation: gtk::Orientation::Vertical,
            set_vexpand: true,

            gtk::Overlay {
                set_vexpand: true,

                #[local_ref]
                scrolled_window -> gtk::ScrolledWindow {
                    set_vexpand: true,
                    set_hscrollbar_policy: gtk::PolicyType::Never,

                    #[local_ref]
                    message_list -> gtk::Box {
                        set_orientation: gtk::Orientation::Vertical,
                        set_spacing: 0,
                        set_margin_top: 8,
                        set_margin_bottom: 8,
                        set_margin_start: 16,
                        set_margin_end: 16,
                    },
                },

                add_overlay = &gtk::Button {
                    set_icon_name: "go-down-symbolic",
                    set_tooltip_text: Some("Scroll to bottom"),
                    set_halign: gtk::Align::Center,
                    set_valign: gtk::Align::End,
                    set_margin_bottom: 8,
                    add_css_class: "circular",
                    add_css_class: "osd",
                    #[watch]
                    set_visible: model.user_scrolled_up,
                    connect_clicked => ChatViewMsg::ScrollToBottom,
                },
            },

            gtk::Separator {
                set_orientation: gtk::Orientation::Horizontal,
            },

            model.input_area.widget().clone(),
        }
    }

    fn init(
        services: Self::Init,
        root: Self::Root,
        sender: ComponentSender<Self>,
    ) -> ComponentParts<Self> {
        let messages = FactoryVecDeque::builder()
            .launch(gtk::Box::default())
            .forward(sender.input_sender(), |output| match output {
                MessageWidgetOutput::CopyFullContent(content) => {
                    ChatViewMsg::CopyToClipboard(content)
                }
                MessageWidgetOutput::RenderFailed(reason) => ChatViewMsg::RenderFailed(reason),
            });

        let input_area = InputArea::builder()
            .launch(())
            .forward(sender.input_sender(), |output| match output {
                InputAreaOutput::SendMessage { text, attachment } => {
                    ChatViewMsg::UserSendMessage { text, attachment }
                }
            });

        let scrolled_window = gtk::ScrolledWindow::new();

        let model = Self {
            messages,
            input_area,
            services,
            scrolled_window: scrolled_window.clone(),
            streaming_id: None,
            streaming_buffer: Rc::new(RefCell::new(None)),
            render_timer_active: Rc::new(RefCell::new(false)),
            user_scrolled_up: false,
            container_width: 0,
            dark: adw::StyleManager::default().is_dark(),
        };

        let message_list = model.messages.widget();
        let widgets = view_output!();

        let sender_scroll = sender.input_sender().clone();
        scrolled_window
            .vadjustment()
            .connect_value_changed(move |_| {
                sender_scroll.emit(ChatViewMsg::ScrollPositionChanged);
            });

        // Track container width for responsive bubble sizing
        let sender_resize = sender.input_sender().clone();
        let last_width: Rc<RefCell<i32>> = Rc::new(RefCell::new(0));
        scrolled_window.add_tick_callback(move |widget, _| {
            let w = widget.width();
            if w > 0 && w != *last_width.borrow() {
                *last_width.borrow_mut() = w;
                sender_resize.emit(ChatViewMsg::ContainerWidthChanged(w));
            }
            glib::ControlFlow::Continue
        });

        let sender_dark = sender.input_sender().clone();
        adw::StyleManager::default().connect_dark_notify(move |manager| {
            sender_dark.emit(ChatViewMsg::SetDark(manager.is_dark()));
        });

        // Dropping a file attaches it like the attach button does
        let drop_target =
            gtk::DropTarget::new(gio::File::static_type(), gtk::gdk::DragAction::COPY);
        let sender_drop = sender.input_sender().clone();
        drop_target.connect_drop(move |_, value, _, _| {
            match value.get::<gio::File>().ok().and_then(|f| f.path()) {
                Some(path) => {
                    sender_drop.emit(ChatViewMsg::FileDropped(path));
                    true
                }
                None => false,
            }
        });
        root.add_controller(drop_target);

        ComponentParts { model, widgets }
    }

    fn update(&mut self, msg: Self::Input, sender: ComponentSender<Self>, _root: &Self::Root) {
        match msg {
            ChatViewMsg::SyncMessages(messages) => {
                self.sync_messages(messages, &sender);
            }
            ChatViewMsg::SetStreaming(id) => {
                if self.streaming_id == id {
                    return;
                }
                if let Some(previous) = self.streaming_id.take() {
                    self.finish_streaming(&previous);
                }
                self.streaming_id = id;
            }
            ChatViewMsg::SetComposerEnabled(enabled) => {
                self.input_area.emit(InputAreaMsg::SetEnabled(enabled));
            }
            ChatViewMsg::SetDark(dark) => {
                if self.dark != dark {
                    self.dark = dark;
                    let guard = self.messages.guard();
                    for i in 0..guard.len() {
                        guard.send(i, MessageWidgetMsg::SetDark(dark));
                    }
                }
            }
            ChatViewMsg::ScrollToBottom => {
                self.user_scrolled_up = false;
                let adj = self.scrolled_window.vadjustment();
                glib::idle_add_local_once(move || {
                    adj.set_value(adj.upper());
                });
            }
            ChatViewMsg::ScrollPositionChanged => {
                let adj = self.scrolled_window.vadjustment();
                let at_bottom = adj.value() >= adj.upper() - adj.page_size() - 50.0;
                self.user_scrolled_up = !at_bottom;
            }
            ChatViewMsg::UserSendMessage { text, attachment } => {
                let _ = sender.output(ChatViewOutput::SendMessage { text, attachment });
                sender.input(ChatViewMsg::ScrollToBottom);
            }
            ChatViewMsg::RenderBuffered => {
                let mut buf = self.streaming_buffer.borrow_mut();
                if let Some(buffer) = buf.as_mut() {
                    if buffer.needs_render {
                        buffer.needs_render = false;
                        let text = buffer.accumulated_text.clone();
                        let msg_id = buffer.message_id.clone();
                        drop(buf);

                        self.send_to_message(&msg_id, MessageWidgetMsg::UpdateContent(text));
                        self.auto_scroll_to_bottom(&sender);
                    }
                }
            }
            ChatViewMsg::ContainerWidthChanged(width) => {
                if self.container_width != width {
                    self.container_width = width;
                    let guard = self.messages.guard();
                    for i in 0..guard.len() {
                        guard.send(i, MessageWidgetMsg::SetMaxWidth(width));
                    }
                }
            }
            ChatViewMsg::FileDropped(path) => {
                self.input_area.emit(InputAreaMsg::AddFileFromPath(path));
            }
            ChatViewMsg::CopyToClipboard(content) => {
                if let Some(display) = gtk::gdk::Display::default() {
                    display.clipboard().set_text(&content);
                }
            }
            ChatViewMsg::RenderFailed(reason) => {
                let _ = sender.output(ChatViewOutput::RenderFailed(reason));
            }
        }
    }
}

impl ChatView {
    /// Widgets are matched to messages by position and id. When the ids still
    /// line up only content changes are pushed; any reordering or re-keying
    /// (a refetch replacing pending ids) rebuilds the list.
    fn sync_messages(&mut self, messages: Vec<Message>, sender: &ComponentSender<Self>) {
        let mut guard = self.messages.guard();
        let aligned = guard.len() <= messages.len()
            && guard
                .iter()
                .zip(&messages)
                .all(|(widget, message)| widget.message.id == message.id);

        if !aligned {
            guard.clear();
        }

        let existing = guard.len();
        let mut buffered = None;
        for (idx, message) in messages.iter().enumerate().take(existing) {
            let stale = guard
                .get(idx)
                .is_some_and(|w| w.message.content != message.content);
            if !stale {
                continue;
            }
            if self.streaming_id.as_ref() == Some(&message.id) {
                buffered = Some((message.id.clone(), message.content.clone()));
            } else {
                guard.send(idx, MessageWidgetMsg::UpdateContent(message.content.clone()));
            }
        }

        let appended = messages.len() > existing;
        for message in messages.into_iter().skip(existing) {
            let streaming = self.streaming_id.as_ref() == Some(&message.id);
            guard.push_back(MessageWidgetInit {
                message,
                services: self.services.clone(),
                streaming,
                dark: self.dark,
            });
            if self.container_width > 0 {
                guard.send(
                    guard.len() - 1,
                    MessageWidgetMsg::SetMaxWidth(self.container_width),
                );
            }
        }
        drop(guard);

        if let Some((message_id, text)) = buffered {
            self.buffer_stream_update(message_id, text, sender);
        }
        if !aligned {
            sender.input(ChatViewMsg::ScrollToBottom);
        } else if appended {
            self.auto_scroll_to_bottom(sender);
        }
    }

    fn buffer_stream_update(
        &mut self,
        message_id: MessageId,
        text: String,
        sender: &ComponentSender<Self>,
    ) {
        *self.streaming_buffer.borrow_mut() = Some(StreamBuffer {
            message_id,
            accumulated_text: text,
            needs_render: true,
        });

        if !*self.render_timer_active.borrow() {
            *self.render_timer_active.borrow_mut() = true;
            let sender_timer = sender.input_sender().clone();
            let timer_active = self.render_timer_active.clone();
            glib::timeout_add_local(RENDER_INTERVAL, move || {
                if !*timer_active.borrow() {
                    return glib::ControlFlow::Break;
                }
                sender_timer.emit(ChatViewMsg::RenderBuffered);
                glib::ControlFlow::Continue
            });
        }
    }

    /// Stop the render timer, flush the last buffered text and let the widget
    /// render what it deferred while streaming.
    fn finish_streaming(&mut self, message_id: &MessageId) {
        *self.render_timer_active.borrow_mut() = false;

        let pending = self.streaming_buffer.borrow_mut().take();
        if let Some(buffer) = pending {
            if buffer.message_id == *message_id {
                self.send_to_message(
                    message_id,
                    MessageWidgetMsg::UpdateContent(buffer.accumulated_text),
                );
            }
        }
        self.send_to_message(message_id, MessageWidgetMsg::StreamingComplete);
    }

    fn auto_scroll_to_bottom(&mut self, sender: &ComponentSender<Self>) {
        let adj = self.scrolled_window.vadjustment();
        let at_bottom = adj.value() >= adj.upper() - adj.page_size() - 50.0;
        self.user_scrolled_up = !at_bottom;

        if !self.user_scrolled_up {
            sender.input(ChatViewMsg::ScrollToBottom);
        }
    }

    fn send_to_message(&self, message_id: &MessageId, msg: MessageWidgetMsg) {
        if let Some(idx) = self.messages.iter().position(|m| m.message.id == *message_id) {
            self.messages.send(idx, msg);
        }
    }
}
