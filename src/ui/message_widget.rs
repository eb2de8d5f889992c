use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gtk::prelude::*;
use relm4::prelude::*;

use crate::models::{AttachmentRef, Message, Sender};
use crate::services::content::render_content;
use crate::services::database::Feedback;
use crate::services::diagram::{render_diagram, RenderedDiagram};
use crate::services::highlight::highlight_to_pango;
use crate::services::markdown::{
    spans_to_pango_markup, ColumnAlign, InlineSpan, MessageBlock, TaskItem,
};
use crate::services::{Database, ImageResolver};

const COPIED_RESET: Duration = Duration::from_secs(2);
const MAX_INLINE_IMAGE_HEIGHT: i32 = 360;
const MAX_DIAGRAM_HEIGHT: i32 = 640;

/// Shared handles every message row needs for its async content.
#[derive(Clone)]
pub struct MessageServices {
    pub images: Arc<ImageResolver>,
    pub db: Database,
}

pub struct MessageWidgetInit {
    pub message: Message,
    pub services: MessageServices,
    pub streaming: bool,
    pub dark: bool,
}

/// A texture, or `None` once it is known to have failed.
type Outcome<T> = Option<T>;

/// One `GENERATE_IMAGE` directive: its ordinal in the message and its query.
type ImageSlot = (usize, String);

/// A rasterized diagram and the size it is shown at.
struct DiagramPicture {
    texture: gtk::gdk::Texture,
    width: i32,
    height: i32,
}

pub struct MessageWidget {
    pub message: Message,
    services: MessageServices,
    streaming: bool,
    dark: bool,
    content_box: gtk::Box,
    attachment_box: gtk::Box,
    feedback_row: gtk::Box,
    up_button: gtk::Button,
    down_button: gtk::Button,
    message_row: Option<gtk::Box>,
    feedback: Option<Feedback>,
    diagrams: HashMap<String, Outcome<DiagramPicture>>,
    images: HashMap<ImageSlot, Outcome<(gtk::gdk::Texture, Option<String>)>>,
    requested_diagrams: HashSet<String>,
    requested_images: HashSet<ImageSlot>,
}

#[derive(Debug)]
pub enum MessageWidgetMsg {
    UpdateContent(String),
    StreamingComplete,
    SetDark(bool),
    SetMaxWidth(i32),
    RequestCopy,
    ToggleFeedback(Feedback),
}

#[derive(Debug)]
pub enum MessageWidgetCmd {
    DiagramRendered {
        source: String,
        result: Result<RenderedDiagram, String>,
    },
    ImageResolved {
        slot: ImageSlot,
        result: Result<(Bytes, Option<String>), String>,
    },
    AttachmentFetched(Result<Bytes, String>),
    FeedbackLoaded(Option<Feedback>),
}

#[derive(Debug)]
pub enum MessageWidgetOutput {
    CopyFullContent(String),
    /// Building the message body panicked; the app swaps in the crash panel.
    RenderFailed(String),
}

#[relm4::factory(pub)]
impl FactoryComponent for MessageWidget {
    type Init = MessageWidgetInit;
    type Input = MessageWidgetMsg;
    type Output = MessageWidgetOutput;
    type CommandOutput = MessageWidgetCmd;
    type ParentWidget = gtk::Box;

    view! {
        gtk::Box {
            set_orientation: gtk::Orientation::Vertical,
            set_spacing: 0,
        }
    }

    fn init_model(init: Self::Init, _index: &DynamicIndex, sender: FactorySender<Self>) -> Self {
        let content_box = gtk::Box::builder()
            .orientation(gtk::Orientation::Vertical)
            .spacing(6)
            .margin_start(8)
            .margin_end(8)
            .margin_top(4)
            .margin_bottom(8)
            .build();

        let attachment_box = gtk::Box::builder()
            .orientation(gtk::Orientation::Vertical)
            .spacing(4)
            .margin_start(8)
            .margin_end(8)
            .visible(false)
            .build();

        let feedback_row = gtk::Box::builder()
            .orientation(gtk::Orientation::Horizontal)
            .spacing(2)
            .halign(gtk::Align::Start)
            .margin_start(12)
            .build();
        feedback_row.add_css_class("feedback-row");

        let up_button = gtk::Button::builder()
            .icon_name("thumbs-up-symbolic")
            .tooltip_text("Good response")
            .build();
        let down_button = gtk::Button::builder()
            .icon_name("thumbs-down-symbolic")
            .tooltip_text("Bad response")
            .build();

        let wants_feedback = init.message.sender == Sender::Ai && !init.message.is_error;
        if wants_feedback {
            let db = init.services.db.clone();
            let id = init.message.id.as_str().to_string();
            sender.oneshot_command(async move {
                match db.get_feedback(&id).await {
                    Ok(feedback) => MessageWidgetCmd::FeedbackLoaded(feedback),
                    Err(e) => {
                        tracing::warn!("Failed to load feedback: {:#}", e);
                        MessageWidgetCmd::FeedbackLoaded(None)
                    }
                }
            });
        }

        Self {
            message: init.message,
            services: init.services,
            streaming: init.streaming,
            dark: init.dark,
            content_box,
            attachment_box,
            feedback_row,
            up_button,
            down_button,
            message_row: None,
            feedback: None,
            diagrams: HashMap::new(),
            images: HashMap::new(),
            requested_diagrams: HashSet::new(),
            requested_images: HashSet::new(),
        }
    }

    fn init_widgets(
        &mut self,
        _index: &DynamicIndex,
        root: Self::Root,
        _returned_widget: &<Self::ParentWidget as relm4::factory::FactoryView>::ReturnedWidget,
        sender: FactorySender<Self>,
    ) -> Self::Widgets {
        let is_user = self.message.sender == Sender::User;

        let bubble = gtk::Box::builder()
            .orientation(gtk::Orientation::Vertical)
            .spacing(4)
            .build();
        bubble.add_css_class("card");
        bubble.add_css_class(if self.message.is_error {
            "message-bubble-error"
        } else if is_user {
            "message-bubble-user"
        } else {
            "message-bubble-assistant"
        });

        let header = gtk::Box::builder()
            .orientation(gtk::Orientation::Horizontal)
            .spacing(8)
            .margin_start(8)
            .margin_end(8)
            .margin_top(4)
            .build();

        let role_label = gtk::Label::builder()
            .label(if is_user { "You" } else { "AI" })
            .halign(gtk::Align::Start)
            .hexpand(true)
            .build();
        role_label.add_css_class("caption");
        role_label.add_css_class("dim-label");
        header.append(&role_label);

        let time_label = gtk::Label::builder()
            .label(
                self.message
                    .created_at
                    .with_timezone(&chrono::Local)
                    .format("%H:%M")
                    .to_string(),
            )
            .build();
        time_label.add_css_class("caption");
        time_label.add_css_class("dim-label");
        header.append(&time_label);

        let copy_btn = gtk::Button::builder()
            .icon_name("edit-copy-symbolic")
            .tooltip_text("Copy message")
            .build();
        copy_btn.add_css_class("flat");
        copy_btn.add_css_class("circular");
        let sender_copy = sender.input_sender().clone();
        copy_btn.connect_clicked(move |_| {
            sender_copy.emit(MessageWidgetMsg::RequestCopy);
        });
        header.append(&copy_btn);

        bubble.append(&header);
        bubble.append(&self.attachment_box);
        bubble.append(&self.content_box);

        self.render_attachment(&sender);
        self.render_body(&sender);

        let message_row = gtk::Box::builder()
            .orientation(gtk::Orientation::Vertical)
            .spacing(2)
            .margin_top(4)
            .margin_bottom(4)
            .margin_start(12)
            .margin_end(12)
            .halign(if is_user {
                gtk::Align::End
            } else {
                gtk::Align::Start
            })
            .build();
        message_row.append(&bubble);

        if self.message.sender == Sender::Ai && !self.message.is_error {
            for (button, value) in [
                (&self.up_button, Feedback::Up),
                (&self.down_button, Feedback::Down),
            ] {
                button.add_css_class("flat");
                button.add_css_class("circular");
                let sender_fb = sender.input_sender().clone();
                button.connect_clicked(move |_| {
                    sender_fb.emit(MessageWidgetMsg::ToggleFeedback(value));
                });
                self.feedback_row.append(button);
            }
            self.feedback_row.set_visible(!self.streaming);
            message_row.append(&self.feedback_row);
        }

        self.message_row = Some(message_row.clone());
        root.append(&message_row);

        let widgets = view_output!();
        widgets
    }

    fn update(&mut self, msg: Self::Input, sender: FactorySender<Self>) {
        match msg {
            MessageWidgetMsg::UpdateContent(text) => {
                if text != self.message.content {
                    self.message.content = text;
                    self.render_body(&sender);
                }
            }
            MessageWidgetMsg::StreamingComplete => {
                if self.streaming {
                    self.streaming = false;
                    self.feedback_row.set_visible(true);
                    self.render_body(&sender);
                }
            }
            MessageWidgetMsg::SetDark(dark) => {
                if dark != self.dark {
                    self.dark = dark;
                    self.render_body(&sender);
                }
            }
            MessageWidgetMsg::SetMaxWidth(width) => {
                if let Some(row) = &self.message_row {
                    if self.message.sender == Sender::User {
                        row.set_margin_start(12_i32.max(width * 25 / 100));
                        row.set_margin_end(12);
                    } else {
                        row.set_margin_start(12);
                        row.set_margin_end(12_i32.max(width * 10 / 100));
                    }
                }
            }
            MessageWidgetMsg::RequestCopy => {
                let _ = sender.output(MessageWidgetOutput::CopyFullContent(
                    self.message.content.clone(),
                ));
            }
            MessageWidgetMsg::ToggleFeedback(value) => {
                let next = if self.feedback == Some(value) {
                    None
                } else {
                    Some(value)
                };
                self.set_feedback(next);

                let db = self.services.db.clone();
                let id = self.message.id.as_str().to_string();
                relm4::spawn(async move {
                    if let Err(e) = db.set_feedback(&id, next).await {
                        tracing::warn!("Failed to save feedback: {:#}", e);
                    }
                });
            }
        }
    }

    fn update_cmd(&mut self, msg: Self::CommandOutput, sender: FactorySender<Self>) {
        match msg {
            MessageWidgetCmd::DiagramRendered { source, result } => {
                let picture = result
                    .and_then(|diagram| {
                        let (width, height) =
                            fit_height(diagram.width, diagram.height, MAX_DIAGRAM_HEIGHT);
                        texture_from_bytes(&diagram.png).map(|texture| DiagramPicture {
                            texture,
                            width,
                            height,
                        })
                    })
                    .map_err(|e| tracing::warn!("Diagram failed: {}", e))
                    .ok();
                self.diagrams.insert(source, picture);
                self.render_body(&sender);
            }
            MessageWidgetCmd::ImageResolved { slot, result } => {
                let resolved = result
                    .and_then(|(bytes, credit)| texture_from_bytes(&bytes).map(|t| (t, credit)))
                    .map_err(|e| tracing::warn!("Image for '{}' failed: {}", slot.1, e))
                    .ok();
                self.images.insert(slot, resolved);
                self.render_body(&sender);
            }
            MessageWidgetCmd::AttachmentFetched(result) => {
                clear_box(&self.attachment_box);
                match result.and_then(|bytes| texture_from_bytes(&bytes)) {
                    Ok(texture) => self.attachment_box.append(&picture(&texture)),
                    Err(e) => {
                        tracing::warn!("Attachment preview failed: {}", e);
                        let name = self
                            .message
                            .attachment
                            .as_ref()
                            .map(AttachmentRef::file_name)
                            .unwrap_or_default();
                        self.attachment_box.append(&file_chip(&name, None));
                    }
                }
            }
            MessageWidgetCmd::FeedbackLoaded(feedback) => {
                self.set_feedback(feedback);
            }
        }
    }
}

impl MessageWidget {
    fn set_feedback(&mut self, feedback: Option<Feedback>) {
        self.feedback = feedback;
        for (button, value) in [
            (&self.up_button, Feedback::Up),
            (&self.down_button, Feedback::Down),
        ] {
            if feedback == Some(value) {
                button.add_css_class("accent");
            } else {
                button.remove_css_class("accent");
            }
        }
    }

    fn render_attachment(&mut self, sender: &FactorySender<Self>) {
        let Some(attachment) = &self.message.attachment else {
            return;
        };
        self.attachment_box.set_visible(true);

        match attachment {
            AttachmentRef::Local(file) if file.is_image() => {
                match texture_from_bytes(&file.data) {
                    Ok(texture) => self.attachment_box.append(&picture(&texture)),
                    Err(_) => self.attachment_box.append(&file_chip(&file.file_name, None)),
                }
            }
            AttachmentRef::Local(file) => {
                self.attachment_box.append(&file_chip(&file.file_name, None));
            }
            AttachmentRef::Remote(url) if attachment.is_image() => {
                self.attachment_box.append(&loading_placeholder("Loading image..."));
                let images = self.services.images.clone();
                let url = url.clone();
                sender.oneshot_command(async move {
                    MessageWidgetCmd::AttachmentFetched(
                        images.fetch_url(&url).await.map_err(|e| format!("{:#}", e)),
                    )
                });
            }
            AttachmentRef::Remote(url) => {
                self.attachment_box
                    .append(&file_chip(&attachment.file_name(), Some(url.as_str())));
            }
        }
    }

    /// Rebuild the body from scratch. Any panic while parsing or building is
    /// reported to the app instead of unwinding through GTK.
    fn render_body(&mut self, sender: &FactorySender<Self>) {
        clear_box(&self.content_box);

        let mut ctx = RenderCtx {
            diagrams: &self.diagrams,
            images: &self.images,
            streaming: self.streaming,
            dark: self.dark,
            wanted_diagrams: Vec::new(),
            wanted_images: Vec::new(),
        };

        let built = catch_unwind(AssertUnwindSafe(|| {
            build_body(&self.message, &mut ctx)
        }));

        let widgets = match built {
            Ok(widgets) => widgets,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!("Rendering message {} panicked: {}", self.message.id.as_str(), reason);
                let _ = sender.output(MessageWidgetOutput::RenderFailed(reason));
                return;
            }
        };
        for widget in &widgets {
            self.content_box.append(widget);
        }

        let RenderCtx {
            wanted_diagrams,
            wanted_images,
            ..
        } = ctx;

        for source in new_requests(&mut self.requested_diagrams, wanted_diagrams) {
            sender.oneshot_command(async move {
                let result = render_diagram(source.clone())
                    .await
                    .map_err(|e| e.to_string());
                MessageWidgetCmd::DiagramRendered { source, result }
            });
        }

        for slot in new_requests(&mut self.requested_images, wanted_images) {
            let images = self.services.images.clone();
            sender.oneshot_command(async move {
                let result = images
                    .resolve_query(&slot.1)
                    .await
                    .map(|r| (r.bytes, r.photographer))
                    .map_err(|e| format!("{:#}", e));
                MessageWidgetCmd::ImageResolved { slot, result }
            });
        }
    }
}

/// Cached async results plus the work a render discovered it still needs.
struct RenderCtx<'a> {
    diagrams: &'a HashMap<String, Outcome<DiagramPicture>>,
    images: &'a HashMap<ImageSlot, Outcome<(gtk::gdk::Texture, Option<String>)>>,
    streaming: bool,
    dark: bool,
    wanted_diagrams: Vec<String>,
    wanted_images: Vec<ImageSlot>,
}

/// The entries of `wanted` not asked for before, each once, recorded in `requested`.
fn new_requests<T: Clone + Eq + Hash>(requested: &mut HashSet<T>, wanted: Vec<T>) -> Vec<T> {
    wanted
        .into_iter()
        .filter(|item| requested.insert(item.clone()))
        .collect()
}

fn build_body(message: &Message, ctx: &mut RenderCtx<'_>) -> Vec<gtk::Widget> {
    if message.sender == Sender::User || message.is_error {
        if message.content.is_empty() {
            return Vec::new();
        }
        let label = gtk::Label::builder()
            .label(&message.content)
            .halign(gtk::Align::Start)
            .xalign(0.0)
            .wrap(true)
            .wrap_mode(gtk::pango::WrapMode::WordChar)
            .selectable(true)
            .build();
        return vec![label.upcast()];
    }

    if message.content.is_empty() {
        if ctx.streaming {
            let spinner = gtk::Spinner::builder()
                .spinning(true)
                .halign(gtk::Align::Start)
                .build();
            return vec![spinner.upcast()];
        }
        return Vec::new();
    }

    render_content(&message.content)
        .iter()
        .map(|block| block_to_widget(block, ctx))
        .collect()
}

fn block_to_widget(block: &MessageBlock, ctx: &mut RenderCtx<'_>) -> gtk::Widget {
    match block {
        MessageBlock::RichText(spans) => markup_label(&spans_to_pango_markup(spans)).upcast(),
        MessageBlock::Heading { level, spans } => {
            let label = markup_label(&spans_to_pango_markup(spans));
            label.add_css_class(match level {
                1 => "heading-1",
                2 => "heading-2",
                3 => "heading-3",
                _ => "heading-4",
            });
            label.upcast()
        }
        MessageBlock::CodeBlock { language, code } => {
            build_code_block(language.as_deref(), code, ctx.dark)
        }
        MessageBlock::Diagram { source } => build_diagram(source, ctx),
        MessageBlock::Table {
            alignments,
            header,
            rows,
        } => build_table(alignments, header, rows),
        MessageBlock::TaskList(items) => build_task_list(items, ctx),
        MessageBlock::OrderedList { start, items } => build_list(items, Some(*start), ctx),
        MessageBlock::UnorderedList(items) => build_list(items, None, ctx),
        MessageBlock::BlockQuote(inner) => {
            let quote = gtk::Box::builder()
                .orientation(gtk::Orientation::Vertical)
                .spacing(4)
                .build();
            quote.add_css_class("blockquote");
            for block in inner {
                quote.append(&block_to_widget(block, ctx));
            }
            quote.upcast()
        }
        MessageBlock::HorizontalRule => gtk::Separator::builder()
            .orientation(gtk::Orientation::Horizontal)
            .margin_top(4)
            .margin_bottom(4)
            .build()
            .upcast(),
        MessageBlock::GeneratedImage { key, query } => build_generated_image(*key, query, ctx),
    }
}

fn markup_label(markup: &str) -> gtk::Label {
    let label = gtk::Label::builder()
        .halign(gtk::Align::Start)
        .xalign(0.0)
        .wrap(true)
        .wrap_mode(gtk::pango::WrapMode::WordChar)
        .selectable(true)
        .use_markup(true)
        .build();
    label.set_markup(markup);
    label.connect_activate_link(|_, uri| {
        open_uri(uri);
        glib::Propagation::Stop
    });
    label
}

/// Open in the default browser; the app shares no state with the page.
fn open_uri(uri: &str) {
    gtk::UriLauncher::new(uri).launch(
        None::<&gtk::Window>,
        None::<&gio::Cancellable>,
        |result| {
            if let Err(e) = result {
                tracing::warn!("Failed to open link: {}", e);
            }
        },
    );
}

fn build_code_block(language: Option<&str>, code: &str, dark: bool) -> gtk::Widget {
    let outer = gtk::Box::builder()
        .orientation(gtk::Orientation::Vertical)
        .spacing(0)
        .margin_top(4)
        .margin_bottom(4)
        .build();
    outer.add_css_class("code-block");

    let header = gtk::Box::builder()
        .orientation(gtk::Orientation::Horizontal)
        .spacing(8)
        .build();
    header.add_css_class("code-block-header");

    let lang_label = gtk::Label::builder()
        .label(language.unwrap_or("text"))
        .halign(gtk::Align::Start)
        .hexpand(true)
        .build();
    lang_label.add_css_class("code-block-language");
    header.append(&lang_label);

    let copy_button = gtk::Button::builder().label("Copy").build();
    copy_button.add_css_class("flat");

    let code_for_copy = code.to_string();
    copy_button.connect_clicked(move |btn| {
        let Some(display) = gtk::gdk::Display::default() else {
            return;
        };
        display.clipboard().set_text(&code_for_copy);
        btn.set_label("Copied");
        let btn = btn.clone();
        glib::timeout_add_local_once(COPIED_RESET, move || {
            // The block may have been rebuilt by a newer chunk meanwhile.
            if btn.parent().is_some() {
                btn.set_label("Copy");
            }
        });
    });
    header.append(&copy_button);
    outer.append(&header);

    let text_view = gtk::TextView::builder()
        .editable(false)
        .cursor_visible(false)
        .wrap_mode(gtk::WrapMode::WordChar)
        .monospace(true)
        .top_margin(8)
        .bottom_margin(8)
        .left_margin(12)
        .right_margin(12)
        .build();
    text_view.add_css_class("code-block-content");
    let buffer = text_view.buffer();
    let mut start = buffer.start_iter();
    buffer.insert_markup(&mut start, &highlight_to_pango(code, language, dark));
    outer.append(&text_view);

    outer.upcast()
}

fn build_diagram(source: &str, ctx: &mut RenderCtx<'_>) -> gtk::Widget {
    match ctx.diagrams.get(source) {
        Some(Some(diagram)) => diagram_picture(diagram),
        Some(None) => error_placeholder("Invalid Diagram Syntax", "diagram-error"),
        None => {
            // Half-streamed sources are rarely valid; wait for the full reply.
            if !ctx.streaming {
                ctx.wanted_diagrams.push(source.to_string());
            }
            loading_placeholder("Rendering diagram...")
        }
    }
}

fn build_generated_image(key: usize, query: &str, ctx: &mut RenderCtx<'_>) -> gtk::Widget {
    let slot = (key, query.to_string());
    match ctx.images.get(&slot) {
        Some(Some((texture, credit))) => {
            let column = gtk::Box::builder()
                .orientation(gtk::Orientation::Vertical)
                .spacing(2)
                .halign(gtk::Align::Start)
                .build();
            column.append(&picture(texture));
            if let Some(name) = credit {
                let credit_label = gtk::Label::builder()
                    .label(format!("Photo by {}", name))
                    .halign(gtk::Align::Start)
                    .build();
                credit_label.add_css_class("caption");
                credit_label.add_css_class("dim-label");
                column.append(&credit_label);
            }
            column.upcast()
        }
        Some(None) => error_placeholder("Failed to load image", "image-error"),
        None => {
            ctx.wanted_images.push(slot);
            loading_placeholder("Generating image...")
        }
    }
}

fn build_table(
    alignments: &[ColumnAlign],
    header: &[Vec<InlineSpan>],
    rows: &[Vec<Vec<InlineSpan>>],
) -> gtk::Widget {
    let grid = gtk::Grid::builder()
        .column_spacing(16)
        .row_spacing(4)
        .margin_top(6)
        .margin_bottom(6)
        .margin_start(8)
        .margin_end(8)
        .build();

    let xalign = |col: usize| match alignments.get(col) {
        Some(ColumnAlign::Center) => 0.5,
        Some(ColumnAlign::Right) => 1.0,
        _ => 0.0,
    };

    for (col, cell) in header.iter().enumerate() {
        let label = markup_label(&spans_to_pango_markup(cell));
        label.set_xalign(xalign(col));
        label.add_css_class("markdown-table-header");
        grid.attach(&label, col as i32, 0, 1, 1);
    }
    for (row, cells) in rows.iter().enumerate() {
        for (col, cell) in cells.iter().enumerate() {
            let label = markup_label(&spans_to_pango_markup(cell));
            label.set_xalign(xalign(col));
            grid.attach(&label, col as i32, row as i32 + 1, 1, 1);
        }
    }

    let scroller = gtk::ScrolledWindow::builder()
        .hscrollbar_policy(gtk::PolicyType::Automatic)
        .vscrollbar_policy(gtk::PolicyType::Never)
        .propagate_natural_height(true)
        .child(&grid)
        .build();
    scroller.add_css_class("markdown-table");
    scroller.upcast()
}

fn build_task_list(items: &[TaskItem], ctx: &mut RenderCtx<'_>) -> gtk::Widget {
    let list_box = gtk::Box::builder()
        .orientation(gtk::Orientation::Vertical)
        .spacing(2)
        .margin_start(4)
        .build();

    for item in items {
        let row = gtk::Box::builder()
            .orientation(gtk::Orientation::Horizontal)
            .spacing(6)
            .build();
        let check = gtk::CheckButton::builder()
            .active(item.checked)
            .sensitive(false)
            .valign(gtk::Align::Start)
            .build();
        row.append(&check);

        let content = gtk::Box::builder()
            .orientation(gtk::Orientation::Vertical)
            .spacing(2)
            .build();
        for block in &item.blocks {
            content.append(&block_to_widget(block, ctx));
        }
        row.append(&content);
        list_box.append(&row);
    }

    list_box.upcast()
}

fn build_list(
    items: &[Vec<MessageBlock>],
    start: Option<u64>,
    ctx: &mut RenderCtx<'_>,
) -> gtk::Widget {
    let list_box = gtk::Box::builder()
        .orientation(gtk::Orientation::Vertical)
        .spacing(2)
        .margin_start(4)
        .build();

    for (i, item_blocks) in items.iter().enumerate() {
        let item_row = gtk::Box::builder()
            .orientation(gtk::Orientation::Horizontal)
            .spacing(4)
            .build();

        let bullet_text = match start {
            Some(start) => format!("{}.", start + i as u64),
            None => "\u{2022}".to_string(),
        };
        let bullet = gtk::Label::builder()
            .label(&bullet_text)
            .valign(gtk::Align::Start)
            .build();
        bullet.add_css_class("list-bullet");
        item_row.append(&bullet);

        let item_content = gtk::Box::builder()
            .orientation(gtk::Orientation::Vertical)
            .spacing(2)
            .build();
        for block in item_blocks {
            item_content.append(&block_to_widget(block, ctx));
        }

        item_row.append(&item_content);
        list_box.append(&item_row);
    }

    list_box.upcast()
}

fn picture(texture: &gtk::gdk::Texture) -> gtk::Picture {
    let pic = gtk::Picture::for_paintable(texture);
    pic.set_can_shrink(true);
    pic.set_content_fit(gtk::ContentFit::Contain);
    pic.set_halign(gtk::Align::Start);
    pic.set_height_request(texture.height().min(MAX_INLINE_IMAGE_HEIGHT));
    pic
}

/// Diagrams are rasterized at a higher scale; show them at their logical size.
fn diagram_picture(diagram: &DiagramPicture) -> gtk::Widget {
    let pic = gtk::Picture::for_paintable(&diagram.texture);
    pic.set_can_shrink(true);
    pic.set_content_fit(gtk::ContentFit::Contain);
    pic.set_height_request(diagram.height);
    pic.add_css_class("diagram");

    adw::Clamp::builder()
        .maximum_size(diagram.width)
        .tightening_threshold(diagram.width)
        .halign(gtk::Align::Start)
        .child(&pic)
        .build()
        .upcast()
}

/// Scale `(width, height)` down to at most `max_height`, keeping the aspect ratio.
fn fit_height(width: u32, height: u32, max_height: i32) -> (i32, i32) {
    let (width, height) = (width.max(1) as f64, height.max(1) as f64);
    let scale = (max_height as f64 / height).min(1.0);
    (
        (width * scale).round().max(1.0) as i32,
        (height * scale).round().max(1.0) as i32,
    )
}

fn file_chip(name: &str, url: Option<&str>) -> gtk::Widget {
    match url {
        Some(url) => {
            let link = gtk::LinkButton::with_label(url, name);
            link.set_halign(gtk::Align::Start);
            link.connect_activate_link(|button| {
                open_uri(&button.uri());
                glib::Propagation::Stop
            });
            link.upcast()
        }
        None => {
            let row = gtk::Box::builder()
                .orientation(gtk::Orientation::Horizontal)
                .spacing(6)
                .build();
            row.append(&gtk::Image::from_icon_name("text-x-generic-symbolic"));
            row.append(&gtk::Label::new(Some(name)));
            row.add_css_class("attachment-chip");
            row.upcast()
        }
    }
}

fn loading_placeholder(text: &str) -> gtk::Widget {
    let row = gtk::Box::builder()
        .orientation(gtk::Orientation::Horizontal)
        .spacing(8)
        .halign(gtk::Align::Start)
        .build();
    row.add_css_class("image-loading");
    row.append(&gtk::Spinner::builder().spinning(true).build());
    let label = gtk::Label::new(Some(text));
    label.add_css_class("dim-label");
    row.append(&label);
    row.upcast()
}

fn error_placeholder(text: &str, css_class: &str) -> gtk::Widget {
    let label = gtk::Label::builder()
        .label(text)
        .halign(gtk::Align::Start)
        .build();
    label.add_css_class(css_class);
    label.upcast()
}

fn texture_from_bytes(data: &[u8]) -> Result<gtk::gdk::Texture, String> {
    gtk::gdk::Texture::from_bytes(&glib::Bytes::from(data)).map_err(|e| e.to_string())
}

fn clear_box(container: &gtk::Box) {
    while let Some(child) = container.first_child() {
        container.remove(&child);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_query_gets_one_request_per_directive() {
        let mut requested = HashSet::new();
        let wanted: Vec<ImageSlot> = vec![(0, "cat".into()), (1, "cat".into())];

        let first = new_requests(&mut requested, wanted.clone());
        assert_eq!(first, wanted);

        // A re-render asks again; nothing new is requested
        assert!(new_requests(&mut requested, wanted).is_empty());
    }

    #[test]
    fn test_fit_height_keeps_logical_size_and_aspect() {
        assert_eq!(fit_height(400, 200, 640), (400, 200));
        assert_eq!(fit_height(300, 1280, 640), (150, 640));
        assert_eq!(fit_height(0, 0, 640), (1, 1));
    }
}
