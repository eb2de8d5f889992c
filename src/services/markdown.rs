use pulldown_cmark::{Alignment, Event, HeadingLevel, Options, Parser, Tag, TagEnd};

/// Everything a message body can render as. Widgets are built from these by a
/// single match in the message widget, so a new kind of content is a new variant.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBlock {
    RichText(Vec<InlineSpan>),
    Heading {
        level: u8,
        spans: Vec<InlineSpan>,
    },
    CodeBlock {
        language: Option<String>,
        code: String,
    },
    /// A fenced `mermaid` block, rendered as a diagram instead of code.
    Diagram {
        source: String,
    },
    Table {
        alignments: Vec<ColumnAlign>,
        header: Vec<Vec<InlineSpan>>,
        rows: Vec<Vec<Vec<InlineSpan>>>,
    },
    TaskList(Vec<TaskItem>),
    OrderedList {
        start: u64,
        items: Vec<Vec<MessageBlock>>,
    },
    UnorderedList(Vec<Vec<MessageBlock>>),
    BlockQuote(Vec<MessageBlock>),
    HorizontalRule,
    /// Placeholder for an image resolved asynchronously from a text query.
    /// `key` is the directive's ordinal within its message.
    GeneratedImage {
        key: usize,
        query: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskItem {
    pub checked: bool,
    pub blocks: Vec<MessageBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnAlign {
    None,
    Left,
    Center,
    Right,
}

impl From<&Alignment> for ColumnAlign {
    fn from(a: &Alignment) -> Self {
        match a {
            Alignment::None => ColumnAlign::None,
            Alignment::Left => ColumnAlign::Left,
            Alignment::Center => ColumnAlign::Center,
            Alignment::Right => ColumnAlign::Right,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineSpan {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
    pub code: bool,
    pub link_url: Option<String>,
}

impl InlineSpan {
    fn new(text: String) -> Self {
        Self {
            text,
            bold: false,
            italic: false,
            strikethrough: false,
            code: false,
            link_url: None,
        }
    }
}

pub fn parse_markdown(input: &str) -> Vec<MessageBlock> {
    let options =
        Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES | Options::ENABLE_TASKLISTS;
    let parser = Parser::new_ext(input, options);
    let events: Vec<Event> = parser.collect();

    let mut ctx = ParseContext::new();
    ctx.process_events(&events);
    ctx.finish()
}

struct ParseContext {
    blocks: Vec<MessageBlock>,
    // Current inline spans being accumulated
    current_spans: Vec<InlineSpan>,
    // Formatting state stack
    bold: bool,
    italic: bool,
    strikethrough: bool,
    code_inline: bool,
    link_url: Option<String>,
    // Block-level state
    in_code_block: bool,
    code_block_lang: Option<String>,
    code_block_content: String,
    heading_level: Option<u8>,
    heading_spans: Vec<InlineSpan>,
    // Nested structures
    blockquote_depth: u32,
    blockquote_blocks: Vec<Vec<MessageBlock>>,
    list_stack: Vec<ListState>,
    table: Option<TableState>,
}

struct ListState {
    start: Option<u64>,
    items: Vec<(Option<bool>, Vec<MessageBlock>)>,
    current_item_blocks: Vec<MessageBlock>,
    current_checked: Option<bool>,
}

impl ListState {
    fn into_block(self) -> MessageBlock {
        if self.items.iter().any(|(checked, _)| checked.is_some()) {
            return MessageBlock::TaskList(
                self.items
                    .into_iter()
                    .map(|(checked, blocks)| TaskItem {
                        checked: checked.unwrap_or(false),
                        blocks,
                    })
                    .collect(),
            );
        }
        let items = self.items.into_iter().map(|(_, blocks)| blocks).collect();
        match self.start {
            Some(start) => MessageBlock::OrderedList { start, items },
            None => MessageBlock::UnorderedList(items),
        }
    }
}

struct TableState {
    alignments: Vec<ColumnAlign>,
    header: Vec<Vec<InlineSpan>>,
    rows: Vec<Vec<Vec<InlineSpan>>>,
    current_row: Vec<Vec<InlineSpan>>,
}

impl ParseContext {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            current_spans: Vec::new(),
            bold: false,
            italic: false,
            strikethrough: false,
            code_inline: false,
            link_url: None,
            in_code_block: false,
            code_block_lang: None,
            code_block_content: String::new(),
            heading_level: None,
            heading_spans: Vec::new(),
            blockquote_depth: 0,
            blockquote_blocks: Vec::new(),
            list_stack: Vec::new(),
            table: None,
        }
    }

    fn process_events(&mut self, events: &[Event]) {
        for event in events {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: &Event) {
        match event {
            Event::Start(tag) => self.handle_start(tag),
            Event::End(tag) => self.handle_end(tag),
            Event::Text(text) => self.handle_text(text),
            Event::Code(code) => self.handle_inline_code(code),
            Event::SoftBreak => self.handle_soft_break(),
            Event::HardBreak => self.handle_hard_break(),
            Event::Rule => self.handle_rule(),
            Event::TaskListMarker(checked) => {
                if let Some(list) = self.list_stack.last_mut() {
                    list.current_checked = Some(*checked);
                }
            }
            // Raw HTML is shown literally rather than dropped.
            Event::Html(html) | Event::InlineHtml(html) => self.handle_text(html),
            _ => {}
        }
    }

    fn handle_start(&mut self, tag: &Tag) {
        match tag {
            Tag::Paragraph => {}
            Tag::Heading { level, .. } => {
                self.heading_level = Some(heading_level_to_u8(level));
                self.heading_spans.clear();
            }
            Tag::Strong => self.bold = true,
            Tag::Emphasis => self.italic = true,
            Tag::Strikethrough => self.strikethrough = true,
            Tag::Link { dest_url, .. } => {
                self.link_url = Some(dest_url.to_string());
            }
            Tag::CodeBlock(kind) => {
                self.flush_paragraph();
                self.in_code_block = true;
                self.code_block_content.clear();
                self.code_block_lang = match kind {
                    pulldown_cmark::CodeBlockKind::Fenced(lang) => {
                        let lang = lang.trim().to_string();
                        if lang.is_empty() {
                            None
                        } else {
                            Some(lang)
                        }
                    }
                    pulldown_cmark::CodeBlockKind::Indented => None,
                };
            }
            Tag::BlockQuote(_) => {
                self.flush_paragraph();
                self.blockquote_depth += 1;
                self.blockquote_blocks.push(Vec::new());
            }
            Tag::List(start) => {
                self.flush_paragraph_into_list();
                self.list_stack.push(ListState {
                    start: *start,
                    items: Vec::new(),
                    current_item_blocks: Vec::new(),
                    current_checked: None,
                });
            }
            Tag::Table(alignments) => {
                self.flush_paragraph();
                self.table = Some(TableState {
                    alignments: alignments.iter().map(ColumnAlign::from).collect(),
                    header: Vec::new(),
                    rows: Vec::new(),
                    current_row: Vec::new(),
                });
            }
            _ => {}
        }
    }

    fn handle_end(&mut self, tag: &TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                if self.heading_level.is_some() {
                    // Don't flush paragraph inside heading
                    return;
                }
                self.flush_paragraph();
            }
            TagEnd::Heading(_level) => {
                // Flush any remaining spans into heading_spans
                if !self.current_spans.is_empty() {
                    self.heading_spans.append(&mut self.current_spans);
                }
                if let Some(level) = self.heading_level.take() {
                    let spans = std::mem::take(&mut self.heading_spans);
                    self.push_block(MessageBlock::Heading { level, spans });
                }
            }
            TagEnd::Strong => self.bold = false,
            TagEnd::Emphasis => self.italic = false,
            TagEnd::Strikethrough => self.strikethrough = false,
            TagEnd::Link => {
                self.link_url = None;
            }
            TagEnd::CodeBlock => {
                self.in_code_block = false;
                let code = std::mem::take(&mut self.code_block_content);
                let language = self.code_block_lang.take();
                // The fence leaves exactly one newline of its own
                let code = code.strip_suffix('\n').unwrap_or(&code).to_string();
                let block = match language {
                    Some(lang) if lang.eq_ignore_ascii_case("mermaid") => {
                        MessageBlock::Diagram { source: code }
                    }
                    language => MessageBlock::CodeBlock { language, code },
                };
                self.push_block(block);
            }
            TagEnd::BlockQuote(_) => {
                self.flush_paragraph();
                self.blockquote_depth -= 1;
                if let Some(inner_blocks) = self.blockquote_blocks.pop() {
                    self.push_block(MessageBlock::BlockQuote(inner_blocks));
                }
            }
            TagEnd::List(_) => {
                self.flush_paragraph_into_list();
                if let Some(mut list_state) = self.list_stack.pop() {
                    // Push any remaining item blocks
                    if !list_state.current_item_blocks.is_empty() {
                        let item_blocks = std::mem::take(&mut list_state.current_item_blocks);
                        let checked = list_state.current_checked.take();
                        list_state.items.push((checked, item_blocks));
                    }
                    self.push_block(list_state.into_block());
                }
            }
            TagEnd::Item => {
                self.flush_paragraph_into_list();
                if let Some(list_state) = self.list_stack.last_mut() {
                    let item_blocks = std::mem::take(&mut list_state.current_item_blocks);
                    let checked = list_state.current_checked.take();
                    list_state.items.push((checked, item_blocks));
                }
            }
            TagEnd::TableCell => {
                let cell = std::mem::take(&mut self.current_spans);
                if let Some(table) = self.table.as_mut() {
                    table.current_row.push(cell);
                }
            }
            TagEnd::TableHead => {
                if let Some(table) = self.table.as_mut() {
                    table.header = std::mem::take(&mut table.current_row);
                }
            }
            TagEnd::TableRow => {
                if let Some(table) = self.table.as_mut() {
                    let row = std::mem::take(&mut table.current_row);
                    table.rows.push(row);
                }
            }
            TagEnd::Table => {
                if let Some(table) = self.table.take() {
                    self.push_block(MessageBlock::Table {
                        alignments: table.alignments,
                        header: table.header,
                        rows: table.rows,
                    });
                }
            }
            _ => {}
        }
    }

    fn handle_text(&mut self, text: &pulldown_cmark::CowStr) {
        if self.in_code_block {
            self.code_block_content.push_str(text);
            return;
        }

        let span = InlineSpan {
            text: text.to_string(),
            bold: self.bold,
            italic: self.italic,
            strikethrough: self.strikethrough,
            code: self.code_inline,
            link_url: self.link_url.clone(),
        };

        if self.heading_level.is_some() {
            self.heading_spans.push(span);
        } else {
            self.current_spans.push(span);
        }
    }

    fn handle_inline_code(&mut self, code: &pulldown_cmark::CowStr) {
        let span = InlineSpan {
            text: code.to_string(),
            bold: self.bold,
            italic: self.italic,
            strikethrough: self.strikethrough,
            code: true,
            link_url: self.link_url.clone(),
        };

        if self.heading_level.is_some() {
            self.heading_spans.push(span);
        } else {
            self.current_spans.push(span);
        }
    }

    fn handle_soft_break(&mut self) {
        let span = InlineSpan::new(" ".to_string());
        if self.heading_level.is_some() {
            self.heading_spans.push(span);
        } else {
            self.current_spans.push(span);
        }
    }

    fn handle_hard_break(&mut self) {
        let span = InlineSpan::new("\n".to_string());
        if self.heading_level.is_some() {
            self.heading_spans.push(span);
        } else {
            self.current_spans.push(span);
        }
    }

    fn handle_rule(&mut self) {
        self.flush_paragraph();
        self.push_block(MessageBlock::HorizontalRule);
    }

    fn flush_paragraph(&mut self) {
        if self.current_spans.is_empty() {
            return;
        }
        let spans = std::mem::take(&mut self.current_spans);
        self.push_block(MessageBlock::RichText(spans));
    }

    fn flush_paragraph_into_list(&mut self) {
        if self.current_spans.is_empty() {
            return;
        }
        let spans = std::mem::take(&mut self.current_spans);
        self.push_block(MessageBlock::RichText(spans));
    }

    fn push_block(&mut self, block: MessageBlock) {
        if !self.list_stack.is_empty() {
            if let Some(list_state) = self.list_stack.last_mut() {
                list_state.current_item_blocks.push(block);
                return;
            }
        }
        if self.blockquote_depth > 0 {
            if let Some(bq_blocks) = self.blockquote_blocks.last_mut() {
                bq_blocks.push(block);
                return;
            }
        }
        self.blocks.push(block);
    }

    fn finish(mut self) -> Vec<MessageBlock> {
        self.flush_paragraph();
        self.blocks
    }
}

fn heading_level_to_u8(level: &HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Convert inline spans to Pango markup string
pub fn spans_to_pango_markup(spans: &[InlineSpan]) -> String {
    let mut markup = String::new();
    for span in spans {
        // Open tags
        if let Some(url) = &span.link_url {
            markup.push_str("<a href=\"");
            markup.push_str(&glib::markup_escape_text(url));
            markup.push_str("\">");
        }
        if span.strikethrough {
            markup.push_str("<s>");
        }
        if span.italic {
            markup.push_str("<i>");
        }
        if span.bold {
            markup.push_str("<b>");
        }
        if span.code {
            markup.push_str("<tt>");
        }

        // Text content
        markup.push_str(&glib::markup_escape_text(&span.text));

        // Close tags (reverse order)
        if span.code {
            markup.push_str("</tt>");
        }
        if span.bold {
            markup.push_str("</b>");
        }
        if span.italic {
            markup.push_str("</i>");
        }
        if span.strikethrough {
            markup.push_str("</s>");
        }
        if span.link_url.is_some() {
            markup.push_str("</a>");
        }
    }
    markup
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        let blocks = parse_markdown("Hello world");
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            MessageBlock::RichText(spans) => {
                assert_eq!(spans.len(), 1);
                assert_eq!(spans[0].text, "Hello world");
                assert!(!spans[0].bold);
            }
            _ => panic!("Expected RichText"),
        }
    }

    #[test]
    fn test_bold_italic() {
        let blocks = parse_markdown("**bold** and *italic*");
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            MessageBlock::RichText(spans) => {
                assert!(spans.iter().any(|s| s.bold && s.text == "bold"));
                assert!(spans.iter().any(|s| s.italic && s.text == "italic"));
            }
            _ => panic!("Expected RichText"),
        }
    }

    #[test]
    fn test_code_block() {
        let blocks = parse_markdown("```rust\nfn main() {}\n```");
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            MessageBlock::CodeBlock { language, code } => {
                assert_eq!(language.as_deref(), Some("rust"));
                assert_eq!(code, "fn main() {}");
            }
            _ => panic!("Expected CodeBlock"),
        }
    }

    #[test]
    fn test_code_block_keeps_intentional_blank_line() {
        let blocks = parse_markdown("```\nlet x = 1;\n\n```");
        match &blocks[0] {
            MessageBlock::CodeBlock { code, .. } => assert_eq!(code, "let x = 1;\n"),
            _ => panic!("Expected CodeBlock"),
        }
    }

    #[test]
    fn test_heading() {
        let blocks = parse_markdown("# Hello");
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            MessageBlock::Heading { level, spans } => {
                assert_eq!(*level, 1);
                assert_eq!(spans[0].text, "Hello");
            }
            _ => panic!("Expected Heading"),
        }
    }

    #[test]
    fn test_unordered_list() {
        let blocks = parse_markdown("- one\n- two\n- three");
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            MessageBlock::UnorderedList(items) => {
                assert_eq!(items.len(), 3);
            }
            _ => panic!("Expected UnorderedList"),
        }
    }

    #[test]
    fn test_blockquote() {
        let blocks = parse_markdown("> quoted text");
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            MessageBlock::BlockQuote(inner) => {
                assert!(!inner.is_empty());
            }
            _ => panic!("Expected BlockQuote"),
        }
    }

    #[test]
    fn test_horizontal_rule() {
        let blocks = parse_markdown("above\n\n---\n\nbelow");
        assert!(blocks.iter().any(|b| matches!(b, MessageBlock::HorizontalRule)));
    }

    #[test]
    fn test_inline_code() {
        let blocks = parse_markdown("Use `foo()` here");
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            MessageBlock::RichText(spans) => {
                assert!(spans.iter().any(|s| s.code && s.text == "foo()"));
            }
            _ => panic!("Expected RichText"),
        }
    }

    #[test]
    fn test_ordered_list_keeps_start() {
        let blocks = parse_markdown("3. three\n4. four");
        match &blocks[0] {
            MessageBlock::OrderedList { start, items } => {
                assert_eq!(*start, 3);
                assert_eq!(items.len(), 2);
            }
            _ => panic!("Expected OrderedList"),
        }
    }

    #[test]
    fn test_task_list() {
        let blocks = parse_markdown("- [x] done\n- [ ] todo");
        match &blocks[0] {
            MessageBlock::TaskList(items) => {
                assert_eq!(items.len(), 2);
                assert!(items[0].checked);
                assert!(!items[1].checked);
            }
            other => panic!("Expected TaskList, got {:?}", other),
        }
    }

    #[test]
    fn test_table() {
        let blocks = parse_markdown("| a | b |\n|:--|--:|\n| 1 | 2 |\n| 3 | 4 |");
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            MessageBlock::Table {
                alignments,
                header,
                rows,
            } => {
                assert_eq!(alignments, &vec![ColumnAlign::Left, ColumnAlign::Right]);
                assert_eq!(header.len(), 2);
                assert_eq!(header[0][0].text, "a");
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[1][1][0].text, "4");
            }
            _ => panic!("Expected Table"),
        }
    }

    #[test]
    fn test_mermaid_becomes_diagram() {
        let blocks = parse_markdown("```mermaid\ngraph TD; A-->B;\n```");
        assert_eq!(
            blocks,
            vec![MessageBlock::Diagram {
                source: "graph TD; A-->B;".to_string()
            }]
        );
    }

    #[test]
    fn test_nested_list() {
        let blocks = parse_markdown("- outer\n  - inner");
        match &blocks[0] {
            MessageBlock::UnorderedList(items) => {
                assert_eq!(items.len(), 1);
                assert!(items[0]
                    .iter()
                    .any(|b| matches!(b, MessageBlock::UnorderedList(_))));
            }
            _ => panic!("Expected UnorderedList"),
        }
    }

    #[test]
    fn test_unterminated_fence_while_streaming() {
        let blocks = parse_markdown("Here:\n```python\nprint(1)");
        assert!(blocks.iter().any(|b| matches!(
            b,
            MessageBlock::CodeBlock { language: Some(l), code } if l == "python" && code == "print(1)"
        )));
    }

    #[test]
    fn test_pango_markup_escapes() {
        let blocks = parse_markdown("a < b & **c**");
        match &blocks[0] {
            MessageBlock::RichText(spans) => {
                let markup = spans_to_pango_markup(spans);
                assert!(markup.contains("a &lt; b &amp; "));
                assert!(markup.contains("<b>c</b>"));
            }
            _ => panic!("Expected RichText"),
        }
    }
}
