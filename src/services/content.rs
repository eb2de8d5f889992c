use once_cell::sync::Lazy;
use regex::Regex;

use super::markdown::{parse_markdown, MessageBlock};

static IMAGE_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\(GENERATE_IMAGE:\s*(.*?)\)\)").expect("Invalid regex"));

/// A piece of an assistant reply, in order of appearance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Markdown(&'a str),
    ImageQuery { key: usize, query: &'a str },
}

/// Split a reply on `((GENERATE_IMAGE: <query>))` markers. Empty text between
/// markers is dropped; the marker key is its ordinal within the text.
pub fn split_directives(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut cursor = 0;

    for (key, caps) in IMAGE_DIRECTIVE.captures_iter(text).enumerate() {
        let (Some(whole), Some(query)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let before = &text[cursor..whole.start()];
        if !before.is_empty() {
            segments.push(Segment::Markdown(before));
        }
        segments.push(Segment::ImageQuery {
            key,
            query: query.as_str().trim(),
        });
        cursor = whole.end();
    }

    let rest = &text[cursor..];
    if !rest.is_empty() {
        segments.push(Segment::Markdown(rest));
    }
    segments
}

/// Full render of a message body into blocks. Pure: the same text always
/// yields the same blocks, so it is safe to call on every streamed chunk.
pub fn render_content(text: &str) -> Vec<MessageBlock> {
    split_directives(text)
        .into_iter()
        .flat_map(|segment| match segment {
            Segment::Markdown(md) => parse_markdown(md),
            Segment::ImageQuery { key, query } => vec![MessageBlock::GeneratedImage {
                key,
                query: query.to_string(),
            }],
        })
        .collect()
}
