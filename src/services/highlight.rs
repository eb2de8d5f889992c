use once_cell::sync::Lazy;
use syntect::easy::HighlightLines;
use syntect::highlighting::{Color, ThemeSet};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

static SYNTAX_SET: Lazy<SyntaxSet> = Lazy::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: Lazy<ThemeSet> = Lazy::new(ThemeSet::load_defaults);

const DARK_THEME: &str = "Solarized (dark)";
const LIGHT_THEME: &str = "Solarized (light)";

fn normalize_language(lang: &str) -> String {
    match lang.to_lowercase().as_str() {
        "py" => "python".to_string(),
        "js" | "jsx" => "javascript".to_string(),
        "ts" | "tsx" => "typescript".to_string(),
        "rs" => "rust".to_string(),
        "sh" | "shell" | "zsh" => "bash".to_string(),
        "yml" => "yaml".to_string(),
        "md" => "markdown".to_string(),
        "cpp" | "c++" => "c++".to_string(),
        "cs" => "c#".to_string(),
        "rb" => "ruby".to_string(),
        "golang" => "go".to_string(),
        other => other.to_string(),
    }
}

fn find_syntax(language: &str) -> Option<&'static SyntaxReference> {
    let normalized = normalize_language(language);
    SYNTAX_SET
        .find_syntax_by_extension(&normalized)
        .or_else(|| SYNTAX_SET.find_syntax_by_name(&normalized))
        .or_else(|| SYNTAX_SET.find_syntax_by_token(&normalized))
}

fn hex(color: Color) -> String {
    format!("#{:02x}{:02x}{:02x}", color.r, color.g, color.b)
}

/// Render code as Pango markup, colored when the language is known.
/// Unknown languages come back escaped but uncolored.
pub fn highlight_to_pango(code: &str, language: Option<&str>, dark: bool) -> String {
    let syntax = language.and_then(find_syntax);
    let theme = THEME_SET
        .themes
        .get(if dark { DARK_THEME } else { LIGHT_THEME });

    let (Some(syntax), Some(theme)) = (syntax, theme) else {
        return glib::markup_escape_text(code).to_string();
    };

    let mut highlighter = HighlightLines::new(syntax, theme);
    let mut markup = String::with_capacity(code.len() * 2);

    for line in LinesWithEndings::from(code) {
        let ranges = match highlighter.highlight_line(line, &SYNTAX_SET) {
            Ok(ranges) => ranges,
            Err(e) => {
                tracing::debug!("Highlighting stopped: {}", e);
                markup.push_str(&glib::markup_escape_text(line));
                continue;
            }
        };

        for (style, text) in ranges {
            markup.push_str("<span foreground=\"");
            markup.push_str(&hex(style.foreground));
            markup.push_str("\">");
            markup.push_str(&glib::markup_escape_text(text));
            markup.push_str("</span>");
        }
    }

    markup
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_language_is_colored() {
        let markup = highlight_to_pango("fn main() {}", Some("rs"), true);
        assert!(markup.contains("<span foreground=\"#"));
        assert!(markup.contains("main"));
    }

    #[test]
    fn test_unknown_language_is_escaped_plain() {
        let markup = highlight_to_pango("a < b", Some("no-such-lang"), false);
        assert_eq!(markup, "a &lt; b");
        assert_eq!(highlight_to_pango("x", None, false), "x");
    }

    #[test]
    fn test_normalize_language_aliases() {
        assert_eq!(normalize_language("PY"), "python");
        assert_eq!(normalize_language("golang"), "go");
        assert_eq!(normalize_language("haskell"), "haskell");
    }
}
