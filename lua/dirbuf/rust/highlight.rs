use crate::types::{HighlightedLine, StyledSpan};
use once_cell::sync::Lazy;
use syntect::easy::HighlightLines;
use syntect::highlighting::{FontStyle, Style, ThemeSet};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;

static SYNTAX_SET: Lazy<SyntaxSet> = Lazy::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: Lazy<ThemeSet> = Lazy::new(ThemeSet::load_defaults);

const FALLBACK_THEME: &str = "base16-ocean.dark";

/// Highlights `content` using the syntax picked from `extension` (plain text when
/// unknown). Returns the syntax name and one span list per line.
pub fn highlight(content: &str, extension: &str, theme: &str) -> (String, Vec<HighlightedLine>) {
    let syntax_set = &*SYNTAX_SET;
    let syntax = syntax_set
        .find_syntax_by_extension(extension)
        .or_else(|| syntax_set.find_syntax_by_first_line(content))
        .unwrap_or_else(|| syntax_set.find_syntax_plain_text());

    let Some(theme) = THEME_SET
        .themes
        .get(theme)
        .or_else(|| THEME_SET.themes.get(FALLBACK_THEME))
    else {
        return (syntax.name.clone(), plain_lines(content));
    };

    let mut highlighter = HighlightLines::new(syntax, theme);
    let lines = LinesWithEndings::from(content)
        .map(|line| match highlighter.highlight_line(line, syntax_set) {
            Ok(ranges) => ranges
                .into_iter()
                .map(|(style, text)| styled_span(style, text))
                .collect(),
            Err(_) => vec![plain_span(line)],
        })
        .collect();

    (syntax.name.clone(), lines)
}

fn styled_span(style: Style, text: &str) -> StyledSpan {
    let fg = style.foreground;
    StyledSpan {
        text: text.trim_end_matches(['\n', '\r']).to_string(),
        foreground: format!("#{:02x}{:02x}{:02x}", fg.r, fg.g, fg.b),
        bold: style.font_style.contains(FontStyle::BOLD),
        italic: style.font_style.contains(FontStyle::ITALIC),
    }
}

fn plain_span(line: &str) -> StyledSpan {
    StyledSpan {
        text: line.trim_end_matches(['\n', '\r']).to_string(),
        foreground: String::new(),
        bold: false,
        italic: false,
    }
}

fn plain_lines(content: &str) -> Vec<HighlightedLine> {
    content.lines().map(|line| vec![plain_span(line)]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highlight_rust_source() {
        let (language, lines) = highlight("fn main() {}\nlet x = 1;\n", "rs", FALLBACK_THEME);
        assert_eq!(language, "Rust");
        assert_eq!(lines.len(), 2);

        let first: String = lines[0].iter().map(|span| span.text.as_str()).collect();
        assert_eq!(first, "fn main() {}");
        assert!(lines[0].iter().all(|span| span.foreground.starts_with('#')));
    }

    #[test]
    fn test_unknown_extension_and_theme_fall_back() {
        let (language, lines) = highlight("hello\n", "zzz", "no-such-theme");
        assert_eq!(language, "Plain Text");
        assert_eq!(lines.len(), 1);
    }
}
