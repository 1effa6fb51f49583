//! Textile to Markdown conversion.
//!
//! Redmine stores issue descriptions, journal notes, and wiki pages as
//! Textile. [`TextileConverter`] rewrites the common Redmine subset into
//! Markdown through an ordered sequence of independent passes. The order is
//! part of the contract:
//!
//! | Pass | Rewrites | Must precede |
//! |------|----------|--------------|
//! | code blocks | `<pre><code class="x">` → fenced block | everything |
//! | tables | `\|_.h\|` rows → pipe table | italic (`_.` markers) |
//! | ordered lists | `# item` → `1. item` | headers |
//! | headers | `h1.` … `h6.` → `#` … `######` | |
//! | bold, italic, underline, strikethrough | inline emphasis | |
//! | inline code | `@x@` → `` `x` `` | |
//! | links, images | `"t":url`, `[[page]]`, `!src!` | unordered lists |
//! | unordered lists, blockquotes, rules | line constructs | |
//! | cleanup | collapse 3+ newlines | |
//!
//! Code blocks and inline code spans are swapped out for placeholder tokens
//! as soon as they are recognized and put back after the last pass, so no
//! later pass can touch code content.
//!
//! Conversion is not idempotent: running it over its own output may change
//! the result, so each source document is converted exactly once.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Default prefix for locally referenced attachment images.
pub const DEFAULT_ATTACHMENT_PREFIX: &str = "./attachments";

const TOKEN_OPEN: char = '\u{E000}';
const TOKEN_CLOSE: char = '\u{E001}';

static CODE_WITH_LANG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<pre><code(?:\s+class=["']?(\w+)["']?)?>(.*?)</code></pre>"#)
        .expect("valid regex")
});
static PLAIN_PRE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<pre>(.*?)</pre>").expect("valid regex"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([^@\n]+)@").expect("valid regex"));
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x{E000}(\d+)\x{E001}").expect("valid regex"));
static ORDERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#+)\s+(.+)$").expect("valid regex"));
static UNORDERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\*+)\s+(.+)$").expect("valid regex"));
static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^h([1-6])\.\s+(.+)$").expect("valid regex"));
static UNDERLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+([^+]+)\+").expect("valid regex"));
static EXTERNAL_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)":(\S+)"#).expect("valid regex"));
static WIKI_LINK_LABELED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]|]+)\|([^\]]+)\]\]").expect("valid regex"));
static WIKI_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("valid regex"));
static IMAGE_WITH_ALT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!([^!()]+)\(([^)]+)\)!").expect("valid regex"));
static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!([^!\s]+)!").expect("valid regex"));
static BLOCKQUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^bq\.\s+(.+)$").expect("valid regex"));
static HORIZONTAL_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^---+$").expect("valid regex"));
static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Stateless Textile → Markdown converter.
#[derive(Debug, Clone)]
pub struct TextileConverter {
    attachment_path_prefix: String,
}

impl Default for TextileConverter {
    fn default() -> Self {
        Self::new(DEFAULT_ATTACHMENT_PREFIX)
    }
}

impl TextileConverter {
    /// Create a converter resolving local images under `attachment_path_prefix`.
    pub fn new(attachment_path_prefix: impl Into<String>) -> Self {
        Self {
            attachment_path_prefix: attachment_path_prefix.into(),
        }
    }

    /// Convert Textile markup to Markdown. Empty input yields an empty string;
    /// the result is trimmed.
    pub fn convert(&self, textile: &str) -> String {
        if textile.is_empty() {
            return String::new();
        }

        let mut stash = CodeStash::default();
        let text = convert_code_blocks(textile, &mut stash);
        let text = stash_inline_code(&text, &mut stash);
        let text = convert_tables(&text);
        let text = convert_ordered_lists(&text);
        let text = convert_headers(&text);
        let text = convert_delimited(&text, '*', "**", "**");
        let text = convert_delimited(&text, '_', "*", "*");
        let text = UNDERLINE.replace_all(&text, "<u>${1}</u>").into_owned();
        let text = convert_delimited(&text, '-', "~~", "~~");
        let text = convert_links(&text);
        let text = self.convert_images(&text);
        let text = convert_unordered_lists(&text);
        let text = BLOCKQUOTE.replace_all(&text, "> ${1}").into_owned();
        let text = HORIZONTAL_RULE.replace_all(&text, "---").into_owned();
        let text = EXCESS_NEWLINES.replace_all(&text, "\n\n").into_owned();

        stash.restore(&text).trim().to_string()
    }

    fn convert_images(&self, text: &str) -> String {
        let text = IMAGE_WITH_ALT.replace_all(text, |caps: &Captures| {
            format!("![{}]({})", &caps[2], self.resolve_image(&caps[1]))
        });
        IMAGE
            .replace_all(&text, |caps: &Captures| {
                let src = &caps[1];
                let alt = if is_absolute_url(src) { "image" } else { src };
                format!("![{}]({})", alt, self.resolve_image(src))
            })
            .into_owned()
    }

    fn resolve_image(&self, src: &str) -> String {
        if is_absolute_url(src) {
            src.to_string()
        } else {
            format!("{}/{}", self.attachment_path_prefix, src)
        }
    }
}

/// Convert with a one-off converter.
pub fn textile_to_markdown(textile: &str, attachment_path_prefix: &str) -> String {
    TextileConverter::new(attachment_path_prefix).convert(textile)
}

fn is_absolute_url(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://")
}

/// Protected spans, referenced from the text by `TOKEN_OPEN <index> TOKEN_CLOSE`.
#[derive(Default)]
struct CodeStash {
    spans: Vec<String>,
}

impl CodeStash {
    fn push(&mut self, span: String) -> String {
        let token = format!("{}{}{}", TOKEN_OPEN, self.spans.len(), TOKEN_CLOSE);
        self.spans.push(span);
        token
    }

    fn restore(&self, text: &str) -> String {
        TOKEN
            .replace_all(text, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| self.spans.get(i))
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

fn convert_code_blocks(text: &str, stash: &mut CodeStash) -> String {
    let text = CODE_WITH_LANG.replace_all(text, |caps: &Captures| {
        let lang = caps.get(1).map_or("", |m| m.as_str());
        stash.push(format!("```{}\n{}\n```", lang, caps[2].trim()))
    });
    PLAIN_PRE
        .replace_all(&text, |caps: &Captures| {
            stash.push(format!("```\n{}\n```", caps[1].trim_matches('\n')))
        })
        .into_owned()
}

fn stash_inline_code(text: &str, stash: &mut CodeStash) -> String {
    INLINE_CODE
        .replace_all(text, |caps: &Captures| stash.push(format!("`{}`", &caps[1])))
        .into_owned()
}

fn convert_tables(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_table = false;

    for line in text.split('\n') {
        if !line.starts_with('|') {
            in_table = false;
            out.push(line.to_string());
            continue;
        }

        let mut cells: Vec<String> = line
            .trim_end()
            .trim_matches('|')
            .split('|')
            .map(|c| c.trim().to_string())
            .collect();

        if cells.iter().any(|c| c.starts_with("_.")) {
            for cell in cells.iter_mut() {
                if let Some(rest) = cell.strip_prefix("_.") {
                    *cell = rest.trim().to_string();
                }
            }
            out.push(table_row(&cells));
            out.push(separator_row(cells.len()));
        } else {
            if !in_table {
                // Headerless table: an all-dash header row plus the separator.
                out.push(separator_row(cells.len()));
                out.push(separator_row(cells.len()));
            }
            out.push(table_row(&cells));
        }
        in_table = true;
    }

    out.join("\n")
}

fn table_row(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}

fn separator_row(width: usize) -> String {
    format!("| {} |", vec!["---"; width].join(" | "))
}

fn convert_ordered_lists(text: &str) -> String {
    convert_list_lines(text, &ORDERED_ITEM, "1.")
}

fn convert_unordered_lists(text: &str) -> String {
    convert_list_lines(text, &UNORDERED_ITEM, "-")
}

/// Rewrite lines of repeated `marker` characters into indented Markdown items.
/// Nesting level is the marker count; indentation is two spaces per extra level.
fn convert_list_lines(text: &str, item: &Regex, bullet: &str) -> String {
    text.split('\n')
        .map(|line| match item.captures(line) {
            Some(caps) => {
                let level = caps[1].len();
                format!("{}{} {}", "  ".repeat(level - 1), bullet, &caps[2])
            }
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn convert_headers(text: &str) -> String {
    HEADER
        .replace_all(text, |caps: &Captures| {
            let level: usize = caps[1].parse().unwrap_or(1);
            format!("{} {}", "#".repeat(level), &caps[2])
        })
        .into_owned()
}

fn convert_links(text: &str) -> String {
    let text = EXTERNAL_LINK.replace_all(text, "[${1}](${2})");
    let text = WIKI_LINK_LABELED.replace_all(&text, "[${2}](${1})");
    WIKI_LINK.replace_all(&text, "[${1}](${1})").into_owned()
}

/// Rewrite `<delim>text<delim>` spans into `open text close`.
///
/// A span opens on a delimiter that is neither doubled nor glued to a
/// preceding ASCII letter or digit, followed by a non-space character. It
/// closes on the nearest delimiter on the same line that follows a
/// non-space character and is not doubled. When that delimiter is followed
/// by an ASCII letter or digit (`*foo*bar`, `_my_var`), there is no span.
/// Doubled delimiters (`**`, `__`, `---`) never match, which keeps list
/// bullets and horizontal rules intact.
fn convert_delimited(text: &str, delim: char, open: &str, close: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut i = 0;
    while i < chars.len() {
        match span_close(&chars, i, delim) {
            Some(end) => {
                out.push_str(open);
                out.extend(&chars[i + 1..end]);
                out.push_str(close);
                i = end + 1;
            }
            None => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }
    out
}

fn span_close(chars: &[char], start: usize, delim: char) -> Option<usize> {
    if chars[start] != delim {
        return None;
    }
    if start > 0 && (chars[start - 1] == delim || chars[start - 1].is_ascii_alphanumeric()) {
        return None;
    }
    let first = *chars.get(start + 1)?;
    if first == delim || first.is_whitespace() {
        return None;
    }

    let mut k = start + 2;
    while k < chars.len() && chars[k] != '\n' {
        if chars[k] == delim && !chars[k - 1].is_whitespace() {
            match chars.get(k + 1) {
                Some(&next) if next == delim => {}
                Some(next) if next.is_ascii_alphanumeric() => return None,
                _ => return Some(k),
            }
        }
        k += 1;
    }
    None
}
