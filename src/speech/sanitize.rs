//! Strip lightweight markdown so the synthesizer reads prose, not syntax.

use std::sync::LazyLock;

use regex::Regex;

static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static ITALIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*(.*?)\*").unwrap());
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#{1,6}\s").unwrap());
static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```[\s\S]*?```").unwrap());
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]*)`").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());

/// Decorative glyphs that would otherwise be read out by name.
const GLYPHS: &[char] = &['📄', '📝', '•'];

/// Clean text for speech. The passes run in a fixed order: emphasis,
/// headings, fenced code, inline code, links, glyphs, trim.
pub fn sanitize(text: &str) -> String {
    let text = BOLD.replace_all(text, "$1");
    let text = ITALIC.replace_all(&text, "$1");
    let text = HEADING.replace_all(&text, "");
    let text = CODE_BLOCK.replace_all(&text, "code block");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text: String = text.chars().filter(|c| !GLYPHS.contains(c)).collect();
    text.trim().to_string()
}
