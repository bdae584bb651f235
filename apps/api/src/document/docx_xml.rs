//! WordprocessingML preparation for the merge pass.
//!
//! Word splits typed text into several runs (`<w:r><w:t>..</w:t></w:r>`)
//! whenever formatting, spell-check or revision marks change, so a tag such
//! as `{{ fullName }}` frequently arrives as `{{ full` + `Name }}`. Before the
//! template engine sees a part, every tag is moved whole into the run where
//! it starts. Two paragraph-level rewrites follow:
//!
//! - a paragraph holding only a `{% .. %}` (or `{# .. #}`) tag is replaced by
//!   the bare tag, so loops and conditionals leave no empty paragraphs;
//! - a paragraph holding only a raw tag `{{@ expr }}` is replaced by
//!   `{{ (expr) | paragraphs }}`, which emits one paragraph per line.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Innermost paragraphs only: the body may not open another `<w:p>`, so a
/// paragraph holding a text box (`w:txbxContent`) is skipped and the nested
/// paragraphs are matched instead. The outer paragraph's own runs are then
/// left as typed, so tags there must not be split across runs.
static PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<w:p(?:\s[^>]*[^/>])?>(?:[^<]|<[^w]|<w[^:]|<w:[^p]|<w:p[^\s>/])*?</w:p>")
        .expect("paragraph pattern is valid")
});

static TEXT_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(<w:t(?:\s[^>]*)?>)(.*?)</w:t>").expect("text run pattern is valid")
});

const PRESERVE_OPEN: &str = r#"<w:t xml:space="preserve">"#;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("unclosed template tag near '{0}'")]
    Unclosed(String),

    #[error("raw tag '{0}' must be the only content of its paragraph")]
    RawNotAlone(String),

    #[error("raw tag '{0}' has no expression")]
    EmptyRaw(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Variable,
    Block,
    Comment,
    Raw,
}

#[derive(Debug, Clone, Copy)]
struct TagSpan {
    start: usize,
    end: usize,
    kind: TagKind,
}

struct TextRun {
    range: Range<usize>,
    open: String,
    text: String,
}

/// Prepares one XML part (document body, header or footer) for merging.
pub fn normalize_part(xml: &str) -> Result<String, TagError> {
    let mut out = String::with_capacity(xml.len());
    let mut last = 0;
    for paragraph in PARAGRAPH.find_iter(xml) {
        out.push_str(&xml[last..paragraph.start()]);
        out.push_str(&normalize_paragraph(paragraph.as_str())?);
        last = paragraph.end();
    }
    out.push_str(&xml[last..]);
    Ok(out)
}

fn normalize_paragraph(paragraph: &str) -> Result<String, TagError> {
    let runs: Vec<TextRun> = TEXT_RUN
        .captures_iter(paragraph)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(TextRun {
                range: whole.range(),
                open: caps.get(1)?.as_str().to_string(),
                text: caps.get(2)?.as_str().to_string(),
            })
        })
        .collect();

    let combined: String = runs.iter().map(|r| r.text.as_str()).collect();
    if !combined.contains('{') {
        return Ok(paragraph.to_string());
    }
    let tags = find_tags(&combined)?;
    if tags.is_empty() {
        return Ok(paragraph.to_string());
    }

    if let [only] = tags.as_slice() {
        let alone = combined[..only.start].trim().is_empty() && combined[only.end..].trim().is_empty();
        if alone {
            let raw = &combined[only.start..only.end];
            match only.kind {
                TagKind::Block | TagKind::Comment => return Ok(clean_tag(raw)),
                TagKind::Raw => return raw_expression(raw),
                TagKind::Variable => {}
            }
        }
    }
    if let Some(raw) = tags.iter().find(|t| t.kind == TagKind::Raw) {
        return Err(TagError::RawNotAlone(combined[raw.start..raw.end].to_string()));
    }

    let starts: Vec<usize> = runs
        .iter()
        .scan(0, |offset, run| {
            let start = *offset;
            *offset += run.text.len();
            Some(start)
        })
        .collect();
    let run_at = |pos: usize| starts.partition_point(|&s| s <= pos).saturating_sub(1);

    let mut texts = vec![String::new(); runs.len()];
    let mut tagged = vec![false; runs.len()];
    let mut cursor = 0;
    for tag in &tags {
        push_plain(&combined, cursor..tag.start, &starts, &runs, &mut texts);
        let owner = run_at(tag.start);
        texts[owner].push_str(&clean_tag(&combined[tag.start..tag.end]));
        tagged[owner] = true;
        cursor = tag.end;
    }
    push_plain(&combined, cursor..combined.len(), &starts, &runs, &mut texts);

    let mut out = String::with_capacity(paragraph.len());
    let mut last = 0;
    for (i, run) in runs.iter().enumerate() {
        out.push_str(&paragraph[last..run.range.start]);
        if tagged[i] && !run.open.contains("xml:space") {
            out.push_str(PRESERVE_OPEN);
        } else {
            out.push_str(&run.open);
        }
        out.push_str(&texts[i]);
        out.push_str("</w:t>");
        last = run.range.end;
    }
    out.push_str(&paragraph[last..]);
    Ok(out)
}

/// Copies the untagged text in `span` back into the runs it came from.
fn push_plain(
    combined: &str,
    span: Range<usize>,
    starts: &[usize],
    runs: &[TextRun],
    texts: &mut [String],
) {
    for (i, run) in runs.iter().enumerate() {
        let from = starts[i].max(span.start);
        let to = (starts[i] + run.text.len()).min(span.end);
        if from < to {
            texts[i].push_str(&combined[from..to]);
        }
    }
}

fn find_tags(text: &str) -> Result<Vec<TagSpan>, TagError> {
    let mut tags = Vec::new();
    let mut pos = 0;
    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        let rest = &text[start..];
        let (kind, closer) = if rest.starts_with("{{@") {
            (TagKind::Raw, "}}")
        } else if rest.starts_with("{{") {
            (TagKind::Variable, "}}")
        } else if rest.starts_with("{%") {
            (TagKind::Block, "%}")
        } else if rest.starts_with("{#") {
            (TagKind::Comment, "#}")
        } else {
            pos = start + 1;
            continue;
        };
        let body = start + 2;
        let close = text[body..]
            .find(closer)
            .ok_or_else(|| TagError::Unclosed(rest.chars().take(40).collect()))?;
        let end = body + close + closer.len();
        tags.push(TagSpan { start, end, kind });
        pos = end;
    }
    Ok(tags)
}

/// Undoes XML escaping and Word's typographic quotes inside a tag so the
/// engine sees the expression the author typed.
fn clean_tag(raw: &str) -> String {
    raw.replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn raw_expression(raw: &str) -> Result<String, TagError> {
    let cleaned = clean_tag(raw);
    let expr = cleaned
        .strip_prefix("{{@")
        .and_then(|s| s.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or_default();
    if expr.is_empty() {
        return Err(TagError::EmptyRaw(raw.to_string()));
    }
    Ok(format!("{{{{ ({expr}) | paragraphs }}}}"))
}
