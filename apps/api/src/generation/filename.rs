//! Output filename handling.

use chrono::NaiveDateTime;

/// Restricts a caller-suggested name to `[A-Za-z0-9_-]`, collapsing runs of
/// replaced characters, and caps it at `max_len` characters. A trailing
/// `.docx`/`.pdf` is dropped first; the extension is added per artifact.
pub fn sanitize_filename(raw: &str, max_len: usize) -> String {
    let trimmed = raw.trim();
    let stem = [".docx", ".pdf"]
        .iter()
        .find_map(|ext| {
            trimmed
                .len()
                .checked_sub(ext.len())
                .filter(|&cut| trimmed.is_char_boundary(cut) && trimmed[cut..].eq_ignore_ascii_case(ext))
                .map(|cut| &trimmed[..cut])
        })
        .unwrap_or(trimmed);

    let mut out = String::with_capacity(stem.len());
    for c in stem.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let out: String = out.trim_matches('_').chars().take(max_len).collect();
    out.trim_end_matches('_').to_string()
}

/// `{template name}_{YYYYMMDD_HHMMSS}`, sanitized. The whole name, stamp
/// included, stays within `max_len`.
pub fn default_filename(template_name: &str, now: NaiveDateTime, max_len: usize) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S").to_string();
    let base = sanitize_filename(template_name, max_len.saturating_sub(stamp.len() + 1));
    let name = if base.is_empty() {
        format!("resume_{stamp}")
    } else {
        format!("{base}_{stamp}")
    };
    // ASCII only at this point, so byte and char lengths agree.
    name[..name.len().min(max_len)].trim_end_matches('_').to_string()
}

/// The caller's name when it survives sanitizing, otherwise the derived default.
pub fn resolve_filename(
    requested: Option<&str>,
    template_name: &str,
    now: NaiveDateTime,
    max_len: usize,
) -> String {
    requested
        .map(|raw| sanitize_filename(raw, max_len))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| default_filename(template_name, now, max_len))
}
