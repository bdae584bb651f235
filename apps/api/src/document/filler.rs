//! Document Filler: merges a [`TemplatePayload`] into a `.docx` template.
//!
//! Merging runs inside a capability-restricted minijinja environment: no
//! loader (so no `include`/`import`), no builtin filters, tests or globals,
//! and a fuel budget. The only callables are the helpers registered in
//! [`DocumentFiller::sandbox`]. Templates can read the payload and nothing
//! else. No filesystem, network or process environment.
//!
//! Inline tags use `{{ expr }}`; `{{@ expr }}` alone in a paragraph inserts
//! raw paragraph XML (one paragraph per line of the value).

use std::io::{Cursor, Read, Write};

use minijinja::value::Value;
use minijinja::{Environment, Output, State, UndefinedBehavior};
use thiserror::Error;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::document::docx_xml::{normalize_part, TagError};
use crate::document::formatter::{
    format_date, format_duration, truncate, LIST_SEPARATOR,
};
use crate::document::mapper::TemplatePayload;
use crate::models::language::Language;
use crate::models::template::TemplateDescriptor;

pub const DOCUMENT_PART: &str = "word/document.xml";
/// Instruction budget for one part; generous for real résumés, fatal for runaway loops.
pub const DEFAULT_FUEL: u64 = 200_000;

const LINE_BREAK: &str = r#"</w:t><w:br/><w:t xml:space="preserve">"#;

#[derive(Debug, Error)]
pub enum FillError {
    #[error("template is {size} bytes, exceeding the {limit} byte limit")]
    TemplateTooLarge { size: u64, limit: u64 },

    #[error("required placeholders are missing: {}", .0.join(", "))]
    MissingPlaceholders(Vec<String>),

    #[error("template is not a valid document archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("template archive has no {0}")]
    MissingPart(&'static str),

    #[error("failed to read {part}: {source}")]
    ReadPart {
        part: String,
        source: std::io::Error,
    },

    #[error("malformed template markup in {part}: {source}")]
    Markup { part: String, source: TagError },

    #[error("template merge failed in {part}: {source}")]
    Render {
        part: String,
        source: minijinja::Error,
    },

    #[error("merged {part} is not well-formed XML: {message}")]
    MalformedOutput { part: String, message: String },

    #[error("failed to write filled document: {0}")]
    Write(#[from] std::io::Error),
}

/// Per-template merge options.
#[derive(Debug, Clone)]
pub struct FillOptions {
    /// Payload keys that must be present and non-blank.
    pub required: Vec<String>,
    /// Render `\n` inside inline values as Word line breaks.
    pub linebreaks: bool,
}

impl FillOptions {
    pub fn for_template(template: &TemplateDescriptor) -> Self {
        Self {
            required: template.placeholders.required.clone(),
            linebreaks: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentFiller {
    max_template_bytes: u64,
    fuel: u64,
}

impl DocumentFiller {
    pub fn new(max_template_bytes: u64) -> Self {
        Self {
            max_template_bytes,
            fuel: DEFAULT_FUEL,
        }
    }

    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    /// Produces a filled document. Never returns a partially merged buffer:
    /// any failure in any part fails the whole fill.
    pub fn fill(
        &self,
        template: &[u8],
        payload: &TemplatePayload,
        options: &FillOptions,
    ) -> Result<Vec<u8>, FillError> {
        let size = template.len() as u64;
        if size > self.max_template_bytes {
            return Err(FillError::TemplateTooLarge {
                size,
                limit: self.max_template_bytes,
            });
        }

        let missing: Vec<String> = options
            .required
            .iter()
            .filter(|key| payload.is_blank(key))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(FillError::MissingPlaceholders(missing));
        }

        let mut archive = ZipArchive::new(Cursor::new(template))?;
        if archive.index_for_name(DOCUMENT_PART).is_none() {
            return Err(FillError::MissingPart(DOCUMENT_PART));
        }

        let env = self.sandbox(options);
        let context = Value::from_serialize(payload);
        let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(template.len())));

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            let name = entry.name().to_string();
            if !is_mergeable_part(&name) {
                writer.raw_copy_file(entry)?;
                continue;
            }

            let mut xml = String::new();
            entry
                .read_to_string(&mut xml)
                .map_err(|source| FillError::ReadPart {
                    part: name.clone(),
                    source,
                })?;
            let merged = render_part(&env, &name, &xml, &context)?;
            debug!(part = %name, bytes = merged.len(), "Merged template part");

            let file_options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            writer.start_file(name.as_str(), file_options)?;
            writer.write_all(merged.as_bytes())?;
        }

        Ok(writer.finish()?.into_inner())
    }

    /// The evaluation context templates run in. Built from
    /// `Environment::empty()`, so only what is registered here is callable.
    fn sandbox(&self, options: &FillOptions) -> Environment<'static> {
        let mut env = Environment::empty();
        env.set_undefined_behavior(UndefinedBehavior::Lenient);
        env.set_keep_trailing_newline(true);
        env.set_fuel(Some(self.fuel));

        let linebreaks = options.linebreaks;
        env.set_formatter(move |out, _state, value| write_run_value(out, value, linebreaks));

        env.add_filter("format_date", helper_format_date);
        env.add_function("format_date", helper_format_date);
        env.add_filter("duration", helper_duration);
        env.add_function("duration", helper_duration);
        env.add_filter("join_list", helper_join_list);
        env.add_function("join_list", helper_join_list);
        env.add_filter("truncate", helper_truncate);
        env.add_function("truncate", helper_truncate);
        env.add_filter("paragraphs", helper_paragraphs);
        env
    }
}

pub fn is_mergeable_part(name: &str) -> bool {
    name == DOCUMENT_PART
        || (name.starts_with("word/header") && name.ends_with(".xml"))
        || (name.starts_with("word/footer") && name.ends_with(".xml"))
}

fn render_part(
    env: &Environment<'static>,
    part: &str,
    xml: &str,
    context: &Value,
) -> Result<String, FillError> {
    let prepared = normalize_part(xml).map_err(|source| FillError::Markup {
        part: part.to_string(),
        source,
    })?;
    let merged = env
        .render_str(&prepared, context)
        .map_err(|source| FillError::Render {
            part: part.to_string(),
            source,
        })?;
    check_well_formed(&merged).map_err(|message| FillError::MalformedOutput {
        part: part.to_string(),
        message,
    })?;
    Ok(merged)
}

fn check_well_formed(xml: &str) -> Result<(), String> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) if depth == 0 => return Ok(()),
            Ok(Event::Eof) => return Err(format!("{depth} element(s) left open")),
            Err(e) => {
                return Err(format!(
                    "{e} at byte {}",
                    reader.error_position()
                ))
            }
            _ => {}
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Output escaping
// ────────────────────────────────────────────────────────────────────────────

fn write_run_value(
    out: &mut Output<'_>,
    value: &Value,
    linebreaks: bool,
) -> Result<(), minijinja::Error> {
    if value.is_undefined() || value.is_none() {
        return Ok(());
    }
    if value.is_safe() {
        write!(out, "{value}")?;
        return Ok(());
    }
    let text = escape_xml_text(&value.to_string());
    if linebreaks {
        out.write_str(&text.replace('\n', LINE_BREAK))?;
    } else {
        out.write_str(&text.replace('\n', " "))?;
    }
    Ok(())
}

/// Escapes markup characters and drops characters XML 1.0 cannot carry.
pub fn escape_xml_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\r' => {}
            '\t' | '\n' => out.push(c),
            c if (c as u32) < 0x20 || c == '\u{FFFE}' || c == '\u{FFFF}' => {}
            c => out.push(c),
        }
    }
    out
}

// ────────────────────────────────────────────────────────────────────────────
// Template helpers
// ────────────────────────────────────────────────────────────────────────────

fn payload_language(state: &State, explicit: Option<String>) -> Language {
    explicit
        .or_else(|| {
            state
                .lookup("language")
                .and_then(|v| v.as_str().map(str::to_string))
        })
        .and_then(|code| code.parse().ok())
        .unwrap_or_default()
}

fn helper_format_date(state: &State, value: String, language: Option<String>) -> String {
    format_date(&value, payload_language(state, language))
}

fn helper_duration(state: &State, start: String, end: Option<String>) -> String {
    let end = end.filter(|e| !e.trim().is_empty());
    format_duration(&start, end.as_deref(), payload_language(state, None))
}

fn helper_join_list(values: Vec<Value>, separator: Option<String>) -> String {
    let items: Vec<String> = values
        .iter()
        .filter(|v| !v.is_undefined() && !v.is_none())
        .map(|v| v.to_string())
        .collect();
    let separator = separator.unwrap_or_else(|| LIST_SEPARATOR.to_string());
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(&separator)
}

fn helper_truncate(value: String, length: usize) -> String {
    truncate(&value, length)
}

/// One `<w:p>` per non-blank line, text escaped.
fn helper_paragraphs(value: String) -> Value {
    let xml: String = value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            format!(
                r#"<w:p><w:r><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
                escape_xml_text(line)
            )
        })
        .collect();
    Value::from_safe_string(xml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::document::mapper::{map_to_template_payload, MappingContext};
    use crate::document::test_support::build_docx;
    use crate::models::resume::{PersonalInfo, ResumeRecord, WorkExperience};
    use crate::models::template::{PlaceholderManifest, TemplateCategory};

    fn read_part(docx: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(docx)).unwrap();
        let mut part = archive.by_name(name).unwrap();
        let mut out = String::new();
        part.read_to_string(&mut out).unwrap();
        out
    }

    fn p(text: &str) -> String {
        format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
    }

    fn payload() -> TemplatePayload {
        let record = ResumeRecord {
            personal_info: PersonalInfo {
                full_name: "Sam Rivera".into(),
                email: "sam@example.com".into(),
                summary: "First line\nSecond & last {{ 7 * 7 }}".into(),
                ..Default::default()
            },
            work_experience: vec![
                WorkExperience {
                    id: "w1".into(),
                    job_title: "Lead".into(),
                    company: "Acme".into(),
                    start_date: "2022-01".into(),
                    end_date: Some("2023-01".into()),
                    ..Default::default()
                },
                WorkExperience {
                    id: "w2".into(),
                    job_title: "Engineer".into(),
                    company: "Initech".into(),
                    start_date: "2019-01".into(),
                    end_date: Some("2021-12".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let template = TemplateDescriptor {
            id: "classic".into(),
            name: "Classic".into(),
            category: TemplateCategory::Professional,
            file: "classic.docx".into(),
            premium: false,
            languages: vec![Language::En],
            placeholders: PlaceholderManifest::default(),
            description: None,
        };
        let ctx = MappingContext {
            language: Language::En,
            remove_empty_sections: false,
            today: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        };
        map_to_template_payload(&record, &template, &ctx)
    }

    fn options() -> FillOptions {
        FillOptions {
            required: vec!["fullName".into()],
            linebreaks: true,
        }
    }

    fn fill(body: &str) -> Result<String, FillError> {
        let filler = DocumentFiller::new(1024 * 1024);
        let out = filler.fill(&build_docx(body), &payload(), &options())?;
        Ok(read_part(&out, DOCUMENT_PART))
    }

    #[test]
    fn test_inline_fields_across_split_runs() {
        let body = "<w:p><w:r><w:t>Name: {{ full</w:t></w:r><w:r><w:t>Name }}</w:t></w:r></w:p>";
        let xml = fill(body).unwrap();
        assert!(xml.contains(r#"<w:t xml:space="preserve">Name: Sam Rivera</w:t>"#), "{xml}");
    }

    #[test]
    fn test_untouched_parts_are_copied() {
        let filler = DocumentFiller::new(1024 * 1024);
        let out = filler.fill(&build_docx(&p("x")), &payload(), &options()).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(out.as_slice())).unwrap();
        let mut logo = Vec::new();
        archive.by_name("word/media/logo.bin").unwrap().read_to_end(&mut logo).unwrap();
        assert_eq!(logo, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_paragraph_loop() {
        let body = format!(
            "{}{}{}",
            p("{% for exp in experiences %}"),
            p("{{ exp.jobTitle }} at {{ exp.company }} ({{ exp.duration }})"),
            p("{% endfor %}")
        );
        let xml = fill(&body).unwrap();
        assert!(xml.contains("Lead at Acme (1 year)"), "{xml}");
        assert!(xml.contains("Engineer at Initech (2 years 11 months)"));
        assert!(!xml.contains("{%"));
        assert_eq!(xml.matches("<w:p>").count(), 2);
    }

    #[test]
    fn test_multiline_values_become_line_breaks() {
        let xml = fill(&p("{{ summary }}")).unwrap();
        assert!(
            xml.contains(r#"First line</w:t><w:br/><w:t xml:space="preserve">Second &amp; last"#),
            "{xml}"
        );
    }

    #[test]
    fn test_user_text_is_never_evaluated() {
        let xml = fill(&p("{{ summary }}")).unwrap();
        assert!(xml.contains("{{ 7 * 7 }}"));
        assert!(!xml.contains("49"));
    }

    #[test]
    fn test_raw_paragraph_insertion() {
        let xml = fill(&p("{{@ experienceSection }}")).unwrap();
        assert!(xml.contains(r#"<w:p><w:r><w:t xml:space="preserve">Lead | Acme</w:t></w:r></w:p>"#), "{xml}");
        assert!(xml.contains("Engineer | Initech"));
    }

    #[test]
    fn test_helpers_are_available() {
        let body = p(r#"{{ "2021-03" | format_date }}|{{ truncate(fullName, 3) }}|{{ join_list(["a", "", "b"]) }}|{{ duration("2020-01", "2021-06") }}"#);
        let xml = fill(&body).unwrap();
        assert!(xml.contains("March 2021|Sam...|a • b|1 year 5 months"), "{xml}");
    }

    #[test]
    fn test_sandbox_has_no_other_callables() {
        for source in ["{{ range(3) }}", "{% include \"secrets.xml\" %}", "{{ fullName | upper }}"] {
            let err = fill(&p(source)).unwrap_err();
            assert!(matches!(err, FillError::Render { .. }), "{source}: {err}");
        }
    }

    #[test]
    fn test_runaway_template_runs_out_of_fuel() {
        let filler = DocumentFiller::new(1024 * 1024).with_fuel(20);
        let body = p("{% for a in experiences %}{% for b in experiences %}{{ a.id }}{{ b.id }}{% endfor %}{% endfor %}");
        let err = filler.fill(&build_docx(&body), &payload(), &options()).unwrap_err();
        assert!(matches!(err, FillError::Render { .. }));
    }

    #[test]
    fn test_missing_required_placeholder() {
        let filler = DocumentFiller::new(1024 * 1024);
        let opts = FillOptions {
            required: vec!["fullName".into(), "website".into(), "projects".into()],
            linebreaks: true,
        };
        let err = filler.fill(&build_docx(&p("x")), &payload(), &opts).unwrap_err();
        match err {
            FillError::MissingPlaceholders(keys) => assert_eq!(keys, vec!["website", "projects"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unbalanced_structure_is_rejected() {
        let body = format!("{}{}", p("A {% if false %}"), p("{% endif %}"));
        let err = fill(&body).unwrap_err();
        assert!(matches!(err, FillError::MalformedOutput { .. }), "{err}");
    }

    #[test]
    fn test_malformed_tag() {
        let err = fill(&p("{{ fullName")).unwrap_err();
        assert!(matches!(err, FillError::Markup { .. }));
    }

    #[test]
    fn test_size_ceiling() {
        let filler = DocumentFiller::new(10);
        let err = filler.fill(&build_docx(&p("x")), &payload(), &options()).unwrap_err();
        assert!(matches!(err, FillError::TemplateTooLarge { limit: 10, .. }));
    }

    #[test]
    fn test_not_an_archive() {
        let filler = DocumentFiller::new(1024);
        let err = filler.fill(b"plain text", &payload(), &options()).unwrap_err();
        assert!(matches!(err, FillError::Archive(_)));
    }

    #[test]
    fn test_mergeable_parts() {
        assert!(is_mergeable_part("word/document.xml"));
        assert!(is_mergeable_part("word/header1.xml"));
        assert!(is_mergeable_part("word/footer2.xml"));
        assert!(!is_mergeable_part("word/styles.xml"));
        assert!(!is_mergeable_part("word/_rels/header1.xml.rels"));
    }

    #[test]
    fn test_escape_xml_text() {
        assert_eq!(escape_xml_text("a & <b> \"c\"\u{0}"), "a &amp; &lt;b&gt; &quot;c&quot;");
    }
}
