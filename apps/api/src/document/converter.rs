//! Format Converter: turns a filled document into its fixed-layout (PDF)
//! rendering.
//!
//! Conversion is allowed to fail. [`FormatConverter::convert`] never returns
//! an error: every failure mode (no engine, engine crash, timeout) comes back
//! as [`ConversionResult::Failed`] so callers can fall back to the primary
//! artifact alone.
//!
//! Strategies are tried in order under one shared deadline:
//! 1. [`OfficeEngineStrategy`]: a headless office engine, when configured.
//! 2. [`TextRenderStrategy`]: built-in paragraph renderer via `lopdf`.

use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, Stream};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::document::filler::DOCUMENT_PART;

// ────────────────────────────────────────────────────────────────────────────
// Options & results
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    #[default]
    A4,
    Letter,
}

impl PageSize {
    /// Width and height in PDF points.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            PageSize::A4 => (595, 842),
            PageSize::Letter => (612, 792),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PageSize::A4 => "a4",
            PageSize::Letter => "letter",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversionOptions {
    pub page_size: PageSize,
    pub timeout: Duration,
    pub max_pages: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionFailure {
    #[error("timeout")]
    Timeout,

    #[error("no conversion engine available")]
    Unavailable,

    #[error("conversion failed: {}", .0.join("; "))]
    Failed(Vec<String>),
}

#[derive(Debug, Clone)]
pub enum ConversionResult {
    Converted {
        buffer: Vec<u8>,
        method: &'static str,
        processing_time_ms: u64,
        /// Non-fatal remarks, e.g. page truncation.
        notes: Vec<String>,
    },
    Failed {
        reason: ConversionFailure,
        processing_time_ms: u64,
    },
}

impl ConversionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionResult::Converted { .. })
    }

    pub fn processing_time_ms(&self) -> u64 {
        match self {
            ConversionResult::Converted {
                processing_time_ms, ..
            }
            | ConversionResult::Failed {
                processing_time_ms, ..
            } => *processing_time_ms,
        }
    }
}

/// Output of one strategy.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub notes: Vec<String>,
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("{0} is not available")]
    Unavailable(String),

    #[error("unsupported content: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),
}

/// One way of producing the secondary rendering.
#[async_trait]
pub trait ConversionStrategy: Send + Sync {
    /// Reported in [`ConversionResult::Converted::method`].
    fn method(&self) -> &'static str;

    async fn convert(
        &self,
        document: &[u8],
        options: &ConversionOptions,
    ) -> Result<Rendered, StrategyError>;
}

// ────────────────────────────────────────────────────────────────────────────
// FormatConverter
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct FormatConverter {
    strategies: Vec<Arc<dyn ConversionStrategy>>,
}

impl FormatConverter {
    pub fn new(strategies: Vec<Arc<dyn ConversionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Office engine first (when a binary is configured), built-in renderer last.
    pub fn with_office_engine(soffice: Option<PathBuf>) -> Self {
        let mut strategies: Vec<Arc<dyn ConversionStrategy>> = Vec::new();
        if let Some(binary) = soffice {
            strategies.push(Arc::new(OfficeEngineStrategy::new(binary)));
        }
        strategies.push(Arc::new(TextRenderStrategy));
        Self::new(strategies)
    }

    pub fn methods(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    pub async fn convert(&self, document: &[u8], options: &ConversionOptions) -> ConversionResult {
        let started = Instant::now();
        let deadline = started + options.timeout;
        let elapsed_ms = || started.elapsed().as_millis() as u64;
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            let method = strategy.method();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return ConversionResult::Failed {
                    reason: ConversionFailure::Timeout,
                    processing_time_ms: elapsed_ms(),
                };
            }

            debug!(method, remaining_ms = remaining.as_millis() as u64, "Trying conversion strategy");
            match tokio::time::timeout(remaining, strategy.convert(document, options)).await {
                Ok(Ok(rendered)) => {
                    let processing_time_ms = elapsed_ms();
                    info!(method, processing_time_ms, bytes = rendered.bytes.len(), "Conversion succeeded");
                    return ConversionResult::Converted {
                        buffer: rendered.bytes,
                        method,
                        processing_time_ms,
                        notes: rendered.notes,
                    };
                }
                Ok(Err(e)) => {
                    warn!(method, error = %e, "Conversion strategy failed");
                    failures.push(format!("{method}: {e}"));
                }
                Err(_) => {
                    warn!(method, timeout_ms = options.timeout.as_millis() as u64, "Conversion timed out");
                    return ConversionResult::Failed {
                        reason: ConversionFailure::Timeout,
                        processing_time_ms: elapsed_ms(),
                    };
                }
            }
        }

        let reason = if failures.is_empty() {
            ConversionFailure::Unavailable
        } else {
            ConversionFailure::Failed(failures)
        };
        ConversionResult::Failed {
            reason,
            processing_time_ms: elapsed_ms(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OfficeEngineStrategy
// ────────────────────────────────────────────────────────────────────────────

/// Runs `soffice --headless --convert-to pdf` in a scratch directory. The
/// child is killed if the conversion future is dropped (timeout).
pub struct OfficeEngineStrategy {
    binary: PathBuf,
}

impl OfficeEngineStrategy {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl ConversionStrategy for OfficeEngineStrategy {
    fn method(&self) -> &'static str {
        "office-engine"
    }

    async fn convert(
        &self,
        document: &[u8],
        _options: &ConversionOptions,
    ) -> Result<Rendered, StrategyError> {
        let scratch = tempfile::tempdir()
            .map_err(|e| StrategyError::Failed(format!("scratch directory: {e}")))?;
        let input = scratch.path().join("document.docx");
        tokio::fs::write(&input, document)
            .await
            .map_err(|e| StrategyError::Failed(format!("writing input: {e}")))?;

        // Private profile so concurrent conversions don't fight over one lock.
        let profile = format!("-env:UserInstallation=file://{}", scratch.path().join("profile").display());
        let output = Command::new(&self.binary)
            .arg("--headless")
            .arg("--norestore")
            .arg(profile)
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(scratch.path())
            .arg(&input)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    StrategyError::Unavailable(self.binary.display().to_string())
                }
                _ => StrategyError::Failed(format!("spawning engine: {e}")),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StrategyError::Failed(format!(
                "engine exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let bytes = tokio::fs::read(scratch.path().join("document.pdf"))
            .await
            .map_err(|e| StrategyError::Failed(format!("engine produced no output: {e}")))?;
        Ok(Rendered {
            bytes,
            notes: Vec::new(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TextRenderStrategy
// ────────────────────────────────────────────────────────────────────────────

const FONT_SIZE: u32 = 11;
const LEADING: u32 = 14;
const MARGIN: u32 = 50;
/// Average Helvetica glyph width as a fraction of the font size.
const AVG_GLYPH_WIDTH: f32 = 0.5;

/// Built-in fallback: paragraphs only, Helvetica, no styling. Rejects text
/// the base font cannot encode (e.g. Arabic) rather than printing garbage.
pub struct TextRenderStrategy;

#[async_trait]
impl ConversionStrategy for TextRenderStrategy {
    fn method(&self) -> &'static str {
        "text-render"
    }

    async fn convert(
        &self,
        document: &[u8],
        options: &ConversionOptions,
    ) -> Result<Rendered, StrategyError> {
        let document = document.to_vec();
        let options = options.clone();
        tokio::task::spawn_blocking(move || render_text_pdf(&document, &options))
            .await
            .map_err(|e| StrategyError::Failed(format!("render task: {e}")))?
    }
}

pub fn render_text_pdf(document: &[u8], options: &ConversionOptions) -> Result<Rendered, StrategyError> {
    let paragraphs = extract_paragraphs(document)?;
    if let Some(c) = paragraphs
        .iter()
        .flat_map(|p| p.chars())
        .find(|c| c.is_alphabetic() && win_ansi_byte(*c).is_none())
    {
        return Err(StrategyError::Unsupported(format!(
            "character '{c}' cannot be encoded by the built-in font"
        )));
    }

    let (width, height) = options.page_size.dimensions();
    let columns = ((width - 2 * MARGIN) as f32 / (FONT_SIZE as f32 * AVG_GLYPH_WIDTH)) as usize;
    let rows = ((height - 2 * MARGIN) / LEADING) as usize;

    let lines: Vec<String> = paragraphs.iter().flat_map(|p| wrap(p, columns)).collect();
    let mut pages: Vec<&[String]> = lines.chunks(rows.max(1)).collect();
    if pages.is_empty() {
        pages.push(&[]);
    }

    let mut notes = Vec::new();
    if let Some(max) = options.max_pages.filter(|&m| m > 0) {
        let max = max as usize;
        if pages.len() > max {
            notes.push(format!(
                "Rendering truncated to {max} page(s); content needed {}",
                pages.len()
            ));
            pages.truncate(max);
        }
    }

    let bytes = write_pdf(&pages, width, height)
        .map_err(|e| StrategyError::Failed(format!("writing pdf: {e}")))?;
    Ok(Rendered { bytes, notes })
}

/// Plain text of `word/document.xml`, one entry per paragraph. `<w:br/>`
/// splits a paragraph into separate entries.
pub fn extract_paragraphs(document: &[u8]) -> Result<Vec<String>, StrategyError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(document))
        .map_err(|e| StrategyError::Failed(format!("not a document archive: {e}")))?;
    let mut xml = String::new();
    archive
        .by_name(DOCUMENT_PART)
        .map_err(|e| StrategyError::Failed(format!("missing {DOCUMENT_PART}: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| StrategyError::Failed(format!("reading {DOCUMENT_PART}: {e}")))?;

    let mut reader = Reader::from_str(&xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"br" | b"cr" => paragraphs.push(std::mem::take(&mut current)),
                b"tab" => current.push(' '),
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                current.push_str(&e.decode().unwrap_or_default());
            }
            Ok(Event::GeneralRef(r)) if in_text => {
                let name = String::from_utf8_lossy(&r);
                if let Some(c) = resolve_reference(&name) {
                    current.push_str(&c);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(StrategyError::Failed(format!("XML parsing error: {e}"))),
            _ => {}
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs)
}

fn resolve_reference(name: &str) -> Option<String> {
    if let Some(s) = quick_xml::escape::resolve_predefined_entity(name) {
        return Some(s.to_string());
    }
    let code = name.strip_prefix('#')?;
    let value = match code.strip_prefix('x') {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => code.parse().ok()?,
    };
    char::from_u32(value).map(String::from)
}

/// Greedy word wrap; an empty paragraph becomes one blank line.
fn wrap(paragraph: &str, columns: usize) -> Vec<String> {
    let columns = columns.max(10);
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in paragraph.split_whitespace() {
        let mut word = word.to_string();
        while word.chars().count() > columns {
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            let rest: String = word.chars().skip(columns).collect();
            lines.push(word.chars().take(columns).collect());
            word = rest;
        }
        let needed = line.chars().count() + 1 + word.chars().count();
        if !line.is_empty() && needed > columns {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&word);
    }
    if !line.is_empty() || lines.is_empty() {
        lines.push(line);
    }
    lines
}

/// WinAnsiEncoding byte for `c`, if the standard fonts can show it.
fn win_ansi_byte(c: char) -> Option<u8> {
    match c {
        ' '..='~' => Some(c as u8),
        '\u{00A0}'..='\u{00FF}' => Some(c as u32 as u8),
        '€' => Some(0x80),
        '…' => Some(0x85),
        '‘' => Some(0x91),
        '’' => Some(0x92),
        '“' => Some(0x93),
        '”' => Some(0x94),
        '•' => Some(0x95),
        '–' => Some(0x96),
        '—' => Some(0x97),
        _ => None,
    }
}

fn pdf_string(line: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len() + 2);
    out.push(b'(');
    for c in line.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(c as u8);
            }
            '\t' => out.push(b' '),
            c => out.push(win_ansi_byte(c).unwrap_or(b'?')),
        }
    }
    out.push(b')');
    out
}

fn page_content(lines: &[String], height: u32) -> Vec<u8> {
    let mut content = Vec::new();
    content.extend_from_slice(
        format!("BT\n/F1 {FONT_SIZE} Tf\n{MARGIN} {} Td\n{LEADING} TL\n", height - MARGIN).as_bytes(),
    );
    for line in lines {
        content.extend_from_slice(&pdf_string(line));
        content.extend_from_slice(b" Tj T*\n");
    }
    content.extend_from_slice(b"ET\n");
    content
}

fn write_pdf(pages: &[&[String]], width: u32, height: u32) -> Result<Vec<u8>, String> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::with_capacity(pages.len());
    for lines in pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, page_content(lines, height)));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), (width as i64).into(), (height as i64).into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(Object::from(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).map_err(|e| e.to_string())?;
    Ok(buffer)
}
