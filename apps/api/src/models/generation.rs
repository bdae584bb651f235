//! Per-request generation types: the wire request and the produced artifact.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::converter::PageSize;
use crate::models::resume::ResumeRecord;

pub const PRIMARY_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const SECONDARY_MIME: &str = "application/pdf";

/// Body of `POST /generate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub cv_data: ResumeRecord,
    #[serde(default)]
    pub options: GenerationOptions,
}

/// Options as sent by the client. Enum-like fields stay strings here so an
/// invalid value yields a precise validation message instead of a parse error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationOptions {
    pub template_id: Option<String>,
    pub format: Option<String>,
    pub file_name: Option<String>,
    pub language: Option<String>,
    pub customizations: Customizations,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Customizations {
    pub remove_empty_sections: bool,
    pub max_pages: Option<u32>,
    pub page_size: PageSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Primary,
    Secondary,
    Both,
}

impl OutputFormat {
    pub fn wants_primary(self) -> bool {
        matches!(self, OutputFormat::Primary | OutputFormat::Both)
    }

    pub fn wants_secondary(self) -> bool {
        matches!(self, OutputFormat::Secondary | OutputFormat::Both)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" | "docx" => Ok(OutputFormat::Primary),
            "secondary" | "pdf" => Ok(OutputFormat::Secondary),
            "both" => Ok(OutputFormat::Both),
            other => Err(format!(
                "Invalid format '{other}'. Expected one of: primary, secondary, both"
            )),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Primary => "primary",
            OutputFormat::Secondary => "secondary",
            OutputFormat::Both => "both",
        })
    }
}

/// One binary output file.
#[derive(Debug, Clone)]
pub struct ArtifactFile {
    pub filename: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

impl ArtifactFile {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub template_id: String,
    pub template_name: String,
    pub language: String,
    pub generated_at: DateTime<Utc>,
    pub processing_time_ms: u64,
    pub conversion_method: Option<String>,
    pub warnings: Vec<String>,
}

/// Result of one generation request. Owned by the request, never persisted.
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub format: OutputFormat,
    pub primary: Option<ArtifactFile>,
    pub secondary: Option<ArtifactFile>,
    pub metadata: GenerationMetadata,
}
