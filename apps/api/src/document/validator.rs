//! Validator: rejects malformed résumé data and unusable templates before
//! any expensive work happens.
//!
//! All problems are collected into one report; nothing short-circuits, so a
//! caller sees the full defect list in a single round trip.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Datelike;
use serde::Serialize;
use thiserror::Error;

use crate::document::formatter::parse_loose_date;
use crate::models::resume::ResumeRecord;
use crate::models::template::TemplateDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueKind {
    TemplateNotFound,
    TemplateTooLarge,
    InvalidField,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: IssueKind::InvalidField,
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Outcome of a passing validation: only non-fatal warnings remain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Error)]
#[error("{}", summarize(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
}

impl ValidationError {
    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }

    /// Human-readable list of every issue, for the `details` field.
    pub fn details(&self) -> String {
        summarize(&self.issues)
    }
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone)]
pub struct Validator {
    templates_dir: PathBuf,
    max_template_bytes: u64,
}

impl Validator {
    pub fn new(templates_dir: impl Into<PathBuf>, max_template_bytes: u64) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            max_template_bytes,
        }
    }

    pub fn validate(
        &self,
        record: &ResumeRecord,
        template: &TemplateDescriptor,
    ) -> Result<ValidationReport, ValidationError> {
        let mut issues = Vec::new();
        self.check_template_file(template, &mut issues);
        check_record(record, &mut issues);
        let warnings = collect_warnings(record);

        if issues.is_empty() {
            Ok(ValidationReport { warnings })
        } else {
            Err(ValidationError { issues, warnings })
        }
    }

    fn check_template_file(&self, template: &TemplateDescriptor, issues: &mut Vec<ValidationIssue>) {
        let path = template.resolve_path(&self.templates_dir);
        match template_size(&path) {
            None => issues.push(ValidationIssue {
                kind: IssueKind::TemplateNotFound,
                field: "templateId".to_string(),
                message: format!("Template file for '{}' was not found", template.id),
            }),
            Some(size) if size > self.max_template_bytes => issues.push(ValidationIssue {
                kind: IssueKind::TemplateTooLarge,
                field: "templateId".to_string(),
                message: format!(
                    "Template '{}' is {size} bytes, exceeding the {} byte limit",
                    template.id, self.max_template_bytes
                ),
            }),
            Some(_) => {}
        }
    }
}

fn template_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}

// ────────────────────────────────────────────────────────────────────────────
// Record rules
// ────────────────────────────────────────────────────────────────────────────

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

fn looks_like_email(s: &str) -> bool {
    let s = s.trim();
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !s.contains(char::is_whitespace)
        }
        None => false,
    }
}

fn check_record(record: &ResumeRecord, issues: &mut Vec<ValidationIssue>) {
    let info = &record.personal_info;
    if blank(&info.full_name) {
        issues.push(ValidationIssue::field(
            "personalInfo.fullName",
            "personalInfo.fullName is required",
        ));
    }
    if blank(&info.email) {
        issues.push(ValidationIssue::field(
            "personalInfo.email",
            "personalInfo.email is required",
        ));
    } else if !looks_like_email(&info.email) {
        issues.push(ValidationIssue::field(
            "personalInfo.email",
            "personalInfo.email is not a valid email address",
        ));
    }

    check_ids(
        "workExperience",
        record.work_experience.iter().map(|e| e.id.as_str()),
        issues,
    );
    check_ids("education", record.education.iter().map(|e| e.id.as_str()), issues);
    check_ids("skills", record.skills.iter().map(|s| s.id.as_str()), issues);
    check_ids("projects", record.projects.iter().map(|p| p.id.as_str()), issues);
    check_ids(
        "certifications",
        record.certifications.iter().map(|c| c.id.as_str()),
        issues,
    );
    check_ids("languages", record.languages.iter().map(|l| l.id.as_str()), issues);

    for (i, exp) in record.work_experience.iter().enumerate() {
        let at = format!("workExperience[{i}]");
        if blank(&exp.job_title) {
            issues.push(ValidationIssue::field(
                format!("{at}.jobTitle"),
                format!("{at}.jobTitle is required"),
            ));
        }
        if blank(&exp.company) {
            issues.push(ValidationIssue::field(
                format!("{at}.company"),
                format!("{at}.company is required"),
            ));
        }
        if blank(&exp.start_date) {
            issues.push(ValidationIssue::field(
                format!("{at}.startDate"),
                format!("{at}.startDate is required"),
            ));
        }
        match exp.end_date() {
            None if !exp.is_current_role => issues.push(ValidationIssue::field(
                format!("{at}.endDate"),
                format!("{at}.endDate is required unless isCurrentRole is true"),
            )),
            Some(end) => {
                let start = parse_loose_date(&exp.start_date);
                let end = parse_loose_date(end);
                if let (Some(start), Some(end)) = (start, end) {
                    if end.year() < start.year() {
                        issues.push(ValidationIssue::field(
                            format!("{at}.endDate"),
                            format!("{at}.endDate must not precede startDate"),
                        ));
                    }
                }
            }
            None => {}
        }
    }

    for (i, edu) in record.education.iter().enumerate() {
        if blank(&edu.institution) {
            let field = format!("education[{i}].institution");
            issues.push(ValidationIssue::field(field.clone(), format!("{field} is required")));
        }
    }
    for (i, skill) in record.skills.iter().enumerate() {
        if blank(&skill.name) {
            let field = format!("skills[{i}].name");
            issues.push(ValidationIssue::field(field.clone(), format!("{field} is required")));
        }
    }
    for (i, project) in record.projects.iter().enumerate() {
        if blank(&project.name) {
            let field = format!("projects[{i}].name");
            issues.push(ValidationIssue::field(field.clone(), format!("{field} is required")));
        }
    }
}

/// Every item needs an id that is unique within its list.
fn check_ids<'a>(
    list: &str,
    ids: impl Iterator<Item = &'a str>,
    issues: &mut Vec<ValidationIssue>,
) {
    let mut seen = HashSet::new();
    for (i, id) in ids.enumerate() {
        let id = id.trim();
        if id.is_empty() {
            issues.push(ValidationIssue::field(
                format!("{list}[{i}].id"),
                format!("{list}[{i}].id is required"),
            ));
        } else if !seen.insert(id) {
            issues.push(ValidationIssue::field(
                format!("{list}[{i}].id"),
                format!("{list}[{i}].id '{id}' is not unique"),
            ));
        }
    }
}

fn collect_warnings(record: &ResumeRecord) -> Vec<String> {
    let mut warnings = Vec::new();
    if record.work_experience.is_empty() {
        warnings.push("No work experience provided; the document may look sparse".to_string());
    }
    if record.skills.is_empty() {
        warnings.push("No skills provided; the document may look sparse".to_string());
    }
    warnings
}
