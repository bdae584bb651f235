//! Generation Orchestrator: drives one request through
//! `Received → RateChecked → Validated → Mapped → Filled → (Converting) → Packaged`.
//!
//! The only component here with side effects (rate-limit state, logging,
//! filesystem reads). Everything it calls into is a deterministic transform,
//! except the converter, which is bounded by a deadline.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::document::converter::{ConversionOptions, ConversionResult, FormatConverter};
use crate::document::filler::{DocumentFiller, FillError, FillOptions};
use crate::document::mapper::{map_to_template_payload, MappingContext};
use crate::document::validator::{IssueKind, ValidationError, Validator};
use crate::errors::AppError;
use crate::generation::filename::resolve_filename;
use crate::generation::rate_limit::{RateDecision, RateLimiter};
use crate::models::generation::{
    ArtifactFile, Customizations, GeneratedArtifact, GenerationMetadata, GenerationOptions,
    GenerationRequest, OutputFormat, PRIMARY_MIME, SECONDARY_MIME,
};
use crate::models::language::Language;
use crate::models::template::TemplateDescriptor;
use crate::registry::TemplateCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    RateChecked,
    Validated,
    Mapped,
    Filled,
    Converting,
    Packaged,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Received => "received",
            Stage::RateChecked => "rate_checked",
            Stage::Validated => "validated",
            Stage::Mapped => "mapped",
            Stage::Filled => "filled",
            Stage::Converting => "converting",
            Stage::Packaged => "packaged",
        })
    }
}

/// Request options after every enum-like field has been checked.
#[derive(Debug, Clone)]
pub struct GenerationPlan {
    pub template: TemplateDescriptor,
    pub format: OutputFormat,
    pub language: Language,
    pub file_name: Option<String>,
    pub customizations: Customizations,
}

pub struct OrchestratorSettings {
    pub templates_dir: PathBuf,
    pub conversion_timeout: Duration,
    pub filename_max_len: usize,
}

pub struct Orchestrator {
    catalog: Arc<dyn TemplateCatalog>,
    limiter: Arc<RateLimiter>,
    validator: Validator,
    filler: DocumentFiller,
    converter: FormatConverter,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<dyn TemplateCatalog>,
        limiter: Arc<RateLimiter>,
        validator: Validator,
        filler: DocumentFiller,
        converter: FormatConverter,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            catalog,
            limiter,
            validator,
            filler,
            converter,
            settings,
        }
    }

    // ── Received → RateChecked ──────────────────────────────────────────────

    /// Counts the request against `client`'s window. Runs before the body is read.
    pub fn admit(&self, client: &str) -> Result<(), AppError> {
        match self.limiter.check(client) {
            RateDecision::Allowed { remaining } => {
                debug!(client, remaining, from = %Stage::Received, to = %Stage::RateChecked, "Request admitted");
                Ok(())
            }
            decision @ RateDecision::Limited { .. } => {
                let retry_after_secs = decision.retry_after_secs().unwrap_or(1);
                warn!(client, retry_after_secs, "Rate limit exceeded");
                Err(AppError::RateLimited { retry_after_secs })
            }
        }
    }

    /// Resolves and checks request options without touching any template file.
    pub fn plan(&self, options: &GenerationOptions) -> Result<GenerationPlan, AppError> {
        let template_id = options
            .template_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                AppError::validation_with_details(
                    "Template ID is required",
                    "options.templateId must name a template from GET /templates",
                )
            })?;

        let format = match options.format.as_deref() {
            Some(raw) => raw
                .parse::<OutputFormat>()
                .map_err(|e| AppError::validation_with_details("Invalid output format", e))?,
            None => OutputFormat::default(),
        };

        let template = self
            .catalog
            .get_template_by_id(template_id)
            .ok_or_else(|| AppError::NotFound(format!("Template '{template_id}' not found")))?;

        let language = match options.language.as_deref() {
            Some(raw) => raw.parse::<Language>().map_err(|e| {
                AppError::validation_with_details(
                    e,
                    format!("Supported languages: {}", template.supported_language_codes().join(", ")),
                )
            })?,
            None => Language::default(),
        };
        if !template.supports(language) {
            return Err(AppError::validation_with_details(
                format!(
                    "Language '{}' is not supported by template '{}'",
                    language.code(),
                    template.id
                ),
                format!(
                    "Supported languages: {}",
                    template.supported_language_codes().join(", ")
                ),
            ));
        }

        Ok(GenerationPlan {
            template,
            format,
            language,
            file_name: options.file_name.clone(),
            customizations: options.customizations.clone(),
        })
    }

    // ── RateChecked → … → Packaged ──────────────────────────────────────────

    pub async fn generate(&self, request: GenerationRequest) -> Result<GeneratedArtifact, AppError> {
        let started = Instant::now();
        let mut stage = Stage::RateChecked;
        let result = self.run(request, started, &mut stage).await;
        if let Err(e) = &result {
            warn!(stage = %stage, status = e.status().as_u16(), "Generation errored");
        }
        result
    }

    async fn run(
        &self,
        request: GenerationRequest,
        started: Instant,
        stage: &mut Stage,
    ) -> Result<GeneratedArtifact, AppError> {
        let plan = self.plan(&request.options)?;
        let template = &plan.template;

        let report = self
            .validator
            .validate(&request.cv_data, template)
            .map_err(validation_to_app_error)?;
        advance(stage, Stage::Validated);
        let mut warnings = report.warnings;

        let now = Utc::now();
        let ctx = MappingContext {
            language: plan.language,
            remove_empty_sections: plan.customizations.remove_empty_sections,
            today: now.date_naive(),
        };
        let payload = map_to_template_payload(&request.cv_data, template, &ctx);
        advance(stage, Stage::Mapped);

        let path = template.resolve_path(&self.settings.templates_dir);
        let template_bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("reading {}: {e}", path.display())))?;
        let filler = self.filler.clone();
        let fill_options = FillOptions::for_template(template);
        let document = tokio::task::spawn_blocking(move || {
            filler.fill(&template_bytes, &payload, &fill_options)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("fill task failed: {e}")))?
        .map_err(fill_to_app_error)?;
        advance(stage, Stage::Filled);

        let stem = resolve_filename(
            plan.file_name.as_deref(),
            &template.name,
            now.naive_utc(),
            self.settings.filename_max_len,
        );

        let mut conversion_method = None;
        let mut secondary = None;
        if plan.format.wants_secondary() {
            advance(stage, Stage::Converting);
            let options = ConversionOptions {
                page_size: plan.customizations.page_size,
                timeout: self.settings.conversion_timeout,
                max_pages: plan.customizations.max_pages,
            };
            match self.converter.convert(&document, &options).await {
                ConversionResult::Converted {
                    buffer,
                    method,
                    notes,
                    ..
                } => {
                    conversion_method = Some(method.to_string());
                    warnings.extend(notes);
                    secondary = Some(ArtifactFile {
                        filename: format!("{stem}.pdf"),
                        mime_type: SECONDARY_MIME,
                        bytes: buffer,
                    });
                }
                ConversionResult::Failed { reason, .. } => {
                    if plan.format == OutputFormat::Secondary {
                        return Err(AppError::ConversionFailed(reason.to_string()));
                    }
                    warn!(reason = %reason, "Secondary rendering unavailable, returning document only");
                    warnings.push(format!(
                        "PDF conversion failed ({reason}); only the DOCX document is included"
                    ));
                }
            }
        }

        let primary = plan.format.wants_primary().then(|| ArtifactFile {
            filename: format!("{stem}.docx"),
            mime_type: PRIMARY_MIME,
            bytes: document,
        });
        advance(stage, Stage::Packaged);

        let processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            template = %template.id,
            format = %plan.format,
            language = plan.language.code(),
            processing_time_ms,
            warnings = warnings.len(),
            "Document generated"
        );

        Ok(GeneratedArtifact {
            format: plan.format,
            primary,
            secondary,
            metadata: GenerationMetadata {
                template_id: template.id.clone(),
                template_name: template.name.clone(),
                language: plan.language.code().to_string(),
                generated_at: now,
                processing_time_ms,
                conversion_method,
                warnings,
            },
        })
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    debug!(from = %stage, to = %next, "Generation stage");
    *stage = next;
}

fn validation_to_app_error(err: ValidationError) -> AppError {
    if err.has(IssueKind::TemplateNotFound) {
        AppError::NotFound(err.details())
    } else if err.has(IssueKind::TemplateTooLarge) {
        AppError::PayloadTooLarge(err.details())
    } else {
        AppError::validation_with_details("Invalid CV data", err.details())
    }
}

fn fill_to_app_error(err: FillError) -> AppError {
    match err {
        FillError::TemplateTooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
        other => AppError::Fill(other.to_string()),
    }
}
