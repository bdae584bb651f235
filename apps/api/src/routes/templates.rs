use axum::{extract::State, Json};
use serde::Serialize;

use crate::models::language::Language;
use crate::models::template::{PlaceholderManifest, TemplateCategory, TemplateDescriptor};
use crate::state::AppState;

/// Public view of a descriptor; the on-disk location stays internal.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    pub category: TemplateCategory,
    pub premium: bool,
    pub languages: Vec<Language>,
    pub placeholders: PlaceholderManifest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<TemplateDescriptor> for TemplateSummary {
    fn from(t: TemplateDescriptor) -> Self {
        Self {
            id: t.id,
            name: t.name,
            category: t.category,
            premium: t.premium,
            languages: t.languages,
            placeholders: t.placeholders,
            description: t.description,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TemplateListResponse {
    pub success: bool,
    pub templates: Vec<TemplateSummary>,
}

/// GET /templates
pub async fn handle_list_templates(State(state): State<AppState>) -> Json<TemplateListResponse> {
    Json(TemplateListResponse {
        success: true,
        templates: state.catalog.list().into_iter().map(TemplateSummary::from).collect(),
    })
}
