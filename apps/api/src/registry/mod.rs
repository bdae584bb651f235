//! Template registry: read-only catalog of [`TemplateDescriptor`]s loaded
//! once at startup from a JSON manifest.
//!
//! Handlers only see the [`TemplateCatalog`] trait, carried in `AppState` as
//! `Arc<dyn TemplateCatalog>`.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::models::template::TemplateDescriptor;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read template manifest {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("template manifest is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate template id '{0}'")]
    DuplicateId(String),

    #[error("template '{0}' has a file path outside the templates directory")]
    UncontainedPath(String),

    #[error("template '{0}' declares no supported languages")]
    NoLanguages(String),
}

/// Lookup contract the generation pipeline depends on.
pub trait TemplateCatalog: Send + Sync {
    fn get_template_by_id(&self, id: &str) -> Option<TemplateDescriptor>;

    /// All descriptors, in manifest order.
    fn list(&self) -> Vec<TemplateDescriptor>;
}

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: Vec<TemplateDescriptor>,
    by_id: HashMap<String, usize>,
}

impl TemplateRegistry {
    pub fn from_descriptors(templates: Vec<TemplateDescriptor>) -> Result<Self, RegistryError> {
        let mut by_id = HashMap::with_capacity(templates.len());
        for (index, template) in templates.iter().enumerate() {
            if !template.has_contained_path() {
                return Err(RegistryError::UncontainedPath(template.id.clone()));
            }
            if template.languages.is_empty() {
                return Err(RegistryError::NoLanguages(template.id.clone()));
            }
            if by_id.insert(template.id.clone(), index).is_some() {
                return Err(RegistryError::DuplicateId(template.id.clone()));
            }
        }
        Ok(Self { templates, by_id })
    }

    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let templates: Vec<TemplateDescriptor> = serde_json::from_str(json)?;
        Self::from_descriptors(templates)
    }

    pub fn load(manifest: &Path) -> Result<Self, RegistryError> {
        let json = std::fs::read_to_string(manifest).map_err(|source| RegistryError::Read {
            path: manifest.display().to_string(),
            source,
        })?;
        let registry = Self::from_json(&json)?;
        info!(
            manifest = %manifest.display(),
            templates = registry.len(),
            "Template registry loaded"
        );
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateCatalog for TemplateRegistry {
    fn get_template_by_id(&self, id: &str) -> Option<TemplateDescriptor> {
        self.by_id.get(id).map(|&i| self.templates[i].clone())
    }

    fn list(&self) -> Vec<TemplateDescriptor> {
        self.templates.clone()
    }
}
