use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::language::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateCategory {
    Academic,
    Professional,
    Creative,
    Modern,
}

/// Named fields and sections a template expects. `required` entries must be
/// present and non-blank in the payload or the fill is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceholderManifest {
    pub fields: Vec<String>,
    pub sections: Vec<String>,
    pub required: Vec<String>,
}

/// Immutable metadata for one document template, defined at deploy time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDescriptor {
    pub id: String,
    pub name: String,
    pub category: TemplateCategory,
    /// Location of the template binary, relative to the templates directory.
    pub file: String,
    #[serde(default)]
    pub premium: bool,
    pub languages: Vec<Language>,
    #[serde(default)]
    pub placeholders: PlaceholderManifest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TemplateDescriptor {
    pub fn supports(&self, language: Language) -> bool {
        self.languages.contains(&language)
    }

    pub fn supported_language_codes(&self) -> Vec<&'static str> {
        self.languages.iter().map(|l| l.code()).collect()
    }

    pub fn resolve_path(&self, templates_dir: &Path) -> PathBuf {
        templates_dir.join(&self.file)
    }

    /// True when `file` stays inside the templates directory.
    pub fn has_contained_path(&self) -> bool {
        let path = Path::new(&self.file);
        !self.file.trim().is_empty()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(file: &str) -> TemplateDescriptor {
        TemplateDescriptor {
            id: "classic".to_string(),
            name: "Classic".to_string(),
            category: TemplateCategory::Professional,
            file: file.to_string(),
            premium: false,
            languages: vec![Language::En],
            placeholders: PlaceholderManifest::default(),
            description: None,
        }
    }

    #[test]
    fn test_contained_paths() {
        assert!(descriptor("classic/classic.docx").has_contained_path());
        assert!(!descriptor("../secrets.docx").has_contained_path());
        assert!(!descriptor("/etc/passwd").has_contained_path());
        assert!(!descriptor("").has_contained_path());
    }

    #[test]
    fn test_supports_language() {
        let d = descriptor("a.docx");
        assert!(d.supports(Language::En));
        assert!(!d.supports(Language::Ar));
        assert_eq!(d.supported_language_codes(), vec!["en"]);
    }
}
