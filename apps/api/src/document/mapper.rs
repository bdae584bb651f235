//! Template Data Mapper: assembles the placeholder payload a template is
//! merged with.
//!
//! Deterministic and free of I/O: "today" comes in through [`MappingContext`].
//! Every text value passes through the sanitizers in `formatter` first; this
//! is where user-entered markup stops.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::document::formatter::{
    category_header, duration_months, format_bullets, format_date, format_duration_until,
    format_list, format_skills_by_category, localize_digits, present_label, sanitize_multiline,
    sanitize_text, LIST_SEPARATOR,
};
use crate::models::language::Language;
use crate::models::resume::{
    Certification, Education, Project, ResumeRecord, SkillCategory, SpokenLanguage,
    WorkExperience,
};
use crate::models::template::TemplateDescriptor;

/// One element of a repeated section (experience, education, ...).
pub type SectionItem = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Text(String),
    Count(u32),
    Flag(bool),
    Items(Vec<SectionItem>),
}

/// Flat map of placeholders plus repeated-section arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TemplatePayload(BTreeMap<String, PayloadValue>);

impl TemplatePayload {
    pub fn insert_text(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), PayloadValue::Text(value.into()));
    }

    pub fn insert_count(&mut self, key: &str, value: u32) {
        self.0.insert(key.to_string(), PayloadValue::Count(value));
    }

    pub fn insert_flag(&mut self, key: &str, value: bool) {
        self.0.insert(key.to_string(), PayloadValue::Flag(value));
    }

    pub fn insert_items(&mut self, key: &str, items: Vec<SectionItem>) {
        self.0.insert(key.to_string(), PayloadValue::Items(items));
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.0.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(PayloadValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn count(&self, key: &str) -> Option<u32> {
        match self.0.get(key) {
            Some(PayloadValue::Count(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(PayloadValue::Flag(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn items(&self, key: &str) -> Option<&[SectionItem]> {
        match self.0.get(key) {
            Some(PayloadValue::Items(items)) => Some(items),
            _ => None,
        }
    }

    /// A key is blank when absent, an empty string, or an empty section.
    pub fn is_blank(&self, key: &str) -> bool {
        match self.0.get(key) {
            None => true,
            Some(PayloadValue::Text(s)) => s.trim().is_empty(),
            Some(PayloadValue::Items(items)) => items.is_empty(),
            Some(PayloadValue::Count(_)) | Some(PayloadValue::Flag(_)) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MappingContext {
    pub language: Language,
    pub remove_empty_sections: bool,
    pub today: NaiveDate,
}

// ────────────────────────────────────────────────────────────────────────────
// Mapping
// ────────────────────────────────────────────────────────────────────────────

pub fn map_to_template_payload(
    record: &ResumeRecord,
    template: &TemplateDescriptor,
    ctx: &MappingContext,
) -> TemplatePayload {
    let lang = ctx.language;
    let mut payload = TemplatePayload::default();

    // Personal scalars
    let info = &record.personal_info;
    let full_name = sanitize_text(&info.full_name);
    let email = sanitize_text(&info.email);
    let phone = sanitize_text(&info.phone);
    let location = sanitize_text(&info.location);
    let linkedin = sanitize_text(&info.linkedin);
    let github = sanitize_text(&info.github);
    let website = sanitize_text(&info.website);
    let summary = sanitize_multiline(&info.summary);

    payload.insert_text("contactInfo", format_list(&[&email, &phone, &location]));
    payload.insert_text("links", format_list(&[&linkedin, &github, &website]));
    payload.insert_text("fullName", full_name);
    payload.insert_text("email", email);
    payload.insert_text("phone", phone);
    payload.insert_text("location", location);
    payload.insert_text("linkedin", linkedin);
    payload.insert_text("github", github);
    payload.insert_text("website", website);
    payload.insert_flag("showSummary", show(!summary.is_empty(), ctx));
    payload.insert_text("summary", summary);

    // Repeated sections
    let experiences: Vec<SectionItem> = record
        .work_experience
        .iter()
        .map(|exp| map_experience(exp, ctx))
        .collect();
    let education: Vec<SectionItem> = record.education.iter().map(|e| map_education(e, lang)).collect();
    let projects: Vec<SectionItem> = record.projects.iter().map(|p| map_project(p, lang)).collect();
    let certifications: Vec<SectionItem> = record
        .certifications
        .iter()
        .map(|c| map_certification(c, lang))
        .collect();
    let spoken: Vec<SectionItem> = record.languages.iter().map(map_spoken_language).collect();

    payload.insert_text("experienceSection", experience_block(&experiences, lang));
    payload.insert_text("educationSection", education_block(&education));
    payload.insert_text("projectsSection", projects_block(&projects, lang));
    payload.insert_text("certificationsSection", certifications_block(&certifications));
    payload.insert_text(
        "spokenLanguages",
        format_list(
            &spoken
                .iter()
                .map(|l| labelled(&l["name"], &l["proficiency"]))
                .collect::<Vec<_>>(),
        ),
    );

    payload.insert_count("experienceCount", experiences.len() as u32);
    payload.insert_count("educationCount", education.len() as u32);
    payload.insert_count("projectsCount", projects.len() as u32);
    payload.insert_count("certificationsCount", certifications.len() as u32);
    payload.insert_count("skillsCount", record.skills.len() as u32);
    payload.insert_count(
        "totalYearsExperience",
        total_years_experience(&record.work_experience, ctx.today),
    );

    payload.insert_flag("showExperience", show(!experiences.is_empty(), ctx));
    payload.insert_flag("showEducation", show(!education.is_empty(), ctx));
    payload.insert_flag("showProjects", show(!projects.is_empty(), ctx));
    payload.insert_flag("showCertifications", show(!certifications.is_empty(), ctx));
    payload.insert_flag("showLanguages", show(!spoken.is_empty(), ctx));
    payload.insert_flag("showSkills", show(!record.skills.is_empty(), ctx));

    payload.insert_items("experiences", experiences);
    payload.insert_items("education", education);
    payload.insert_items("projects", projects);
    payload.insert_items("certifications", certifications);
    payload.insert_items("languages", spoken);

    // Skills
    payload.insert_text(
        "technicalSkills",
        format_skills_by_category(&record.skills, SkillCategory::Technical, lang),
    );
    payload.insert_text(
        "softSkills",
        format_skills_by_category(&record.skills, SkillCategory::Soft, lang),
    );
    payload.insert_text(
        "languageSkills",
        format_skills_by_category(&record.skills, SkillCategory::Language, lang),
    );
    payload.insert_text(
        "skillsList",
        format_list(
            &record
                .skills
                .iter()
                .map(|s| sanitize_text(&s.name))
                .collect::<Vec<_>>(),
        ),
    );
    payload.insert_text("skillsGrid", skills_grid(record, lang));

    // Document-level
    payload.insert_text("language", lang.code());
    payload.insert_text("textDirection", lang.direction().as_str());
    payload.insert_flag("isRtl", lang.is_rtl());
    payload.insert_text(
        "generatedDate",
        format_date(&ctx.today.format("%Y-%m-%d").to_string(), lang),
    );
    payload.insert_text("templateId", sanitize_text(&template.id));
    payload.insert_text("templateName", sanitize_text(&template.name));

    payload
}

fn show(has_content: bool, ctx: &MappingContext) -> bool {
    has_content || !ctx.remove_empty_sections
}

/// Sum of each role's duration in whole years.
pub fn total_years_experience(experience: &[WorkExperience], today: NaiveDate) -> u32 {
    experience
        .iter()
        .filter_map(|exp| {
            let end = if exp.is_current_role { None } else { exp.end_date() };
            if end.is_none() && !exp.is_current_role {
                return None;
            }
            duration_months(&exp.start_date, end, today)
        })
        .map(|months| months / 12)
        .sum()
}

fn date_range(start: &str, end: &str) -> String {
    match (start.is_empty(), end.is_empty()) {
        (false, false) => format!("{start} - {end}"),
        (false, true) => start.to_string(),
        (true, false) => end.to_string(),
        (true, true) => String::new(),
    }
}

fn labelled(name: &str, detail: &str) -> String {
    if detail.is_empty() {
        name.to_string()
    } else {
        format!("{name} ({detail})")
    }
}

fn formatted_date(raw: Option<&str>, lang: Language) -> String {
    raw.map(|d| sanitize_text(&format_date(d.trim(), lang)))
        .unwrap_or_default()
}

fn map_experience(exp: &WorkExperience, ctx: &MappingContext) -> SectionItem {
    let lang = ctx.language;
    let end_raw = if exp.is_current_role { None } else { exp.end_date() };
    let start = formatted_date(Some(&exp.start_date), lang);
    let end = if exp.is_current_role {
        present_label(lang).to_string()
    } else {
        formatted_date(end_raw, lang)
    };
    let duration = if exp.is_current_role || end_raw.is_some() {
        format_duration_until(&exp.start_date, end_raw, ctx.today, lang)
    } else {
        String::new()
    };
    let technologies: Vec<String> = exp.technologies.iter().map(|t| sanitize_text(t)).collect();

    let mut item = SectionItem::new();
    item.insert("id".into(), sanitize_text(&exp.id));
    item.insert("jobTitle".into(), sanitize_text(&exp.job_title));
    item.insert("company".into(), sanitize_text(&exp.company));
    item.insert("location".into(), sanitize_text(&exp.location));
    item.insert("dateRange".into(), date_range(&start, &end));
    item.insert("startDate".into(), start);
    item.insert("endDate".into(), end);
    item.insert("duration".into(), duration);
    item.insert("isCurrent".into(), exp.is_current_role.to_string());
    item.insert("description".into(), sanitize_multiline(&exp.description));
    item.insert("achievements".into(), format_bullets(&exp.achievements));
    item.insert("technologies".into(), format_list(&technologies));
    item
}

fn map_education(edu: &Education, lang: Language) -> SectionItem {
    let start = formatted_date(Some(&edu.start_date), lang);
    let end = formatted_date(edu.end_date.as_deref(), lang);
    let mut item = SectionItem::new();
    item.insert("id".into(), sanitize_text(&edu.id));
    item.insert("degree".into(), sanitize_text(&edu.degree));
    item.insert("fieldOfStudy".into(), sanitize_text(&edu.field_of_study));
    item.insert("institution".into(), sanitize_text(&edu.institution));
    item.insert("location".into(), sanitize_text(&edu.location));
    item.insert("dateRange".into(), date_range(&start, &end));
    item.insert("startDate".into(), start);
    item.insert("endDate".into(), end);
    item.insert(
        "gpa".into(),
        sanitize_text(&localize_digits(edu.gpa.as_deref().unwrap_or_default(), lang)),
    );
    item.insert("description".into(), sanitize_multiline(&edu.description));
    item
}

fn map_project(project: &Project, lang: Language) -> SectionItem {
    let start = formatted_date(project.start_date.as_deref(), lang);
    let end = formatted_date(project.end_date.as_deref(), lang);
    let technologies: Vec<String> = project.technologies.iter().map(|t| sanitize_text(t)).collect();
    let mut item = SectionItem::new();
    item.insert("id".into(), sanitize_text(&project.id));
    item.insert("name".into(), sanitize_text(&project.name));
    item.insert("description".into(), sanitize_multiline(&project.description));
    item.insert("technologies".into(), format_list(&technologies));
    item.insert(
        "url".into(),
        sanitize_text(project.url.as_deref().unwrap_or_default()),
    );
    item.insert("dateRange".into(), date_range(&start, &end));
    item.insert("startDate".into(), start);
    item.insert("endDate".into(), end);
    item.insert("highlights".into(), format_bullets(&project.highlights));
    item
}

fn map_certification(cert: &Certification, lang: Language) -> SectionItem {
    let mut item = SectionItem::new();
    item.insert("id".into(), sanitize_text(&cert.id));
    item.insert("name".into(), sanitize_text(&cert.name));
    item.insert("issuer".into(), sanitize_text(&cert.issuer));
    item.insert("date".into(), formatted_date(cert.date.as_deref(), lang));
    item.insert(
        "url".into(),
        sanitize_text(cert.url.as_deref().unwrap_or_default()),
    );
    item
}

fn map_spoken_language(language: &SpokenLanguage) -> SectionItem {
    let mut item = SectionItem::new();
    item.insert("id".into(), sanitize_text(&language.id));
    item.insert("name".into(), sanitize_text(&language.name));
    item.insert("proficiency".into(), sanitize_text(&language.proficiency));
    item
}

// ────────────────────────────────────────────────────────────────────────────
// Pre-joined blocks for templates that cannot iterate
// ────────────────────────────────────────────────────────────────────────────

fn technologies_label(lang: Language) -> &'static str {
    match lang {
        Language::En => "Technologies",
        Language::Ar => "التقنيات",
    }
}

fn join_nonempty(parts: &[&str], separator: &str) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(separator)
}

fn experience_block(items: &[SectionItem], lang: Language) -> String {
    items
        .iter()
        .map(|item| {
            let mut lines = Vec::new();
            let headline = join_nonempty(&[&item["jobTitle"], &item["company"], &item["location"]], " | ");
            lines.push(headline);
            let when = if item["duration"].is_empty() {
                item["dateRange"].clone()
            } else {
                format!("{} ({})", item["dateRange"], item["duration"])
            };
            lines.push(when);
            lines.push(item["description"].clone());
            lines.push(item["achievements"].clone());
            if !item["technologies"].is_empty() {
                lines.push(format!("{}: {}", technologies_label(lang), item["technologies"]));
            }
            lines.retain(|l| !l.trim().is_empty());
            lines.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn education_block(items: &[SectionItem]) -> String {
    items
        .iter()
        .map(|item| {
            let degree = join_nonempty(&[&item["degree"], &item["fieldOfStudy"]], ", ");
            let place = join_nonempty(&[&item["institution"], &item["location"]], " | ");
            let mut lines = vec![degree, place, item["dateRange"].clone(), item["gpa"].clone()];
            lines.push(item["description"].clone());
            lines.retain(|l| !l.trim().is_empty());
            lines.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn projects_block(items: &[SectionItem], lang: Language) -> String {
    items
        .iter()
        .map(|item| {
            let mut lines = vec![
                join_nonempty(&[&item["name"], &item["dateRange"]], " | "),
                item["description"].clone(),
                item["highlights"].clone(),
            ];
            if !item["technologies"].is_empty() {
                lines.push(format!("{}: {}", technologies_label(lang), item["technologies"]));
            }
            lines.push(item["url"].clone());
            lines.retain(|l| !l.trim().is_empty());
            lines.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn certifications_block(items: &[SectionItem]) -> String {
    items
        .iter()
        .map(|item| join_nonempty(&[&item["name"], &item["issuer"], &item["date"]], LIST_SEPARATOR))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn skills_grid(record: &ResumeRecord, lang: Language) -> String {
    SkillCategory::ALL
        .iter()
        .filter_map(|&category| {
            let skills = format_skills_by_category(&record.skills, category, lang);
            (!skills.is_empty()).then(|| format!("{}:\n{}", category_header(category, lang), skills))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resume::{PersonalInfo, Skill, SkillLevel};
    use crate::models::template::{PlaceholderManifest, TemplateCategory};

    fn template() -> TemplateDescriptor {
        TemplateDescriptor {
            id: "classic".into(),
            name: "Classic".into(),
            category: TemplateCategory::Professional,
            file: "classic.docx".into(),
            premium: false,
            languages: vec![Language::En, Language::Ar],
            placeholders: PlaceholderManifest::default(),
            description: None,
        }
    }

    fn ctx(language: Language) -> MappingContext {
        MappingContext {
            language,
            remove_empty_sections: false,
            today: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
        }
    }

    fn record() -> ResumeRecord {
        ResumeRecord {
            personal_info: PersonalInfo {
                full_name: "  Sam   Rivera ".into(),
                email: "sam@example.com".into(),
                phone: "+1 555 0100".into(),
                location: "Austin, TX".into(),
                github: "github.com/sam".into(),
                summary: "Backend engineer.\n<b>Loves</b> {{ config }}".into(),
                ..Default::default()
            },
            work_experience: vec![
                WorkExperience {
                    id: "w1".into(),
                    job_title: "Senior Engineer".into(),
                    company: "Acme".into(),
                    location: "Remote".into(),
                    start_date: "2021-01".into(),
                    is_current_role: true,
                    description: "Owns billing.\nRuns on-call.".into(),
                    achievements: vec!["Cut p99 by 40%".into(), " ".into()],
                    technologies: vec!["Rust".into(), "Postgres".into()],
                    ..Default::default()
                },
                WorkExperience {
                    id: "w2".into(),
                    job_title: "Engineer".into(),
                    company: "Initech".into(),
                    start_date: "2018-01".into(),
                    end_date: Some("2020-07".into()),
                    ..Default::default()
                },
            ],
            skills: vec![
                Skill {
                    id: "s1".into(),
                    name: "Rust".into(),
                    category: SkillCategory::Technical,
                    level: SkillLevel::Expert,
                },
                Skill {
                    id: "s2".into(),
                    name: "Arabic".into(),
                    category: SkillCategory::Language,
                    level: SkillLevel::Advanced,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_scalars_are_sanitized() {
        let payload = map_to_template_payload(&record(), &template(), &ctx(Language::En));
        assert_eq!(payload.text("fullName"), Some("Sam Rivera"));
        assert_eq!(
            payload.text("contactInfo"),
            Some("sam@example.com • +1 555 0100 • Austin, TX")
        );
        assert_eq!(payload.text("links"), Some("github.com/sam"));
        let summary = payload.text("summary").unwrap();
        assert!(!summary.contains('<'));
        assert_eq!(summary, "Backend engineer.\nbLoves/b {{ config }}");
    }

    #[test]
    fn test_experience_items() {
        let payload = map_to_template_payload(&record(), &template(), &ctx(Language::En));
        let items = payload.items("experiences").unwrap();
        assert_eq!(items.len(), 2);
        let current = &items[0];
        assert_eq!(current["startDate"], "January 2021");
        assert_eq!(current["endDate"], "Present");
        assert_eq!(current["duration"], "3 years");
        assert_eq!(current["achievements"], "• Cut p99 by 40%");
        assert_eq!(current["technologies"], "Rust • Postgres");
        assert_eq!(current["description"], "Owns billing.\nRuns on-call.");
        assert_eq!(items[1]["duration"], "2 years 6 months");
        assert_eq!(items[1]["dateRange"], "January 2018 - July 2020");
    }

    #[test]
    fn test_counts_and_total_years() {
        let payload = map_to_template_payload(&record(), &template(), &ctx(Language::En));
        assert_eq!(payload.count("experienceCount"), Some(2));
        assert_eq!(payload.count("skillsCount"), Some(2));
        assert_eq!(payload.count("projectsCount"), Some(0));
        // 3 whole years (current) + 2 whole years (2018-01..2020-07)
        assert_eq!(payload.count("totalYearsExperience"), Some(5));
    }

    #[test]
    fn test_skills_strings_and_grid() {
        let payload = map_to_template_payload(&record(), &template(), &ctx(Language::En));
        assert_eq!(payload.text("technicalSkills"), Some("Rust (Expert)"));
        assert_eq!(payload.text("softSkills"), Some(""));
        assert_eq!(payload.text("languageSkills"), Some("Arabic (Advanced)"));
        assert_eq!(
            payload.text("skillsGrid"),
            Some("Technical Skills:\nRust (Expert)\n\nLanguages:\nArabic (Advanced)")
        );
    }

    #[test]
    fn test_section_blocks() {
        let payload = map_to_template_payload(&record(), &template(), &ctx(Language::En));
        let block = payload.text("experienceSection").unwrap();
        assert!(block.starts_with("Senior Engineer | Acme | Remote\nJanuary 2021 - Present (3 years)"));
        assert!(block.contains("Technologies: Rust • Postgres"));
        assert!(block.contains("\n\nEngineer | Initech\n"));
        assert_eq!(payload.text("educationSection"), Some(""));
    }

    #[test]
    fn test_rtl_language_fields() {
        let payload = map_to_template_payload(&record(), &template(), &ctx(Language::Ar));
        assert_eq!(payload.text("language"), Some("ar"));
        assert_eq!(payload.text("textDirection"), Some("rtl"));
        assert_eq!(payload.flag("isRtl"), Some(true));
        let items = payload.items("experiences").unwrap();
        assert_eq!(items[0]["endDate"], "حتى الآن");
        assert_eq!(payload.text("generatedDate"), Some("يناير ٢٠٢٤"));
    }

    #[test]
    fn test_remove_empty_sections_flags() {
        let mut c = ctx(Language::En);
        let payload = map_to_template_payload(&record(), &template(), &c);
        assert_eq!(payload.flag("showProjects"), Some(true));

        c.remove_empty_sections = true;
        let payload = map_to_template_payload(&record(), &template(), &c);
        assert_eq!(payload.flag("showProjects"), Some(false));
        assert_eq!(payload.flag("showExperience"), Some(true));
    }

    #[test]
    fn test_blank_detection() {
        let payload = map_to_template_payload(&record(), &template(), &ctx(Language::En));
        assert!(!payload.is_blank("fullName"));
        assert!(payload.is_blank("website"));
        assert!(payload.is_blank("projects"));
        assert!(payload.is_blank("doesNotExist"));
        assert!(!payload.is_blank("projectsCount"));
    }
}
