//! Field Formatter: pure, total functions turning raw résumé fields into
//! display strings for a target language.
//!
//! None of these functions fail: malformed input degrades to the raw (or
//! trimmed) string so a single bad date never sinks a whole document.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::models::language::Language;
use crate::models::resume::{Skill, SkillCategory, SkillLevel};

/// Visible separator between joined list items.
pub const LIST_SEPARATOR: &str = " • ";
pub const BULLET: &str = "• ";
const ELLIPSIS: &str = "...";

const MONTHS_EN: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const MONTHS_AR: [&str; 12] = [
    "يناير",
    "فبراير",
    "مارس",
    "أبريل",
    "مايو",
    "يونيو",
    "يوليو",
    "أغسطس",
    "سبتمبر",
    "أكتوبر",
    "نوفمبر",
    "ديسمبر",
];

// ────────────────────────────────────────────────────────────────────────────
// Text
// ────────────────────────────────────────────────────────────────────────────

/// Strips angle brackets, collapses whitespace runs to one space and trims.
///
/// Idempotent: `sanitize_text(sanitize_text(s)) == sanitize_text(s)`.
pub fn sanitize_text(input: &str) -> String {
    let stripped: String = input.chars().filter(|c| !matches!(c, '<' | '>')).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Like [`sanitize_text`] but keeps line structure: each line is sanitized on
/// its own and blank lines are dropped.
pub fn sanitize_multiline(input: &str) -> String {
    input
        .lines()
        .map(sanitize_text)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cuts `input` to `max_chars` characters, appending an ellipsis when cut.
pub fn truncate(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let mut cut: String = input.chars().take(max_chars).collect();
    cut.push_str(ELLIPSIS);
    cut
}

/// Joins the non-blank items with [`LIST_SEPARATOR`].
pub fn format_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|item| item.as_ref().trim())
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

/// One bullet line per non-blank item.
pub fn format_bullets<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|item| sanitize_text(item.as_ref()))
        .filter(|item| !item.is_empty())
        .map(|item| format!("{BULLET}{item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ────────────────────────────────────────────────────────────────────────────
// Dates
// ────────────────────────────────────────────────────────────────────────────

/// Parses the loose date shapes clients send: ISO dates, `YYYY-MM`, `YYYY`,
/// `MM/YYYY`, `Month YYYY` and RFC 3339 timestamps.
pub fn parse_loose_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.date_naive());
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(&format!("01/{s}"), "%d/%m/%Y") {
        return Some(date);
    }
    for fmt in ["%d %B %Y", "%d %b %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("1 {s}"), fmt) {
            return Some(date);
        }
    }
    if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse().ok().and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1));
    }
    None
}

/// Renders a date as long month + year (`January 2020`, `يناير ٢٠٢٠`).
/// Unparseable input is returned unchanged.
pub fn format_date(raw: &str, language: Language) -> String {
    match parse_loose_date(raw) {
        Some(date) => month_year(date, language),
        None => raw.to_string(),
    }
}

fn month_year(date: NaiveDate, language: Language) -> String {
    let month = date.month0() as usize;
    match language {
        Language::En => format!("{} {}", MONTHS_EN[month], date.year()),
        Language::Ar => format!(
            "{} {}",
            MONTHS_AR[month],
            localize_digits(&date.year().to_string(), language)
        ),
    }
}

/// Label used in place of an end date for an ongoing role.
pub fn present_label(language: Language) -> &'static str {
    match language {
        Language::En => "Present",
        Language::Ar => "حتى الآن",
    }
}

/// Replaces ASCII digits with the target language's digit glyphs.
pub fn localize_digits(input: &str, language: Language) -> String {
    match language {
        Language::En => input.to_string(),
        Language::Ar => input
            .chars()
            .map(|c| match c.to_digit(10) {
                Some(d) => char::from_u32(0x0660 + d).unwrap_or(c),
                None => c,
            })
            .collect(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Durations
// ────────────────────────────────────────────────────────────────────────────

/// Whole months between two dates, ignoring the day of month. Negative spans
/// clamp to zero.
pub fn months_between(start: NaiveDate, end: NaiveDate) -> u32 {
    let months = (end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32;
    months.max(0) as u32
}

/// Months from `start` until `end`, or until `today` when `end` is `None`.
pub fn duration_months(start: &str, end: Option<&str>, today: NaiveDate) -> Option<u32> {
    let start = parse_loose_date(start)?;
    let end = match end {
        Some(raw) => parse_loose_date(raw)?,
        None => today,
    };
    Some(months_between(start, end))
}

/// Localized "X years Y months" phrase; `end = None` means the role is current.
pub fn format_duration(start: &str, end: Option<&str>, language: Language) -> String {
    format_duration_until(start, end, Utc::now().date_naive(), language)
}

/// [`format_duration`] against an explicit "today", for deterministic callers.
pub fn format_duration_until(
    start: &str,
    end: Option<&str>,
    today: NaiveDate,
    language: Language,
) -> String {
    match duration_months(start, end, today) {
        Some(months) => duration_phrase(months / 12, months % 12, language),
        None => raw_range(start, end),
    }
}

/// Unparseable dates fall back to the trimmed input, joined as a range.
fn raw_range(start: &str, end: Option<&str>) -> String {
    let start = start.trim();
    match end.map(str::trim).filter(|e| !e.is_empty()) {
        Some(end) if !start.is_empty() => format!("{start} - {end}"),
        Some(end) => end.to_string(),
        None => start.to_string(),
    }
}

fn duration_phrase(years: u32, months: u32, language: Language) -> String {
    match (years, months) {
        (0, 0) => match language {
            Language::En => "Less than a month".to_string(),
            Language::Ar => "أقل من شهر".to_string(),
        },
        (y, 0) => years_phrase(y, language),
        (0, m) => months_phrase(m, language),
        (y, m) => match language {
            Language::En => format!("{} {}", years_phrase(y, language), months_phrase(m, language)),
            Language::Ar => format!("{} و{}", years_phrase(y, language), months_phrase(m, language)),
        },
    }
}

fn years_phrase(n: u32, language: Language) -> String {
    match language {
        Language::En if n == 1 => "1 year".to_string(),
        Language::En => format!("{n} years"),
        Language::Ar => match n {
            1 => "سنة".to_string(),
            2 => "سنتان".to_string(),
            3..=10 => format!("{} سنوات", localize_digits(&n.to_string(), language)),
            _ => format!("{} سنة", localize_digits(&n.to_string(), language)),
        },
    }
}

fn months_phrase(n: u32, language: Language) -> String {
    match language {
        Language::En if n == 1 => "1 month".to_string(),
        Language::En => format!("{n} months"),
        Language::Ar => match n {
            1 => "شهر".to_string(),
            2 => "شهران".to_string(),
            3..=10 => format!("{} أشهر", localize_digits(&n.to_string(), language)),
            _ => format!("{} شهرًا", localize_digits(&n.to_string(), language)),
        },
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Skills
// ────────────────────────────────────────────────────────────────────────────

pub fn level_label(level: SkillLevel, language: Language) -> &'static str {
    match (language, level) {
        (Language::En, SkillLevel::Beginner) => "Beginner",
        (Language::En, SkillLevel::Intermediate) => "Intermediate",
        (Language::En, SkillLevel::Advanced) => "Advanced",
        (Language::En, SkillLevel::Expert) => "Expert",
        (Language::Ar, SkillLevel::Beginner) => "مبتدئ",
        (Language::Ar, SkillLevel::Intermediate) => "متوسط",
        (Language::Ar, SkillLevel::Advanced) => "متقدم",
        (Language::Ar, SkillLevel::Expert) => "خبير",
    }
}

pub fn category_header(category: SkillCategory, language: Language) -> &'static str {
    match (language, category) {
        (Language::En, SkillCategory::Technical) => "Technical Skills",
        (Language::En, SkillCategory::Soft) => "Soft Skills",
        (Language::En, SkillCategory::Language) => "Languages",
        (Language::Ar, SkillCategory::Technical) => "المهارات التقنية",
        (Language::Ar, SkillCategory::Soft) => "المهارات الشخصية",
        (Language::Ar, SkillCategory::Language) => "اللغات",
    }
}

/// `"name (level)"` for every skill in `category`, joined by [`LIST_SEPARATOR`].
pub fn format_skills_by_category(
    skills: &[Skill],
    category: SkillCategory,
    language: Language,
) -> String {
    let rendered: Vec<String> = skills
        .iter()
        .filter(|skill| skill.category == category)
        .filter_map(|skill| {
            let name = sanitize_text(&skill.name);
            (!name.is_empty()).then(|| format!("{name} ({})", level_label(skill.level, language)))
        })
        .collect();
    format_list(&rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[test]
    fn test_sanitize_strips_markup_and_whitespace() {
        assert_eq!(
            sanitize_text("  <script>alert(1)</script>\n\t hello   world "),
            "scriptalert(1)/script hello world"
        );
        assert_eq!(sanitize_text("a<b>c"), "abc");
        assert_eq!(sanitize_text(""), "");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(512))]

        #[test]
        fn test_sanitize_is_idempotent_for_any_input(s in any::<String>()) {
            let once = sanitize_text(&s);
            prop_assert_eq!(sanitize_text(&once), once.clone());
            prop_assert!(!once.contains('<') && !once.contains('>'));
            let multi = sanitize_multiline(&s);
            prop_assert_eq!(sanitize_multiline(&multi), multi);
        }

        #[test]
        fn test_sanitize_is_idempotent_for_markup_like_input(s in "[ <>{}%\\t\\n\\u{a0}\\u{2003}a-z]{0,40}") {
            let once = sanitize_text(&s);
            prop_assert_eq!(sanitize_text(&once), once);
        }
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let samples = [
            "  plain  ",
            "<<>>",
            "{{ config }} {% for x in y %}",
            "line one\n\nline   two",
            "a > b < c",
            "\u{00a0}nbsp\u{2003}em",
        ];
        for s in samples {
            let once = sanitize_text(s);
            assert_eq!(sanitize_text(&once), once, "not idempotent for {s:?}");
            let multi = sanitize_multiline(s);
            assert_eq!(sanitize_multiline(&multi), multi);
        }
    }

    #[test]
    fn test_sanitize_multiline_keeps_lines() {
        assert_eq!(
            sanitize_multiline("Built <b>things</b>\n\n   Shipped  them  "),
            "Built bthings/b\nShipped them"
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello...");
        assert_eq!(truncate("مرحبا بالعالم", 5), "مرحبا...");
    }

    #[test]
    fn test_format_list_skips_blank_items() {
        assert_eq!(format_list(&["Rust", " ", "Go "]), "Rust • Go");
        assert_eq!(format_list::<&str>(&[]), "");
    }

    #[test]
    fn test_parse_loose_dates() {
        let jan = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert_eq!(parse_loose_date("2020-01"), Some(jan));
        assert_eq!(parse_loose_date("2020"), Some(jan));
        assert_eq!(parse_loose_date("01/2020"), Some(jan));
        assert_eq!(parse_loose_date("January 2020"), Some(jan));
        assert_eq!(parse_loose_date("Jan 2020"), Some(jan));
        assert_eq!(
            parse_loose_date("2020-01-15"),
            NaiveDate::from_ymd_opt(2020, 1, 15)
        );
        assert_eq!(
            parse_loose_date("2021-03-04T10:00:00Z"),
            NaiveDate::from_ymd_opt(2021, 3, 4)
        );
        assert_eq!(parse_loose_date("someday"), None);
    }

    #[test]
    fn test_format_date_localized() {
        assert_eq!(format_date("2020-03", Language::En), "March 2020");
        assert_eq!(format_date("2020-03", Language::Ar), "مارس ٢٠٢٠");
    }

    #[test]
    fn test_format_date_passes_through_garbage() {
        assert_eq!(format_date("sometime in spring", Language::En), "sometime in spring");
    }

    #[test]
    fn test_duration_examples() {
        let en = Language::En;
        assert_eq!(format_duration_until("2020-01", Some("2022-01"), today(), en), "2 years");
        assert_eq!(format_duration_until("2020-01", Some("2020-07"), today(), en), "6 months");
        assert_eq!(
            format_duration_until("2020-01", Some("2021-06"), today(), en),
            "1 year 5 months"
        );
        assert_eq!(format_duration_until("2020-01", Some("2020-02"), today(), en), "1 month");
    }

    #[test]
    fn test_duration_current_role_runs_until_today() {
        assert_eq!(
            format_duration_until("2023-06", None, today(), Language::En),
            "1 year"
        );
    }

    #[test]
    fn test_duration_arabic() {
        assert_eq!(
            format_duration_until("2020-01", Some("2022-01"), today(), Language::Ar),
            "سنتان"
        );
        assert_eq!(
            format_duration_until("2020-01", Some("2021-06"), today(), Language::Ar),
            "سنة و٥ أشهر"
        );
    }

    #[test]
    fn test_duration_degrades_on_bad_input() {
        assert_eq!(
            format_duration_until(" sometime ", Some("2020-01"), today(), Language::En),
            "sometime - 2020-01"
        );
        assert_eq!(format_duration_until("2020-01", Some("later"), today(), Language::En), "2020-01 - later");
        assert_eq!(format_duration_until("  ?? ", None, today(), Language::Ar), "??");
        assert_eq!(
            format_duration_until("2020-05", Some("2020-05"), today(), Language::En),
            "Less than a month"
        );
        // End before start clamps to zero instead of going negative.
        assert_eq!(
            format_duration_until("2022-01", Some("2020-01"), today(), Language::En),
            "Less than a month"
        );
    }

    #[test]
    fn test_skills_by_category() {
        let skills = vec![
            Skill {
                id: "1".into(),
                name: "Rust".into(),
                category: SkillCategory::Technical,
                level: SkillLevel::Expert,
            },
            Skill {
                id: "2".into(),
                name: "Mentoring".into(),
                category: SkillCategory::Soft,
                level: SkillLevel::Advanced,
            },
            Skill {
                id: "3".into(),
                name: "SQL".into(),
                category: SkillCategory::Technical,
                level: SkillLevel::Intermediate,
            },
        ];
        assert_eq!(
            format_skills_by_category(&skills, SkillCategory::Technical, Language::En),
            "Rust (Expert) • SQL (Intermediate)"
        );
        assert_eq!(
            format_skills_by_category(&skills, SkillCategory::Soft, Language::Ar),
            "Mentoring (متقدم)"
        );
        assert_eq!(
            format_skills_by_category(&skills, SkillCategory::Language, Language::En),
            ""
        );
    }
}
