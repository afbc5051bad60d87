//! Employer-name comparison and start-date parsing for employment validation.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

/// Corporate suffixes dropped before comparing employer names.
static CORPORATE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:inc|llc|ltd|corp|corporation|co|company|gmbh|plc|sa|ag|limited|incorporated)\b",
    )
    .expect("valid regex")
});

/// Lowercase, strip punctuation and corporate suffixes, collapse whitespace.
pub fn normalize_employer(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let stripped = CORPORATE_SUFFIX.replace_all(&lowered, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fuzzy employer-name matcher.
#[derive(Debug, Clone, Copy)]
pub struct EmployerMatcher {
    /// Minimum normalized-Levenshtein similarity in [0, 1].
    pub threshold: f64,
}

impl EmployerMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Similarity of two employer names after normalization.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let (a, b) = (normalize_employer(a), normalize_employer(b));
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        strsim::normalized_levenshtein(&a, &b)
    }

    pub fn matches(&self, a: &str, b: &str) -> bool {
        self.similarity(a, b) >= self.threshold
    }
}

/// Parse a provider start date. Accepts `YYYY-MM-DD`, `YYYY-MM`, `YYYY`,
/// `Mon YYYY` and `Month YYYY`. Partial dates resolve to the first day.
pub fn parse_start_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
        return Some(d);
    }
    if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse().ok().and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1));
    }
    ["%d %b %Y", "%d %B %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&format!("01 {s}"), fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_suffixes_and_punctuation() {
        assert_eq!(normalize_employer("ACME, Inc."), "acme");
        assert_eq!(normalize_employer("Globex  Corporation"), "globex");
        assert_eq!(normalize_employer("Müller GmbH & Co. KG"), "müller kg");
        assert_eq!(normalize_employer("Initech"), "initech");
    }

    #[test]
    fn suffix_inside_word_is_kept() {
        // "co" must not be stripped from "costco".
        assert_eq!(normalize_employer("Costco Wholesale"), "costco wholesale");
    }

    #[test]
    fn fuzzy_threshold() {
        let m = EmployerMatcher::new(0.8);
        assert!(m.matches("Acme Inc", "ACME, Inc."));
        assert!(m.matches("Acme Robotics", "Acme Robotic"));
        assert!(!m.matches("Acme", "Globex"));
        assert!(!m.matches("", "Acme"));
    }

    #[test]
    fn start_date_formats() {
        let ymd = |y, m, d| NaiveDate::from_ymd_opt(y, m, d);
        assert_eq!(parse_start_date("2021-03-15"), ymd(2021, 3, 15));
        assert_eq!(parse_start_date("2021-03"), ymd(2021, 3, 1));
        assert_eq!(parse_start_date("2021"), ymd(2021, 1, 1));
        assert_eq!(parse_start_date("Mar 2021"), ymd(2021, 3, 1));
        assert_eq!(parse_start_date("January 2019"), ymd(2019, 1, 1));
        assert_eq!(parse_start_date("sometime"), None);
        assert_eq!(parse_start_date(""), None);
    }
}
