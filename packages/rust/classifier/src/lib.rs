//! Buyer-group role classification.
//!
//! Maps a job title (plus optional department) to a purchasing-committee role,
//! influence level, decision power and engagement priority.
//! Classification priority (first match wins):
//!   1. Chief executive, president/owner, operational C-level
//!   2. Vice president, director / head of
//!   3. CTO, delivery leads, managers with a technical keyword
//!   4. Senior / specialist / expert / architect / consultant
//!   5. Fallback role (stakeholder by default)
//!
//! The keyword table is configuration ([`ClassifierConfig`]); this crate only
//! compiles and evaluates it.

use buyergroup_shared::{
    BuyerGroupError, BuyerGroupRole, Classification, ClassifierConfig, ClassifierRule,
    EngagementPriority, InfluenceLevel, Result,
};
use regex::Regex;

/// One rule compiled to word-boundary regexes.
#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    role: BuyerGroupRole,
    decision_power: u8,
    keywords: Regex,
    requires: Option<Regex>,
    exclude: Option<Regex>,
}

impl CompiledRule {
    fn compile(rule: &ClassifierRule) -> Result<Self> {
        if rule.name.trim().is_empty() {
            return Err(BuyerGroupError::config("classifier rule without a name"));
        }
        if rule.decision_power > 100 {
            return Err(BuyerGroupError::config(format!(
                "classifier rule {:?}: decision_power {} exceeds 100",
                rule.name, rule.decision_power
            )));
        }
        let keywords = word_pattern(&rule.name, "keywords", &rule.keywords)?.ok_or_else(|| {
            BuyerGroupError::config(format!("classifier rule {:?} has no keywords", rule.name))
        })?;
        Ok(Self {
            name: rule.name.clone(),
            role: rule.role,
            decision_power: rule.decision_power,
            keywords,
            requires: word_pattern(&rule.name, "requires", &rule.requires)?,
            exclude: word_pattern(&rule.name, "exclude", &rule.exclude)?,
        })
    }

    fn matches(&self, title: &str, context: &str) -> bool {
        self.keywords.is_match(title)
            && self.requires.as_ref().is_none_or(|r| r.is_match(context))
            && !self.exclude.as_ref().is_some_and(|r| r.is_match(title))
    }
}

/// Case-insensitive alternation of `words`, each bounded by `\b`.
/// `Ok(None)` when the list is empty.
fn word_pattern(rule: &str, field: &str, words: &[String]) -> Result<Option<Regex>> {
    let alternatives: Vec<String> = words
        .iter()
        .map(|w| w.trim())
        .filter(|w| !w.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
    Regex::new(&pattern).map(Some).map_err(|e| {
        BuyerGroupError::config(format!("classifier rule {rule:?}: bad {field} pattern: {e}"))
    })
}

/// Engagement priority for a (role, influence) pair.
pub fn engagement_priority(role: BuyerGroupRole, influence: InfluenceLevel) -> EngagementPriority {
    use BuyerGroupRole::*;
    use InfluenceLevel::*;
    match (role, influence) {
        (DecisionMaker, High) => EngagementPriority::Critical,
        (DecisionMaker, _) | (Champion, High) => EngagementPriority::High,
        (Champion, _) | (Influencer, High) | (Influencer, Medium) => EngagementPriority::Medium,
        (Stakeholder, High) => EngagementPriority::Medium,
        (Influencer, Low) | (Stakeholder, _) => EngagementPriority::Low,
    }
}

/// Ordered, compiled rule table. Cheap to share; `classify` is pure.
#[derive(Debug, Clone)]
pub struct RoleClassifier {
    rules: Vec<CompiledRule>,
    default_role: BuyerGroupRole,
    default_decision_power: u8,
}

impl RoleClassifier {
    /// Compile the configured table. Invalid rules are configuration errors.
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        if config.default_decision_power > 100 {
            return Err(BuyerGroupError::config(
                "classifier default_decision_power exceeds 100",
            ));
        }
        let rules = config
            .rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(rules = rules.len(), "classifier rules compiled");
        Ok(Self {
            rules,
            default_role: config.default_role,
            default_decision_power: config.default_decision_power,
        })
    }

    /// Classify a title. `department` only feeds `requires` groups.
    pub fn classify(&self, title: &str, department: Option<&str>) -> Classification {
        let title = title.trim();
        let context = match department {
            Some(d) if !d.trim().is_empty() => format!("{title} {}", d.trim()),
            _ => title.to_string(),
        };

        let (role, decision_power, matched_rule) = self
            .rules
            .iter()
            .find(|r| r.matches(title, &context))
            .map(|r| (r.role, r.decision_power, Some(r.name.clone())))
            .unwrap_or((self.default_role, self.default_decision_power, None));

        let influence_level = role.influence_level();
        Classification {
            role,
            influence_level,
            decision_power,
            engagement_priority: engagement_priority(role, influence_level),
            matched_rule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RoleClassifier {
        RoleClassifier::new(&ClassifierConfig::default()).expect("default rules compile")
    }

    fn role_of(title: &str) -> BuyerGroupRole {
        classifier().classify(title, None).role
    }

    #[test]
    fn chief_executive_is_decision_maker() {
        let c = classifier().classify("Chief Executive Officer", None);
        assert_eq!(c.role, BuyerGroupRole::DecisionMaker);
        assert!(c.decision_power >= 85);
        assert_eq!(c.influence_level, InfluenceLevel::High);
        assert_eq!(c.engagement_priority, EngagementPriority::Critical);
        assert_eq!(c.matched_rule.as_deref(), Some("chief-executive"));
    }

    #[test]
    fn senior_engineer_is_influencer() {
        let c = classifier().classify("Senior Software Engineer", None);
        assert_eq!(c.role, BuyerGroupRole::Influencer);
        assert!((50..=60).contains(&c.decision_power));
        assert_eq!(c.influence_level, InfluenceLevel::Medium);
    }

    #[test]
    fn administrative_assistant_is_stakeholder() {
        let c = classifier().classify("Administrative Assistant", None);
        assert_eq!(c.role, BuyerGroupRole::Stakeholder);
        assert_eq!(c.decision_power, 40);
        assert!(c.matched_rule.is_none());
        assert_eq!(c.engagement_priority, EngagementPriority::Low);
    }

    #[test]
    fn vice_president_is_not_president_rule() {
        let c = classifier().classify("Vice President of Sales", None);
        assert_eq!(c.role, BuyerGroupRole::DecisionMaker);
        assert_eq!(c.matched_rule.as_deref(), Some("vice-president"));
        assert_eq!(classifier().classify("VP Marketing", None).decision_power, 90);
    }

    #[test]
    fn directors_and_heads() {
        let c = classifier().classify("Director of Procurement", None);
        assert_eq!(c.role, BuyerGroupRole::DecisionMaker);
        assert_eq!(c.decision_power, 85);
        assert_eq!(role_of("Head of Operations"), BuyerGroupRole::DecisionMaker);
        assert_eq!(role_of("Senior Director, Finance"), BuyerGroupRole::DecisionMaker);
    }

    #[test]
    fn operational_c_level_needs_keyword() {
        assert_eq!(role_of("Chief Procurement Officer"), BuyerGroupRole::DecisionMaker);
        assert_eq!(role_of("Chief Operations Officer"), BuyerGroupRole::DecisionMaker);
        assert_eq!(role_of("CFO"), BuyerGroupRole::DecisionMaker);
        // A chief without an operational keyword falls through to later rules.
        assert_eq!(role_of("Chief Technology Officer"), BuyerGroupRole::Champion);
        assert_eq!(role_of("Chief of Staff"), BuyerGroupRole::Stakeholder);
    }

    #[test]
    fn champions() {
        assert_eq!(role_of("CTO"), BuyerGroupRole::Champion);
        assert_eq!(role_of("Engineering Manager"), BuyerGroupRole::Champion);
        assert_eq!(role_of("Project Manager"), BuyerGroupRole::Champion);
        assert_eq!(role_of("Team Lead, Platform"), BuyerGroupRole::Champion);
        let c = classifier().classify("Manager", Some("Information Technology"));
        assert_eq!(c.role, BuyerGroupRole::Champion);
        assert!((65..=75).contains(&c.decision_power));
        assert_eq!(c.engagement_priority, EngagementPriority::High);
    }

    #[test]
    fn manager_without_technical_context_is_stakeholder() {
        assert_eq!(role_of("Office Manager"), BuyerGroupRole::Stakeholder);
        assert_eq!(role_of("Sales Manager"), BuyerGroupRole::Stakeholder);
    }

    #[test]
    fn keywords_match_on_word_boundaries() {
        // "vp" inside a word, "sr" inside "srinivasan" and "cto" inside "director" never fire.
        assert_eq!(role_of("MVP Program Coordinator"), BuyerGroupRole::Stakeholder);
        assert_eq!(role_of("Lab Technician"), BuyerGroupRole::Stakeholder);
        assert_eq!(role_of("Sr. Analyst"), BuyerGroupRole::Influencer);
        assert_eq!(role_of("Product Owner"), BuyerGroupRole::Stakeholder);
    }

    #[test]
    fn owner_exclusion_is_configurable() {
        let mut config = ClassifierConfig::default();
        for rule in &mut config.rules {
            if rule.name == "president-owner" {
                rule.exclude.retain(|e| e != "product owner");
            }
        }
        let classifier = RoleClassifier::new(&config).expect("rules compile");
        assert_eq!(
            classifier.classify("Product Owner", None).role,
            BuyerGroupRole::DecisionMaker
        );
        assert_eq!(classifier.classify("Business Owner", None).role, BuyerGroupRole::DecisionMaker);
        assert_eq!(role_of("Business Owner"), BuyerGroupRole::DecisionMaker);
    }

    #[test]
    fn classification_is_deterministic() {
        let a = classifier();
        let b = classifier();
        for title in [
            "Chief Executive Officer",
            "Senior Software Engineer",
            "IT Manager",
            "Solutions Architect",
            "",
        ] {
            let first = a.classify(title, Some("Engineering"));
            assert_eq!(first, a.classify(title, Some("Engineering")));
            assert_eq!(first, b.classify(title, Some("Engineering")));
        }
    }

    #[test]
    fn rule_table_is_configuration() {
        let config: ClassifierConfig = toml::from_str(
            r#"
default_decision_power = 30

[[rules]]
name = "buyer"
role = "decision_maker"
decision_power = 80
keywords = ["buyer", "purchasing agent"]
"#,
        )
        .expect("parse classifier config");
        let classifier = RoleClassifier::new(&config).expect("compile");
        assert_eq!(
            classifier.classify("Senior Buyer", None).role,
            BuyerGroupRole::DecisionMaker
        );
        // Defaults are replaced, not merged.
        let c = classifier.classify("Chief Executive Officer", None);
        assert_eq!(c.role, BuyerGroupRole::Stakeholder);
        assert_eq!(c.decision_power, 30);
    }

    #[test]
    fn invalid_rules_are_config_errors() {
        let mut config = ClassifierConfig::default();
        config.rules[0].keywords.clear();
        assert!(matches!(
            RoleClassifier::new(&config),
            Err(BuyerGroupError::Config { .. })
        ));

        let mut config = ClassifierConfig::default();
        config.rules[0].decision_power = 101;
        assert!(RoleClassifier::new(&config).is_err());
    }

    #[test]
    fn priority_matrix() {
        use BuyerGroupRole::*;
        assert_eq!(engagement_priority(DecisionMaker, InfluenceLevel::High), EngagementPriority::Critical);
        assert_eq!(engagement_priority(Champion, InfluenceLevel::High), EngagementPriority::High);
        assert_eq!(engagement_priority(Influencer, InfluenceLevel::Medium), EngagementPriority::Medium);
        assert_eq!(engagement_priority(Stakeholder, InfluenceLevel::Low), EngagementPriority::Low);
    }
}
