//! Entity reconciliation: match discovered employees against the company's
//! stored people, then plan creates, updates, deactivations and the new
//! buyer group.
//!
//! Matching priority (first hit wins, scoped to one workspace and company):
//!   1. Exact professional email
//!   2. Exact normalized full name
//!   3. First name + last name
//!
//! Planning is pure. The plan is committed by the result store in a single
//! transaction.

use std::collections::HashSet;

use buyergroup_discovery::DiscoveredEmployee;
use buyergroup_shared::{
    BuyerGroup, BuyerGroupError, BuyerGroupMember, Classification, Company, Person,
    name_match_key, split_full_name,
};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// A validated employee together with its classification.
#[derive(Debug, Clone)]
pub struct ClassifiedEmployee {
    pub employee: DiscoveredEmployee,
    pub classification: Classification,
}

// ---------------------------------------------------------------------------
// Identity and strategies
// ---------------------------------------------------------------------------

/// Normalized identity signals shared by profiles and stored people.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: Option<String>,
    pub match_key: String,
    pub first_last: Option<(String, String)>,
}

impl Identity {
    pub fn of_employee(e: &DiscoveredEmployee) -> Self {
        let p = &e.profile;
        Self::build(
            p.emails.professional.as_deref(),
            &profile_match_key(e),
            p.first_name.as_deref(),
            p.last_name.as_deref(),
            &p.full_name,
        )
    }

    pub fn of_person(p: &Person) -> Self {
        Self::build(
            p.professional_email.as_deref(),
            &p.match_key,
            p.first_name.as_deref(),
            p.last_name.as_deref(),
            &p.full_name,
        )
    }

    fn build(
        email: Option<&str>,
        match_key: &str,
        first: Option<&str>,
        last: Option<&str>,
        full_name: &str,
    ) -> Self {
        let (split_first, split_last) = split_full_name(full_name);
        let first = first.map(name_match_key).or(split_first.map(|f| name_match_key(&f)));
        let last = last.map(name_match_key).or(split_last.map(|l| name_match_key(&l)));
        let first_last = match (first, last) {
            (Some(f), Some(l)) if !f.is_empty() && !l.is_empty() => Some((f, l)),
            _ => None,
        };
        Self {
            email: normalize_email(email),
            match_key: match_key.to_string(),
            first_last,
        }
    }
}

fn normalize_email(email: Option<&str>) -> Option<String> {
    email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
}

/// Identity-match key of a profile. Names without letters or digits fall back
/// to the provider id so they never collide with each other.
fn profile_match_key(e: &DiscoveredEmployee) -> String {
    let key = name_match_key(&e.profile.full_name);
    if key.is_empty() {
        format!("provider:{}", e.profile.id)
    } else {
        key
    }
}

/// One way of deciding that a discovered profile is an already-stored person.
pub trait MatchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn matches(&self, incoming: &Identity, stored: &Identity) -> bool;
}

pub struct ExactEmail;

impl MatchStrategy for ExactEmail {
    fn name(&self) -> &'static str {
        "exact-email"
    }

    fn matches(&self, incoming: &Identity, stored: &Identity) -> bool {
        matches!((&incoming.email, &stored.email), (Some(a), Some(b)) if a == b)
    }
}

pub struct ExactName;

impl MatchStrategy for ExactName {
    fn name(&self) -> &'static str {
        "exact-name"
    }

    fn matches(&self, incoming: &Identity, stored: &Identity) -> bool {
        !incoming.match_key.is_empty() && incoming.match_key == stored.match_key
    }
}

pub struct CompositeName;

impl MatchStrategy for CompositeName {
    fn name(&self) -> &'static str {
        "composite-name"
    }

    fn matches(&self, incoming: &Identity, stored: &Identity) -> bool {
        matches!((&incoming.first_last, &stored.first_last), (Some(a), Some(b)) if a == b)
    }
}

/// A hit from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchHit {
    /// Index into the stored identities.
    pub index: usize,
    pub strategy: &'static str,
    /// A lower-priority strategy pointed at a different person.
    pub conflicted: bool,
}

/// Ordered list of strategies.
pub struct MatcherRegistry {
    strategies: Vec<Box<dyn MatchStrategy>>,
}

impl Default for MatcherRegistry {
    fn default() -> Self {
        Self::new(vec![
            Box::new(ExactEmail),
            Box::new(ExactName),
            Box::new(CompositeName),
        ])
    }
}

impl MatcherRegistry {
    pub fn new(strategies: Vec<Box<dyn MatchStrategy>>) -> Self {
        Self { strategies }
    }

    /// First strategy with a hit wins. Within a strategy the earliest stored
    /// identity wins.
    pub fn find(&self, incoming: &Identity, stored: &[Identity]) -> Option<MatchHit> {
        let mut winner: Option<MatchHit> = None;
        for strategy in &self.strategies {
            let Some(index) = stored.iter().position(|s| strategy.matches(incoming, s)) else {
                continue;
            };
            match winner.as_mut() {
                None => {
                    winner = Some(MatchHit {
                        index,
                        strategy: strategy.name(),
                        conflicted: false,
                    })
                }
                Some(w) if w.index != index => {
                    let conflict = BuyerGroupError::ReconciliationConflict {
                        message: format!(
                            "{} matched stored #{}, {} matched stored #{}",
                            w.strategy,
                            w.index,
                            strategy.name(),
                            index
                        ),
                    };
                    warn!(error = %conflict, "strategies disagree, keeping higher priority");
                    w.conflicted = true;
                }
                Some(_) => {}
            }
        }
        winner
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Everything a unit writes for its company.
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    /// New and updated people, creates first.
    pub people: Vec<Person>,
    pub created: usize,
    pub updated: usize,
    /// Previously active people not seen in this run.
    pub deactivate: Vec<String>,
    pub group: BuyerGroup,
    /// Profiles whose match was disputed or already claimed.
    pub conflicts: usize,
}

/// Plans person writes and the rebuilt buyer group for one company.
pub struct Reconciler {
    registry: MatcherRegistry,
    source: String,
}

impl Reconciler {
    pub fn new(registry: MatcherRegistry, source: impl Into<String>) -> Self {
        Self {
            registry,
            source: source.into(),
        }
    }

    /// Reconcile `employees` against `existing` (all stored people of
    /// `company`, active or not).
    pub fn plan(
        &self,
        company: &Company,
        existing: &[Person],
        mut employees: Vec<ClassifiedEmployee>,
        now: DateTime<Utc>,
    ) -> ReconcilePlan {
        employees.sort_by(|a, b| a.employee.profile.id.cmp(&b.employee.profile.id));

        // Oldest records first so ties resolve to the earliest row.
        let mut pool: Vec<Person> = existing.to_vec();
        pool.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let existing_count = pool.len();
        let mut identities: Vec<Identity> = pool.iter().map(Identity::of_person).collect();
        let mut claimed: HashSet<usize> = HashSet::new();
        let mut conflicts = 0;

        for ce in &employees {
            let incoming = Identity::of_employee(&ce.employee);
            let profile_id = ce.employee.profile.id.as_str();

            match self.registry.find(&incoming, &identities) {
                Some(hit) if claimed.contains(&hit.index) => {
                    let conflict = BuyerGroupError::ReconciliationConflict {
                        message: format!(
                            "profile {profile_id} resolves to person {} already matched in this run",
                            pool[hit.index].id
                        ),
                    };
                    warn!(error = %conflict, "profile not applied");
                    conflicts += 1;
                }
                Some(hit) => {
                    if hit.conflicted {
                        conflicts += 1;
                    }
                    debug!(profile_id, person_id = %pool[hit.index].id, strategy = hit.strategy, "matched");
                    merge_into(&mut pool[hit.index], ce, &self.source, now);
                    claimed.insert(hit.index);
                }
                None => {
                    let person = new_person(company, ce, &incoming, &self.source, now);
                    debug!(profile_id, person_id = %person.id, "new person");
                    identities.push(Identity::of_person(&person));
                    pool.push(person);
                    claimed.insert(pool.len() - 1);
                }
            }
        }

        let deactivate: Vec<String> = pool[..existing_count]
            .iter()
            .enumerate()
            .filter(|(i, p)| p.employment_active && !claimed.contains(i))
            .map(|(_, p)| p.id.clone())
            .collect();

        let mut indices: Vec<usize> = claimed.into_iter().collect();
        indices.sort_unstable();
        let created = indices.iter().filter(|&&i| i >= existing_count).count();
        let updated = indices.len() - created;

        // Creates first, then updates, each in pool order.
        let (mut creates, updates): (Vec<usize>, Vec<usize>) =
            indices.into_iter().partition(|&i| i >= existing_count);
        creates.extend(updates);
        let people: Vec<Person> = creates.into_iter().map(|i| pool[i].clone()).collect();

        let group = BuyerGroup::from_members(
            &company.workspace_id,
            &company.id,
            people.iter().map(BuyerGroupMember::from).collect(),
            now,
        );

        ReconcilePlan {
            people,
            created,
            updated,
            deactivate,
            group,
            conflicts,
        }
    }
}

/// Overwrite mutable fields with the latest discovery. Identity, creation time
/// and stored emails the profile lacks are kept.
fn merge_into(person: &mut Person, ce: &ClassifiedEmployee, source: &str, now: DateTime<Utc>) {
    let e = &ce.employee;
    let p = &e.profile;

    person.full_name = p.full_name.trim().to_string();
    if let Some(first) = non_empty(p.first_name.as_deref()) {
        person.first_name = Some(first);
    }
    if let Some(last) = non_empty(p.last_name.as_deref()) {
        person.last_name = Some(last);
    }
    if let Some(email) = normalize_email(p.emails.professional.as_deref()) {
        person.professional_email = Some(email);
    }
    if let Some(email) = normalize_email(p.emails.personal.as_deref()) {
        person.personal_email = Some(email);
    }
    if let Some(title) = non_empty(e.title()) {
        person.title = Some(title);
    }
    if let Some(department) = non_empty(e.department()) {
        person.department = Some(department);
    }
    person.provider_id = Some(p.id.clone());
    person.employment_active = true;
    person.apply_classification(&ce.classification);
    person.record_source(source, now);
    person.updated_at = now;
}

fn new_person(
    company: &Company,
    ce: &ClassifiedEmployee,
    identity: &Identity,
    source: &str,
    now: DateTime<Utc>,
) -> Person {
    let e = &ce.employee;
    let p = &e.profile;
    let full_name = p.full_name.trim().to_string();
    let (split_first, split_last) = split_full_name(&full_name);
    let c = &ce.classification;

    let mut person = Person {
        id: Person::new_id(),
        workspace_id: company.workspace_id.clone(),
        company_id: company.id.clone(),
        match_key: identity.match_key.clone(),
        first_name: non_empty(p.first_name.as_deref()).or(split_first),
        last_name: non_empty(p.last_name.as_deref()).or(split_last),
        full_name,
        professional_email: identity.email.clone(),
        personal_email: normalize_email(p.emails.personal.as_deref()),
        title: non_empty(e.title()),
        department: non_empty(e.department()),
        provider_id: Some(p.id.clone()),
        role: c.role,
        influence_level: c.influence_level,
        decision_power: c.decision_power,
        engagement_priority: c.engagement_priority,
        employment_active: true,
        sources: Vec::new(),
        last_enriched_at: now,
        created_at: now,
        updated_at: now,
    };
    person.record_source(source, now);
    person
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}
