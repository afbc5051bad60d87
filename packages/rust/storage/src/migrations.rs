//! SQL migration definitions for the buyer-group database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: companies, people, buyer groups, checkpoints, run reports",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Canonical companies, keyed by the provider's id
CREATE TABLE IF NOT EXISTS companies (
    workspace_id TEXT NOT NULL,
    id           TEXT NOT NULL,
    name         TEXT NOT NULL,
    domain       TEXT,
    industry     TEXT,
    size         TEXT,
    location     TEXT,
    resolved_at  TEXT NOT NULL,
    PRIMARY KEY (workspace_id, id)
);

-- Contacts; one row per (workspace, company, identity-match key)
CREATE TABLE IF NOT EXISTS people (
    id                  TEXT PRIMARY KEY,
    workspace_id        TEXT NOT NULL,
    company_id          TEXT NOT NULL,
    match_key           TEXT NOT NULL,
    full_name           TEXT NOT NULL,
    first_name          TEXT,
    last_name           TEXT,
    professional_email  TEXT,
    personal_email      TEXT,
    title               TEXT,
    department          TEXT,
    provider_id         TEXT,
    role                TEXT NOT NULL,
    influence_level     TEXT NOT NULL,
    decision_power      INTEGER NOT NULL,
    engagement_priority TEXT NOT NULL,
    employment_active   INTEGER NOT NULL DEFAULT 1,
    sources_json        TEXT NOT NULL DEFAULT '[]',
    last_enriched_at    TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    UNIQUE (workspace_id, company_id, match_key)
);

CREATE INDEX IF NOT EXISTS idx_people_company ON people(workspace_id, company_id);
CREATE INDEX IF NOT EXISTS idx_people_provider ON people(workspace_id, provider_id);

-- Buyer group summary, recomputed per discovery run
CREATE TABLE IF NOT EXISTS buyer_groups (
    workspace_id      TEXT NOT NULL,
    company_id        TEXT NOT NULL,
    total_members     INTEGER NOT NULL,
    distribution_json TEXT NOT NULL,
    computed_at       TEXT NOT NULL,
    PRIMARY KEY (workspace_id, company_id)
);

CREATE TABLE IF NOT EXISTS buyer_group_members (
    workspace_id        TEXT NOT NULL,
    company_id          TEXT NOT NULL,
    person_id           TEXT NOT NULL REFERENCES people(id) ON DELETE CASCADE,
    position            INTEGER NOT NULL,
    role                TEXT NOT NULL,
    decision_power      INTEGER NOT NULL,
    engagement_priority TEXT NOT NULL,
    PRIMARY KEY (workspace_id, company_id, person_id)
);

CREATE INDEX IF NOT EXISTS idx_members_person ON buyer_group_members(person_id);

-- Per-run, per-company processing state
CREATE TABLE IF NOT EXISTS checkpoints (
    run_id      TEXT NOT NULL,
    unit_key    TEXT NOT NULL,
    state       TEXT NOT NULL,
    reason      TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (run_id, unit_key)
);

-- Machine-readable run reports
CREATE TABLE IF NOT EXISTS run_reports (
    run_id       TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    finished_at  TEXT NOT NULL,
    report_json  TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
