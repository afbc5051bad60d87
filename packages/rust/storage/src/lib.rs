//! Turso Embedded / libSQL result store.
//!
//! The [`Storage`] struct wraps a libSQL database holding companies, people,
//! buyer groups, processing checkpoints and run reports.
//!
//! **Access rules:**
//! - `run`: read-write via [`Storage::open`]; one unit of work is committed
//!   per transaction with [`Storage::commit_unit`]
//! - inspection commands: read-only via [`Storage::open_readonly`]
//!
//! The connection sits behind an async mutex so a transaction never
//! interleaves with statements from another task.

mod checkpoint;
mod migrations;

use std::path::Path;

use buyergroup_shared::{
    BuyerGroup, BuyerGroupError, BuyerGroupMember, Company, Person, Result, RoleDistribution,
    SourceStamp,
};
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Mutex<Connection>,
    readonly: bool,
}

/// Everything one company's unit of work writes, committed atomically.
#[derive(Debug, Clone, Copy)]
pub struct UnitWrite<'a> {
    pub company: &'a Company,
    /// Created or updated people; all belong to `company`.
    pub people: &'a [Person],
    /// Ids of people of `company` to flag inactive.
    pub deactivate: &'a [String],
    /// Replacement buyer group for `company`.
    pub group: &'a BuyerGroup,
}

/// Row counts affected by [`Storage::commit_unit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub people_written: usize,
    pub deactivated: usize,
    /// Rows at other companies flagged inactive because the same provider
    /// profile is now employed here.
    pub displaced: usize,
}

fn db_err(e: libsql::Error) -> BuyerGroupError {
    BuyerGroupError::Persistence(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuyerGroupError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn: Mutex::new(conn),
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BuyerGroupError::not_found(format!(
                "database {}",
                path.display()
            )));
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn: Mutex::new(conn),
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;
        let conn = self.conn.lock().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    BuyerGroupError::Persistence(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let conn = self.conn.lock().await;
        let result = conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(BuyerGroupError::Persistence(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Unit commit
    // -----------------------------------------------------------------------

    /// Persist one company's results all-or-nothing.
    pub async fn commit_unit(&self, unit: &UnitWrite<'_>) -> Result<CommitSummary> {
        self.check_writable()?;
        validate_unit(unit)?;

        let conn = self.conn.lock().await;
        let tx = conn.transaction().await.map_err(db_err)?;
        match write_unit(&tx, unit).await {
            Ok(summary) => {
                tx.commit().await.map_err(db_err)?;
                debug!(
                    company_id = %unit.company.id,
                    people = summary.people_written,
                    deactivated = summary.deactivated,
                    displaced = summary.displaced,
                    members = unit.group.total_members,
                    "unit committed"
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Company reads
    // -----------------------------------------------------------------------

    pub async fn get_company(&self, workspace_id: &str, id: &str) -> Result<Option<Company>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT workspace_id, id, name, domain, industry, size, location, resolved_at
                 FROM companies WHERE workspace_id = ?1 AND id = ?2",
                params![workspace_id, id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_company(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_companies(&self, workspace_id: &str) -> Result<Vec<Company>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT workspace_id, id, name, domain, industry, size, location, resolved_at
                 FROM companies WHERE workspace_id = ?1 ORDER BY name, id",
                params![workspace_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_company(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // People reads
    // -----------------------------------------------------------------------

    /// All people of a company, active or not, ordered by name.
    pub async fn list_people(&self, workspace_id: &str, company_id: &str) -> Result<Vec<Person>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {PERSON_COLUMNS} FROM people
             WHERE workspace_id = ?1 AND company_id = ?2
             ORDER BY full_name, id"
        );
        let mut rows = conn
            .query(&sql, params![workspace_id, company_id])
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_person(&row)?);
        }
        Ok(results)
    }

    pub async fn get_person(&self, id: &str) -> Result<Option<Person>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {PERSON_COLUMNS} FROM people WHERE id = ?1");
        let mut rows = conn.query(&sql, params![id]).await.map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_person(&row)?)),
            None => Ok(None),
        }
    }

    /// Number of person rows in a workspace.
    pub async fn count_people(&self, workspace_id: &str) -> Result<u64> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM people WHERE workspace_id = ?1",
                params![workspace_id],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(db_err)?.max(0) as u64),
            None => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Buyer group reads
    // -----------------------------------------------------------------------

    pub async fn get_buyer_group(
        &self,
        workspace_id: &str,
        company_id: &str,
    ) -> Result<Option<BuyerGroup>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT total_members, distribution_json, computed_at FROM buyer_groups
                 WHERE workspace_id = ?1 AND company_id = ?2",
                params![workspace_id, company_id],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };
        let total_members = row.get::<i64>(0).map_err(db_err)?.max(0) as usize;
        let distribution: RoleDistribution =
            serde_json::from_str(&row.get::<String>(1).map_err(db_err)?)
                .map_err(|e| BuyerGroupError::Persistence(format!("bad distribution: {e}")))?;
        let computed_at = parse_ts(&row.get::<String>(2).map_err(db_err)?)?;

        let mut rows = conn
            .query(
                "SELECT m.person_id, p.full_name, p.title, m.role, m.decision_power,
                        m.engagement_priority
                 FROM buyer_group_members m JOIN people p ON p.id = m.person_id
                 WHERE m.workspace_id = ?1 AND m.company_id = ?2
                 ORDER BY m.position",
                params![workspace_id, company_id],
            )
            .await
            .map_err(db_err)?;

        let mut members = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            members.push(BuyerGroupMember {
                person_id: row.get::<String>(0).map_err(db_err)?,
                full_name: row.get::<String>(1).map_err(db_err)?,
                title: row.get::<String>(2).ok(),
                role: row.get::<String>(3).map_err(db_err)?.parse()?,
                decision_power: row.get::<i64>(4).map_err(db_err)?.clamp(0, 100) as u8,
                engagement_priority: row.get::<String>(5).map_err(db_err)?.parse()?,
            });
        }

        Ok(Some(BuyerGroup {
            workspace_id: workspace_id.to_string(),
            company_id: company_id.to_string(),
            members,
            distribution,
            total_members,
            computed_at,
        }))
    }

    // -----------------------------------------------------------------------
    // Run reports
    // -----------------------------------------------------------------------

    /// Store (or replace) the JSON report of a run.
    pub async fn save_run_report(
        &self,
        run_id: &str,
        workspace_id: &str,
        report_json: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO run_reports (run_id, workspace_id, finished_at, report_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(run_id) DO UPDATE SET
               finished_at = excluded.finished_at,
               report_json = excluded.report_json",
            params![run_id, workspace_id, Utc::now().to_rfc3339(), report_json],
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_run_report(&self, run_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT report_json FROM run_reports WHERE run_id = ?1",
                params![run_id],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit write helpers
// ---------------------------------------------------------------------------

fn validate_unit(unit: &UnitWrite<'_>) -> Result<()> {
    let company = unit.company;
    if let Some(p) = unit.people.iter().find(|p| p.company_id != company.id) {
        return Err(BuyerGroupError::validation(format!(
            "person {} belongs to {}, not {}",
            p.id, p.company_id, company.id
        )));
    }
    if unit.group.company_id != company.id || !unit.group.is_consistent() {
        return Err(BuyerGroupError::validation(format!(
            "inconsistent buyer group for {}",
            company.id
        )));
    }
    Ok(())
}

async fn write_unit(conn: &Connection, unit: &UnitWrite<'_>) -> Result<CommitSummary> {
    let company = unit.company;
    let ws = company.workspace_id.as_str();
    let mut summary = CommitSummary::default();

    conn.execute(
        "INSERT INTO companies (workspace_id, id, name, domain, industry, size, location, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(workspace_id, id) DO UPDATE SET
           name = excluded.name,
           domain = excluded.domain,
           industry = excluded.industry,
           size = excluded.size,
           location = excluded.location,
           resolved_at = excluded.resolved_at",
        params![
            ws,
            company.id.as_str(),
            company.name.as_str(),
            company.domain.as_deref(),
            company.industry.as_deref(),
            company.size.as_deref(),
            company.location.as_deref(),
            company.resolved_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(db_err)?;

    for person in unit.people {
        upsert_person(conn, person).await?;
        summary.people_written += 1;
    }

    let now = Utc::now().to_rfc3339();
    for id in unit.deactivate {
        summary.deactivated += conn
            .execute(
                "UPDATE people SET employment_active = 0, updated_at = ?1
                 WHERE id = ?2 AND workspace_id = ?3 AND company_id = ?4",
                params![now.as_str(), id.as_str(), ws, company.id.as_str()],
            )
            .await
            .map_err(db_err)? as usize;
    }

    // A provider profile has one current employer per workspace.
    let mut touched_groups = Vec::new();
    for person in unit.people.iter().filter(|p| p.employment_active) {
        let Some(provider_id) = person.provider_id.as_deref() else {
            continue;
        };
        let mut rows = conn
            .query(
                "SELECT id, company_id FROM people
                 WHERE workspace_id = ?1 AND provider_id = ?2 AND company_id != ?3
                   AND employment_active = 1",
                params![ws, provider_id, company.id.as_str()],
            )
            .await
            .map_err(db_err)?;
        let mut stale = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            stale.push((
                row.get::<String>(0).map_err(db_err)?,
                row.get::<String>(1).map_err(db_err)?,
            ));
        }
        for (stale_id, other_company) in stale {
            conn.execute(
                "UPDATE people SET employment_active = 0, updated_at = ?1 WHERE id = ?2",
                params![now.as_str(), stale_id.as_str()],
            )
            .await
            .map_err(db_err)?;
            conn.execute(
                "DELETE FROM buyer_group_members WHERE person_id = ?1",
                params![stale_id.as_str()],
            )
            .await
            .map_err(db_err)?;
            info!(
                person_id = %stale_id,
                from_company = %other_company,
                to_company = %company.id,
                "employment moved, previous record deactivated"
            );
            summary.displaced += 1;
            if !touched_groups.contains(&other_company) {
                touched_groups.push(other_company);
            }
        }
    }
    for other_company in &touched_groups {
        refresh_group_summary(conn, ws, other_company).await?;
    }

    replace_group(conn, unit.group).await?;
    Ok(summary)
}

async fn upsert_person(conn: &Connection, p: &Person) -> Result<()> {
    let sources = serde_json::to_string(&p.sources)
        .map_err(|e| BuyerGroupError::Persistence(format!("encode sources: {e}")))?;
    conn.execute(
        "INSERT INTO people (id, workspace_id, company_id, match_key, full_name, first_name,
             last_name, professional_email, personal_email, title, department, provider_id, role,
             influence_level, decision_power, engagement_priority, employment_active,
             sources_json, last_enriched_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
             ?18, ?19, ?20, ?21)
         ON CONFLICT(id) DO UPDATE SET
           full_name = excluded.full_name,
           first_name = excluded.first_name,
           last_name = excluded.last_name,
           professional_email = excluded.professional_email,
           personal_email = excluded.personal_email,
           title = excluded.title,
           department = excluded.department,
           provider_id = excluded.provider_id,
           role = excluded.role,
           influence_level = excluded.influence_level,
           decision_power = excluded.decision_power,
           engagement_priority = excluded.engagement_priority,
           employment_active = excluded.employment_active,
           sources_json = excluded.sources_json,
           last_enriched_at = excluded.last_enriched_at,
           updated_at = excluded.updated_at",
        params![
            p.id.as_str(),
            p.workspace_id.as_str(),
            p.company_id.as_str(),
            p.match_key.as_str(),
            p.full_name.as_str(),
            p.first_name.as_deref(),
            p.last_name.as_deref(),
            p.professional_email.as_deref(),
            p.personal_email.as_deref(),
            p.title.as_deref(),
            p.department.as_deref(),
            p.provider_id.as_deref(),
            p.role.as_str(),
            p.influence_level.as_str(),
            i64::from(p.decision_power),
            p.engagement_priority.as_str(),
            i64::from(p.employment_active),
            sources,
            p.last_enriched_at.to_rfc3339(),
            p.created_at.to_rfc3339(),
            p.updated_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn replace_group(conn: &Connection, group: &BuyerGroup) -> Result<()> {
    let ws = group.workspace_id.as_str();
    let company_id = group.company_id.as_str();

    conn.execute(
        "DELETE FROM buyer_group_members WHERE workspace_id = ?1 AND company_id = ?2",
        params![ws, company_id],
    )
    .await
    .map_err(db_err)?;

    for (position, m) in group.members.iter().enumerate() {
        conn.execute(
            "INSERT INTO buyer_group_members (workspace_id, company_id, person_id, position, role,
                 decision_power, engagement_priority)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                ws,
                company_id,
                m.person_id.as_str(),
                position as i64,
                m.role.as_str(),
                i64::from(m.decision_power),
                m.engagement_priority.as_str(),
            ],
        )
        .await
        .map_err(db_err)?;
    }

    write_group_summary(
        conn,
        ws,
        company_id,
        &group.distribution,
        &group.computed_at.to_rfc3339(),
    )
    .await
}

/// Recount a group's distribution from its member rows.
async fn refresh_group_summary(conn: &Connection, ws: &str, company_id: &str) -> Result<()> {
    let mut rows = conn
        .query(
            "SELECT role FROM buyer_group_members WHERE workspace_id = ?1 AND company_id = ?2",
            params![ws, company_id],
        )
        .await
        .map_err(db_err)?;
    let mut distribution = RoleDistribution::default();
    while let Some(row) = rows.next().await.map_err(db_err)? {
        distribution.add(row.get::<String>(0).map_err(db_err)?.parse()?);
    }
    write_group_summary(conn, ws, company_id, &distribution, &Utc::now().to_rfc3339()).await
}

async fn write_group_summary(
    conn: &Connection,
    ws: &str,
    company_id: &str,
    distribution: &RoleDistribution,
    computed_at: &str,
) -> Result<()> {
    let distribution_json = serde_json::to_string(distribution)
        .map_err(|e| BuyerGroupError::Persistence(format!("encode distribution: {e}")))?;
    conn.execute(
        "INSERT INTO buyer_groups (workspace_id, company_id, total_members, distribution_json, computed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(workspace_id, company_id) DO UPDATE SET
           total_members = excluded.total_members,
           distribution_json = excluded.distribution_json,
           computed_at = excluded.computed_at",
        params![
            ws,
            company_id,
            distribution.total() as i64,
            distribution_json,
            computed_at,
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const PERSON_COLUMNS: &str = "id, workspace_id, company_id, match_key, full_name, first_name, \
     last_name, professional_email, personal_email, title, department, provider_id, role, \
     influence_level, decision_power, engagement_priority, employment_active, sources_json, \
     last_enriched_at, created_at, updated_at";

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BuyerGroupError::Persistence(format!("invalid date {s:?}: {e}")))
}

fn row_to_company(row: &libsql::Row) -> Result<Company> {
    Ok(Company {
        workspace_id: row.get::<String>(0).map_err(db_err)?,
        id: row.get::<String>(1).map_err(db_err)?,
        name: row.get::<String>(2).map_err(db_err)?,
        domain: row.get::<String>(3).ok(),
        industry: row.get::<String>(4).ok(),
        size: row.get::<String>(5).ok(),
        location: row.get::<String>(6).ok(),
        resolved_at: parse_ts(&row.get::<String>(7).map_err(db_err)?)?,
    })
}

fn row_to_person(row: &libsql::Row) -> Result<Person> {
    let sources: Vec<SourceStamp> = serde_json::from_str(&row.get::<String>(17).map_err(db_err)?)
        .map_err(|e| BuyerGroupError::Persistence(format!("bad sources_json: {e}")))?;
    Ok(Person {
        id: row.get::<String>(0).map_err(db_err)?,
        workspace_id: row.get::<String>(1).map_err(db_err)?,
        company_id: row.get::<String>(2).map_err(db_err)?,
        match_key: row.get::<String>(3).map_err(db_err)?,
        full_name: row.get::<String>(4).map_err(db_err)?,
        first_name: row.get::<String>(5).ok(),
        last_name: row.get::<String>(6).ok(),
        professional_email: row.get::<String>(7).ok(),
        personal_email: row.get::<String>(8).ok(),
        title: row.get::<String>(9).ok(),
        department: row.get::<String>(10).ok(),
        provider_id: row.get::<String>(11).ok(),
        role: row.get::<String>(12).map_err(db_err)?.parse()?,
        influence_level: row.get::<String>(13).map_err(db_err)?.parse()?,
        decision_power: row.get::<i64>(14).map_err(db_err)?.clamp(0, 100) as u8,
        engagement_priority: row.get::<String>(15).map_err(db_err)?.parse()?,
        employment_active: row.get::<i64>(16).map_err(db_err)? != 0,
        sources,
        last_enriched_at: parse_ts(&row.get::<String>(18).map_err(db_err)?)?,
        created_at: parse_ts(&row.get::<String>(19).map_err(db_err)?)?,
        updated_at: parse_ts(&row.get::<String>(20).map_err(db_err)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use buyergroup_shared::{BuyerGroupRole, EngagementPriority, InfluenceLevel};
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    pub(crate) async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("bg_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn company(id: &str) -> Company {
        Company {
            id: id.into(),
            workspace_id: "ws".into(),
            name: format!("Company {id}"),
            domain: Some(format!("{id}.example")),
            industry: Some("Software".into()),
            size: None,
            location: None,
            resolved_at: Utc::now(),
        }
    }

    fn person(company_id: &str, name: &str, provider_id: &str, role: BuyerGroupRole) -> Person {
        let now = Utc::now();
        Person {
            id: Person::new_id(),
            workspace_id: "ws".into(),
            company_id: company_id.into(),
            match_key: buyergroup_shared::name_match_key(name),
            full_name: name.into(),
            first_name: None,
            last_name: None,
            professional_email: None,
            personal_email: None,
            title: Some("Engineer".into()),
            department: None,
            provider_id: Some(provider_id.into()),
            role,
            influence_level: role.influence_level(),
            decision_power: 50,
            engagement_priority: EngagementPriority::Medium,
            employment_active: true,
            sources: vec![SourceStamp {
                source: "people-provider".into(),
                enriched_at: now,
            }],
            last_enriched_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn group_of(company_id: &str, people: &[Person]) -> BuyerGroup {
        BuyerGroup::from_members(
            "ws",
            company_id,
            people.iter().map(BuyerGroupMember::from).collect(),
            Utc::now(),
        )
    }

    async fn commit(storage: &Storage, c: &Company, people: &[Person]) -> CommitSummary {
        let group = group_of(&c.id, people);
        storage
            .commit_unit(&UnitWrite {
                company: c,
                people,
                deactivate: &[],
                group: &group,
            })
            .await
            .expect("commit unit")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("bg_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn commit_unit_roundtrip() {
        let storage = test_storage().await;
        let acme = company("acme");
        let people = vec![
            person("acme", "Dana Whitfield", "p1", BuyerGroupRole::DecisionMaker),
            person("acme", "Tom Baker", "p2", BuyerGroupRole::Stakeholder),
        ];
        let summary = commit(&storage, &acme, &people).await;
        assert_eq!(summary.people_written, 2);

        let stored = storage.get_company("ws", "acme").await.expect("get").expect("exists");
        assert_eq!(stored.domain.as_deref(), Some("acme.example"));

        let listed = storage.list_people("ws", "acme").await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].full_name, "Dana Whitfield");
        assert_eq!(listed[0].sources.len(), 1);
        assert_eq!(listed[0].created_at.timestamp(), people[0].created_at.timestamp());

        let group = storage
            .get_buyer_group("ws", "acme")
            .await
            .expect("get group")
            .expect("group exists");
        assert!(group.is_consistent());
        assert_eq!(group.total_members, 2);
        assert_eq!(group.members[0].role, BuyerGroupRole::DecisionMaker);
    }

    #[tokio::test]
    async fn update_keeps_identity() {
        let storage = test_storage().await;
        let acme = company("acme");
        let mut p = person("acme", "Jane Rivera", "p1", BuyerGroupRole::Influencer);
        commit(&storage, &acme, std::slice::from_ref(&p)).await;

        p.title = Some("Engineering Manager".into());
        p.role = BuyerGroupRole::Champion;
        p.influence_level = InfluenceLevel::High;
        p.updated_at = Utc::now();
        commit(&storage, &acme, std::slice::from_ref(&p)).await;

        assert_eq!(storage.count_people("ws").await.expect("count"), 1);
        let stored = storage.get_person(&p.id).await.expect("get").expect("exists");
        assert_eq!(stored.title.as_deref(), Some("Engineering Manager"));
        assert_eq!(stored.role, BuyerGroupRole::Champion);
    }

    #[tokio::test]
    async fn group_is_replaced_not_appended() {
        let storage = test_storage().await;
        let acme = company("acme");
        let a = person("acme", "Ann A", "p1", BuyerGroupRole::Champion);
        let b = person("acme", "Bob B", "p2", BuyerGroupRole::Influencer);
        commit(&storage, &acme, &[a.clone(), b.clone()]).await;

        // Second run: b left.
        let group = group_of("acme", std::slice::from_ref(&a));
        let deactivate = vec![b.id.clone()];
        let summary = storage
            .commit_unit(&UnitWrite {
                company: &acme,
                people: std::slice::from_ref(&a),
                deactivate: &deactivate,
                group: &group,
            })
            .await
            .expect("commit");
        assert_eq!(summary.deactivated, 1);

        let group = storage.get_buyer_group("ws", "acme").await.unwrap().unwrap();
        assert_eq!(group.total_members, 1);
        assert_eq!(group.members[0].person_id, a.id);
        let b_stored = storage.get_person(&b.id).await.unwrap().expect("b retained");
        assert!(!b_stored.employment_active);
    }

    #[tokio::test]
    async fn moving_employer_deactivates_previous_record() {
        let storage = test_storage().await;
        let acme = company("acme");
        let globex = company("globex");
        let at_acme = person("acme", "Sam Lee", "p-sam", BuyerGroupRole::Influencer);
        let other = person("acme", "Ann A", "p-ann", BuyerGroupRole::Champion);
        commit(&storage, &acme, &[at_acme.clone(), other]).await;

        let at_globex = person("globex", "Sam Lee", "p-sam", BuyerGroupRole::DecisionMaker);
        let summary = commit(&storage, &globex, std::slice::from_ref(&at_globex)).await;
        assert_eq!(summary.displaced, 1);

        let old = storage.get_person(&at_acme.id).await.unwrap().unwrap();
        assert!(!old.employment_active);
        let acme_group = storage.get_buyer_group("ws", "acme").await.unwrap().unwrap();
        assert!(acme_group.is_consistent());
        assert_eq!(acme_group.total_members, 1);
        assert!(acme_group.members.iter().all(|m| m.person_id != at_acme.id));
    }

    #[tokio::test]
    async fn duplicate_match_key_rolls_back_the_unit() {
        let storage = test_storage().await;
        let acme = company("acme");
        let first = person("acme", "Jane Rivera", "p1", BuyerGroupRole::Influencer);
        commit(&storage, &acme, std::slice::from_ref(&first)).await;

        // Same (workspace, company, match key) under a new id violates uniqueness.
        let dup = person("acme", "jane  RIVERA", "p9", BuyerGroupRole::Influencer);
        let fresh = person("acme", "New Person", "p10", BuyerGroupRole::Stakeholder);
        let people = vec![fresh.clone(), dup];
        let group = group_of("acme", &people);
        let err = storage
            .commit_unit(&UnitWrite {
                company: &acme,
                people: &people,
                deactivate: &[],
                group: &group,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BuyerGroupError::Persistence(_)));

        // Nothing from the failed unit is visible.
        assert!(storage.get_person(&fresh.id).await.unwrap().is_none());
        assert_eq!(storage.count_people("ws").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rejects_foreign_people() {
        let storage = test_storage().await;
        let acme = company("acme");
        let stray = person("globex", "Stray", "p1", BuyerGroupRole::Stakeholder);
        let group = group_of("acme", &[]);
        let err = storage
            .commit_unit(&UnitWrite {
                company: &acme,
                people: std::slice::from_ref(&stray),
                deactivate: &[],
                group: &group,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BuyerGroupError::Validation { .. }));
    }

    #[tokio::test]
    async fn run_report_roundtrip() {
        let storage = test_storage().await;
        assert!(storage.get_run_report("r1").await.unwrap().is_none());
        storage
            .save_run_report("r1", "ws", r#"{"run_id":"r1"}"#)
            .await
            .expect("save");
        storage
            .save_run_report("r1", "ws", r#"{"run_id":"r1","v":2}"#)
            .await
            .expect("overwrite");
        let json = storage.get_run_report("r1").await.unwrap().expect("report");
        assert!(json.contains("\"v\":2"));
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("bg_test_{}.db", Uuid::now_v7()));
        drop(Storage::open(&tmp).await.expect("create"));
        let ro = Storage::open_readonly(&tmp).await.expect("open ro");
        assert!(ro.save_run_report("r", "ws", "{}").await.is_err());
        assert!(ro.list_companies("ws").await.expect("read ok").is_empty());
    }
}
