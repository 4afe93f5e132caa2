//! libSQL backend: async `LeadStore` implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! fixed-width RFC 3339 (microseconds, `Z`) so text comparison orders them.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use tracing::{debug, info};

use crate::campaign::job::{SendOutcome, SendRecord};
use crate::error::DatabaseError;
use crate::leads::CampaignKind;
use crate::leads::normalize::company_key;
use crate::qualification::{QualifiedLead, SignalCategory, Stage, StageTransition};
use crate::store::migrations;
use crate::store::traits::{LeadStore, SendWrite};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Run all pending schema migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format for timestamps.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

/// `?{start}, ?{start+1}, …` for `n` positional parameters.
fn placeholders(start: usize, n: usize) -> String {
    (start..start + n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_kind(s: &str) -> Result<CampaignKind, DatabaseError> {
    s.parse()
        .map_err(|e| DatabaseError::Serialization(format!("campaign kind: {e}")))
}

const SEND_COLUMNS: &str = "campaign_id, phone, kind, outcome, error, created_at, updated_at";

fn row_to_send_record(row: &libsql::Row) -> Result<SendRecord, DatabaseError> {
    let get_text = |i: i32| -> Result<String, DatabaseError> {
        row.get::<String>(i)
            .map_err(|e| DatabaseError::Query(format!("send_records column {i}: {e}")))
    };
    let outcome: SendOutcome = get_text(3)?
        .parse()
        .map_err(DatabaseError::Serialization)?;
    Ok(SendRecord {
        campaign_id: get_text(0)?,
        phone: get_text(1)?,
        kind: parse_kind(&get_text(2)?)?,
        outcome,
        error: row.get::<String>(4).ok(),
        created_at: parse_datetime(&get_text(5)?),
        updated_at: parse_datetime(&get_text(6)?),
    })
}

const LEAD_COLUMNS: &str = "phone, name, company, campaign_id, stage, qualification_progress, \
    qualification_data, last_message, total_exchanges, transitions, created_at, updated_at";

/// Map a libsql Row to a QualifiedLead. Column order matches LEAD_COLUMNS.
fn row_to_lead(row: &libsql::Row) -> Result<QualifiedLead, DatabaseError> {
    let get_text = |i: i32| -> Result<String, DatabaseError> {
        row.get::<String>(i)
            .map_err(|e| DatabaseError::Query(format!("qualified_leads column {i}: {e}")))
    };

    let stage: Stage = get_text(4)?
        .parse()
        .map_err(|e| DatabaseError::Serialization(format!("stage: {e}")))?;
    let progress: i64 = row.get(5).unwrap_or(0);
    let data: BTreeMap<SignalCategory, String> = serde_json::from_str(&get_text(6)?)
        .map_err(|e| DatabaseError::Serialization(format!("qualification_data: {e}")))?;
    let exchanges: i64 = row.get(8).unwrap_or(0);
    let transitions: Vec<StageTransition> = serde_json::from_str(&get_text(9)?)
        .map_err(|e| DatabaseError::Serialization(format!("transitions: {e}")))?;

    Ok(QualifiedLead {
        phone: get_text(0)?,
        name: row.get::<String>(1).ok(),
        company: row.get::<String>(2).ok(),
        campaign_id: row.get::<String>(3).ok(),
        stage,
        qualification_progress: progress.clamp(0, 4) as u8,
        qualification_data: data,
        last_message: row.get::<String>(7).ok(),
        total_exchanges: exchanges.max(0) as u32,
        transitions,
        created_at: parse_datetime(&get_text(10)?),
        updated_at: parse_datetime(&get_text(11)?),
    })
}

fn lead_params(lead: &QualifiedLead) -> Result<Vec<Value>, DatabaseError> {
    let data = serde_json::to_string(&lead.qualification_data)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    let transitions = serde_json::to_string(&lead.transitions)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    Ok(vec![
        Value::Text(lead.phone.clone()),
        opt_text(lead.name.as_deref()),
        opt_text(lead.company.as_deref()),
        opt_text(lead.campaign_id.as_deref()),
        Value::Text(lead.stage.as_str().to_string()),
        Value::Integer(lead.qualification_progress as i64),
        Value::Text(data),
        opt_text(lead.last_message.as_deref()),
        Value::Integer(lead.total_exchanges as i64),
        Value::Text(transitions),
        Value::Text(ts(lead.created_at)),
        Value::Text(ts(lead.updated_at)),
    ])
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl LeadStore for LibSqlBackend {
    // ── Blacklist ───────────────────────────────────────────────────

    async fn add_to_blacklist(&self, company: &str) -> Result<(), DatabaseError> {
        let Some(key) = company_key(company) else {
            return Ok(());
        };
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO company_blacklist (company_key, added_at) VALUES (?1, ?2)",
                params![key.clone(), ts(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_to_blacklist: {e}")))?;
        debug!(company = %key, "Company blacklisted");
        Ok(())
    }

    async fn blacklisted_companies(
        &self,
        company_keys: &[String],
    ) -> Result<HashSet<String>, DatabaseError> {
        if company_keys.is_empty() {
            return Ok(HashSet::new());
        }
        let sql = format!(
            "SELECT company_key FROM company_blacklist WHERE company_key IN ({})",
            placeholders(1, company_keys.len())
        );
        let values = company_keys.iter().cloned().map(Value::Text).collect();
        let mut rows = self
            .conn()
            .query(&sql, libsql::params::Params::Positional(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("blacklisted_companies: {e}")))?;

        let mut hits = HashSet::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("blacklisted_companies: {e}")))?
        {
            if let Ok(key) = row.get::<String>(0) {
                hits.insert(key);
            }
        }
        Ok(hits)
    }

    // ── Send history ────────────────────────────────────────────────

    async fn contacted_phones(
        &self,
        phones: &[String],
        kind: CampaignKind,
        window_days: u32,
    ) -> Result<HashSet<String>, DatabaseError> {
        if phones.is_empty() {
            return Ok(HashSet::new());
        }
        let cutoff = Utc::now() - chrono::Duration::days(window_days as i64);
        let sql = format!(
            "SELECT DISTINCT phone FROM send_records
             WHERE kind = ?1 AND outcome IN ('sent', 'delivered') AND updated_at >= ?2
               AND phone IN ({})",
            placeholders(3, phones.len())
        );
        let mut values = vec![
            Value::Text(kind.as_str().to_string()),
            Value::Text(ts(cutoff)),
        ];
        values.extend(phones.iter().cloned().map(Value::Text));

        let mut rows = self
            .conn()
            .query(&sql, libsql::params::Params::Positional(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("contacted_phones: {e}")))?;

        let mut hits = HashSet::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("contacted_phones: {e}")))?
        {
            if let Ok(phone) = row.get::<String>(0) {
                hits.insert(phone);
            }
        }
        Ok(hits)
    }

    async fn record_send(
        &self,
        campaign_id: &str,
        phone: &str,
        kind: CampaignKind,
        outcome: SendOutcome,
        error: Option<&str>,
    ) -> Result<SendWrite, DatabaseError> {
        let conn = self.conn();
        let now = ts(Utc::now());

        if outcome == SendOutcome::Queued {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO send_records
                        (campaign_id, phone, kind, outcome, error, created_at, updated_at)
                     VALUES (?1, ?2, ?3, 'queued', NULL, ?4, ?4)",
                    params![campaign_id, phone, kind.as_str(), now],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("record_send: {e}")))?;
            return Ok(if inserted == 0 {
                SendWrite::Conflict
            } else {
                SendWrite::Inserted
            });
        }

        let updated = conn
            .execute(
                "UPDATE send_records SET outcome = ?3, error = ?4, updated_at = ?5
                 WHERE campaign_id = ?1 AND phone = ?2",
                params![campaign_id, phone, outcome.as_str(), opt_text(error), now.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_send: {e}")))?;
        if updated > 0 {
            return Ok(SendWrite::Updated);
        }

        conn.execute(
            "INSERT INTO send_records
                (campaign_id, phone, kind, outcome, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (campaign_id, phone) DO UPDATE
                SET outcome = ?4, error = ?5, updated_at = ?6",
            params![
                campaign_id,
                phone,
                kind.as_str(),
                outcome.as_str(),
                opt_text(error),
                now
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("record_send: {e}")))?;
        Ok(SendWrite::Inserted)
    }

    async fn list_send_records(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<SendRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SEND_COLUMNS} FROM send_records WHERE campaign_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![campaign_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_send_records: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_send_records: {e}")))?
        {
            records.push(row_to_send_record(&row)?);
        }
        Ok(records)
    }

    // ── Qualified leads ─────────────────────────────────────────────

    async fn get_qualified_lead(
        &self,
        phone: &str,
    ) -> Result<Option<QualifiedLead>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM qualified_leads WHERE phone = ?1"),
                params![phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_qualified_lead: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_lead(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_qualified_lead: {e}"))),
        }
    }

    async fn upsert_qualified_lead(&self, lead: &QualifiedLead) -> Result<(), DatabaseError> {
        let values = lead_params(lead)?;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO qualified_leads ({LEAD_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT (phone) DO UPDATE SET
                        name = ?2, company = ?3, campaign_id = ?4, stage = ?5,
                        qualification_progress = ?6, qualification_data = ?7,
                        last_message = ?8, total_exchanges = ?9, transitions = ?10,
                        updated_at = ?12"
                ),
                libsql::params::Params::Positional(values),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_qualified_lead: {e}")))?;
        Ok(())
    }

    async fn insert_qualified_lead_if_absent(
        &self,
        lead: &QualifiedLead,
    ) -> Result<bool, DatabaseError> {
        let values = lead_params(lead)?;
        let inserted = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO qualified_leads ({LEAD_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                libsql::params::Params::Positional(values),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_qualified_lead_if_absent: {e}")))?;
        Ok(inserted > 0)
    }

    async fn list_qualified_leads(&self) -> Result<Vec<QualifiedLead>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM qualified_leads ORDER BY updated_at DESC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_qualified_leads: {e}")))?;

        let mut leads = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_qualified_leads: {e}")))?
        {
            leads.push(row_to_lead(&row)?);
        }
        Ok(leads)
    }
}
