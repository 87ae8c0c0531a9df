//! SQLite-backed signature store with migrations
//!
//! The atomic-upsert-per-key contract lives here: every mutation of a
//! signature runs in one IMMEDIATE transaction keyed by fingerprint, with
//! arithmetic ON CONFLICT updates so concurrent increments compose, and a
//! per-fingerprint lock map so read-modify-write of the history and the
//! derived confidence never interleaves for the same key. Different
//! fingerprints never wait on each other's locks.

use crate::config::ConfidenceConfig;
use crate::error::{Result, CisageError};
use crate::store::{
    recompute_confidence, AnalysisRecord, ErrorSignature, NewRemediation, RemediationEvent,
    RemediationSource,
};
use ahash::{HashMap, HashMapExt};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Fingerprint-keyed persistent signature store
pub struct SignatureStore {
    pool: DbPool,
    confidence: ConfidenceConfig,

    /// Per-fingerprint write locks
    /// Key: fingerprint, Value: lock serializing upserts for that key
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SignatureStore {
    /// Open (or create) the store at the given path
    pub fn new(db_path: &Path, confidence: ConfidenceConfig) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CisageError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| CisageError::Store(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| CisageError::Store(format!("Failed to get connection: {}", e)))?;

            // WAL mode for concurrent readers alongside the single writer
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let store = Self {
            pool,
            confidence,
            key_locks: Mutex::new(HashMap::new()),
        };

        store.migrate()?;

        Ok(store)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| CisageError::Store(format!("Failed to get connection: {}", e)))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Get the write lock for a fingerprint, creating it on first use
    fn key_lock(&self, fingerprint: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap();

        locks
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Look up a signature by fingerprint
    pub fn get(&self, fingerprint: &str) -> Result<Option<ErrorSignature>> {
        let conn = self.get_conn()?;
        load_signature(&conn, fingerprint)
    }

    /// All stored signatures, history included; order unspecified
    pub fn all(&self) -> Result<Vec<ErrorSignature>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT fingerprint, features, error_class, occurrence_count,
                    first_seen, last_seen, confidence, evidence_hash
             FROM signatures",
        )?;

        let mut signatures: Vec<ErrorSignature> = stmt
            .query_map([], signature_from_row)?
            .collect::<std::result::Result<_, _>>()?;

        // Single pass over all events instead of one query per signature
        let mut events_by_fp: HashMap<String, Vec<RemediationEvent>> = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT fingerprint, seq, recorded_at, root_cause, steps, source,
                    reported_confidence, resolved
             FROM remediation_events ORDER BY fingerprint, seq",
        )?;
        let rows = stmt.query_map([], |row| {
            let fp: String = row.get(0)?;
            Ok((fp, event_from_row_offset(row, 1)?))
        })?;
        for row in rows {
            let (fp, event) = row?;
            events_by_fp.entry(fp).or_default().push(event);
        }

        for signature in &mut signatures {
            if let Some(events) = events_by_fp.remove(&signature.fingerprint) {
                signature.remediation_history = events;
            }
        }

        Ok(signatures)
    }

    /// Create or update a signature
    ///
    /// Absent: created with occurrence_count = 1. Present: occurrence and
    /// recency bumped; features and evidence of the first sighting are
    /// kept. When `outcome` is given it is appended to the remediation
    /// history. Confidence is recomputed from the stored history either
    /// way. All-or-nothing: a cancelled call commits nothing.
    pub fn upsert(
        &self,
        fingerprint: &str,
        features: &[String],
        error_class: Option<&str>,
        outcome: Option<NewRemediation>,
        evidence_hash: Option<&str>,
    ) -> Result<ErrorSignature> {
        let lock = self.key_lock(fingerprint);
        let _guard = lock.lock().unwrap();

        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now = Utc::now().timestamp();
        let features_json = to_json(features)?;
        let initial_confidence = outcome
            .as_ref()
            .and_then(|o| o.reported_confidence)
            .unwrap_or(0.5)
            .clamp(self.confidence.floor, 1.0);

        tx.execute(
            "INSERT INTO signatures
                (fingerprint, features, error_class, occurrence_count,
                 first_seen, last_seen, confidence, evidence_hash)
             VALUES (?1, ?2, ?3, 1, ?4, ?4, ?5, ?6)
             ON CONFLICT(fingerprint) DO UPDATE SET
                 occurrence_count = occurrence_count + 1,
                 last_seen = ?4",
            params![
                fingerprint,
                features_json,
                error_class,
                now,
                initial_confidence,
                evidence_hash,
            ],
        )?;

        if let Some(event) = outcome {
            append_event(&tx, fingerprint, &event, now)?;
        }

        let events = load_events(&tx, fingerprint)?;
        let confidence = recompute_confidence(&events, &self.confidence);
        tx.execute(
            "UPDATE signatures SET confidence = ?2 WHERE fingerprint = ?1",
            params![fingerprint, confidence],
        )?;

        let signature = load_signature(&tx, fingerprint)?.ok_or_else(|| {
            CisageError::Store(format!("Upserted signature vanished: {}", fingerprint))
        })?;

        tx.commit()?;

        Ok(signature)
    }

    /// Append an operator feedback entry and recompute confidence
    pub fn record_feedback(
        &self,
        fingerprint: &str,
        resolved: bool,
        notes: Option<&str>,
    ) -> Result<ErrorSignature> {
        let lock = self.key_lock(fingerprint);
        let _guard = lock.lock().unwrap();

        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if load_signature(&tx, fingerprint)?.is_none() {
            return Err(CisageError::SignatureNotFound {
                fingerprint: fingerprint.to_string(),
            });
        }

        let now = Utc::now().timestamp();
        let event = NewRemediation {
            root_cause: notes.unwrap_or("operator feedback").to_string(),
            steps: vec![],
            source: RemediationSource::Feedback,
            reported_confidence: None,
            resolved: Some(resolved),
        };
        append_event(&tx, fingerprint, &event, now)?;

        let events = load_events(&tx, fingerprint)?;
        let confidence = recompute_confidence(&events, &self.confidence);
        tx.execute(
            "UPDATE signatures SET confidence = ?2 WHERE fingerprint = ?1",
            params![fingerprint, confidence],
        )?;

        let signature = load_signature(&tx, fingerprint)?.ok_or_else(|| {
            CisageError::Store(format!("Signature vanished: {}", fingerprint))
        })?;

        tx.commit()?;

        Ok(signature)
    }

    /// Remediation proposals that have worked before for an error class
    ///
    /// Signatures of the given class whose confidence cleared the bar,
    /// most confident first; one (latest) proposal per signature.
    pub fn successful_remediations(
        &self,
        error_class: &str,
        min_confidence: f64,
        limit: usize,
    ) -> Result<Vec<RemediationEvent>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT fingerprint FROM signatures
             WHERE error_class = ?1 AND confidence > ?2
             ORDER BY confidence DESC, occurrence_count DESC
             LIMIT ?3",
        )?;
        let fingerprints: Vec<String> = stmt
            .query_map(params![error_class, min_confidence, limit as i64], |row| {
                row.get(0)
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut remediations = Vec::new();
        for fingerprint in fingerprints {
            let events = load_events(&conn, &fingerprint)?;
            if let Some(event) = events
                .into_iter()
                .rev()
                .find(|e| e.source == RemediationSource::Analysis)
            {
                remediations.push(event);
            }
        }

        Ok(remediations)
    }

    /// Record one analysis journal row
    pub fn insert_analysis(&self, record: &AnalysisRecord) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "INSERT INTO analyses
                (run_id, repository, workflow, fingerprint, disposition, score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.run_id,
                record.repository,
                record.workflow,
                record.fingerprint,
                record.disposition,
                record.score,
                record.created_at.timestamp(),
            ],
        )?;

        Ok(())
    }

    /// Most recent journal rows, optionally filtered by repository
    pub fn recent_analyses(
        &self,
        repository: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>> {
        let conn = self.get_conn()?;

        let mut records = Vec::new();
        match repository {
            Some(repo) => {
                let mut stmt = conn.prepare(
                    "SELECT run_id, repository, workflow, fingerprint, disposition, score, created_at
                     FROM analyses WHERE repository = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![repo, limit as i64], analysis_from_row)?;
                for row in rows {
                    records.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT run_id, repository, workflow, fingerprint, disposition, score, created_at
                     FROM analyses ORDER BY created_at DESC, id DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit as i64], analysis_from_row)?;
                for row in rows {
                    records.push(row?);
                }
            }
        }

        Ok(records)
    }

    /// Get store statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.get_conn()?;

        let signature_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM signatures", [], |row| row.get(0))?;

        let analysis_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM analyses", [], |row| row.get(0))?;

        let event_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM remediation_events",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT COALESCE(error_class, 'unclassified'), COUNT(*)
             FROM signatures GROUP BY error_class ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        let mut class_distribution = Vec::new();
        for row in rows {
            class_distribution.push(row?);
        }

        Ok(StoreStats {
            signature_count: signature_count as usize,
            analysis_count: analysis_count as usize,
            event_count: event_count as usize,
            class_distribution,
        })
    }
}

/// Store statistics
#[derive(Debug, serde::Serialize)]
pub struct StoreStats {
    pub signature_count: usize,
    pub analysis_count: usize,
    pub event_count: usize,
    pub class_distribution: Vec<(String, usize)>,
}

fn append_event(
    conn: &Connection,
    fingerprint: &str,
    event: &NewRemediation,
    now: i64,
) -> Result<()> {
    let next_seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM remediation_events WHERE fingerprint = ?1",
        params![fingerprint],
        |row| row.get(0),
    )?;

    conn.execute(
        "INSERT INTO remediation_events
            (fingerprint, seq, recorded_at, root_cause, steps, source,
             reported_confidence, resolved)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            fingerprint,
            next_seq,
            now,
            event.root_cause,
            to_json(&event.steps)?,
            event.source.as_str(),
            event.reported_confidence,
            event.resolved,
        ],
    )?;

    Ok(())
}

fn load_signature(conn: &Connection, fingerprint: &str) -> Result<Option<ErrorSignature>> {
    let mut stmt = conn.prepare(
        "SELECT fingerprint, features, error_class, occurrence_count,
                first_seen, last_seen, confidence, evidence_hash
         FROM signatures WHERE fingerprint = ?1",
    )?;

    let mut rows = stmt.query_map(params![fingerprint], signature_from_row)?;

    match rows.next() {
        Some(row) => {
            let mut signature = row?;
            signature.remediation_history = load_events(conn, fingerprint)?;
            Ok(Some(signature))
        }
        None => Ok(None),
    }
}

fn load_events(conn: &Connection, fingerprint: &str) -> Result<Vec<RemediationEvent>> {
    let mut stmt = conn.prepare(
        "SELECT seq, recorded_at, root_cause, steps, source, reported_confidence, resolved
         FROM remediation_events WHERE fingerprint = ?1 ORDER BY seq",
    )?;

    let rows = stmt.query_map(params![fingerprint], |row| event_from_row_offset(row, 0))?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

fn signature_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ErrorSignature> {
    let features_json: String = row.get(1)?;
    let features = serde_json::from_str(&features_json).unwrap_or_default();

    Ok(ErrorSignature {
        fingerprint: row.get(0)?,
        features,
        error_class: row.get(2)?,
        occurrence_count: row.get::<_, i64>(3)? as u64,
        first_seen: timestamp_to_datetime(row.get(4)?),
        last_seen: timestamp_to_datetime(row.get(5)?),
        remediation_history: Vec::new(),
        confidence: row.get(6)?,
        evidence_hash: row.get(7)?,
    })
}

fn event_from_row_offset(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<RemediationEvent> {
    let steps_json: String = row.get(offset + 3)?;
    let steps = serde_json::from_str(&steps_json).unwrap_or_default();
    let source_str: String = row.get(offset + 4)?;
    let source = RemediationSource::parse(&source_str).unwrap_or(RemediationSource::Analysis);

    Ok(RemediationEvent {
        seq: row.get::<_, i64>(offset)? as u64,
        recorded_at: timestamp_to_datetime(row.get(offset + 1)?),
        root_cause: row.get(offset + 2)?,
        steps,
        source,
        reported_confidence: row.get(offset + 5)?,
        resolved: row.get(offset + 6)?,
    })
}

fn analysis_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnalysisRecord> {
    Ok(AnalysisRecord {
        run_id: row.get(0)?,
        repository: row.get(1)?,
        workflow: row.get(2)?,
        fingerprint: row.get(3)?,
        disposition: row.get(4)?,
        score: row.get(5)?,
        created_at: timestamp_to_datetime(row.get(6)?),
    })
}

fn timestamp_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| CisageError::Json {
        source: e,
        context: "Failed to serialize store column".to_string(),
    })
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Known error signatures, keyed by content fingerprint
    CREATE TABLE signatures (
        fingerprint TEXT PRIMARY KEY,
        features TEXT NOT NULL,
        error_class TEXT,
        occurrence_count INTEGER NOT NULL DEFAULT 1,
        first_seen INTEGER NOT NULL,
        last_seen INTEGER NOT NULL,
        confidence REAL NOT NULL,
        evidence_hash TEXT
    );

    CREATE INDEX idx_signatures_error_class ON signatures(error_class);
    CREATE INDEX idx_signatures_last_seen ON signatures(last_seen);

    -- Append-only remediation audit trail
    CREATE TABLE remediation_events (
        fingerprint TEXT NOT NULL,
        seq INTEGER NOT NULL,
        recorded_at INTEGER NOT NULL,
        root_cause TEXT NOT NULL,
        steps TEXT NOT NULL,
        source TEXT NOT NULL,
        reported_confidence REAL,
        resolved INTEGER,
        PRIMARY KEY (fingerprint, seq),
        FOREIGN KEY (fingerprint) REFERENCES signatures(fingerprint) ON DELETE CASCADE
    );

    -- One row per coordinator process() call
    CREATE TABLE analyses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        repository TEXT,
        workflow TEXT,
        fingerprint TEXT NOT NULL,
        disposition TEXT NOT NULL,
        score REAL NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX idx_analyses_repository ON analyses(repository);
    CREATE INDEX idx_analyses_created_at ON analyses(created_at);
    "#,
];
