//! SQLite snapshot store: one append-only row per registration.

use std::path::Path;

use tokio_rusqlite::Connection;

use faceid_core::{CorpusEntry, CorpusProvider, PersonDetails, PersonRecord, SnapshotSink, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS person_snapshots (
    person_id       TEXT PRIMARY KEY,
    full_name       TEXT NOT NULL,
    document_number TEXT NOT NULL,
    sex             INTEGER,
    citizenship     TEXT,
    birth_date      TEXT,
    visa_type       TEXT,
    visa_number     TEXT,
    entry_date      TEXT,
    exit_date       TEXT,
    embedding       TEXT NOT NULL,
    num_templates   INTEGER NOT NULL,
    det_score       REAL NOT NULL,
    blur            REAL NOT NULL,
    face_size       INTEGER NOT NULL,
    faces_found     INTEGER NOT NULL,
    face_ref        TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
";

/// Snapshot store over a single SQLite database.
///
/// `person_id` is the primary key, so a corpus scan yields at most one
/// entry per identifier. The store never updates rows in place.
#[derive(Clone)]
pub struct SnapshotStore {
    conn: Connection,
}

impl SnapshotStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await.map_err(backend)?;
        Self::with_connection(conn).await
    }

    /// In-memory database, for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(backend)?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(backend)?;
        Ok(Self { conn })
    }

    /// Number of stored snapshots.
    pub async fn count(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let n: u64 =
                    conn.query_row("SELECT COUNT(*) FROM person_snapshots", [], |row| row.get(0))?;
                Ok(n)
            })
            .await
            .map_err(backend)
    }

    /// Read one full snapshot back, for diagnostics and tooling.
    pub async fn fetch(&self, person_id: &str) -> Result<Option<PersonRecord>, StoreError> {
        let person_id = person_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT person_id, full_name, document_number, sex, citizenship,
                            birth_date, visa_type, visa_number, entry_date, exit_date,
                            embedding, num_templates, det_score, blur, face_size,
                            faces_found, face_ref, created_at
                     FROM person_snapshots WHERE person_id = ?1",
                )?;
                let mut rows = stmt.query_map([person_id], |row| {
                    let embedding_json: String = row.get(10)?;
                    let created_at: String = row.get(17)?;
                    Ok(PersonRecord {
                        person_id: row.get(0)?,
                        details: PersonDetails {
                            full_name: row.get(1)?,
                            document_number: row.get(2)?,
                            sex: row.get::<_, Option<i64>>(3)?.map(|v| v as u8),
                            citizenship: row.get(4)?,
                            birth_date: row.get(5)?,
                            visa_type: row.get(6)?,
                            visa_number: row.get(7)?,
                            entry_date: row.get(8)?,
                            exit_date: row.get(9)?,
                        },
                        embedding: serde_json::from_str(&embedding_json).unwrap_or_default(),
                        num_templates: row.get(11)?,
                        det_score: row.get::<_, f64>(12)? as f32,
                        blur: row.get(13)?,
                        face_size: row.get(14)?,
                        faces_found: row.get(15)?,
                        face_ref: row.get(16)?,
                        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                            .map(|t| t.with_timezone(&chrono::Utc))
                            .unwrap_or_default(),
                    })
                })?;
                match rows.next() {
                    Some(row) => Ok(Some(row?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(backend)
    }
}

impl SnapshotSink for SnapshotStore {
    async fn insert_snapshot(&self, record: &PersonRecord) -> Result<(), StoreError> {
        let record = record.clone();
        let embedding_json = serde_json::to_string(&record.embedding)
            .map_err(|e| StoreError::Backend(format!("embedding serialization: {e}")))?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO person_snapshots (
                        person_id, full_name, document_number, sex, citizenship,
                        birth_date, visa_type, visa_number, entry_date, exit_date,
                        embedding, num_templates, det_score, blur, face_size,
                        faces_found, face_ref, created_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                               ?13, ?14, ?15, ?16, ?17, ?18)",
                    rusqlite::params![
                        record.person_id,
                        record.details.full_name,
                        record.details.document_number,
                        record.details.sex.map(|v| v as i64),
                        record.details.citizenship,
                        record.details.birth_date,
                        record.details.visa_type,
                        record.details.visa_number,
                        record.details.entry_date,
                        record.details.exit_date,
                        embedding_json,
                        record.num_templates,
                        record.det_score as f64,
                        record.blur,
                        record.face_size,
                        record.faces_found,
                        record.face_ref,
                        record.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(backend)
    }
}

impl CorpusProvider for SnapshotStore {
    async fn all_embeddings(&self) -> Result<Vec<CorpusEntry>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT person_id, full_name, document_number, sex, citizenship,
                            birth_date, visa_type, visa_number, entry_date, exit_date,
                            embedding, face_ref
                     FROM person_snapshots",
                )?;

                let rows = stmt.query_map([], |row| {
                    let person_id: String = row.get(0)?;
                    let embedding_json: String = row.get(10)?;
                    let embedding = match serde_json::from_str::<Vec<f32>>(&embedding_json) {
                        Ok(values) => Some(values),
                        Err(err) => {
                            // Bad historical data: skipped at match time.
                            tracing::warn!(%person_id, error = %err, "unreadable stored embedding");
                            None
                        }
                    };
                    Ok(CorpusEntry {
                        person_id,
                        embedding,
                        details: PersonDetails {
                            full_name: row.get(1)?,
                            document_number: row.get(2)?,
                            sex: row.get::<_, Option<i64>>(3)?.map(|v| v as u8),
                            citizenship: row.get(4)?,
                            birth_date: row.get(5)?,
                            visa_type: row.get(6)?,
                            visa_number: row.get(7)?,
                            entry_date: row.get(8)?,
                            exit_date: row.get(9)?,
                        },
                        face_ref: row.get(11)?,
                    })
                })?;

                let mut entries = Vec::new();
                for row in rows {
                    entries.push(row?);
                }
                Ok(entries)
            })
            .await
            .map_err(backend)
    }
}

fn backend(err: tokio_rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
