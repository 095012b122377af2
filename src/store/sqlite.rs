//! SQLite-backed implementation of [`super::DocumentStore`].
//!
//! `connect` sets WAL mode and a busy timeout; `with_retry` adds
//! exponential backoff on top for `SQLITE_BUSY` contention.

use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use super::model::{Chunk, Document, StageRecord, Status};
use super::{DocumentStore, DocumentUpdate};
use crate::error::{PipelineError, Result};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = connect(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                organization TEXT,
                published_year INTEGER,
                document_type TEXT,
                country TEXT,
                language TEXT,
                filepath TEXT NOT NULL,
                pdf_url TEXT,
                status TEXT NOT NULL,
                error_message TEXT,
                parsed_folder TEXT,
                stages TEXT NOT NULL DEFAULT '{}',
                page_count INTEGER,
                word_count INTEGER,
                file_format TEXT,
                file_size_mb REAL,
                toc TEXT,
                toc_classified INTEGER NOT NULL DEFAULT 0,
                full_summary TEXT,
                pipeline_elapsed_seconds REAL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
            CREATE INDEX IF NOT EXISTS idx_documents_status_year ON documents(status, published_year);

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
            "#,
        )?;
        Ok(())
    }

    fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
        let status_str: String = row.get("status")?;
        let stages_json: String = row.get("stages")?;
        let stages = serde_json::from_str(&stages_json).unwrap_or_default();
        Ok(Document {
            id: row.get("id")?,
            title: row.get("title")?,
            organization: row.get("organization")?,
            published_year: row.get("published_year")?,
            document_type: row.get("document_type")?,
            country: row.get("country")?,
            language: row.get("language")?,
            filepath: row.get("filepath")?,
            pdf_url: row.get("pdf_url")?,
            status: Status::from_str(&status_str).unwrap_or(Status::Downloaded),
            error_message: row.get("error_message")?,
            parsed_folder: row.get("parsed_folder")?,
            stages,
            page_count: row.get("page_count")?,
            word_count: row.get("word_count")?,
            file_format: row.get("file_format")?,
            file_size_mb: row.get("file_size_mb")?,
            toc: row.get("toc")?,
            toc_classified: row.get::<_, i64>("toc_classified")? != 0,
            full_summary: row.get("full_summary")?,
            pipeline_elapsed_seconds: row.get("pipeline_elapsed_seconds")?,
        })
    }

    /// Insert or fully replace a document row (used by the scanner/fakes, not by stage updates).
    pub fn upsert_document(&self, doc: &Document) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let stages_json = serde_json::to_string(&doc.stages)?;
        conn.execute(
            r#"
            INSERT INTO documents (
                id, title, organization, published_year, document_type, country, language,
                filepath, pdf_url, status, error_message, parsed_folder, stages,
                page_count, word_count, file_format, file_size_mb, toc, toc_classified,
                full_summary, pipeline_elapsed_seconds
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)
            ON CONFLICT(id) DO UPDATE SET
                title=excluded.title, organization=excluded.organization,
                published_year=excluded.published_year, document_type=excluded.document_type,
                country=excluded.country, language=excluded.language, filepath=excluded.filepath,
                pdf_url=excluded.pdf_url, status=excluded.status, error_message=excluded.error_message,
                parsed_folder=excluded.parsed_folder, stages=excluded.stages,
                page_count=excluded.page_count, word_count=excluded.word_count,
                file_format=excluded.file_format, file_size_mb=excluded.file_size_mb,
                toc=excluded.toc, toc_classified=excluded.toc_classified,
                full_summary=excluded.full_summary,
                pipeline_elapsed_seconds=excluded.pipeline_elapsed_seconds
            "#,
            params![
                doc.id,
                doc.title,
                doc.organization,
                doc.published_year,
                doc.document_type,
                doc.country,
                doc.language,
                doc.filepath,
                doc.pdf_url,
                doc.status.as_str(),
                doc.error_message,
                doc.parsed_folder,
                stages_json,
                doc.page_count,
                doc.word_count,
                doc.file_format,
                doc.file_size_mb,
                doc.toc,
                doc.toc_classified as i64,
                doc.full_summary,
                doc.pipeline_elapsed_seconds,
            ],
        )?;
        Ok(())
    }
}

impl DocumentStore for SqliteStore {
    fn get_documents_by_status(&self, status: Status, year: Option<i32>) -> Result<Vec<Document>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = if year.is_some() {
            conn.prepare(
                "SELECT * FROM documents WHERE status = ?1 AND published_year = ?2 ORDER BY id",
            )?
        } else {
            conn.prepare("SELECT * FROM documents WHERE status = ?1 ORDER BY id")?
        };
        let rows = if let Some(y) = year {
            stmt.query_map(params![status.as_str(), y], Self::row_to_document)?
        } else {
            stmt.query_map(params![status.as_str()], Self::row_to_document)?
        };
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn get_years_for_status(&self, status: Status) -> Result<Vec<i32>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT published_year FROM documents \
             WHERE status = ?1 AND published_year IS NOT NULL \
             ORDER BY published_year DESC",
        )?;
        let years = stmt
            .query_map(params![status.as_str()], |row| row.get::<_, i32>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(years)
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM documents WHERE id = ?1",
            params![id],
            Self::row_to_document,
        )
        .optional()
        .map_err(PipelineError::from)
    }

    fn update_document(&self, id: &str, fields: DocumentUpdate, _wait: bool) -> Result<()> {
        with_retry(|| {
            let conn = self.conn.lock().unwrap();
            let existing = conn
                .query_row(
                    "SELECT stages FROM documents WHERE id = ?1",
                    params![id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            let Some(stages_json) = existing else {
                return Err(PipelineError::NotFound(id.to_string()));
            };
            let mut stages: std::collections::HashMap<String, StageRecord> =
                serde_json::from_str(&stages_json).unwrap_or_default();
            if let Some((stage, record)) = &fields.stage {
                stages.insert(stage.clone(), record.clone());
            }
            let stages_json = serde_json::to_string(&stages)?;

            conn.execute(
                r#"
                UPDATE documents SET
                    status = COALESCE(?2, status),
                    error_message = CASE WHEN ?3 THEN ?4 ELSE error_message END,
                    parsed_folder = CASE WHEN ?5 THEN ?6 ELSE parsed_folder END,
                    stages = ?7,
                    page_count = CASE WHEN ?8 THEN ?9 ELSE page_count END,
                    word_count = CASE WHEN ?10 THEN ?11 ELSE word_count END,
                    file_format = CASE WHEN ?12 THEN ?13 ELSE file_format END,
                    file_size_mb = CASE WHEN ?14 THEN ?15 ELSE file_size_mb END,
                    toc = CASE WHEN ?16 THEN ?17 ELSE toc END,
                    toc_classified = COALESCE(?18, toc_classified),
                    full_summary = CASE WHEN ?19 THEN ?20 ELSE full_summary END,
                    pipeline_elapsed_seconds = CASE WHEN ?21 THEN ?22 ELSE pipeline_elapsed_seconds END
                WHERE id = ?1
                "#,
                params![
                    id,
                    fields.status.map(|s| s.as_str().to_string()),
                    fields.error_message.is_some(),
                    fields.error_message.clone().flatten(),
                    fields.parsed_folder.is_some(),
                    fields.parsed_folder.clone().flatten(),
                    stages_json,
                    fields.page_count.is_some(),
                    fields.page_count,
                    fields.word_count.is_some(),
                    fields.word_count,
                    fields.file_format.is_some(),
                    fields.file_format.clone().flatten(),
                    fields.file_size_mb.is_some(),
                    fields.file_size_mb,
                    fields.toc.is_some(),
                    fields.toc.clone().flatten(),
                    fields.toc_classified.map(|b| b as i64),
                    fields.full_summary.is_some(),
                    fields.full_summary.clone().flatten(),
                    fields.pipeline_elapsed_seconds.is_some(),
                    fields.pipeline_elapsed_seconds,
                ],
            )?;
            Ok(())
        })
    }

    fn delete_document_chunks(&self, document_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok(())
    }

    fn clear_all_data(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("DELETE FROM chunks; DELETE FROM documents;")?;
        Ok(())
    }

    fn list_documents(&self, offset: usize, limit: usize) -> Result<Vec<Document>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM documents ORDER BY id LIMIT ?1 OFFSET ?2")?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], Self::row_to_document)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn save_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )?;
        for chunk in chunks {
            let data = serde_json::to_string(chunk)?;
            tx.execute(
                "INSERT INTO chunks (id, document_id, data) VALUES (?1, ?2, ?3)",
                params![chunk.id, document_id, data],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT data FROM chunks WHERE document_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![document_id], |row| row.get::<_, String>(0))?;
        let chunks = rows
            .filter_map(|r| r.ok())
            .filter_map(|data| serde_json::from_str(&data).ok())
            .collect();
        Ok(chunks)
    }

    fn facet_documents(&self, field: &str, filter: Option<&str>) -> Result<Vec<String>> {
        if !FACETABLE_FIELDS.contains(&field) {
            return Err(PipelineError::InvalidField(field.to_string()));
        }
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT DISTINCT {field} FROM documents WHERE {field} IS NOT NULL{} ORDER BY {field}",
            if filter.is_some() {
                format!(" AND {field} LIKE ?1 ESCAPE '\\'")
            } else {
                String::new()
            }
        );
        let mut stmt = conn.prepare(&sql)?;
        let values = if let Some(pattern) = filter {
            let escaped = pattern.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
            stmt.query_map(params![format!("%{escaped}%")], |row| row.get::<_, String>(0))?
                .filter_map(|r| r.ok())
                .collect()
        } else {
            stmt.query_map([], |row| row.get::<_, String>(0))?
                .filter_map(|r| r.ok())
                .collect()
        };
        Ok(values)
    }
}

/// Columns `facet_documents` may query. `field` arrives from CLI/caller
/// input and is validated against this list rather than interpolated
/// directly, since it is spliced into the SQL text (rusqlite has no
/// parameter binding for identifiers).
const FACETABLE_FIELDS: &[&str] = &["organization", "document_type", "country", "language", "status"];

/// Open a connection tuned for single-writer/many-reader concurrency.
fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 30000;
        "#,
    )?;
    Ok(conn)
}

/// Retry a store operation on `SQLITE_BUSY`/`SQLITE_LOCKED` with exponential backoff.
fn with_retry<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let max_retries = 5;
    let mut delay_ms = 100;
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e @ PipelineError::Store(_)) => {
                let msg = e.to_string();
                let is_lock_error =
                    msg.contains("database is locked") || msg.contains("database is busy");
                if is_lock_error && attempt < max_retries - 1 {
                    thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms *= 2;
                    attempt += 1;
                    continue;
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_document() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut doc = Document::new("d1", "pdfs/a/2020/x.pdf");
        doc.published_year = Some(2020);
        store.upsert_document(&doc).unwrap();

        let fetched = store.get_document("d1").unwrap().unwrap();
        assert_eq!(fetched.status, Status::Downloaded);
        assert_eq!(fetched.published_year, Some(2020));
    }

    #[test]
    fn update_document_merges_a_single_stage_without_clobbering_others() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_document(&Document::new("d1", "x.pdf")).unwrap();

        store
            .update_document(
                "d1",
                DocumentUpdate::status(Status::Parsing),
                false,
            )
            .unwrap();
        store
            .update_document(
                "d1",
                DocumentUpdate::status(Status::Parsed).with_stage(
                    "parse",
                    StageRecord {
                        started_at: None,
                        elapsed_seconds: Some(1.5),
                        success: true,
                        error: None,
                    },
                ),
                true,
            )
            .unwrap();
        store
            .update_document(
                "d1",
                DocumentUpdate::status(Status::Summarized).with_stage(
                    "summarize",
                    StageRecord {
                        started_at: None,
                        elapsed_seconds: Some(0.5),
                        success: true,
                        error: None,
                    },
                ),
                true,
            )
            .unwrap();

        let doc = store.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, Status::Summarized);
        assert!(doc.stages.contains_key("parse"));
        assert!(doc.stages.contains_key("summarize"));
    }

    #[test]
    fn facet_documents_rejects_an_unknown_field() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.facet_documents("pdf_url", None).is_err());
    }

    #[test]
    fn facet_documents_returns_distinct_values_matching_a_filter() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (id, org) in [("a", "EPA"), ("b", "EPA"), ("c", "FDA")] {
            let mut doc = Document::new(id, format!("{id}.pdf"));
            doc.organization = Some(org.to_string());
            store.upsert_document(&doc).unwrap();
        }
        let all = store.facet_documents("organization", None).unwrap();
        assert_eq!(all, vec!["EPA".to_string(), "FDA".to_string()]);

        let filtered = store.facet_documents("organization", Some("FD")).unwrap();
        assert_eq!(filtered, vec!["FDA".to_string()]);
    }

    #[test]
    fn years_for_status_are_distinct_and_descending() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (id, year) in [("a", 2022), ("b", 2024), ("c", 2022), ("d", 2019)] {
            let mut doc = Document::new(id, format!("{id}.pdf"));
            doc.published_year = Some(year);
            doc.status = Status::Parsed;
            store.upsert_document(&doc).unwrap();
        }
        let years = store.get_years_for_status(Status::Parsed).unwrap();
        assert_eq!(years, vec![2024, 2022, 2019]);
    }
}
