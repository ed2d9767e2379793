//! Replica-local relational store (`R/papers.db`, §6).
//!
//! Grounded on the teacher's `TaoDatabase`: a thin `SqlitePool` wrapper with
//! `CREATE TABLE IF NOT EXISTS` schema setup and one async method per query
//! shape, transaction-scoped writes committed by the caller.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::models::{Collection, Record};

pub struct ReplicaStore {
    pool: SqlitePool,
}

impl ReplicaStore {
    /// Opens (creating if absent) the relational store at `db_path`,
    /// enabling foreign-key enforcement per §5's database-session
    /// discipline.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS papers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                abstract_text TEXT,
                venue_full TEXT,
                venue_acronym TEXT,
                year INTEGER,
                volume TEXT,
                issue TEXT,
                pages TEXT,
                paper_type TEXT,
                doi TEXT,
                preprint_id TEXT,
                category TEXT,
                url TEXT,
                notes TEXT,
                artifact_ref TEXT,
                added_at TEXT NOT NULL,
                modified_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS authors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                full_name TEXT NOT NULL UNIQUE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS paper_authors (
                paper_id INTEGER NOT NULL REFERENCES papers(id),
                author_id INTEGER NOT NULL REFERENCES authors(id),
                position INTEGER NOT NULL,
                PRIMARY KEY (paper_id, author_id, position)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS collections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS paper_collections (
                paper_id INTEGER NOT NULL REFERENCES papers(id),
                collection_id INTEGER NOT NULL REFERENCES collections(id),
                PRIMARY KEY (paper_id, collection_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_papers_title ON papers(title)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_papers_doi ON papers(doi)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// All records, authors rendered in position order as a comma-joined
    /// string (mirrors the source's `GROUP_CONCAT(... ORDER BY position)`).
    pub async fn fetch_records(&self) -> Result<Vec<Record>> {
        let rows = sqlx::query(
            "SELECT p.id, p.title, p.abstract_text, p.venue_full, p.venue_acronym,
                    p.year, p.volume, p.issue, p.pages, p.paper_type, p.doi,
                    p.preprint_id, p.category, p.url, p.notes, p.artifact_ref,
                    p.added_at, p.modified_at,
                    (SELECT group_concat(a.full_name, ',')
                       FROM (SELECT a.full_name FROM paper_authors pa
                             JOIN authors a ON a.id = pa.author_id
                             WHERE pa.paper_id = p.id
                             ORDER BY pa.position) a) AS authors
             FROM papers p
             ORDER BY p.id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    pub async fn fetch_collections(&self) -> Result<Vec<Collection>> {
        let rows = sqlx::query("SELECT id, name, description, created_at FROM collections")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_collection).collect()
    }

    pub async fn count_records(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM papers")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    pub async fn count_collections(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM collections")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    pub async fn find_record_id_by_title(&self, title: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT id FROM papers WHERE title = ?")
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    /// Titles of records in `collection_id`, used for the narrower
    /// title-only membership matching of §4.6.
    pub async fn collection_record_titles(&self, collection_id: i64) -> Result<HashSet<String>> {
        let rows = sqlx::query(
            "SELECT p.title FROM papers p
             JOIN paper_collections pc ON pc.paper_id = p.id
             WHERE pc.collection_id = ?",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("title")).collect())
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>> {
        Ok(self.pool.begin().await?)
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<Record> {
    Ok(Record {
        id: row.get("id"),
        title: row.get("title"),
        abstract_text: row.get("abstract_text"),
        venue_full: row.get("venue_full"),
        venue_acronym: row.get("venue_acronym"),
        year: row.get("year"),
        volume: row.get("volume"),
        issue: row.get("issue"),
        pages: row.get("pages"),
        paper_type: row.get("paper_type"),
        doi: row.get("doi"),
        preprint_id: row.get("preprint_id"),
        category: row.get("category"),
        url: row.get("url"),
        notes: row.get("notes"),
        artifact_ref: row.get("artifact_ref"),
        added_at: parse_timestamp(row.get::<Option<String>, _>("added_at")),
        modified_at: parse_timestamp(row.get::<Option<String>, _>("modified_at")),
        authors: row.get::<Option<String>, _>("authors").unwrap_or_default(),
    })
}

fn row_to_collection(row: &sqlx::sqlite::SqliteRow) -> Result<Collection> {
    Ok(Collection {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        created_at: parse_timestamp(row.get::<Option<String>, _>("created_at")),
    })
}

fn parse_timestamp(raw: Option<String>) -> Option<chrono::DateTime<Utc>> {
    raw.and_then(|s| {
        chrono::DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    })
}

/// Inserts a new record row, excluding `id` and the rendered author string
/// (§4.5 step 4), returning the target-side id.
pub async fn insert_record(tx: &mut Transaction<'_, Sqlite>, record: &Record) -> Result<i64> {
    let now = Utc::now();
    let added_at = record.added_at.unwrap_or(now);
    let modified_at = record.modified_at.unwrap_or(now);

    let result = sqlx::query(
        "INSERT INTO papers (
            title, abstract_text, venue_full, venue_acronym, year, volume,
            issue, pages, paper_type, doi, preprint_id, category, url, notes,
            artifact_ref, added_at, modified_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.title)
    .bind(&record.abstract_text)
    .bind(&record.venue_full)
    .bind(&record.venue_acronym)
    .bind(record.year)
    .bind(&record.volume)
    .bind(&record.issue)
    .bind(&record.pages)
    .bind(&record.paper_type)
    .bind(&record.doi)
    .bind(&record.preprint_id)
    .bind(&record.category)
    .bind(&record.url)
    .bind(&record.notes)
    .bind(&record.artifact_ref)
    .bind(added_at.to_rfc3339())
    .bind(modified_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Updates every non-null scalar field of the record found at `record_id`
/// (§4.5's `keep_remote` reconciliation path).
pub async fn update_record_scalars(
    tx: &mut Transaction<'_, Sqlite>,
    record_id: i64,
    record: &Record,
) -> Result<()> {
    sqlx::query(
        "UPDATE papers SET
            title = ?, abstract_text = COALESCE(?, abstract_text),
            venue_full = COALESCE(?, venue_full), venue_acronym = COALESCE(?, venue_acronym),
            year = COALESCE(?, year), volume = COALESCE(?, volume),
            issue = COALESCE(?, issue), pages = COALESCE(?, pages),
            paper_type = COALESCE(?, paper_type), doi = COALESCE(?, doi),
            preprint_id = COALESCE(?, preprint_id), category = COALESCE(?, category),
            url = COALESCE(?, url), notes = COALESCE(?, notes),
            artifact_ref = COALESCE(?, artifact_ref), modified_at = ?
         WHERE id = ?",
    )
    .bind(&record.title)
    .bind(&record.abstract_text)
    .bind(&record.venue_full)
    .bind(&record.venue_acronym)
    .bind(record.year)
    .bind(&record.volume)
    .bind(&record.issue)
    .bind(&record.pages)
    .bind(&record.paper_type)
    .bind(&record.doi)
    .bind(&record.preprint_id)
    .bind(&record.category)
    .bind(&record.url)
    .bind(&record.notes)
    .bind(&record.artifact_ref)
    .bind(Utc::now().to_rfc3339())
    .bind(record_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Upserts an author by exact `full_name`, returning its id either way.
pub async fn upsert_author(tx: &mut Transaction<'_, Sqlite>, full_name: &str) -> Result<i64> {
    sqlx::query("INSERT OR IGNORE INTO authors (full_name) VALUES (?)")
        .bind(full_name)
        .execute(&mut **tx)
        .await?;
    let row = sqlx::query("SELECT id FROM authors WHERE full_name = ?")
        .bind(full_name)
        .fetch_one(&mut **tx)
        .await?;
    Ok(row.get::<i64, _>("id"))
}

pub async fn insert_author_link(
    tx: &mut Transaction<'_, Sqlite>,
    record_id: i64,
    author_id: i64,
    position: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO paper_authors (paper_id, author_id, position) VALUES (?, ?, ?)",
    )
    .bind(record_id)
    .bind(author_id)
    .bind(position)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Replaces the author links of `record_id` with `names` in order
/// (§4.5's `keep_remote` path rebuilds authorship from scratch).
pub async fn replace_author_links(
    tx: &mut Transaction<'_, Sqlite>,
    record_id: i64,
    names: &[String],
) -> Result<()> {
    sqlx::query("DELETE FROM paper_authors WHERE paper_id = ?")
        .bind(record_id)
        .execute(&mut **tx)
        .await?;
    for (position, name) in names.iter().enumerate() {
        let author_id = upsert_author(tx, name).await?;
        insert_author_link(tx, record_id, author_id, position as i64).await?;
    }
    Ok(())
}

pub async fn insert_collection(
    tx: &mut Transaction<'_, Sqlite>,
    collection: &Collection,
) -> Result<i64> {
    let created_at = collection.created_at.unwrap_or_else(Utc::now);
    let result = sqlx::query(
        "INSERT INTO collections (name, description, created_at) VALUES (?, ?, ?)",
    )
    .bind(&collection.name)
    .bind(&collection.description)
    .bind(created_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn insert_membership(
    tx: &mut Transaction<'_, Sqlite>,
    record_id: i64,
    collection_id: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO paper_collections (paper_id, collection_id) VALUES (?, ?)",
    )
    .bind(record_id)
    .bind(collection_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
