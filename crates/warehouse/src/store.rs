//! Warehouse store trait and the SQLite implementation.

use crate::error::WarehouseResult;
use crate::models::{ProductLocationRow, SampleRow};
use async_trait::async_trait;
use rodwatch_core::{WarehouseKey, WarehouseRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Read-only access to warehouse reference records.
#[async_trait]
pub trait WarehouseStore: Send + Sync + 'static {
    /// Find the record for a key. A miss is `Ok(None)`.
    async fn find_by_identifier(&self, key: &WarehouseKey)
    -> WarehouseResult<Option<WarehouseRecord>>;

    /// Check database connectivity.
    async fn health_check(&self) -> WarehouseResult<()>;

    fn backend_name(&self) -> &'static str;
}

const SQLITE_PRODUCT_QUERY: &str = "SELECT l.id_product, l.irods_root_collection, \
     l.irods_data_relative_path, l.md5, s.id_sample_lims, st.id_study_lims, \
     CAST(s.consent_withdrawn AS INTEGER) AS consent_withdrawn \
     FROM seq_product_irods_locations l \
     LEFT JOIN sample s ON s.id_sample_tmp = l.id_sample_tmp \
     LEFT JOIN study st ON st.id_study_tmp = l.id_study_tmp \
     WHERE l.id_product = ? \
     ORDER BY l.id DESC LIMIT 1";

const SQLITE_SAMPLE_QUERY: &str = "SELECT id_sample_lims, \
     CAST(consent_withdrawn AS INTEGER) AS consent_withdrawn \
     FROM sample WHERE id_sample_lims = ? \
     ORDER BY id_sample_tmp DESC LIMIT 1";

/// SQLite copy of the warehouse tables, used for local snapshots and tests.
pub struct SqliteWarehouse {
    pool: Pool<Sqlite>,
}

impl SqliteWarehouse {
    /// Open (creating if needed) a SQLite warehouse file.
    pub async fn new(path: impl AsRef<Path>) -> WarehouseResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the warehouse tables if they do not exist.
    pub async fn migrate(&self) -> WarehouseResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sample (
                id_sample_tmp INTEGER PRIMARY KEY AUTOINCREMENT,
                id_lims TEXT NOT NULL DEFAULT 'SQSCP',
                id_sample_lims TEXT NOT NULL,
                name TEXT,
                consent_withdrawn INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS study (
                id_study_tmp INTEGER PRIMARY KEY AUTOINCREMENT,
                id_lims TEXT NOT NULL DEFAULT 'SQSCP',
                id_study_lims TEXT NOT NULL,
                name TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS seq_product_irods_locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                id_product TEXT NOT NULL,
                seq_platform_name TEXT,
                pipeline_name TEXT,
                irods_root_collection TEXT NOT NULL,
                irods_data_relative_path TEXT,
                md5 TEXT,
                id_sample_tmp INTEGER REFERENCES sample(id_sample_tmp),
                id_study_tmp INTEGER REFERENCES study(id_study_tmp)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_locations_product ON seq_product_irods_locations(id_product)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sample_lims ON sample(id_sample_lims)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert a sample and return its row id.
    pub async fn insert_sample(
        &self,
        id_sample_lims: &str,
        consent_withdrawn: bool,
    ) -> WarehouseResult<i64> {
        let result =
            sqlx::query("INSERT INTO sample (id_sample_lims, consent_withdrawn) VALUES (?, ?)")
                .bind(id_sample_lims)
                .bind(i64::from(consent_withdrawn))
                .execute(&self.pool)
                .await?;
        Ok(result.last_insert_rowid())
    }

    /// Insert a study and return its row id.
    pub async fn insert_study(&self, id_study_lims: &str) -> WarehouseResult<i64> {
        let result = sqlx::query("INSERT INTO study (id_study_lims) VALUES (?)")
            .bind(id_study_lims)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Insert a product location linked to optional sample and study rows.
    pub async fn insert_product_location(
        &self,
        location: &NewProductLocation<'_>,
    ) -> WarehouseResult<()> {
        sqlx::query(
            "INSERT INTO seq_product_irods_locations \
             (id_product, irods_root_collection, irods_data_relative_path, md5, id_sample_tmp, id_study_tmp) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(location.id_product)
        .bind(location.root_collection)
        .bind(location.relative_path)
        .bind(location.md5)
        .bind(location.sample_row)
        .bind(location.study_row)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

/// Values for a new `seq_product_irods_locations` row.
#[derive(Debug, Clone, Default)]
pub struct NewProductLocation<'a> {
    pub id_product: &'a str,
    pub root_collection: &'a str,
    pub relative_path: Option<&'a str>,
    pub md5: Option<&'a str>,
    pub sample_row: Option<i64>,
    pub study_row: Option<i64>,
}

#[async_trait]
impl WarehouseStore for SqliteWarehouse {
    async fn find_by_identifier(
        &self,
        key: &WarehouseKey,
    ) -> WarehouseResult<Option<WarehouseRecord>> {
        match key {
            WarehouseKey::Product(id) => {
                let row = sqlx::query_as::<_, ProductLocationRow>(SQLITE_PRODUCT_QUERY)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                Ok(row.map(ProductLocationRow::into_record))
            }
            WarehouseKey::Sample(id) => {
                let row = sqlx::query_as::<_, SampleRow>(SQLITE_SAMPLE_QUERY)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                Ok(row.map(SampleRow::into_record))
            }
        }
    }

    async fn health_check(&self) -> WarehouseResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_product_and_sample() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteWarehouse::new(dir.path().join("mlwh.db")).await.unwrap();

        let sample = store.insert_sample("S1", true).await.unwrap();
        let study = store.insert_study("1000").await.unwrap();
        store
            .insert_product_location(&NewProductLocation {
                id_product: "p1",
                root_collection: "/seq/illumina/runs/12345/",
                relative_path: Some("12345_1#1.cram"),
                md5: Some("abc"),
                sample_row: Some(sample),
                study_row: Some(study),
            })
            .await
            .unwrap();

        let record = store
            .find_by_identifier(&WarehouseKey::Product("p1".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.expected_checksum.as_deref(), Some("abc"));
        assert_eq!(
            record.expected_location.as_deref(),
            Some("/seq/illumina/runs/12345/12345_1#1.cram")
        );
        assert_eq!(record.sample_id.as_deref(), Some("S1"));
        assert_eq!(record.study_id.as_deref(), Some("1000"));
        assert!(record.consent_withdrawn);

        let sample = store
            .find_by_identifier(&WarehouseKey::Sample("S1".into()))
            .await
            .unwrap()
            .unwrap();
        assert!(sample.consent_withdrawn);
        assert!(sample.expected_checksum.is_none());

        assert!(
            store
                .find_by_identifier(&WarehouseKey::Product("missing".into()))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_product_without_sample_link() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteWarehouse::new(dir.path().join("mlwh.db")).await.unwrap();
        store
            .insert_product_location(&NewProductLocation {
                id_product: "p2",
                root_collection: "/seq/ont/expt",
                ..NewProductLocation::default()
            })
            .await
            .unwrap();

        let record = store
            .find_by_identifier(&WarehouseKey::Product("p2".into()))
            .await
            .unwrap()
            .unwrap();
        assert!(!record.consent_withdrawn);
        assert_eq!(record.sample_id, None);
        assert_eq!(record.expected_location.as_deref(), Some("/seq/ont/expt"));
    }
}
