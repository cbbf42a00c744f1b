//! MySQL warehouse store.

use crate::error::WarehouseResult;
use crate::models::{ProductLocationRow, SampleRow};
use crate::store::WarehouseStore;
use async_trait::async_trait;
use rodwatch_core::{WarehouseKey, WarehouseRecord};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::{MySql, Pool};
use std::str::FromStr;

const MYSQL_PRODUCT_QUERY: &str = "SELECT l.id_product, l.irods_root_collection, \
     l.irods_data_relative_path, l.md5, s.id_sample_lims, st.id_study_lims, \
     CAST(s.consent_withdrawn AS SIGNED) AS consent_withdrawn \
     FROM seq_product_irods_locations l \
     LEFT JOIN sample s ON s.id_sample_tmp = l.id_sample_tmp \
     LEFT JOIN study st ON st.id_study_tmp = l.id_study_tmp \
     WHERE l.id_product = ? \
     ORDER BY l.id DESC LIMIT 1";

const MYSQL_SAMPLE_QUERY: &str = "SELECT id_sample_lims, \
     CAST(COALESCE(consent_withdrawn, 0) AS SIGNED) AS consent_withdrawn \
     FROM sample WHERE id_sample_lims = ? \
     ORDER BY id_sample_tmp DESC LIMIT 1";

/// Read-only connection to the multi-LIMS warehouse on MySQL.
pub struct MySqlWarehouse {
    pool: Pool<MySql>,
}

impl MySqlWarehouse {
    /// Connect using a full connection URL.
    pub async fn from_url(url: &str, max_connections: u32) -> WarehouseResult<Self> {
        let opts = MySqlConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections).await
    }

    /// Connect using individual parameters, keeping the password out of URLs.
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        max_connections: u32,
    ) -> WarehouseResult<Self> {
        let mut opts = MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }
        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            "Connecting to MySQL warehouse"
        );

        Self::connect(opts, max_connections).await
    }

    async fn connect(opts: MySqlConnectOptions, max_connections: u32) -> WarehouseResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl WarehouseStore for MySqlWarehouse {
    async fn find_by_identifier(
        &self,
        key: &WarehouseKey,
    ) -> WarehouseResult<Option<WarehouseRecord>> {
        match key {
            WarehouseKey::Product(id) => {
                let row = sqlx::query_as::<_, ProductLocationRow>(MYSQL_PRODUCT_QUERY)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                Ok(row.map(ProductLocationRow::into_record))
            }
            WarehouseKey::Sample(id) => {
                let row = sqlx::query_as::<_, SampleRow>(MYSQL_SAMPLE_QUERY)
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
        "mysql"
    }
}
