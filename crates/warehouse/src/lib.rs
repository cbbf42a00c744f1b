//! Read-only access to the multi-LIMS warehouse for rodwatch.
//!
//! Provides the reference records objects are verified against:
//! - Expected checksums and canonical locations of sequencing products
//! - Sample and study identifiers
//! - Sample consent state

pub mod error;
pub mod fixed;
pub mod lookup;
pub mod models;
pub mod mysql;
pub mod store;

pub use error::{WarehouseError, WarehouseResult};
pub use fixed::FixedWarehouse;
pub use lookup::{LookupStats, WarehouseLookup};
pub use mysql::MySqlWarehouse;
pub use store::{NewProductLocation, SqliteWarehouse, WarehouseStore};

use rodwatch_core::config::WarehouseConfig;
use std::sync::Arc;

/// Create a warehouse store from configuration. `None` means no warehouse.
pub async fn from_config(
    config: &WarehouseConfig,
) -> WarehouseResult<Option<Arc<dyn WarehouseStore>>> {
    match config {
        WarehouseConfig::None => Ok(None),
        WarehouseConfig::Sqlite { path } => {
            let store = SqliteWarehouse::new(path).await?;
            Ok(Some(Arc::new(store) as Arc<dyn WarehouseStore>))
        }
        WarehouseConfig::Mysql {
            url,
            host,
            port,
            username,
            password,
            database,
            max_connections,
        } => {
            let store = if let Some(url) = url {
                tracing::info!("Connecting to MySQL warehouse using connection URL");
                MySqlWarehouse::from_url(url, *max_connections).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                MySqlWarehouse::from_params(
                    host,
                    port.unwrap_or(3306),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *max_connections,
                )
                .await?
            } else {
                return Err(WarehouseError::Config(
                    "mysql config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Some(Arc::new(store) as Arc<dyn WarehouseStore>))
        }
    }
}
