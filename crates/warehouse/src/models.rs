//! Database rows read from the warehouse tables.

use rodwatch_core::{WarehouseKey, WarehouseRecord, path};
use sqlx::FromRow;

/// A product location joined with its sample and study.
#[derive(Debug, Clone, FromRow)]
pub struct ProductLocationRow {
    pub id_product: String,
    pub irods_root_collection: String,
    pub irods_data_relative_path: Option<String>,
    pub md5: Option<String>,
    pub id_sample_lims: Option<String>,
    pub id_study_lims: Option<String>,
    pub consent_withdrawn: Option<i64>,
}

impl ProductLocationRow {
    /// Full path of the product's main data object.
    pub fn location(&self) -> String {
        match self.irods_data_relative_path.as_deref() {
            Some(relative) if !relative.is_empty() => {
                path::join(&self.irods_root_collection, relative)
            }
            _ => path::normalize(&self.irods_root_collection),
        }
    }

    pub fn into_record(self) -> WarehouseRecord {
        let location = self.location();
        WarehouseRecord {
            key: WarehouseKey::Product(self.id_product),
            expected_checksum: self.md5.filter(|m| !m.trim().is_empty()),
            expected_location: Some(location),
            sample_id: self.id_sample_lims,
            study_id: self.id_study_lims,
            consent_withdrawn: self.consent_withdrawn.unwrap_or(0) != 0,
        }
    }
}

/// A sample record.
#[derive(Debug, Clone, FromRow)]
pub struct SampleRow {
    pub id_sample_lims: String,
    pub consent_withdrawn: i64,
}

impl SampleRow {
    pub fn into_record(self) -> WarehouseRecord {
        WarehouseRecord {
            key: WarehouseKey::Sample(self.id_sample_lims.clone()),
            expected_checksum: None,
            expected_location: None,
            sample_id: Some(self.id_sample_lims),
            study_id: None,
            consent_withdrawn: self.consent_withdrawn != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_row_into_record() {
        let row = ProductLocationRow {
            id_product: "p1".into(),
            irods_root_collection: "/seq/illumina/runs/47/47995/lane1/plex1/".into(),
            irods_data_relative_path: Some("47995_1#1.cram".into()),
            md5: Some(" ".into()),
            id_sample_lims: Some("S1".into()),
            id_study_lims: Some("1000".into()),
            consent_withdrawn: Some(1),
        };
        let record = row.into_record();
        assert_eq!(
            record.expected_location.as_deref(),
            Some("/seq/illumina/runs/47/47995/lane1/plex1/47995_1#1.cram")
        );
        assert_eq!(record.expected_checksum, None);
        assert!(record.consent_withdrawn);
        assert_eq!(record.key, WarehouseKey::Product("p1".into()));
    }
}
