//! Shared fixtures for warehouse integration tests.

use rodwatch_warehouse::{NewProductLocation, SqliteWarehouse};
use tempfile::TempDir;

/// A SQLite warehouse seeded with two Illumina products and a withdrawn sample.
pub async fn seeded_warehouse() -> (TempDir, SqliteWarehouse) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteWarehouse::new(dir.path().join("mlwh.db")).await.unwrap();

    let s1 = store.insert_sample("S1", false).await.unwrap();
    let s2 = store.insert_sample("S2", true).await.unwrap();
    let study = store.insert_study("1000").await.unwrap();

    for (product, sample, file, md5) in [
        ("p1", s1, "12345_1#1.cram", "8d777f385d3dfec8815d20f7496026dc"),
        ("p2", s2, "12345_1#2.cram", "0cc175b9c0f1b6a831c399e269772661"),
    ] {
        store
            .insert_product_location(&NewProductLocation {
                id_product: product,
                root_collection: "/seq/illumina/runs/12345",
                relative_path: Some(file),
                md5: Some(md5),
                sample_row: Some(sample),
                study_row: Some(study),
            })
            .await
            .unwrap();
    }

    (dir, store)
}
