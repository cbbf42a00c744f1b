use rodwatch_core::attributes;
use rodwatch_storage::{ObjectSpec, ZoneSnapshot};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use time::macros::datetime;

pub const CLEAN: &str = "/testZone/home/clean.txt";
pub const NO_MD5: &str = "/testZone/home/sub/no_md5.txt";

/// A temporary zone snapshot and a config file pointing at it.
pub struct Workspace {
    pub dir: TempDir,
    pub config: PathBuf,
}

impl Workspace {
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn object(path: &str, content: &str) -> ObjectSpec {
    ObjectSpec::new(path)
        .with_content(content)
        .with_content(content)
        .created_at(datetime!(2024-03-01 12:00:00 UTC))
        .with_avu(attributes::TYPE, "txt")
        .with_avu(attributes::DCTERMS_CREATED, "2024-03-01T12:00:00Z")
        .with_avu(attributes::DCTERMS_CREATOR, attributes::DEFAULT_CREATOR)
}

/// One clean object and one missing its `md5` attribute.
#[allow(dead_code)]
pub fn workspace() -> Workspace {
    let clean =
        object(CLEAN, "hello").with_avu(attributes::MD5, "5d41402abc4b2a76b9719d911017c592");
    workspace_with(vec![clean, object(NO_MD5, "data")])
}

#[allow(dead_code)]
pub fn workspace_with(objects: Vec<ObjectSpec>) -> Workspace {
    let dir = TempDir::new().unwrap();
    let snapshot_path = dir.path().join("zone.json");
    let snapshot = ZoneSnapshot {
        collections: vec!["/testZone/home".to_string()],
        objects,
    };
    fs::write(&snapshot_path, serde_json::to_string_pretty(&snapshot).unwrap()).unwrap();

    let config = dir.path().join("rodwatch.toml");
    fs::write(
        &config,
        format!(
            "[engine]\nnum_threads = 2\nnum_clients = 1\nacquire_timeout_secs = 5\n\n\
             [storage]\ntype = \"memory\"\nsnapshot = {:?}\n",
            snapshot_path.display().to_string()
        ),
    )
    .unwrap();

    Workspace { dir, config }
}
