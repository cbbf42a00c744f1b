//! Storage client driving a `baton-do` subprocess.
//!
//! Each client owns one long-lived `baton-do` process and exchanges one JSON
//! document per line with it. Replica maintenance that `baton-do` does not
//! cover is delegated to the icommands `itrim`, `irepl` and `ichksum`.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ClientFactory, StorageClient};
use async_trait::async_trait;
use rodwatch_core::{AccessControl, AccessLevel, Avu, Entry, EntryKind, Replica, path};
use serde::Deserialize;
use serde_json::{Value, json};
use std::process::Stdio;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// iRODS error code for a missing collection or data object.
const NOT_FOUND_CODES: &[i64] = &[-310000, -808000];

/// Options shared by every client a factory creates.
#[derive(Clone, Debug)]
pub struct BatonOptions {
    pub program: String,
    pub args: Vec<String>,
    /// Resource receiving new replicas.
    pub resource: Option<String>,
    pub timeout: Duration,
}

struct BatonProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// A connection backed by one `baton-do` process.
pub struct BatonClient {
    options: BatonOptions,
    process: Mutex<BatonProcess>,
}

impl BatonClient {
    /// Start a `baton-do` process.
    pub async fn start(options: BatonOptions) -> StorageResult<Self> {
        let mut cmd = Command::new(&options.program);
        cmd.args(&options.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            StorageError::Transport(format!("failed to spawn {}: {e}", options.program))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| StorageError::Transport("baton-do stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StorageError::Transport("baton-do stdout unavailable".to_string()))?;

        debug!(program = %options.program, pid = ?child.id(), "Started baton-do");
        Ok(Self {
            options,
            process: Mutex::new(BatonProcess {
                child,
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
        })
    }

    /// Send one request and wait for its response.
    async fn call(&self, operation: &str, arguments: Value, target: Value) -> StorageResult<Value> {
        let request = json!({
            "operation": operation,
            "arguments": arguments,
            "target": target,
        });
        let mut line = serde_json::to_string(&request)
            .map_err(|e| StorageError::InvalidResponse(format!("encode request: {e}")))?;
        line.push('\n');

        let mut process = self.process.lock().await;
        process
            .stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::Transport(format!("write to baton-do: {e}")))?;
        process
            .stdin
            .flush()
            .await
            .map_err(|e| StorageError::Transport(format!("flush baton-do: {e}")))?;

        let response = match tokio::time::timeout(self.options.timeout, process.stdout.next_line())
            .await
        {
            Ok(Ok(Some(response))) => response,
            Ok(Ok(None)) => {
                return Err(StorageError::Transport(
                    "baton-do closed its output".to_string(),
                ));
            }
            Ok(Err(e)) => return Err(StorageError::Transport(format!("read baton-do: {e}"))),
            Err(_) => {
                return Err(StorageError::Transport(format!(
                    "baton-do did not respond within {:?}",
                    self.options.timeout
                )));
            }
        };
        drop(process);

        parse_response(&response)
    }

    async fn list_item(&self, item: &str, arguments: Value) -> StorageResult<Value> {
        self.call("list", arguments, target_for(item)).await
    }

    async fn list_object(&self, obj_path: &str, arguments: Value) -> StorageResult<Value> {
        let (collection, name) = path::split(obj_path);
        self.call(
            "list",
            arguments,
            json!({"collection": collection, "data_object": name}),
        )
        .await
    }

    /// Run an icommand to completion.
    async fn icommand(&self, program: &str, args: &[String]) -> StorageResult<()> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| StorageError::Transport(format!("failed to spawn {program}: {e}")))?;
        let output = tokio::time::timeout(self.options.timeout, child.wait_with_output())
            .await
            .map_err(|_| StorageError::Transport(format!("{program} timed out")))??;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StorageError::protocol(
                i64::from(output.status.code().unwrap_or(-1)),
                format!("{program} failed: {}", stderr.trim()),
            ));
        }
        Ok(())
    }
}

fn target_for(item: &str) -> Value {
    json!({"collection": path::normalize(item)})
}

#[derive(Debug, Deserialize)]
struct BatonError {
    code: i64,
    message: String,
}

/// Extract the result of a response, mapping server errors.
fn parse_response(line: &str) -> StorageResult<Value> {
    let mut value: Value = serde_json::from_str(line)
        .map_err(|e| StorageError::InvalidResponse(format!("{e}: {line}")))?;

    let error = value
        .get("error")
        .or_else(|| value.get("target").and_then(|t| t.get("error")))
        .cloned();
    if let Some(error) = error {
        let error: BatonError = serde_json::from_value(error)
            .map_err(|e| StorageError::InvalidResponse(format!("malformed error: {e}")))?;
        if NOT_FOUND_CODES.contains(&error.code) {
            return Err(StorageError::NotFound(error.message));
        }
        return Err(StorageError::Protocol {
            code: error.code,
            message: error.message,
        });
    }

    match value.get_mut("result") {
        Some(result) => match result.get_mut("single") {
            Some(single) => Ok(single.take()),
            None => match result.get_mut("multiple") {
                Some(multiple) => Ok(multiple.take()),
                None => Ok(result.take()),
            },
        },
        None => Err(StorageError::InvalidResponse(format!(
            "response has no result: {line}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct BatonReplicate {
    number: u32,
    #[serde(default)]
    resource: String,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    valid: bool,
}

#[derive(Debug, Deserialize)]
struct BatonAvu {
    attribute: String,
    value: String,
    #[serde(default)]
    units: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatonAccess {
    owner: String,
    #[serde(default)]
    zone: Option<String>,
    level: String,
}

fn field<T: for<'de> Deserialize<'de>>(value: &Value, name: &str) -> StorageResult<Vec<T>> {
    match value.get(name) {
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| StorageError::InvalidResponse(format!("malformed {name}: {e}"))),
        None => Ok(Vec::new()),
    }
}

fn baton_avus(avus: &[Avu]) -> Value {
    Value::Array(
        avus.iter()
            .map(|a| match &a.units {
                Some(units) => json!({"attribute": a.attribute, "value": a.value, "units": units}),
                None => json!({"attribute": a.attribute, "value": a.value}),
            })
            .collect(),
    )
}

#[async_trait]
impl StorageClient for BatonClient {
    #[instrument(skip(self), fields(backend = "baton"))]
    async fn list_collection(&self, collection: &str) -> StorageResult<Vec<Entry>> {
        let result = self
            .list_item(collection, json!({"contents": true}))
            .await?;
        let contents = result
            .get("contents")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut entries = Vec::with_capacity(contents.len());
        for item in contents {
            let coll = item
                .get("collection")
                .and_then(Value::as_str)
                .ok_or_else(|| StorageError::InvalidResponse("entry without collection".into()))?;
            match item.get("data_object").and_then(Value::as_str) {
                Some(name) => entries.push(Entry::DataObject(path::join(coll, name))),
                None => entries.push(Entry::Collection(path::normalize(coll))),
            }
        }
        Ok(entries)
    }

    #[instrument(skip(self), fields(backend = "baton"))]
    async fn exists(&self, item: &str) -> StorageResult<Option<EntryKind>> {
        match self.list_object(item, json!({})).await {
            Ok(_) => return Ok(Some(EntryKind::DataObject)),
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match self.list_item(item, json!({})).await {
            Ok(_) => Ok(Some(EntryKind::Collection)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_replicas(&self, obj_path: &str) -> StorageResult<Vec<Replica>> {
        let result = self
            .list_object(obj_path, json!({"replicate": true, "checksum": true}))
            .await?;
        let replicates: Vec<BatonReplicate> = field(&result, "replicates")?;
        Ok(replicates
            .into_iter()
            .map(|r| Replica {
                index: r.number,
                location: r.resource,
                checksum: r.checksum.filter(|c| !c.is_empty()),
                valid: r.valid,
            })
            .collect())
    }

    async fn get_metadata(&self, obj_path: &str) -> StorageResult<Vec<Avu>> {
        let result = self.list_object(obj_path, json!({"avu": true})).await?;
        let avus: Vec<BatonAvu> = field(&result, "avus")?;
        Ok(avus
            .into_iter()
            .map(|a| Avu {
                attribute: a.attribute,
                value: a.value,
                units: a.units.filter(|u| !u.is_empty()),
            })
            .collect())
    }

    #[instrument(skip(self, avus), fields(backend = "baton", count = avus.len()))]
    async fn add_metadata(&self, obj_path: &str, avus: &[Avu]) -> StorageResult<()> {
        let (collection, name) = path::split(obj_path);
        self.call(
            "metamod",
            json!({"operation": "add"}),
            json!({"collection": collection, "data_object": name, "avus": baton_avus(avus)}),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, avus), fields(backend = "baton", count = avus.len()))]
    async fn remove_metadata(&self, obj_path: &str, avus: &[Avu]) -> StorageResult<()> {
        let (collection, name) = path::split(obj_path);
        self.call(
            "metamod",
            json!({"operation": "rem"}),
            json!({"collection": collection, "data_object": name, "avus": baton_avus(avus)}),
        )
        .await?;
        Ok(())
    }

    /// Calculates and records the checksum with `ichksum -f`, since the
    /// server offers no way to compute one without storing it.
    async fn compute_checksum(&self, obj_path: &str, replica: u32) -> StorageResult<String> {
        self.icommand(
            "ichksum",
            &["-f".into(), "-n".into(), replica.to_string(), obj_path.into()],
        )
        .await?;
        self.get_replicas(obj_path)
            .await?
            .into_iter()
            .find(|r| r.index == replica)
            .and_then(|r| r.checksum)
            .ok_or_else(|| {
                StorageError::InvalidResponse(format!(
                    "no checksum recorded on {obj_path} replica {replica}"
                ))
            })
    }

    /// The server only records checksums it calculates itself, so this
    /// succeeds when the recorded value already matches.
    async fn set_checksum(
        &self,
        obj_path: &str,
        replica: u32,
        checksum: &str,
    ) -> StorageResult<()> {
        let recorded = self
            .get_replicas(obj_path)
            .await?
            .into_iter()
            .find(|r| r.index == replica)
            .and_then(|r| r.checksum);
        match recorded {
            Some(recorded) if rodwatch_core::checksums_equal(&recorded, checksum) => Ok(()),
            _ => Err(StorageError::Unsupported(format!(
                "cannot record arbitrary checksum {checksum} on {obj_path} replica {replica}"
            ))),
        }
    }

    async fn invalidate_replica(&self, obj_path: &str, replica: u32) -> StorageResult<()> {
        warn!(path = %obj_path, replica, "Trimming replica");
        self.icommand(
            "itrim",
            &[
                "-N".into(),
                "1".into(),
                "-n".into(),
                replica.to_string(),
                obj_path.into(),
            ],
        )
        .await
    }

    async fn replicate(
        &self,
        obj_path: &str,
        source: u32,
        target: Option<u32>,
    ) -> StorageResult<()> {
        let resource = match target {
            Some(index) => self
                .get_replicas(obj_path)
                .await?
                .into_iter()
                .find(|r| r.index == index)
                .map(|r| r.location)
                .ok_or_else(|| StorageError::NotFound(format!("{obj_path} replica {index}")))?,
            None => self.options.resource.clone().ok_or_else(|| {
                StorageError::Unsupported(
                    "no replication resource configured for new replicas".to_string(),
                )
            })?,
        };

        let mut args: Vec<String> = vec!["-n".into(), source.to_string(), "-R".into(), resource];
        if target.is_some() {
            args.insert(0, "-U".into());
        }
        args.push(obj_path.into());
        self.icommand("irepl", &args).await
    }

    async fn get_permissions(&self, obj_path: &str) -> StorageResult<Vec<AccessControl>> {
        let result = self.list_object(obj_path, json!({"acl": true})).await?;
        let access: Vec<BatonAccess> = field(&result, "access")?;
        access
            .into_iter()
            .map(|a| {
                let level = a
                    .level
                    .parse::<AccessLevel>()
                    .map_err(|e| StorageError::InvalidResponse(e.to_string()))?;
                Ok(AccessControl {
                    owner: a.owner,
                    zone: a.zone,
                    level,
                })
            })
            .collect()
    }

    #[instrument(skip(self, changes), fields(backend = "baton", count = changes.len()))]
    async fn set_permissions(
        &self,
        obj_path: &str,
        changes: &[AccessControl],
    ) -> StorageResult<()> {
        let (collection, name) = path::split(obj_path);
        let access: Vec<Value> = changes
            .iter()
            .map(|c| match &c.zone {
                Some(zone) => json!({"owner": c.owner, "zone": zone, "level": c.level.as_str()}),
                None => json!({"owner": c.owner, "level": c.level.as_str()}),
            })
            .collect();
        self.call(
            "chmod",
            json!({"recurse": false}),
            json!({"collection": collection, "data_object": name, "access": access}),
        )
        .await?;
        Ok(())
    }

    async fn timestamp(&self, obj_path: &str) -> StorageResult<Option<OffsetDateTime>> {
        let result = self
            .list_object(obj_path, json!({"timestamp": true}))
            .await?;
        let timestamps = result
            .get("timestamps")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let earliest = timestamps
            .iter()
            .filter_map(|t| t.get("created").and_then(Value::as_str))
            .filter_map(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
            .min();
        Ok(earliest)
    }

    fn backend_name(&self) -> &'static str {
        "baton"
    }

    async fn health_check(&self) -> StorageResult<()> {
        let mut process = self.process.lock().await;
        match process.child.try_wait()? {
            Some(status) => Err(StorageError::Transport(format!(
                "baton-do exited with {status}"
            ))),
            None => Ok(()),
        }
    }
}

/// Starts a new `baton-do` process per client.
#[derive(Clone, Debug)]
pub struct BatonFactory {
    options: BatonOptions,
}

impl BatonFactory {
    pub fn new(options: BatonOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ClientFactory for BatonFactory {
    async fn connect(&self) -> StorageResult<Box<dyn StorageClient>> {
        let client = BatonClient::start(self.options.clone()).await?;
        client.health_check().await?;
        Ok(Box::new(client))
    }

    fn backend_name(&self) -> &'static str {
        "baton"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_result() {
        let line = r#"{"operation":"list","result":{"single":{"collection":"/z/c","data_object":"a.txt","avus":[{"attribute":"md5","value":"abc"}]}}}"#;
        let value = parse_response(line).unwrap();
        let avus: Vec<BatonAvu> = field(&value, "avus").unwrap();
        assert_eq!(avus.len(), 1);
        assert_eq!(avus[0].attribute, "md5");
    }

    #[test]
    fn test_parse_error_codes() {
        let line = r#"{"operation":"list","error":{"code":-310000,"message":"Path '/z/x' does not exist"}}"#;
        assert!(matches!(parse_response(line), Err(StorageError::NotFound(_))));

        let line = r#"{"operation":"metamod","target":{"error":{"code":-818000,"message":"access denied"}}}"#;
        match parse_response(line) {
            Err(StorageError::Protocol { code, .. }) => assert_eq!(code, -818000),
            other => panic!("expected protocol error, got {other:?}"),
        }

        assert!(matches!(
            parse_response("not json"),
            Err(StorageError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_replicates_deserialize() {
        let value = serde_json::json!({
            "replicates": [
                {"number": 0, "resource": "resc0", "checksum": "abc", "valid": true},
                {"number": 1, "resource": "resc1", "checksum": "", "valid": false}
            ]
        });
        let replicates: Vec<BatonReplicate> = field(&value, "replicates").unwrap();
        assert_eq!(replicates.len(), 2);
        assert!(!replicates[1].valid);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_transport_error() {
        let options = BatonOptions {
            program: "/nonexistent/baton-do".to_string(),
            args: Vec::new(),
            resource: None,
            timeout: Duration::from_secs(1),
        };
        match BatonFactory::new(options).connect().await {
            Err(e) => assert!(e.is_transient()),
            Ok(_) => panic!("expected spawn failure"),
        }
    }
}
