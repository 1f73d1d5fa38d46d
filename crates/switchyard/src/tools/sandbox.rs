//! Function sandbox pool.
//!
//! Executes user-supplied function code for tools of the function variant.
//! Sandboxes are node processes run in dependency-hashed working directories:
//! installing a dependency set once buys every later execution with the same
//! set a warm start.
//!
//! Pool protocol:
//! 1. `dep_hash = hex(sha256(sorted "name@version" joined ","))[..16]`
//! 2. Reuse the entry for that hash while its dir exists, it is younger than
//!    5 minutes of idleness, and it has served fewer than 50 executions;
//!    otherwise install a fresh dir and destroy the old one.
//! 3. The user code's module system is detected by pattern (ESM wins when
//!    both styles appear); the entry file extension (`.mjs`/`.cjs`) selects
//!    the loader.
//! 4. The wrapper prints exactly one JSON line:
//!    `{"success":true,"result":…}` or `{"success":false,"error":…}`.
//!
//! Limits: wall-clock timeout (SIGTERM, then SIGKILL after 5 s), combined
//! stdout+stderr cap of 1 MiB.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::Instant;

use crate::config::SandboxConfig;
use crate::database::models::ToolConfig;

const ENTRY_TTL: Duration = Duration::from_secs(5 * 60);
const MAX_ENTRY_USES: u32 = 50;
const OUTPUT_CAP: usize = 1024 * 1024;
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("not a function tool")]
    NotAFunctionTool,

    #[error("sandbox setup failed: {0}")]
    Setup(String),

    #[error("dependency install failed: {0}")]
    Install(String),

    #[error("sandbox_timeout: execution exceeded {0:?}")]
    Timeout(Duration),

    #[error("output_too_large: combined output exceeded {OUTPUT_CAP} bytes")]
    OutputTooLarge,

    #[error("sandbox process failed: {0}")]
    Process(String),

    #[error("function reported failure: {0}")]
    Function(String),
}

/// Which module system the user code is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Esm,
    Cjs,
}

impl ModuleKind {
    fn extension(&self) -> &'static str {
        match self {
            ModuleKind::Esm => "mjs",
            ModuleKind::Cjs => "cjs",
        }
    }
}

/// Detect the module system from the code text. Explicit ESM indicators win
/// over CJS when both appear; bare scripts default to CJS.
pub fn detect_module_kind(code: &str) -> ModuleKind {
    let has_esm =
        (code.contains("import ") && code.contains(" from ")) || code.contains("export ");
    let has_cjs = code.contains("require(") || code.contains("module.exports");

    match (has_esm, has_cjs) {
        (true, true) => {
            tracing::warn!("function code mixes ESM and CJS indicators, treating as ESM");
            ModuleKind::Esm
        }
        (true, false) => ModuleKind::Esm,
        (false, true) => ModuleKind::Cjs,
        (false, false) => ModuleKind::Cjs,
    }
}

/// Order-independent hash of a dependency set.
pub fn dependency_hash(deps: &BTreeMap<String, String>) -> String {
    let joined = deps
        .iter()
        .map(|(name, version)| format!("{name}@{version}"))
        .collect::<Vec<_>>()
        .join(",");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    let mut hash = hex::encode(hasher.finalize());
    hash.truncate(16);
    hash
}

#[derive(Debug, Clone)]
struct SandboxEntry {
    dir: PathBuf,
    last_used: Instant,
    use_count: u32,
    #[allow(dead_code)]
    deps: BTreeMap<String, String>,
}

impl SandboxEntry {
    fn is_reusable(&self) -> bool {
        self.dir.exists()
            && self.last_used.elapsed() < ENTRY_TTL
            && self.use_count < MAX_ENTRY_USES
    }
}

/// Dependency-hashed cache of installed sandbox directories.
pub struct FunctionSandboxPool {
    config: SandboxConfig,
    entries: Mutex<HashMap<String, SandboxEntry>>,
    /// Per-hash creation locks: installs for one dependency set are mutually
    /// exclusive, installs for different sets proceed in parallel.
    creation_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FunctionSandboxPool {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Execute a function tool and return the value it produced.
    pub async fn execute_function_tool(
        &self,
        tool_id: &str,
        args: &Value,
        config: &ToolConfig,
    ) -> Result<Value, SandboxError> {
        let ToolConfig::Function {
            execute_code,
            dependencies,
            timeout_ms,
        } = config
        else {
            return Err(SandboxError::NotAFunctionTool);
        };

        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(self.config.timeout_secs));

        let (dir, fresh, dep_hash) = self.acquire_entry(dependencies).await?;

        let kind = detect_module_kind(execute_code);
        let exec_id = crate::short_id();
        let user_path = dir.join(format!("user-{exec_id}.{}", kind.extension()));
        let entry_path = dir.join(format!("entry-{exec_id}.{}", kind.extension()));

        let result = self
            .run_in_dir(
                &dir,
                &user_path,
                &entry_path,
                execute_code,
                kind,
                args,
                timeout,
            )
            .await;

        // Per-execution files are disposable either way.
        let _ = std::fs::remove_file(&user_path);
        let _ = std::fs::remove_file(&entry_path);

        if result.is_err() && fresh {
            tracing::warn!(tool = tool_id, hash = %dep_hash, "destroying freshly created sandbox after failure");
            self.destroy_entry(&dep_hash);
        }

        result
    }

    async fn run_in_dir(
        &self,
        dir: &Path,
        user_path: &Path,
        entry_path: &Path,
        execute_code: &str,
        kind: ModuleKind,
        args: &Value,
        timeout: Duration,
    ) -> Result<Value, SandboxError> {
        std::fs::write(user_path, execute_code)
            .map_err(|e| SandboxError::Setup(format!("write user code: {e}")))?;
        let user_file = user_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SandboxError::Setup("entry file name".into()))?;
        std::fs::write(entry_path, wrapper_source(kind, user_file))
            .map_err(|e| SandboxError::Setup(format!("write entry file: {e}")))?;

        let args_json =
            serde_json::to_string(args).map_err(|e| SandboxError::Setup(e.to_string()))?;

        let mut child = Command::new(&self.config.node_binary)
            .arg(entry_path)
            .arg(&args_json)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Setup(format!("spawn {}: {e}", self.config.node_binary)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let budget = Arc::new(AtomicUsize::new(OUTPUT_CAP));

        let collect = async {
            let (out, err) = tokio::join!(
                read_capped(stdout, budget.clone()),
                read_capped(stderr, budget.clone())
            );
            let status = child
                .wait()
                .await
                .map_err(|e| SandboxError::Process(format!("wait: {e}")))?;
            Ok::<_, SandboxError>((status, out?, err?))
        };

        let (status, stdout_buf, stderr_buf) = match tokio::time::timeout(timeout, collect).await {
            Ok(Ok(output)) => output,
            Ok(Err(SandboxError::OutputTooLarge)) => {
                let _ = child.kill().await;
                return Err(SandboxError::OutputTooLarge);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                terminate_with_grace(&mut child).await;
                return Err(SandboxError::Timeout(timeout));
            }
        };

        if !status.success() {
            let stderr_text = String::from_utf8_lossy(&stderr_buf);
            return Err(SandboxError::Process(format!(
                "exit {:?}: {}",
                status.code(),
                stderr_text.trim()
            )));
        }

        parse_result_line(&stdout_buf)
    }

    /// Get a reusable entry for the dependency set, installing one if needed.
    /// Returns `(dir, freshly_created, dep_hash)`.
    async fn acquire_entry(
        &self,
        deps: &BTreeMap<String, String>,
    ) -> Result<(PathBuf, bool, String), SandboxError> {
        let dep_hash = dependency_hash(deps);
        let lock = self.creation_lock(&dep_hash);
        let _guard = lock.lock().await;

        let stale_dir = {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| SandboxError::Setup("pool lock poisoned".into()))?;
            match entries.get_mut(&dep_hash) {
                Some(entry) if entry.is_reusable() => {
                    entry.use_count += 1;
                    entry.last_used = Instant::now();
                    return Ok((entry.dir.clone(), false, dep_hash));
                }
                Some(entry) => {
                    let dir = entry.dir.clone();
                    entries.remove(&dep_hash);
                    Some(dir)
                }
                None => None,
            }
        };
        if let Some(dir) = stale_dir {
            let _ = std::fs::remove_dir_all(dir);
        }

        let dir = std::env::temp_dir().join(format!("switchyard-sbx-{dep_hash}-{}", crate::short_id()));
        std::fs::create_dir_all(&dir)
            .map_err(|e| SandboxError::Setup(format!("create sandbox dir: {e}")))?;
        std::fs::write(dir.join("package.json"), package_manifest(deps))
            .map_err(|e| SandboxError::Setup(format!("write package.json: {e}")))?;

        if !deps.is_empty() {
            if let Err(e) = self.install_dependencies(&dir).await {
                let _ = std::fs::remove_dir_all(&dir);
                return Err(e);
            }
        }

        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SandboxError::Setup("pool lock poisoned".into()))?;
        entries.insert(
            dep_hash.clone(),
            SandboxEntry {
                dir: dir.clone(),
                last_used: Instant::now(),
                use_count: 1,
                deps: deps.clone(),
            },
        );
        Ok((dir, true, dep_hash))
    }

    async fn install_dependencies(&self, dir: &Path) -> Result<(), SandboxError> {
        let install = Command::new(&self.config.npm_binary)
            .args(["install", "--omit=dev", "--no-audit", "--no-fund"])
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let timeout = Duration::from_secs(self.config.install_timeout_secs);
        let output = tokio::time::timeout(timeout, install)
            .await
            .map_err(|_| SandboxError::Install(format!("install exceeded {timeout:?}")))?
            .map_err(|e| SandboxError::Install(e.to_string()))?;

        if !output.status.success() {
            return Err(SandboxError::Install(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    fn creation_lock(&self, dep_hash: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.creation_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(dep_hash.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn destroy_entry(&self, dep_hash: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            if let Some(entry) = entries.remove(dep_hash) {
                let _ = std::fs::remove_dir_all(entry.dir);
            }
        }
    }

    /// `(use_count, dir)` for a pooled entry, if present.
    pub fn entry_stats(&self, deps: &BTreeMap<String, String>) -> Option<(u32, PathBuf)> {
        let dep_hash = dependency_hash(deps);
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&dep_hash).map(|e| (e.use_count, e.dir.clone())))
    }
}

/// SIGTERM, wait out the grace period, then SIGKILL.
async fn terminate_with_grace(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let termed = std::process::Command::new("kill")
            .args(["-s", "TERM", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if termed && tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}

async fn read_capped(
    reader: Option<impl tokio::io::AsyncRead + Unpin>,
    budget: Arc<AtomicUsize>,
) -> Result<Vec<u8>, SandboxError> {
    let mut buf = Vec::new();
    let Some(mut reader) = reader else {
        return Ok(buf);
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| SandboxError::Process(format!("read output: {e}")))?;
        if n == 0 {
            return Ok(buf);
        }
        let remaining = budget.fetch_sub(n, Ordering::SeqCst);
        if n > remaining {
            return Err(SandboxError::OutputTooLarge);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// The last JSON line of stdout is the protocol; everything before it is the
/// function's own logging.
fn parse_result_line(stdout: &[u8]) -> Result<Value, SandboxError> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| SandboxError::Process("no output from function".into()))?;

    let parsed: Value = serde_json::from_str(line.trim())
        .map_err(|e| SandboxError::Process(format!("unparseable result line: {e}")))?;

    if parsed.get("success").and_then(|v| v.as_bool()).unwrap_or(false) {
        Ok(parsed.get("result").cloned().unwrap_or(Value::Null))
    } else {
        let message = parsed
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown function error")
            .to_string();
        Err(SandboxError::Function(message))
    }
}

fn package_manifest(deps: &BTreeMap<String, String>) -> String {
    serde_json::to_string_pretty(&serde_json::json!({
        "name": "switchyard-sandbox",
        "private": true,
        "dependencies": deps,
    }))
    .unwrap_or_else(|_| "{}".to_string())
}

fn wrapper_source(kind: ModuleKind, user_file: &str) -> String {
    match kind {
        ModuleKind::Cjs => format!(
            r#"const mod = require('./{user_file}');
const fn = typeof mod === 'function' ? mod : (mod.default || mod.execute || mod.handler);
(async () => {{
  try {{
    if (typeof fn !== 'function') throw new Error('no callable export found');
    const args = JSON.parse(process.argv[2] || '{{}}');
    const result = await fn(args);
    process.stdout.write(JSON.stringify({{ success: true, result: result === undefined ? null : result }}) + '\n');
  }} catch (err) {{
    process.stdout.write(JSON.stringify({{ success: false, error: String((err && err.message) || err) }}) + '\n');
  }}
}})();
"#
        ),
        ModuleKind::Esm => format!(
            r#"import * as mod from './{user_file}';
const fn = typeof mod.default === 'function' ? mod.default : (mod.execute || mod.handler);
(async () => {{
  try {{
    if (typeof fn !== 'function') throw new Error('no callable export found');
    const args = JSON.parse(process.argv[2] || '{{}}');
    const result = await fn(args);
    process.stdout.write(JSON.stringify({{ success: true, result: result === undefined ? null : result }}) + '\n');
  }} catch (err) {{
    process.stdout.write(JSON.stringify({{ success: false, error: String((err && err.message) || err) }}) + '\n');
  }}
}})();
"#
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_hash_is_order_independent() {
        let a = BTreeMap::from([
            ("lodash".to_string(), "4.17.21".to_string()),
            ("axios".to_string(), "1.6.0".to_string()),
        ]);
        let mut b = BTreeMap::new();
        b.insert("axios".to_string(), "1.6.0".to_string());
        b.insert("lodash".to_string(), "4.17.21".to_string());

        assert_eq!(dependency_hash(&a), dependency_hash(&b));
        assert_eq!(dependency_hash(&a).len(), 16);
    }

    #[test]
    fn dependency_hash_distinguishes_versions() {
        let a = BTreeMap::from([("axios".to_string(), "1.6.0".to_string())]);
        let b = BTreeMap::from([("axios".to_string(), "1.7.0".to_string())]);
        assert_ne!(dependency_hash(&a), dependency_hash(&b));
    }

    #[test]
    fn module_detection_table() {
        assert_eq!(
            detect_module_kind("import axios from 'axios';\nexport default () => 1;"),
            ModuleKind::Esm
        );
        assert_eq!(
            detect_module_kind("const _ = require('lodash');\nmodule.exports = () => 1;"),
            ModuleKind::Cjs
        );
        // Both present resolves to ESM.
        assert_eq!(
            detect_module_kind("import x from 'x';\nconst y = require('y');\nexport default x;"),
            ModuleKind::Esm
        );
        // Neither defaults to CJS.
        assert_eq!(detect_module_kind("async function run() { return 1; }"), ModuleKind::Cjs);
    }

    #[test]
    fn parse_result_line_takes_last_json_line() {
        let stdout = b"debug: starting\n{\"success\":true,\"result\":{\"n\":7}}\n";
        let value = parse_result_line(stdout).unwrap();
        assert_eq!(value["n"], 7);
    }

    #[test]
    fn parse_result_line_propagates_function_failure() {
        let stdout = b"{\"success\":false,\"error\":\"boom\"}\n";
        match parse_result_line(stdout) {
            Err(SandboxError::Function(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn entry_reuse_rules() {
        let entry = SandboxEntry {
            dir: std::env::temp_dir(),
            last_used: Instant::now(),
            use_count: 1,
            deps: BTreeMap::new(),
        };
        assert!(entry.is_reusable());

        let worn_out = SandboxEntry {
            use_count: MAX_ENTRY_USES,
            ..entry.clone()
        };
        assert!(!worn_out.is_reusable());

        let missing_dir = SandboxEntry {
            dir: PathBuf::from("/definitely/not/here"),
            ..entry
        };
        assert!(!missing_dir.is_reusable());
    }

    #[test]
    fn wrapper_emits_protocol_line() {
        let cjs = wrapper_source(ModuleKind::Cjs, "user-1.cjs");
        assert!(cjs.contains("require('./user-1.cjs')"));
        assert!(cjs.contains(r#"success: true"#));

        let esm = wrapper_source(ModuleKind::Esm, "user-1.mjs");
        assert!(esm.contains("import * as mod from './user-1.mjs'"));
    }

    #[test]
    fn package_manifest_lists_dependencies() {
        let deps = BTreeMap::from([("axios".to_string(), "1.6.0".to_string())]);
        let manifest = package_manifest(&deps);
        let parsed: Value = serde_json::from_str(&manifest).unwrap();
        assert_eq!(parsed["dependencies"]["axios"], "1.6.0");
        assert_eq!(parsed["private"], true);
    }

    #[tokio::test]
    async fn acquire_entry_reuses_until_worn_out() {
        let pool = FunctionSandboxPool::new(SandboxConfig::default());
        let deps = BTreeMap::new();

        let (dir1, fresh1, _) = pool.acquire_entry(&deps).await.unwrap();
        assert!(fresh1);
        let (dir2, fresh2, _) = pool.acquire_entry(&deps).await.unwrap();
        assert!(!fresh2);
        assert_eq!(dir1, dir2);
        assert_eq!(pool.entry_stats(&deps).unwrap().0, 2);

        // Wear the entry out; the next acquire allocates a fresh dir.
        if let Ok(mut entries) = pool.entries.lock() {
            if let Some(entry) = entries.get_mut(&dependency_hash(&deps)) {
                entry.use_count = MAX_ENTRY_USES;
            }
        }
        let (dir3, fresh3, _) = pool.acquire_entry(&deps).await.unwrap();
        assert!(fresh3);
        assert_ne!(dir1, dir3);
        assert!(!dir1.exists());

        let _ = std::fs::remove_dir_all(dir3);
    }
}
