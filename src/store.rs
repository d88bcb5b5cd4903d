// src/store.rs
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, info};

use crate::drivers::error::RppgError;
use crate::model::RppgResult;
use crate::types::SessionId;

/// Results kept by the stores; older ones are evicted.
pub const MAX_STORED_RESULTS: usize = 100;

/// Where completed results go. Failures here never affect the session itself.
pub trait ResultStore: Send + Sync {
    fn save(&self, result: &RppgResult) -> Result<(), RppgError>;
    fn upload(&self, result: &RppgResult) -> Result<(), RppgError>;
    /// Newest first.
    fn recent(&self, limit: usize) -> Result<Vec<RppgResult>, RppgError>;
    fn find(&self, session_id: &SessionId) -> Result<Option<RppgResult>, RppgError>;
}

/// Newest-first insert that replaces an entry with the same session id.
fn insert_newest(results: &mut VecDeque<RppgResult>, result: &RppgResult) {
    results.retain(|r| r.session_id != result.session_id);
    results.push_front(result.clone());
    results.truncate(MAX_STORED_RESULTS);
}

/// Keeps results as one JSON array on disk. Uploads are spooled as one file per
/// session into an outbox directory for a separate sync process.
pub struct JsonFileStore {
    path: PathBuf,
    outbox: Option<PathBuf>,
    guard: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            outbox: None,
            guard: Mutex::new(()),
        }
    }

    pub fn with_outbox(mut self, dir: impl Into<PathBuf>) -> Self {
        self.outbox = Some(dir.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<VecDeque<RppgResult>, RppgError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(VecDeque::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(VecDeque::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, results: &VecDeque<RppgResult>) -> Result<(), RppgError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(results)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ResultStore for JsonFileStore {
    fn save(&self, result: &RppgResult) -> Result<(), RppgError> {
        let _guard = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        let mut results = self.read_all()?;
        insert_newest(&mut results, result);
        self.write_all(&results)?;
        debug!(
            "saved session {} ({} stored)",
            result.session_id,
            results.len()
        );
        Ok(())
    }

    fn upload(&self, result: &RppgResult) -> Result<(), RppgError> {
        let Some(outbox) = &self.outbox else {
            return Err(RppgError::NetworkFailure("no upload outbox configured".into()));
        };
        let network = |e: std::io::Error| RppgError::NetworkFailure(e.to_string());
        fs::create_dir_all(outbox).map_err(network)?;
        let body = serde_json::to_vec(result).map_err(|e| RppgError::NetworkFailure(e.to_string()))?;
        let path = outbox.join(format!("{}.json", result.session_id));
        fs::write(&path, body).map_err(network)?;
        info!("queued session {} for upload", result.session_id);
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<RppgResult>, RppgError> {
        let _guard = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self.read_all()?.into_iter().take(limit).collect())
    }

    fn find(&self, session_id: &SessionId) -> Result<Option<RppgResult>, RppgError> {
        let _guard = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self
            .read_all()?
            .into_iter()
            .find(|r| &r.session_id == session_id))
    }
}

/// In-process store, for tests and hosts without a filesystem.
#[derive(Default)]
pub struct MemoryStore {
    results: Mutex<VecDeque<RppgResult>>,
    uploaded: Mutex<Vec<SessionId>>,
    offline: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose uploads always fail.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    pub fn uploaded(&self) -> Vec<SessionId> {
        self.uploaded.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl ResultStore for MemoryStore {
    fn save(&self, result: &RppgResult) -> Result<(), RppgError> {
        let mut results = self.results.lock().unwrap_or_else(|p| p.into_inner());
        insert_newest(&mut results, result);
        Ok(())
    }

    fn upload(&self, result: &RppgResult) -> Result<(), RppgError> {
        if self.offline {
            return Err(RppgError::NetworkFailure("offline".into()));
        }
        self.uploaded
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(result.session_id.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<RppgResult>, RppgError> {
        let results = self.results.lock().unwrap_or_else(|p| p.into_inner());
        Ok(results.iter().take(limit).cloned().collect())
    }

    fn find(&self, session_id: &SessionId) -> Result<Option<RppgResult>, RppgError> {
        let results = self.results.lock().unwrap_or_else(|p| p.into_inner());
        Ok(results.iter().find(|r| &r.session_id == session_id).cloned())
    }
}
