//! Port Pool.
//!
//! Reserves unique `(backend_port, frontend_port)` pairs from a bounded
//! range, one pair per workflow. Slot `k` maps to
//! `(port_range_start + k, port_range_start + port_range_size + k)`, so a
//! frontend port is always exactly `port_range_size` above its backend —
//! the default config yields `frontend = backend + 100`.
//! Persisted as JSON at `.sdlc/ports.json`; an in-process mutex plus an
//! advisory file lock (`fs2`) serialize access across both threads and
//! OS processes, since multiple workflow driver processes share this file.

use crate::config::{SdlcConfig, sdlc_dir};
use crate::errors::PortPoolError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fs2::FileExt;
use sdlc_common::PortAllocation;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

const PORTS_FILE: &str = "ports.json";

pub struct PortPool {
    path: PathBuf,
    range_start: u16,
    range_size: u16,
    lock: Mutex<()>,
}

impl PortPool {
    pub fn new(project_dir: impl Into<std::path::PathBuf>, config: &SdlcConfig) -> Self {
        let project_dir = project_dir.into();
        Self {
            path: sdlc_dir(&project_dir).join(PORTS_FILE),
            range_start: config.port_range_start,
            range_size: config.port_range_size,
            lock: Mutex::new(()),
        }
    }

    /// Idempotent reservation: returns the existing allocation if present,
    /// otherwise the lowest unused slot.
    pub fn reserve(&self, workflow_id: &str) -> Result<(u16, u16), PortPoolError> {
        let _guard = self.lock.lock().unwrap();
        let file_lock = self.open_locked()?;
        let mut allocations = self.read(&file_lock)?;

        if let Some(existing) = allocations.get(workflow_id) {
            return Ok((existing.backend_port, existing.frontend_port));
        }

        let used_slots: std::collections::BTreeSet<u16> = allocations
            .values()
            .map(|a| a.backend_port - self.range_start)
            .collect();

        let slot = (0..self.range_size)
            .find(|s| !used_slots.contains(s))
            .ok_or(PortPoolError::Exhausted {
                pool_size: self.range_size as usize,
            })?;

        let backend = self.range_start + slot;
        let frontend = self.range_start + self.range_size + slot;
        allocations.insert(
            workflow_id.to_string(),
            PortAllocation {
                backend_port: backend,
                frontend_port: frontend,
                allocated_at: Utc::now(),
            },
        );
        self.write(&file_lock, &allocations)?;
        Ok((backend, frontend))
    }

    pub fn release(&self, workflow_id: &str) -> Result<bool, PortPoolError> {
        let _guard = self.lock.lock().unwrap();
        let file_lock = self.open_locked()?;
        let mut allocations = self.read(&file_lock)?;
        let removed = allocations.remove(workflow_id).is_some();
        if removed {
            self.write(&file_lock, &allocations)?;
        }
        Ok(removed)
    }

    pub fn allocation_of(&self, workflow_id: &str) -> Result<Option<(u16, u16)>, PortPoolError> {
        let _guard = self.lock.lock().unwrap();
        let file_lock = self.open_locked()?;
        let allocations = self.read(&file_lock)?;
        Ok(allocations
            .get(workflow_id)
            .map(|a| (a.backend_port, a.frontend_port)))
    }

    /// Remove allocations older than `max_age`, returning the count removed.
    pub fn cleanup_stale(&self, max_age: std::time::Duration) -> Result<usize, PortPoolError> {
        let _guard = self.lock.lock().unwrap();
        let file_lock = self.open_locked()?;
        let mut allocations = self.read(&file_lock)?;
        let cutoff: DateTime<Utc> = ChronoDuration::from_std(max_age)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = allocations.len();
        allocations.retain(|_, a| a.allocated_at >= cutoff);
        let removed = before - allocations.len();
        if removed > 0 {
            self.write(&file_lock, &allocations)?;
        }
        Ok(removed)
    }

    pub fn list(&self) -> Result<BTreeMap<String, PortAllocation>, PortPoolError> {
        let _guard = self.lock.lock().unwrap();
        let file_lock = self.open_locked()?;
        self.read(&file_lock)
    }

    fn open_locked(&self) -> Result<std::fs::File, PortPoolError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;
        file.lock_exclusive()?;
        Ok(file)
    }

    fn read(&self, file: &std::fs::File) -> Result<BTreeMap<String, PortAllocation>, PortPoolError> {
        use std::io::Read;
        let mut raw = String::new();
        let mut f = file.try_clone()?;
        std::io::Seek::seek(&mut f, std::io::SeekFrom::Start(0))?;
        f.read_to_string(&mut raw)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write(
        &self,
        file: &std::fs::File,
        allocations: &BTreeMap<String, PortAllocation>,
    ) -> Result<(), PortPoolError> {
        use std::io::Write;
        let mut f = file.try_clone()?;
        let json = serde_json::to_string_pretty(allocations)?;
        f.set_len(0)?;
        std::io::Seek::seek(&mut f, std::io::SeekFrom::Start(0))?;
        f.write_all(json.as_bytes())?;
        f.sync_all()?;
        Ok(())
    }
}

impl Drop for PortPool {
    fn drop(&mut self) {
        // File lock is released automatically when `open_locked`'s handle
        // drops at the end of each call; nothing to release here.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool(dir: &std::path::Path) -> PortPool {
        PortPool::new(dir, &SdlcConfig::default())
    }

    #[test]
    fn reserve_is_idempotent() {
        let dir = tempdir().unwrap();
        let pool = pool(dir.path());
        let a = pool.reserve("wf-1").unwrap();
        let b = pool.reserve("wf-1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn reserve_picks_lowest_free_slot() {
        let dir = tempdir().unwrap();
        let pool = pool(dir.path());
        let (b0, f0) = pool.reserve("wf-1").unwrap();
        assert_eq!((b0, f0), (9100, 9200));
        let (b1, _) = pool.reserve("wf-2").unwrap();
        assert_eq!(b1, 9101);
        pool.release("wf-1").unwrap();
        let (b2, _) = pool.reserve("wf-3").unwrap();
        assert_eq!(b2, 9100, "lowest freed slot must be reused first");
    }

    #[test]
    fn frontend_offset_matches_pool_size() {
        let dir = tempdir().unwrap();
        let pool = pool(dir.path());
        let (backend, frontend) = pool.reserve("wf-1").unwrap();
        assert_eq!(frontend, backend + 100);
    }

    #[test]
    fn exhaustion_returns_error() {
        let dir = tempdir().unwrap();
        let mut config = SdlcConfig::default();
        config.port_range_size = 2;
        let pool = PortPool::new(dir.path(), &config);
        pool.reserve("wf-1").unwrap();
        pool.reserve("wf-2").unwrap();
        let err = pool.reserve("wf-3").unwrap_err();
        assert!(matches!(err, PortPoolError::Exhausted { pool_size: 2 }));
    }

    #[test]
    fn cleanup_stale_removes_old_allocations() {
        let dir = tempdir().unwrap();
        let pool = pool(dir.path());
        pool.reserve("wf-1").unwrap();
        let removed = pool.cleanup_stale(std::time::Duration::from_secs(0)).unwrap();
        assert_eq!(removed, 1);
        assert!(pool.allocation_of("wf-1").unwrap().is_none());
    }

    #[test]
    fn boundary_at_pool_size_101_on_100_pool() {
        let dir = tempdir().unwrap();
        let pool = pool(dir.path()); // size 100
        for i in 0..100 {
            pool.reserve(&format!("wf-{i}")).unwrap();
        }
        assert!(pool.reserve("wf-100").is_err());
    }
}
