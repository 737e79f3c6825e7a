//! JSON-file job persistence (§4.8 "Persists a JSON list of jobs at a
//! configured path").

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::CronJob;

pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Returns an empty list if the file does not exist yet.
    pub fn load(&self) -> Result<Vec<CronJob>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, jobs: &[CronJob]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(jobs)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CronPayload, JobKind};

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn round_trips_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json"));
        let job = CronJob::new(
            "heartbeat",
            JobKind::Every { interval_ms: 60_000 },
            CronPayload {
                message: "ping".into(),
                ..Default::default()
            },
        );
        store.save(&[job.clone()]).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, job.id);
    }
}
