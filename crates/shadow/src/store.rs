//! On-disk persistence of shadow run outputs.
//!
//! One JSON file per run, named `shadow_run_NNNN.json`. Runs can be reused by
//! later audits as long as their seed and population digest match.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use molmia_core::{MiaError, Result};

use crate::run::ShadowRun;

const PREFIX: &str = "shadow_run_";
const SUFFIX: &str = ".json";

/// Directory of persisted shadow runs.
#[derive(Clone, Debug)]
pub struct ShadowStore {
    dir: PathBuf,
}

impl ShadowStore {
    /// Open `dir`, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| MiaError::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: usize) -> PathBuf {
        self.dir.join(format!("{PREFIX}{run_id:04}{SUFFIX}"))
    }

    /// Persist a run, replacing any earlier file for the same run id.
    pub fn save(&self, run: &ShadowRun) -> Result<()> {
        let path = self.path_for(run.run_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(run)?;
        fs::write(&tmp, bytes).map_err(|e| MiaError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| MiaError::io(&path, e))?;
        debug!(run_id = run.run_id, path = %path.display(), "saved shadow run");
        Ok(())
    }

    /// Load one run. Returns `None` when no file exists for `run_id`.
    pub fn load(&self, run_id: usize) -> Result<Option<ShadowRun>> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| MiaError::io(&path, e))?;
        let run: ShadowRun = serde_json::from_slice(&bytes)?;
        if run.run_id != run_id {
            return Err(MiaError::invalid(format!(
                "{} holds run {} instead of {run_id}",
                path.display(),
                run.run_id
            )));
        }
        Ok(Some(run))
    }

    /// Load every stored run, ascending by run id.
    pub fn load_all(&self) -> Result<Vec<ShadowRun>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| MiaError::io(&self.dir, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MiaError::io(&self.dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name
                .strip_prefix(PREFIX)
                .and_then(|rest| rest.strip_suffix(SUFFIX))
                .and_then(|digits| digits.parse::<usize>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        let mut runs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(run) = self.load(id)? {
                runs.push(run);
            }
        }
        Ok(runs)
    }
}
