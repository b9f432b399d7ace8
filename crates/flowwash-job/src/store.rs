//! On-disk job persistence.
//!
//! The job file is the sole source of truth for resumability, so every
//! rewrite must be crash-consistent: the document is written to
//! `<path>.tmp` and renamed into place. Readers may observe the file
//! briefly absent on filesystems where rename is not atomic with respect
//! to directory listing, but never a torn document.

use std::ffi::OsString;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::{Job, JobError, Result};

/// Load and validate a job document.
pub fn load(path: &Path) -> Result<Job> {
    if !path.exists() {
        return Err(JobError::NotFound(path.to_path_buf()));
    }
    debug!(path = %path.display(), "loading job");
    let text = fs::read_to_string(path)?;
    let job = serde_yaml::from_str(&text)?;
    Ok(job)
}

/// Atomically (re)write a job document.
pub fn save(job: &Job, path: &Path) -> Result<()> {
    let text = serde_yaml::to_string(job)?;
    let tmp_path = tmp_sibling(path);
    fs::write(&tmp_path, text)?;
    fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), "job progress saved");
    Ok(())
}

/// `<path>.tmp`, preserving the original extension.
fn tmp_sibling(path: &Path) -> std::path::PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    name.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Solution, StepOverrides, WashStep};
    use tempfile::TempDir;

    fn job() -> Job {
        Job::new(
            "roundtrip",
            Solution::from([("pbs".to_string(), 10_000.0)]),
            vec![WashStep {
                intermittent_mixing_on_time_s: Some(30.0),
                intermittent_mixing_off_time_s: Some(300.0),
                mix_speed_rpm: 1000.0,
                duration_s: 1800.0,
                solution: Solution::from([("dcm".to_string(), 5000.0)]),
            }],
        )
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.yaml");

        let mut original = job();
        original.record_start();
        original.save_resume_state(
            0,
            Solution::from([("pbs".to_string(), 10_000.0)]),
            Some(StepOverrides {
                duration_s: Some(900.0),
                ..Default::default()
            }),
        );

        save(&original, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.yaml");
        assert!(matches!(load(&path), Err(JobError::NotFound(_))));
    }

    #[test]
    fn load_malformed_document_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "name: [unterminated").unwrap();
        assert!(matches!(load(&path), Err(JobError::Parse(_))));
    }

    #[test]
    fn save_leaves_no_tmp_file_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.yaml");
        save(&job(), &path).unwrap();
        assert!(path.exists());
        assert!(!tmp_sibling(&path).exists());
    }

    #[test]
    fn save_overwrites_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.yaml");

        let mut snapshot = job();
        save(&snapshot, &path).unwrap();

        snapshot.record_start();
        snapshot.record_finish();
        save(&snapshot, &path).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.history.events.len(), 2);
    }
}
