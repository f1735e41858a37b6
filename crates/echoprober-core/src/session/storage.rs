//! Offline session files
//!
//! A session named `walk1` stores its capture as `walk1.pcm` (raw 16-bit LE
//! wire-format samples, no header) and its motion data as `walk1.csv`, both
//! directly in the storage directory. Sessions started without a name are
//! named after the local start time, `YYYYMMDD_HHMMSS`.

use crate::error::ProbeError;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Extension of raw capture files
pub const AUDIO_EXTENSION: &str = "pcm";

/// Extension of motion CSV files
pub const MOTION_EXTENSION: &str = "csv";

/// Directory that holds offline session files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStorage {
    dir: PathBuf,
}

impl SessionStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if it does not exist yet
    pub fn ensure_dir(&self) -> Result<(), ProbeError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| ProbeError::file(&self.dir, e))
    }

    pub fn audio_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, AUDIO_EXTENSION))
    }

    pub fn motion_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, MOTION_EXTENSION))
    }

    /// Session name for `requested`, or a timestamp name when none was given
    ///
    /// Names that already have files on disk get a `_2`, `_3`, ... suffix so
    /// earlier sessions are never overwritten.
    pub fn session_name(&self, requested: Option<&str>, now: DateTime<Local>) -> String {
        let base = requested
            .map(sanitize_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| timestamp_name(now));
        self.unique_name(&base)
    }

    fn unique_name(&self, base: &str) -> String {
        let taken = |name: &str| self.audio_path(name).exists() || self.motion_path(name).exists();
        if !taken(base) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !taken(&candidate) {
                tracing::debug!(base, name = %candidate, "Session name taken, using suffix");
                return candidate;
            }
            n += 1;
        }
    }
}

/// `YYYYMMDD_HHMMSS` in local time
pub fn timestamp_name(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Keep a user-supplied name inside the storage directory
fn sanitize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 12, 30, 9).unwrap()
    }

    #[test]
    fn test_timestamp_name() {
        assert_eq!(timestamp_name(noon()), "20240305_123009");
    }

    #[test]
    fn test_paths() {
        let storage = SessionStorage::new("/data/sessions");
        assert_eq!(storage.audio_path("walk"), PathBuf::from("/data/sessions/walk.pcm"));
        assert_eq!(storage.motion_path("walk"), PathBuf::from("/data/sessions/walk.csv"));
    }

    #[test]
    fn test_requested_name_used() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SessionStorage::new(dir.path());
        assert_eq!(storage.session_name(Some("long_hall"), noon()), "long_hall");
        assert_eq!(storage.session_name(Some("  "), noon()), "20240305_123009");
        assert_eq!(storage.session_name(None, noon()), "20240305_123009");
    }

    #[test]
    fn test_name_collision_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SessionStorage::new(dir.path());
        std::fs::write(storage.audio_path("walk"), b"").unwrap();
        std::fs::write(storage.motion_path("walk_2"), b"").unwrap();
        assert_eq!(storage.session_name(Some("walk"), noon()), "walk_3");
    }

    #[test]
    fn test_name_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SessionStorage::new(dir.path());
        assert_eq!(storage.session_name(Some("../etc/x"), noon()), "_etc_x");
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SessionStorage::new(dir.path().join("a").join("b"));
        storage.ensure_dir().unwrap();
        assert!(storage.dir().is_dir());
    }
}
