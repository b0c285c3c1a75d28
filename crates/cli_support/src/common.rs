use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputDirError {
    #[error("{path} already exists and is not empty; pass --force to delete its contents")]
    NotEmpty { path: PathBuf },
    #[error("{path} exists but is not a directory")]
    NotADirectory { path: PathBuf },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What to do with an output directory that already has contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    Refuse,
    /// Delete everything under the directory. Not recoverable.
    Force,
}

impl OverwritePolicy {
    pub fn from_force_flag(force: bool) -> Self {
        if force {
            OverwritePolicy::Force
        } else {
            OverwritePolicy::Refuse
        }
    }
}

/// Outcome of preparing one output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    Created,
    ReusedEmpty,
    Cleared,
}

/// Make `path` an empty directory according to `policy`.
pub fn prepare_output_dir(path: &Path, policy: OverwritePolicy) -> Result<DirState, OutputDirError> {
    let io_err = |source: std::io::Error| OutputDirError::Io {
        path: path.to_path_buf(),
        source,
    };
    if !path.exists() {
        fs::create_dir_all(path).map_err(io_err)?;
        tracing::info!("created {}", path.display());
        return Ok(DirState::Created);
    }
    if !path.is_dir() {
        return Err(OutputDirError::NotADirectory {
            path: path.to_path_buf(),
        });
    }
    let is_empty = fs::read_dir(path).map_err(io_err)?.next().is_none();
    if is_empty {
        return Ok(DirState::ReusedEmpty);
    }
    match policy {
        OverwritePolicy::Refuse => Err(OutputDirError::NotEmpty {
            path: path.to_path_buf(),
        }),
        OverwritePolicy::Force => {
            fs::remove_dir_all(path).map_err(io_err)?;
            fs::create_dir_all(path).map_err(io_err)?;
            tracing::warn!("deleted existing contents of {}", path.display());
            Ok(DirState::Cleared)
        }
    }
}

/// Output locations shared by training tools.
#[derive(Debug, Clone, Args)]
pub struct OutputDirArgs {
    /// Root for validation probability maps (one `T_<epoch>` directory per export).
    #[arg(long = "save-name")]
    pub save_name: Option<PathBuf>,
    /// Directory for the per-epoch metrics log.
    #[arg(long)]
    pub log_path: Option<PathBuf>,
    /// Directory holding the (overwritten) model checkpoint.
    #[arg(long)]
    pub checkpoint_path: Option<PathBuf>,
    /// Delete the contents of existing, non-empty output directories.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

impl OutputDirArgs {
    pub fn policy(&self) -> OverwritePolicy {
        OverwritePolicy::from_force_flag(self.force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a/b");
        assert_eq!(
            prepare_output_dir(&dir, OverwritePolicy::Refuse).unwrap(),
            DirState::Created
        );
        assert!(dir.is_dir());
    }

    #[test]
    fn non_empty_directory_is_kept_without_force() {
        let tmp = tempfile::tempdir().unwrap();
        let keep = tmp.path().join("keep.txt");
        fs::write(&keep, b"x").unwrap();
        let err = prepare_output_dir(tmp.path(), OverwritePolicy::Refuse).unwrap_err();
        assert!(matches!(err, OutputDirError::NotEmpty { .. }));
        assert!(keep.exists());
    }

    #[test]
    fn force_clears_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("out");
        fs::create_dir_all(dir.join("T_0")).unwrap();
        fs::write(dir.join("T_0/a.png"), b"x").unwrap();
        assert_eq!(
            prepare_output_dir(&dir, OverwritePolicy::Force).unwrap(),
            DirState::Cleared
        );
        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn empty_directory_is_reused() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(
            prepare_output_dir(tmp.path(), OverwritePolicy::Refuse).unwrap(),
            DirState::ReusedEmpty
        );
    }
}
