use std::fs::{File, create_dir, rename};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::debug;
use rustix::fs::{Mode, chmod};

use crate::error::StoreError;

/// Create a directory and any missing parents. Directories created here get
/// `mode`; existing ones are left alone.
pub fn mkdir_p<P: AsRef<Path>>(path: P, mode: Mode) -> Result<(), StoreError> {
    for dir in descending_dirs(path.as_ref()) {
        match create_dir(&dir) {
            Err(e) if e.kind() == ErrorKind::AlreadyExists => (),
            Err(e) => return Err(StoreError::io(dir, e)),
            Ok(()) => {
                debug!("Created directory {}", dir.display());
                chmod(dir.as_path(), mode).map_err(|e| StoreError::io(&dir, e.into()))?;
            }
        }
    }
    Ok(())
}

// Given a path, return it and its parents in descending order.
// For example, "/a/b/c" returns ["/a", "/a/b", "/a/b/c"].
fn descending_dirs(path: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = path
        .ancestors()
        .filter(|p| !p.as_os_str().is_empty() && p.parent().is_some())
        .map(Path::to_path_buf)
        .collect();
    dirs.reverse();
    dirs
}

/// Replace the contents of `path` with `contents` so that readers see either
/// the old file or the new one, never a partial write.
pub fn atomic_write<P: AsRef<Path>>(path: P, contents: &[u8]) -> Result<(), StoreError> {
    let p = path.as_ref();
    let dir_name = match p.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let file_name = p.file_name().ok_or_else(|| {
        StoreError::io(
            p,
            io::Error::new(ErrorKind::InvalidInput, "path has no file name"),
        )
    })?;
    let tmp_path = dir_name.join(format!(".{}.tmp", file_name.to_string_lossy()));

    {
        let mut f = File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
        f.write_all(contents)
            .and_then(|_| f.sync_all())
            .map_err(|e| StoreError::io(&tmp_path, e))?;
    }

    rename(&tmp_path, p).map_err(|e| StoreError::io(p, e))?;
    File::open(dir_name)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| StoreError::io(dir_name, e))
}
