use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CoreError, Result};

pub fn dir_exists(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| meta.is_dir())
}

/// True for anything at `path` that resolves, following symlinks.
pub fn path_exists(path: &Path) -> bool {
    fs::metadata(path).is_ok()
}

/// True if `path` itself is a symlink, whether or not its target exists.
pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink())
}

/// True when `link` is a symlink whose target resolves to the same directory
/// as `shared`.
pub fn is_symlink_to(link: &Path, shared: &Path) -> bool {
    if !is_symlink(link) {
        return false;
    }
    match (fs::canonicalize(link), fs::canonicalize(shared)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Names of the immediate subdirectories of `dir`, sorted. A missing
/// directory yields an empty list.
pub fn list_sub_dirs(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(CoreError::io("read dir", dir, err)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| CoreError::io("read dir", dir, err))?;
        let is_dir = entry.file_type().is_ok_and(|ft| ft.is_dir());
        if !is_dir {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Read and decode a JSON file. `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(CoreError::io("read", path, err)),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|source| CoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Encode `value` as pretty JSON with a trailing newline and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T, mode: u32) -> Result<()> {
    let mut data = serde_json::to_vec_pretty(value).map_err(|source| CoreError::Encode {
        what: "json",
        source,
    })?;
    data.push(b'\n');
    write_atomic(path, &data, mode)
}

/// Replace `path` with `data` so readers see either the old or the new
/// contents, never a torn write. The temp file lives next to the target so
/// the final rename stays on one filesystem.
pub fn write_atomic(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = temp_sibling(path);

    let result = (|| -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .map_err(|err| CoreError::io("create temp", &tmp, err))?;
        file.write_all(data)
            .map_err(|err| CoreError::io("write temp", &tmp, err))?;
        file.sync_all()
            .map_err(|err| CoreError::io("sync temp", &tmp, err))?;
        set_mode(&tmp, mode)?;
        fs::rename(&tmp, path).map_err(|err| CoreError::io("rename", path, err))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
        return result;
    }

    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp-{}-{nanos}", std::process::id()))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|err| CoreError::io("chmod", path, err))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
