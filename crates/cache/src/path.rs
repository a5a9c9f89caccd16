//! Mapping of item paths onto the cache directory.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Normalizes an item path so it can be joined onto the cache root without
/// escaping it. `..` is resolved lexically and must never climb above the
/// root; null bytes and empty paths are rejected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use hoard_cache::validate_path;
/// assert_eq!(validate_path("films/./a.mkv").unwrap(), Path::new("films/a.mkv"));
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a\0b").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => {
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Path of the metadata sidecar for an item, `<relative>.json`.
pub(crate) fn metadata_name(relative: &Path) -> PathBuf {
    let mut name = relative.as_os_str().to_os_string();
    name.push(".json");
    PathBuf::from(name)
}
