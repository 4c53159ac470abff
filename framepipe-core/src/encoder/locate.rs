//! Executable lookup.
//!
//! A name that already points at an existing file is used as-is;
//! otherwise every directory in `PATH` is searched in order. On Windows
//! the `.exe` suffix is tried as well.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Resolve `name` against the filesystem and the current `PATH`.
///
/// Returns `None` when nothing matches; callers treat that as a
/// degraded environment rather than a hard failure.
pub fn locate_executable(name: &str) -> Option<PathBuf> {
    locate_in(name, std::env::var_os("PATH").as_deref())
}

/// Same as [`locate_executable`] with an explicit search path.
pub fn locate_in(name: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    let literal = Path::new(name);
    if literal.is_file() {
        return Some(literal.to_path_buf());
    }

    // A name with a directory component is never searched for.
    if literal.components().count() > 1 {
        return None;
    }

    let search_path = search_path?;
    std::env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .find_map(|dir| candidates(&dir, name).into_iter().find(|p| p.is_file()))
}

#[cfg(windows)]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    let plain = dir.join(name);
    if plain.extension().is_some() {
        vec![plain]
    } else {
        vec![dir.join(format!("{name}.exe")), plain]
    }
}

#[cfg(not(windows))]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

// ── Tests ────────────────────────────────────────────────────────
