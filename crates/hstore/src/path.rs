// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Helpers for `/`-separated node paths inside a container.

use crate::error::{Error, Result};

pub const ROOT: &str = "/";

/// Names with this prefix are hidden from directory listings.
pub const HIDDEN_PREFIX: &str = "_p_";

/// Split an absolute node path into its components.
///
/// `/` yields no components. Empty components (`//`) are rejected, as is
/// anything that does not start at the root.
pub fn components(path: &str) -> Result<Vec<&str>> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(Error::invalid_path(path));
    };
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = rest.split('/').collect();
    if parts.iter().any(|p| p.is_empty() || *p == "." || *p == "..") {
        return Err(Error::invalid_path(path));
    }
    Ok(parts)
}

/// Join a parent path and a child name.
#[must_use]
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Final component of a path, `None` for the root.
#[must_use]
pub fn basename(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    path.rsplit('/').next().filter(|s| !s.is_empty())
}

/// Parent of a path, `None` for the root.
#[must_use]
pub fn dirname(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// True when `path` equals `ancestor` or lies below it.
#[must_use]
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT {
        return path.starts_with('/');
    }
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

/// Replace the `old_prefix` of `path` with `new_prefix`.
///
/// Returns `None` when `path` is not within `old_prefix`.
#[must_use]
pub fn rebase(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    if !is_within(path, old_prefix) {
        return None;
    }
    let suffix = if old_prefix == ROOT {
        &path[1..]
    } else {
        path[old_prefix.len()..].trim_start_matches('/')
    };
    if suffix.is_empty() {
        Some(new_prefix.to_string())
    } else {
        Some(join(new_prefix, suffix))
    }
}

#[must_use]
pub fn is_hidden(name: &str) -> bool {
    name.starts_with(HIDDEN_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components() {
        assert!(components("/").expect("root").is_empty());
        assert_eq!(components("/a/b").expect("valid"), vec!["a", "b"]);
        assert!(components("a/b").is_err());
        assert!(components("/a//b").is_err());
        assert!(components("/a/../b").is_err());
        assert!(components("/a/").is_err());
    }

    #[test]
    fn test_join_basename_dirname() {
        assert_eq!(join("/", "g1"), "/g1");
        assert_eq!(join("/g1", "t1"), "/g1/t1");
        assert_eq!(basename("/g1/t1"), Some("t1"));
        assert_eq!(basename("/"), None);
        assert_eq!(dirname("/g1/t1"), Some("/g1"));
        assert_eq!(dirname("/g1"), Some("/"));
        assert_eq!(dirname("/"), None);
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/g1/t1", "/g1"));
        assert!(is_within("/g1", "/g1"));
        assert!(!is_within("/g10", "/g1"));
        assert!(is_within("/anything", "/"));
    }

    #[test]
    fn test_rebase() {
        assert_eq!(rebase("/g1/t1", "/g1", "/g1b"), Some("/g1b/t1".to_string()));
        assert_eq!(rebase("/g1", "/g1", "/x/y"), Some("/x/y".to_string()));
        assert_eq!(rebase("/g10/t", "/g1", "/z"), None);
        assert_eq!(rebase("/a/b", "/", "/moved"), Some("/moved/a/b".to_string()));
    }
}
