// PathMapper maps virtual paths onto the flat key space of a blob store.
//
// Every key the driver touches is the configured root directory followed by
// the virtual path, with no leading separator:
//
//	root = "/docker/"     "/registry/v2/blobs/data"  ->  "docker/registry/v2/blobs/data"
//	root = ""             "/registry/v2/blobs/data"  ->  "registry/v2/blobs/data"
//
// Listing results travel the other way: the root prefix is cut from each
// returned key so the caller only ever sees virtual paths.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{DriverError, Result};

static PATH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(/[A-Za-z0-9._-]+)+$").unwrap());

/// Checks that `path` is a well-formed virtual path.
///
/// Dot components are rejected as well, since they would escape the root on
/// backends that resolve keys through a real filesystem.
pub fn validate_path(path: &str) -> Result<()> {
    let dotted = path.split('/').any(|part| part == "." || part == "..");
    if PATH_REGEX.is_match(path) && !dotted {
        Ok(())
    } else {
        Err(DriverError::InvalidPath {
            path: path.to_string(),
        })
    }
}

/// Like [`validate_path`] but also accepts the root, `/`.
pub fn validate_path_or_root(path: &str) -> Result<()> {
    if path == "/" {
        return Ok(());
    }
    validate_path(path)
}

#[derive(Clone, Debug)]
pub struct PathMapper {
    root_directory: String,
}

impl PathMapper {
    pub fn new(root_directory: &str) -> Self {
        PathMapper {
            root_directory: root_directory.to_string(),
        }
    }

    /// Returns the backend key for a virtual path,
    /// (e.g. `<root>/<path>` without a leading `/`).
    pub fn map(&self, path: &str) -> String {
        let joined = format!("{}{}", self.root_directory.trim_end_matches('/'), path);
        joined.trim_start_matches('/').to_string()
    }

    /// Key prefix shared by every blob under the root.
    pub fn root_prefix(&self) -> String {
        self.map("")
    }

    /// Turns a listed key back into a virtual path.
    ///
    /// With an empty root there is no prefix to cut, and a `/` must be added
    /// instead so the result still starts at the root.
    pub fn unmap(&self, key: &str) -> String {
        let prefix = self.root_prefix();
        if prefix.is_empty() {
            format!("/{key}")
        } else {
            key.replacen(&prefix, "", 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_trims_separators() {
        assert_eq!(PathMapper::new("").map("/x"), "x");
        assert_eq!(PathMapper::new("/").map("/x/y"), "x/y");
        assert_eq!(PathMapper::new("docker").map("/x"), "docker/x");
        assert_eq!(PathMapper::new("/docker/").map("/x"), "docker/x");
        assert_eq!(PathMapper::new("/docker/").root_prefix(), "docker");
    }

    #[test]
    fn test_unmap_inverts_map() {
        let paths = ["/a", "/a/b", "/docker/registry/v2/repositories/x/_layers/link"];
        for root in ["", "/", "docker", "/docker/", "/deep/root"] {
            let mapper = PathMapper::new(root);
            for path in paths {
                assert_eq!(mapper.unmap(&mapper.map(path)), path, "root {root:?}");
            }
        }
    }

    #[test]
    fn test_unmap_only_cuts_the_first_prefix() {
        let mapper = PathMapper::new("r");
        assert_eq!(mapper.unmap("r/r/r"), "/r/r");
    }

    #[test]
    fn test_validate_path() {
        for ok in ["/a", "/a/b.c", "/a-b/c_d", "/registry/v2/_uploads"] {
            assert!(validate_path(ok).is_ok(), "{ok}");
        }
        for bad in ["", "/", "a", "/a/", "//a", "/a//b", "/a b", "/a/../b", "/."] {
            assert!(
                matches!(validate_path(bad), Err(DriverError::InvalidPath { .. })),
                "{bad}"
            );
        }
        assert!(validate_path_or_root("/").is_ok());
        assert!(validate_path_or_root("").is_err());
    }
}
