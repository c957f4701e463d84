//! Path normalization and decomposition utilities.
//!
//! Store paths are virtual: plain strings beginning with `/`, independent of
//! the host filesystem. Every public store operation normalizes its path
//! arguments through these functions before touching the backend.

use crate::error::FileDbError;

/// A normalized absolute path decomposed into its parent location and final
/// segment. The root decomposes into `("/", "")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub location: String,
    pub name: String,
}

/// Normalize a path: trim surrounding whitespace, collapse repeated `/` into
/// one, and trim trailing slashes (the root normalizes to `/`).
pub fn normalize_path(value: &str) -> String {
    let trimmed = value.trim();
    let mut collapsed = String::with_capacity(trimmed.len());
    let mut prev_slash = false;
    for c in trimmed.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        collapsed.push(c);
    }
    trim_trailing_slashes(&collapsed)
}

/// Trim trailing slashes, keeping a lone `/` intact. Runs to a fixpoint:
/// stripping a slash can expose trailing whitespace (and vice versa), and a
/// normalized path must survive renormalization unchanged.
pub fn trim_trailing_slashes(value: &str) -> String {
    let mut stripped = value.trim();
    if stripped.len() <= 1 {
        return stripped.to_string();
    }
    loop {
        let next = stripped.trim_end_matches('/').trim_end();
        if next == stripped {
            break;
        }
        stripped = next;
    }
    if stripped.is_empty() {
        // The input was nothing but slashes and whitespace.
        return "/".to_string();
    }
    stripped.to_string()
}

/// Compose the absolute path for a `(location, name)` pair.
pub fn absolute_path(location: &str, name: &str) -> String {
    normalize_path(&format!("{}/{}", location, name))
}

/// Decompose a normalized absolute path into `(location, name)`.
pub fn path_info(path: &str) -> Result<PathInfo, FileDbError> {
    let normalized = normalize_path(path);
    if !normalized.starts_with('/') {
        return Err(FileDbError::InvalidLocation(normalized));
    }
    // Root: location "/" and an empty name.
    if normalized == "/" {
        return Ok(PathInfo {
            location: "/".to_string(),
            name: String::new(),
        });
    }
    let split = normalized
        .rfind('/')
        .expect("normalized absolute path contains '/'");
    let location = if split == 0 {
        "/".to_string()
    } else {
        normalized[..split].to_string()
    };
    let name = normalized[split + 1..].to_string();
    Ok(PathInfo { location, name })
}

/// Validate a node name: trailing slashes are trimmed, and any remaining `/`
/// is rejected.
pub fn validate_name(value: &str) -> Result<String, FileDbError> {
    let name = trim_trailing_slashes(value.trim());
    if name.contains('/') {
        return Err(FileDbError::InvalidName(name));
    }
    Ok(name)
}

/// Validate a node location: must normalize to a non-empty absolute path.
pub fn validate_location(value: &str) -> Result<String, FileDbError> {
    let location = normalize_path(value);
    if location.is_empty() || !location.starts_with('/') {
        return Err(FileDbError::InvalidLocation(location));
    }
    Ok(location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_collapses_repeated_slashes() {
        assert_eq!(normalize_path("/a//b///c"), "/a/b/c");
    }

    #[test]
    fn test_normalize_trims_trailing_slashes() {
        assert_eq!(normalize_path("/some/path/"), "/some/path");
        assert_eq!(normalize_path("/some/path////"), "/some/path");
    }

    #[test]
    fn test_normalize_preserves_root() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("///"), "/");
    }

    #[test]
    fn test_trim_collapses_all_slash_input_to_root() {
        assert_eq!(trim_trailing_slashes("///"), "/");
        assert_eq!(trim_trailing_slashes("/"), "/");
    }

    #[test]
    fn test_normalize_trims_whitespace() {
        assert_eq!(normalize_path("  /a/b  "), "/a/b");
    }

    #[test]
    fn test_trim_removes_whitespace_exposed_by_slash_trimming() {
        assert_eq!(trim_trailing_slashes("a /"), "a");
        assert_eq!(trim_trailing_slashes("a / /"), "a");
        assert_eq!(normalize_path("/a /"), "/a");
        assert_eq!(normalize_path(" // "), "/");
    }

    #[test]
    fn test_absolute_path_joins_location_and_name() {
        assert_eq!(absolute_path("/", "proj"), "/proj");
        assert_eq!(absolute_path("/proj", "a.txt"), "/proj/a.txt");
        assert_eq!(absolute_path("/proj/", "a.txt"), "/proj/a.txt");
    }

    #[test]
    fn test_path_info_decomposes_nested_path() {
        let info = path_info("/proj/src/main.rs").unwrap();
        assert_eq!(info.location, "/proj/src");
        assert_eq!(info.name, "main.rs");
    }

    #[test]
    fn test_path_info_top_level_entry_has_root_location() {
        let info = path_info("/proj").unwrap();
        assert_eq!(info.location, "/");
        assert_eq!(info.name, "proj");
    }

    #[test]
    fn test_path_info_root_has_empty_name() {
        let info = path_info("/").unwrap();
        assert_eq!(info.location, "/");
        assert_eq!(info.name, "");
    }

    #[test]
    fn test_path_info_rejects_relative_paths() {
        assert!(matches!(
            path_info("relative/path"),
            Err(FileDbError::InvalidLocation(_))
        ));
    }

    #[test]
    fn test_validate_name_rejects_embedded_slash() {
        assert!(matches!(
            validate_name("a/b"),
            Err(FileDbError::InvalidName(_))
        ));
    }

    #[test]
    fn test_validate_name_trims_trailing_slash() {
        assert_eq!(validate_name("dir/").unwrap(), "dir");
    }

    #[test]
    fn test_validate_location_rejects_empty() {
        assert!(matches!(
            validate_location(""),
            Err(FileDbError::InvalidLocation(_))
        ));
        assert!(matches!(
            validate_location("   "),
            Err(FileDbError::InvalidLocation(_))
        ));
    }

    proptest! {
        #[test]
        fn test_normalize_is_idempotent(path in "[a-z/ ]{0,32}") {
            let once = normalize_path(&path);
            prop_assert_eq!(normalize_path(&once), once);
        }

        #[test]
        fn test_absolute_path_round_trips(
            segments in prop::collection::vec("[a-z0-9.]{1,8}", 0..4),
            name in "[a-z0-9.]{1,8}",
        ) {
            let location = if segments.is_empty() {
                "/".to_string()
            } else {
                format!("/{}", segments.join("/"))
            };
            let joined = absolute_path(&location, &name);
            let info = path_info(&joined).unwrap();
            prop_assert_eq!(info.location, location);
            prop_assert_eq!(info.name, name);
        }
    }
}
