//! Mapping between filesystem paths and archive entry names.
//!
//! Entry names are always forward-slash separated. When a path is turned into
//! a name, separators are unified and one leading `./`, `//` or drive prefix
//! (`C:/`) is dropped, so an archive built on one machine extracts sensibly on
//! another. When a name is turned back into a path it is joined under the
//! destination root component by component, and anything that could climb out
//! of the root is refused.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Normalize a filesystem path string into an archive entry name.
///
/// Backslashes become forward slashes. Then a leading `//` or `./` is removed,
/// or, failing that, a drive prefix such as `C:/` is removed. Anything else is
/// returned unchanged. Only one prefix is removed.
///
/// ```
/// use rezip::normalize_entry_name;
///
/// assert_eq!(normalize_entry_name("./a/b.txt"), "a/b.txt");
/// assert_eq!(normalize_entry_name("C:\\a\\b.txt"), "a/b.txt");
/// assert_eq!(normalize_entry_name("a/b.txt"), "a/b.txt");
/// ```
pub fn normalize_entry_name(path: &str) -> String {
    let path = path.replace('\\', "/");

    if path.starts_with("//") || path.starts_with("./") {
        return path[2..].to_string();
    }

    // `get` returns None for short strings and for non-ASCII leading chars
    if path.get(1..3) == Some(":/") {
        return path[3..].to_string();
    }

    path
}

/// Entry name for a regular file at `path`.
pub(crate) fn file_entry_name(path: &Path) -> String {
    normalize_entry_name(&path.to_string_lossy())
}

/// Entry name for a directory at `path`, with the trailing `/`.
///
/// Returns `None` when nothing is left after normalization (e.g. `.` or `./`).
pub(crate) fn dir_entry_name(path: &Path) -> Option<String> {
    let name = normalize_entry_name(&path.to_string_lossy());
    let name = name.trim_end_matches('/');
    if name.is_empty() || name == "." {
        return None;
    }
    Some(format!("{name}/"))
}

/// Resolve an entry name to a path under `root`.
///
/// Empty and `.` components are dropped, which also makes a leading `/` land
/// under the root. A `..` component, or a component that the platform would
/// read as a root or drive prefix, is rejected.
pub fn entry_output_path(root: &Path, name: &str) -> Result<PathBuf> {
    let mut out = root.to_path_buf();
    for part in name.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(c)), None) => out.push(c),
            _ => return Err(Error::UnsafeEntryName(name.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_known_prefixes() {
        assert_eq!(normalize_entry_name("./a/b.txt"), "a/b.txt");
        assert_eq!(normalize_entry_name("//a/b.txt"), "a/b.txt");
        assert_eq!(normalize_entry_name("C:/a/b.txt"), "a/b.txt");
        assert_eq!(normalize_entry_name("a\\b.txt"), "a/b.txt");
        assert_eq!(normalize_entry_name("a/b.txt"), "a/b.txt");
    }

    #[test]
    fn backslash_prefixes_are_unified_first() {
        assert_eq!(normalize_entry_name(".\\dir\\f"), "dir/f");
        assert_eq!(normalize_entry_name("\\\\server\\share"), "server/share");
        assert_eq!(normalize_entry_name("D:\\data"), "data");
    }

    #[test]
    fn only_one_prefix_is_removed() {
        assert_eq!(normalize_entry_name("././a"), "./a");
        assert_eq!(normalize_entry_name("/abs/path"), "/abs/path");
    }

    #[test]
    fn short_inputs_do_not_panic() {
        assert_eq!(normalize_entry_name(""), "");
        assert_eq!(normalize_entry_name("."), ".");
        assert_eq!(normalize_entry_name("a"), "a");
        assert_eq!(normalize_entry_name("./"), "");
        assert_eq!(normalize_entry_name("C:"), "C:");
        assert_eq!(normalize_entry_name("é:/x"), "é:/x");
    }

    #[test]
    fn dir_names_get_one_trailing_slash() {
        assert_eq!(dir_entry_name(Path::new("./docs")), Some("docs/".into()));
        assert_eq!(dir_entry_name(Path::new("docs/")), Some("docs/".into()));
        assert_eq!(dir_entry_name(Path::new(".")), None);
        assert_eq!(dir_entry_name(Path::new("./")), None);
    }

    #[test]
    fn output_path_stays_under_root() {
        let root = Path::new("/dest");
        assert_eq!(
            entry_output_path(root, "a/b.txt").unwrap(),
            PathBuf::from("/dest/a/b.txt")
        );
        assert_eq!(
            entry_output_path(root, "/abs/./x/").unwrap(),
            PathBuf::from("/dest/abs/x")
        );
        assert!(matches!(
            entry_output_path(root, "a/../../etc/passwd"),
            Err(Error::UnsafeEntryName(_))
        ));
        assert!(entry_output_path(root, "..").is_err());
    }

    proptest! {
        #[test]
        fn normalize_never_panics_or_leaves_backslashes(s in "\\PC{0,12}") {
            let out = normalize_entry_name(&s);
            prop_assert!(!out.contains('\\'));
            prop_assert!(out.len() <= s.len());
        }
    }
}
