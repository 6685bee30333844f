//! Lexical path resolution under the TFTP root.

use std::path::{Component, Path, PathBuf};

/// Normalize a requested filename into a path relative to the root.
///
/// The name is treated as absolute from the root: `.` segments are dropped and
/// `..` never climbs above the root. Backslashes count as separators since
/// some PXE ROMs send DOS-style names. This is purely lexical, symlinks inside
/// the root are not resolved.
pub fn clean_path(name: &str) -> PathBuf {
    let name = name.replace('\\', "/");
    let mut clean = PathBuf::new();

    for component in Path::new(&name).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::ParentDir => {
                clean.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    clean
}

/// Join a requested filename onto `root`, never escaping it.
pub fn resolve(root: &Path, name: &str) -> PathBuf {
    root.join(clean_path(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name() {
        assert_eq!(clean_path("snp.efi"), PathBuf::from("snp.efi"));
        assert_eq!(clean_path("/snp.efi"), PathBuf::from("snp.efi"));
    }

    #[test]
    fn test_traversal_stays_inside_root() {
        let root = Path::new("/var/lib/tftp");
        let resolved = resolve(root, "../../etc/passwd");
        assert_eq!(resolved, PathBuf::from("/var/lib/tftp/etc/passwd"));
        assert!(resolved.starts_with(root));
    }

    #[test]
    fn test_absolute_names_are_root_relative() {
        assert_eq!(
            resolve(Path::new("/srv/tftp"), "/etc/passwd"),
            PathBuf::from("/srv/tftp/etc/passwd")
        );
    }

    #[test]
    fn test_dot_segments_collapse() {
        assert_eq!(clean_path("a/./b/../c"), PathBuf::from("a/c"));
        assert_eq!(clean_path("a/../../../b"), PathBuf::from("b"));
        assert_eq!(clean_path("/../../../../../"), PathBuf::new());
    }

    #[test]
    fn test_backslash_separators() {
        assert_eq!(clean_path("boot\\..\\..\\snp.efi"), PathBuf::from("snp.efi"));
        assert_eq!(clean_path("pxe\\undionly.kpxe"), PathBuf::from("pxe/undionly.kpxe"));
    }

    #[test]
    fn test_empty_name() {
        assert_eq!(clean_path(""), PathBuf::new());
        assert_eq!(resolve(Path::new("/srv/tftp"), ""), PathBuf::from("/srv/tftp"));
    }
}
