//! Small filesystem helpers shared by the build engine and layer store

use crate::error::{StrataError, StrataResult};
use std::fs;
use std::path::Path;

/// Recursively copy `src` into `dst`, preserving structure, permissions
/// and symlinks. `src` may be a file or a directory; `dst` names the copy
/// itself (not a parent to copy into).
pub fn copy_tree(src: &Path, dst: &Path) -> StrataResult<()> {
    let meta = fs::symlink_metadata(src)
        .map_err(|e| StrataError::io(format!("reading {}", src.display()), e))?;

    if meta.file_type().is_symlink() {
        let target = fs::read_link(src)
            .map_err(|e| StrataError::io(format!("reading link {}", src.display()), e))?;
        ensure_parent(dst)?;
        std::os::unix::fs::symlink(&target, dst)
            .map_err(|e| StrataError::io(format!("linking {}", dst.display()), e))?;
        return Ok(());
    }

    if meta.is_dir() {
        fs::create_dir_all(dst)
            .map_err(|e| StrataError::io(format!("creating {}", dst.display()), e))?;
        for entry in
            fs::read_dir(src).map_err(|e| StrataError::io(format!("listing {}", src.display()), e))?
        {
            let entry =
                entry.map_err(|e| StrataError::io(format!("listing {}", src.display()), e))?;
            copy_tree(&entry.path(), &dst.join(entry.file_name()))?;
        }
        return Ok(());
    }

    ensure_parent(dst)?;
    fs::copy(src, dst).map_err(|e| {
        StrataError::io(
            format!("copying {} to {}", src.display(), dst.display()),
            e,
        )
    })?;
    Ok(())
}

fn ensure_parent(path: &Path) -> StrataResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StrataError::io(format!("creating {}", parent.display()), e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copies_nested_tree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("a/b/file.txt"), "content").unwrap();
        fs::write(src.join("top.txt"), "top").unwrap();

        let dst = temp.path().join("dst");
        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("a/b/file.txt")).unwrap(), "content");
        assert_eq!(fs::read_to_string(dst.join("top.txt")).unwrap(), "top");
    }

    #[test]
    fn copies_single_file_to_named_destination() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("file.txt");
        fs::write(&src, "x").unwrap();

        let dst = temp.path().join("deep/dir/copy.txt");
        copy_tree(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "x");
    }

    #[test]
    fn preserves_symlinks() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("real.txt"), "real").unwrap();
        std::os::unix::fs::symlink("real.txt", src.join("link.txt")).unwrap();

        let dst = temp.path().join("dst");
        copy_tree(&src, &dst).unwrap();

        let link = fs::read_link(dst.join("link.txt")).unwrap();
        assert_eq!(link.to_str().unwrap(), "real.txt");
    }

    #[test]
    fn missing_source_errors() {
        let temp = TempDir::new().unwrap();
        let err = copy_tree(&temp.path().join("absent"), &temp.path().join("dst")).unwrap_err();
        assert!(err.to_string().contains("IO error"));
    }
}
