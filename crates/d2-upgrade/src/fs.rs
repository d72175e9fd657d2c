//! Build-context file helpers.

use std::fs;
use std::path::Path;

use d2_core::D2Result;
use tracing::debug;
use walkdir::WalkDir;

/// Copy the contents of `source` into `dest`, creating `dest` and merging
/// over whatever is already there.
pub fn copy_tree(source: &Path, dest: &Path) -> D2Result<()> {
    debug!(source = %source.display(), dest = %dest.display(), "copy tree");
    fs::create_dir_all(dest)?;

    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Copy `file` into directory `dir`, keeping its file name.
pub fn copy_into(file: &Path, dir: &Path) -> D2Result<()> {
    fs::create_dir_all(dir)?;
    let name = file.file_name().unwrap_or(file.as_os_str());
    debug!(file = %file.display(), dir = %dir.display(), "copy file");
    fs::copy(file, dir.join(name))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_tree_merges_nested_content() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("db")).unwrap();
        fs::write(src.path().join("db/db.sql.gz"), b"dump").unwrap();
        fs::write(src.path().join("Dockerfile"), b"FROM scratch").unwrap();
        fs::write(dst.path().join("existing"), b"keep").unwrap();

        copy_tree(src.path(), dst.path()).unwrap();

        assert_eq!(fs::read(dst.path().join("db/db.sql.gz")).unwrap(), b"dump");
        assert_eq!(fs::read(dst.path().join("Dockerfile")).unwrap(), b"FROM scratch");
        assert_eq!(fs::read(dst.path().join("existing")).unwrap(), b"keep");
    }

    #[test]
    fn copy_tree_missing_source_fails() {
        let dst = tempfile::tempdir().unwrap();
        assert!(copy_tree(Path::new("/nonexistent/d2-source"), dst.path()).is_err());
    }

    #[test]
    fn copy_into_keeps_name() {
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("dhis.conf");
        fs::write(&file, b"x").unwrap();
        let dst = tempfile::tempdir().unwrap();

        copy_into(&file, &dst.path().join("home")).unwrap();
        assert!(dst.path().join("home/dhis.conf").is_file());
    }
}
