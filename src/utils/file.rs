//! Locating documents on disk for ingestion.

use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// A file to ingest and the document id it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub document_id: String,
}

/// Collect ingestible files under `root`. A file root is returned as is;
/// directories are walked, skipping hidden entries and known binary formats.
/// Document ids are paths relative to `root`, with `/` separators.
pub fn collect_files(root: &Path) -> io::Result<Vec<SourceFile>> {
    if root.is_file() {
        let document_id = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.to_string_lossy().to_string());
        return Ok(vec![SourceFile {
            path: root.to_path_buf(),
            document_id,
        }]);
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || has_binary_extension(entry.path()) {
            continue;
        }
        if let Some(document_id) = document_id(root, entry.path()) {
            files.push(SourceFile {
                path: entry.path().to_path_buf(),
                document_id,
            });
        }
    }
    Ok(files)
}

/// `path` relative to `base`, normalized to `/` separators.
pub fn document_id(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn has_binary_extension(path: &Path) -> bool {
    let Some(ext) = path.extension() else {
        return false;
    };
    matches!(
        ext.to_string_lossy().to_lowercase().as_str(),
        "exe" | "dll" | "so" | "dylib" | "a" | "o" | "obj"
            | "png" | "jpg" | "jpeg" | "gif" | "bmp" | "ico" | "webp"
            | "mp3" | "mp4" | "avi" | "mkv" | "mov" | "wav" | "flac"
            | "zip" | "tar" | "gz" | "bz2" | "xz" | "7z" | "rar"
            | "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx"
            | "woff" | "woff2" | "ttf" | "otf"
            | "class" | "jar" | "pyc" | "db" | "sqlite" | "sqlite3" | "bin"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_files_walks_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("guide")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("readme.md"), "hello").unwrap();
        std::fs::write(dir.path().join("guide").join("intro.txt"), "intro").unwrap();
        std::fs::write(dir.path().join("logo.png"), [0u8, 1, 2]).unwrap();
        std::fs::write(dir.path().join(".git").join("HEAD"), "ref").unwrap();

        let files = collect_files(dir.path()).unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.document_id.as_str()).collect();
        assert_eq!(ids, vec!["guide/intro.txt", "readme.md"]);
    }

    #[test]
    fn test_single_file_uses_file_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "x").unwrap();
        let files = collect_files(&path).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].document_id, "notes.txt");
    }

    #[test]
    fn test_binary_extensions() {
        assert!(has_binary_extension(Path::new("a/b.PNG")));
        assert!(!has_binary_extension(Path::new("a/b.md")));
        assert!(!has_binary_extension(Path::new("Makefile")));
    }
}
