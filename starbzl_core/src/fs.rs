//! Pluggable file system used by the loader and the package machinery.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use parking_lot::RwLock;

/// Result of a `stat` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_dir: bool,
    pub size: u64,
}

/// A single entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// File system operations consumed by the interpreter.
///
/// Paths are slash-separated strings; relative paths are resolved against
/// the implementation's root. An in-memory implementation must behave like
/// a real file system for these operations.
pub trait FileSystem: Send + Sync {
    fn read(&self, path: &str) -> anyhow::Result<Vec<u8>>;
    fn stat(&self, path: &str) -> anyhow::Result<FileStat>;
    fn read_dir(&self, path: &str) -> anyhow::Result<Vec<DirEntry>>;
    fn join(&self, parts: &[&str]) -> String;
    fn abs(&self, path: &str) -> anyhow::Result<String>;

    fn exists(&self, path: &str) -> bool {
        self.stat(path).is_ok()
    }
}

/// File system rooted at a directory on disk.
pub struct OsFileSystem {
    root: PathBuf,
}

impl OsFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = if root.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            root
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

impl FileSystem for OsFileSystem {
    fn read(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let full = self.resolve(path);
        std::fs::read(&full).with_context(|| format!("reading {}", full.display()))
    }

    fn stat(&self, path: &str) -> anyhow::Result<FileStat> {
        let full = self.resolve(path);
        let meta =
            std::fs::metadata(&full).with_context(|| format!("stat {}", full.display()))?;
        Ok(FileStat {
            is_dir: meta.is_dir(),
            size: meta.len(),
        })
    }

    fn read_dir(&self, path: &str) -> anyhow::Result<Vec<DirEntry>> {
        let full = self.resolve(path);
        let mut entries = Vec::new();
        for entry in
            std::fs::read_dir(&full).with_context(|| format!("listing {}", full.display()))?
        {
            let entry = entry?;
            let is_dir = entry.file_type()?.is_dir();
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn join(&self, parts: &[&str]) -> String {
        join_slash(parts)
    }

    fn abs(&self, path: &str) -> anyhow::Result<String> {
        let full = self.resolve(path);
        Ok(full.to_string_lossy().into_owned())
    }
}

/// In-memory file system keyed by normalized slash-separated paths.
///
/// Directories are synthesized from the stored file paths, so directory
/// listings and stats behave like the OS implementation.
pub struct InMemoryFileSystem {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl Default for InMemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFileSystem {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn add_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.files
            .write()
            .insert(normalize(path), content.into());
    }

    fn is_dir(&self, path: &str) -> bool {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        self.files
            .read()
            .keys()
            .any(|k| path.is_empty() || k.starts_with(&prefix))
    }
}

impl FileSystem for InMemoryFileSystem {
    fn read(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let path = normalize(path);
        self.files
            .read()
            .get(&path)
            .cloned()
            .with_context(|| format!("reading {}: no such file", path))
    }

    fn stat(&self, path: &str) -> anyhow::Result<FileStat> {
        let path = normalize(path);
        let files = self.files.read();
        if let Some(content) = files.get(&path) {
            return Ok(FileStat {
                is_dir: false,
                size: content.len() as u64,
            });
        }
        drop(files);
        if self.is_dir(&path) {
            return Ok(FileStat {
                is_dir: true,
                size: 0,
            });
        }
        anyhow::bail!("stat {}: no such file or directory", path)
    }

    fn read_dir(&self, path: &str) -> anyhow::Result<Vec<DirEntry>> {
        let path = normalize(path);
        if !self.is_dir(&path) {
            anyhow::bail!("listing {}: not a directory", path);
        }
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        let mut entries: Vec<DirEntry> = Vec::new();
        for key in self.files.read().keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((dir, _)) => DirEntry {
                    name: dir.to_owned(),
                    is_dir: true,
                },
                None => DirEntry {
                    name: rest.to_owned(),
                    is_dir: false,
                },
            };
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn join(&self, parts: &[&str]) -> String {
        join_slash(parts)
    }

    fn abs(&self, path: &str) -> anyhow::Result<String> {
        Ok(normalize(path))
    }
}

fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            _ => out.push(seg),
        }
    }
    out.join("/")
}

fn join_slash(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/");
    normalize(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_read_and_stat() {
        let fs = InMemoryFileSystem::new();
        fs.add_file("pkg/a.txt", "hello");
        assert_eq!(fs.read("pkg/a.txt").unwrap(), b"hello");
        assert!(!fs.stat("pkg/a.txt").unwrap().is_dir);
        assert!(fs.stat("pkg").unwrap().is_dir);
        assert!(fs.read("pkg/missing").is_err());
    }

    #[test]
    fn in_memory_read_dir() {
        let fs = InMemoryFileSystem::new();
        fs.add_file("pkg/a.txt", "");
        fs.add_file("pkg/sub/b.txt", "");
        fs.add_file("other/c.txt", "");
        let entries = fs.read_dir("pkg").unwrap();
        assert_eq!(
            entries,
            vec![
                DirEntry {
                    name: "a.txt".to_owned(),
                    is_dir: false
                },
                DirEntry {
                    name: "sub".to_owned(),
                    is_dir: true
                },
            ]
        );
    }

    #[test]
    fn join_normalizes() {
        let fs = InMemoryFileSystem::new();
        assert_eq!(fs.join(&["a", "b/c"]), "a/b/c");
        assert_eq!(fs.join(&["", "b"]), "b");
        assert_eq!(fs.join(&["a/./b", "c"]), "a/b/c");
    }
}
