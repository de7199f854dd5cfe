use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Clone)]
enum MockEntry {
    File(String),
    Directory,
}

/// In-memory source tree rooted at `/mock` unless another root is given
pub struct MockFileSystem {
    entries: RwLock<HashMap<PathBuf, MockEntry>>,
    root: PathBuf,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from("/mock"))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: &str) {
        let path = self.normalize(path.as_ref());
        let mut entries = self.entries.write().unwrap();
        if let Some(parent) = path.parent() {
            Self::ensure_parents(&mut entries, parent);
        }
        entries.insert(path, MockEntry::File(content.to_string()));
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = self.normalize(path.as_ref());
        let mut entries = self.entries.write().unwrap();
        Self::ensure_parents(&mut entries, &path);
    }

    fn normalize(&self, path: &Path) -> PathBuf {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        joined.components().collect()
    }

    fn ensure_parents(entries: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            entries
                .entry(current.clone())
                .or_insert(MockEntry::Directory);
        }
    }
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MockFileSystem {
    fn exists(&self, path: &Path) -> bool {
        let path = self.normalize(path);
        self.entries.read().unwrap().contains_key(&path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        let path = self.normalize(path);
        matches!(
            self.entries.read().unwrap().get(&path),
            Some(MockEntry::Directory)
        )
    }

    fn is_file(&self, path: &Path) -> bool {
        let path = self.normalize(path);
        matches!(
            self.entries.read().unwrap().get(&path),
            Some(MockEntry::File(_))
        )
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let path = self.normalize(path);
        match self.entries.read().unwrap().get(&path) {
            Some(MockEntry::File(content)) => Ok(content.clone()),
            Some(MockEntry::Directory) => Err(anyhow!("Not a file: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_file_creates_parents() {
        let fs = MockFileSystem::new();
        fs.add_file("pkg/app/main.py", "app = None");

        assert!(fs.is_dir(Path::new("/mock/pkg")));
        assert!(fs.is_dir(Path::new("/mock/pkg/app")));
        assert!(fs.is_file(Path::new("/mock/pkg/app/main.py")));
    }

    #[test]
    fn test_relative_and_dot_paths_resolve_to_root() {
        let fs = MockFileSystem::new();
        fs.add_file("main.py", "print()");

        assert!(fs.exists(Path::new("main.py")));
        assert!(fs.exists(Path::new("/mock/./main.py")));
        assert_eq!(fs.read_to_string(Path::new("./main.py")).unwrap(), "print()");
    }

    #[test]
    fn test_read_directory_is_error() {
        let fs = MockFileSystem::new();
        fs.add_dir("static");

        assert!(fs.read_to_string(Path::new("static")).is_err());
        assert!(fs.read_to_string(Path::new("missing.txt")).is_err());
    }

    #[test]
    fn test_with_root() {
        let fs = MockFileSystem::with_root(PathBuf::from("/srv/app"));
        fs.add_file("requirements.txt", "flask\n");

        assert_eq!(fs.root(), Path::new("/srv/app"));
        assert!(fs.is_file(Path::new("/srv/app/requirements.txt")));
    }
}
