use super::FileSystem;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileSystem;

impl RealFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("Failed to read file {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_real_files() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("app")).unwrap();
        fs::write(temp.path().join("app/main.py"), "print('hi')\n").unwrap();

        let real = RealFileSystem::new();
        assert!(real.exists(&temp.path().join("app")));
        assert!(real.is_dir(&temp.path().join("app")));
        assert!(real.is_file(&temp.path().join("app/main.py")));
        assert!(!real.is_file(&temp.path().join("app")));
        assert_eq!(
            real.read_to_string(&temp.path().join("app/main.py")).unwrap(),
            "print('hi')\n"
        );
    }

    #[test]
    fn test_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        let real = RealFileSystem::new();
        let err = real
            .read_to_string(&temp.path().join("requirements.txt"))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read file"));
    }
}
