//! External command-text overrides.
//!
//! A deployment can replace a method's inline command text without
//! rebuilding by dropping a file at
//! `<root>/SQLAPI/<category>/<version>/<name>/<method>.sql` (checked first)
//! or `<root>/bin/SQLAPI/...`.

use std::path::{Path, PathBuf};

use crate::descriptor::ServiceDescriptor;

/// Source of command text keyed by (category, version, interface, method).
pub trait CommandTextSource: Send + Sync {
    fn load(&self, service: &ServiceDescriptor, method: &str) -> Option<String>;
}

/// Looks for `.sql` files under a root directory.
#[derive(Debug, Clone)]
pub struct FileCommandSource {
    root: PathBuf,
}

impl FileCommandSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Candidate paths in lookup order.
    pub fn candidates(&self, service: &ServiceDescriptor, method: &str) -> Vec<PathBuf> {
        let relative: PathBuf = [
            "SQLAPI".to_string(),
            sanitize(&service.category),
            sanitize(&service.version),
            sanitize(&service.name),
            format!("{}.sql", sanitize(method)),
        ]
        .iter()
        .collect();
        vec![self.root.join(&relative), self.root.join("bin").join(relative)]
    }
}

impl CommandTextSource for FileCommandSource {
    fn load(&self, service: &ServiceDescriptor, method: &str) -> Option<String> {
        for path in self.candidates(service, method) {
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    tracing::info!(
                        "Using command text override for {}/{} from {}",
                        service,
                        method,
                        path.display()
                    );
                    return Some(text);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("Failed to read command override {}: {}", path.display(), e);
                }
            }
        }
        None
    }
}

/// Keep a path component inside its directory.
fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loads_override_before_bin() {
        let dir = tempfile::tempdir().unwrap();
        let service = ServiceDescriptor::new("users", "v1", "queries");
        let source = FileCommandSource::new(dir.path());

        assert!(source.load(&service, "GetUser").is_none());

        let bin = dir.path().join("bin/SQLAPI/users/v1/queries");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("GetUser.sql"), "SELECT 2").unwrap();
        assert_eq!(source.load(&service, "GetUser").as_deref(), Some("SELECT 2"));

        let primary = dir.path().join("SQLAPI/users/v1/queries");
        std::fs::create_dir_all(&primary).unwrap();
        std::fs::write(primary.join("GetUser.sql"), "SELECT 1").unwrap();
        assert_eq!(source.load(&service, "GetUser").as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_components_are_sanitized() {
        let source = FileCommandSource::new("/srv");
        let service = ServiceDescriptor::new("..", "v1", "a/b");
        let paths = source.candidates(&service, "x y");
        assert_eq!(paths[0], PathBuf::from("/srv/SQLAPI/__/v1/a_b/x_y.sql"));
    }
}
