// Codebase Resource Model
// Files, directories and symlinks discovered under a project's codebase

use crate::models::project::ProjectId;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Well-known status tags set by the built-in steps
pub mod status {
    pub const SCANNED: &str = "scanned";
    pub const MAPPED: &str = "mapped";
    pub const REQUIRES_REVIEW: &str = "requires-review";
    pub const IGNORED_EMPTY_FILE: &str = "ignored-empty-file";
    pub const IGNORED_PATTERN: &str = "ignored-pattern";
    pub const IGNORED_WHITEOUT: &str = "ignored-whiteout";
    pub const SYSTEM_PACKAGE: &str = "system-package";
    pub const APPLICATION_PACKAGE: &str = "application-package";
    pub const ELF_BINARY: &str = "elf-binary";
    pub const SBOM: &str = "sbom";
    pub const MATCHED_TO_PURLDB: &str = "matched-to-purldb";
    pub const IGNORED_NOT_INTERESTING: &str = "ignored-not-interesting";
    pub const NOT_ANALYZED: &str = "not-analyzed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    File,
    Directory,
    Symlink,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::File => "file",
            ResourceType::Directory => "directory",
            ResourceType::Symlink => "symlink",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of a resource: the owning project plus its path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub project: ProjectId,
    pub path: String,
}

/// Input for resource insertion; the project comes from the store handle
#[derive(Debug, Clone, PartialEq)]
pub struct NewResource {
    pub path: String,
    pub resource_type: ResourceType,
    pub size: Option<u64>,
    pub md5: Option<String>,
    pub sha256: Option<String>,
}

impl NewResource {
    pub fn file(path: impl Into<String>) -> Self {
        Self::new(path, ResourceType::File)
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self::new(path, ResourceType::Directory)
    }

    pub fn new(path: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            path: normalize_path(&path.into()),
            resource_type,
            size: None,
            md5: None,
            sha256: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_checksums(mut self, md5: impl Into<String>, sha256: impl Into<String>) -> Self {
        self.md5 = Some(md5.into());
        self.sha256 = Some(sha256.into());
        self
    }
}

/// One file, directory or symlink in a project's codebase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodebaseResource {
    pub project: ProjectId,
    pub path: String,
    pub resource_type: ResourceType,
    pub name: String,
    pub extension: String,
    pub size: Option<u64>,
    pub md5: Option<String>,
    pub sha256: Option<String>,
    pub status: Option<String>,
    pub file_type: Option<String>,
    #[serde(default)]
    pub extra_data: Map<String, Value>,
}

impl CodebaseResource {
    pub fn from_new(project: ProjectId, new: NewResource) -> Self {
        let name = new.path.rsplit('/').next().unwrap_or_default().to_string();
        let extension = match (new.resource_type, name.rfind('.')) {
            (ResourceType::File, Some(pos)) if pos > 0 => name[pos..].to_string(),
            _ => String::new(),
        };

        Self {
            project,
            path: new.path,
            resource_type: new.resource_type,
            name,
            extension,
            size: new.size,
            md5: new.md5,
            sha256: new.sha256,
            status: None,
            file_type: None,
            extra_data: Map::new(),
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            project: self.project,
            path: self.path.clone(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.resource_type == ResourceType::File
    }

    pub fn is_dir(&self) -> bool {
        self.resource_type == ResourceType::Directory
    }

    pub fn has_status(&self) -> bool {
        self.status.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn parent_path(&self) -> Option<&str> {
        self.path.rsplit_once('/').map(|(parent, _)| parent)
    }
}

/// Normalize a codebase path: forward slashes, no leading "./" or "/", no trailing "/"
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = path.trim_start_matches("./").trim_start_matches('/');
    path.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_name_and_extension() {
        let r = CodebaseResource::from_new(Uuid::new_v4(), NewResource::file("usr/lib/libz.so.1"));
        assert_eq!(r.name, "libz.so.1");
        assert_eq!(r.extension, ".1");
        assert_eq!(r.parent_path(), Some("usr/lib"));

        let dot = CodebaseResource::from_new(Uuid::new_v4(), NewResource::file(".bashrc"));
        assert_eq!(dot.extension, "");

        let dir = CodebaseResource::from_new(Uuid::new_v4(), NewResource::directory("a/b.d"));
        assert_eq!(dir.extension, "");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/bin/ls"), "bin/ls");
        assert_eq!(normalize_path("./etc/"), "etc");
        assert_eq!(normalize_path("a\\b\\c.txt"), "a/b/c.txt");
    }
}
