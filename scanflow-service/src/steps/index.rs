// External Indexes
// Package and vulnerability lookup seams with JSON-file backed implementations

use crate::error::StepError;
use crate::models::{PackageData, PackageUrl, VulnerabilityRef};

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index {path} is unavailable: {message}")]
    Unavailable { path: PathBuf, message: String },

    #[error("index {path} is malformed: {message}")]
    Malformed { path: PathBuf, message: String },
}

impl From<IndexError> for StepError {
    fn from(err: IndexError) -> Self {
        StepError::defect(err.to_string())
    }
}

/// Reference package database
pub trait PackageIndex: Send + Sync {
    /// Exact package-url lookup, version included when the purl has one
    fn lookup(&self, purl: &PackageUrl) -> Result<Option<PackageData>, IndexError>;

    /// Package whose archive or file has this SHA-256
    fn match_sha256(&self, sha256: &str) -> Result<Option<PackageData>, IndexError>;
}

/// Advisory database keyed by package
pub trait VulnerabilityIndex: Send + Sync {
    fn vulnerabilities_for(&self, purl: &PackageUrl) -> Result<Vec<VulnerabilityRef>, IndexError>;
}

fn read_index<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, IndexError> {
    let content = fs::read_to_string(path).map_err(|e| IndexError::Unavailable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| IndexError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

// =============================================================================
// JSON package index
// =============================================================================

#[derive(Debug, Deserialize)]
struct PackageIndexFile {
    #[serde(default)]
    packages: Vec<PackageData>,
}

/// `{"packages": [...]}` file loaded into memory
#[derive(Debug, Default)]
pub struct JsonPackageIndex {
    by_purl: HashMap<String, PackageData>,
    by_sha256: HashMap<String, PackageData>,
}

impl JsonPackageIndex {
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let file: PackageIndexFile = read_index(path)?;
        debug!(path = %path.display(), packages = file.packages.len(), "loaded package index");
        Ok(Self::from_packages(file.packages))
    }

    pub fn from_packages(packages: Vec<PackageData>) -> Self {
        let mut index = Self::default();
        for package in packages {
            if let Some(sha256) = &package.sha256 {
                index.by_sha256.insert(sha256.to_lowercase(), package.clone());
            }
            index.by_purl.insert(package.purl().to_string(), package);
        }
        index
    }
}

impl PackageIndex for JsonPackageIndex {
    fn lookup(&self, purl: &PackageUrl) -> Result<Option<PackageData>, IndexError> {
        Ok(self.by_purl.get(&purl.to_string()).cloned())
    }

    fn match_sha256(&self, sha256: &str) -> Result<Option<PackageData>, IndexError> {
        Ok(self.by_sha256.get(&sha256.to_lowercase()).cloned())
    }
}

// =============================================================================
// JSON vulnerability index
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
struct Advisory {
    /// Package-url without version
    purl: String,
    /// Affected versions; empty means every version
    #[serde(default)]
    affected_versions: Vec<String>,
    vulnerability: VulnerabilityRef,
}

#[derive(Debug, Deserialize)]
struct VulnerabilityIndexFile {
    #[serde(default)]
    advisories: Vec<Advisory>,
}

/// `{"advisories": [...]}` file loaded into memory
#[derive(Debug, Default)]
pub struct JsonVulnerabilityIndex {
    by_base: HashMap<String, Vec<Advisory>>,
}

impl JsonVulnerabilityIndex {
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let file: VulnerabilityIndexFile = read_index(path)?;
        let mut index = Self::default();
        for advisory in file.advisories {
            let base = match advisory.purl.parse::<PackageUrl>() {
                Ok(purl) => purl.base(),
                Err(err) => {
                    return Err(IndexError::Malformed {
                        path: path.to_path_buf(),
                        message: format!("{}: {}", advisory.purl, err),
                    })
                }
            };
            index.by_base.entry(base).or_default().push(advisory);
        }
        Ok(index)
    }
}

impl VulnerabilityIndex for JsonVulnerabilityIndex {
    fn vulnerabilities_for(&self, purl: &PackageUrl) -> Result<Vec<VulnerabilityRef>, IndexError> {
        let Some(advisories) = self.by_base.get(&purl.base()) else {
            return Ok(Vec::new());
        };
        Ok(advisories
            .iter()
            .filter(|a| {
                a.affected_versions.is_empty()
                    || purl
                        .version
                        .as_ref()
                        .is_some_and(|v| a.affected_versions.contains(v))
            })
            .map(|a| a.vulnerability.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_index_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.json");
        fs::write(
            &path,
            r#"{"packages": [{"type": "deb", "namespace": "debian", "name": "zlib1g", "version": "1.2.13", "sha256": "ABCD", "declared_license_expression": "zlib"}]}"#,
        )
        .unwrap();

        let index = JsonPackageIndex::open(&path).unwrap();
        let purl: PackageUrl = "pkg:deb/debian/zlib1g@1.2.13".parse().unwrap();
        let found = index.lookup(&purl).unwrap().unwrap();
        assert_eq!(found.declared_license_expression.as_deref(), Some("zlib"));
        assert!(index.match_sha256("abcd").unwrap().is_some());
        assert!(index.lookup(&"pkg:deb/debian/zlib1g".parse().unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_vulnerability_index_matches_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("advisories.json");
        fs::write(
            &path,
            r#"{"advisories": [
                {"purl": "pkg:pypi/django", "affected_versions": ["4.0.8"],
                 "vulnerability": {"vulnerability_id": "VCID-1", "summary": "SQL injection", "severity": "high", "fixed_version": "4.0.9"}},
                {"purl": "pkg:pypi/django",
                 "vulnerability": {"vulnerability_id": "VCID-2", "summary": "any version", "severity": null, "fixed_version": null}}
            ]}"#,
        )
        .unwrap();

        let index = JsonVulnerabilityIndex::open(&path).unwrap();
        let affected = index
            .vulnerabilities_for(&"pkg:pypi/django@4.0.8".parse().unwrap())
            .unwrap();
        assert_eq!(affected.len(), 2);
        let other = index
            .vulnerabilities_for(&"pkg:pypi/django@5.0".parse().unwrap())
            .unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].vulnerability_id, "VCID-2");
    }

    #[test]
    fn test_missing_index_is_a_defect() {
        let err = JsonPackageIndex::open(Path::new("/nonexistent/index.json")).unwrap_err();
        assert!(matches!(err, IndexError::Unavailable { .. }));
        assert!(!StepError::from(err).is_recoverable());
    }
}
