// Package Models
// Package-url handling and packages discovered in a project's codebase

use crate::models::dependency::DependencyData;
use crate::models::project::ProjectId;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PurlError {
    #[error("package-url must start with 'pkg:': {0}")]
    MissingScheme(String),
    #[error("package-url has no type: {0}")]
    MissingType(String),
    #[error("package-url has no name: {0}")]
    MissingName(String),
}

/// A package-url: `pkg:type/namespace/name@version?qualifiers#subpath`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PackageUrl {
    pub package_type: String,
    pub namespace: Option<String>,
    pub name: String,
    pub version: Option<String>,
    pub qualifiers: BTreeMap<String, String>,
    pub subpath: Option<String>,
}

impl PackageUrl {
    pub fn new(package_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package_type: package_type.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// The purl without version, qualifiers and subpath
    pub fn base(&self) -> String {
        let mut base = PackageUrl::new(self.package_type.clone(), self.name.clone());
        base.namespace = self.namespace.clone();
        base.to_string()
    }
}

impl FromStr for PackageUrl {
    type Err = PurlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .trim()
            .strip_prefix("pkg:")
            .ok_or_else(|| PurlError::MissingScheme(s.to_string()))?
            .trim_start_matches('/');

        let (rest, subpath) = match rest.split_once('#') {
            Some((head, sub)) => (head, Some(sub.trim_matches('/').to_string())),
            None => (rest, None),
        };
        let (rest, qualifiers) = match rest.split_once('?') {
            Some((head, q)) => (head, parse_qualifiers(q)),
            None => (rest, BTreeMap::new()),
        };

        let (package_type, remainder) = rest
            .split_once('/')
            .filter(|(t, _)| !t.is_empty())
            .ok_or_else(|| PurlError::MissingType(s.to_string()))?;

        let remainder = remainder.trim_end_matches('/');
        let (path, version) = match remainder.rsplit_once('@') {
            Some((path, version)) if !path.is_empty() && !path.ends_with('/') => {
                (path, Some(version.to_string()))
            }
            _ => (remainder, None),
        };
        let (namespace, name) = match path.rsplit_once('/') {
            Some((ns, name)) => (Some(ns.to_string()), name),
            None => (None, path),
        };

        if name.is_empty() {
            return Err(PurlError::MissingName(s.to_string()));
        }

        Ok(Self {
            package_type: package_type.to_lowercase(),
            namespace: namespace.filter(|n| !n.is_empty()),
            name: name.to_string(),
            version: version.filter(|v| !v.is_empty()),
            qualifiers,
            subpath: subpath.filter(|p| !p.is_empty()),
        })
    }
}

impl fmt::Display for PackageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkg:{}/", self.package_type)?;
        if let Some(ns) = &self.namespace {
            write!(f, "{}/", ns)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, "@{}", version)?;
        }
        if !self.qualifiers.is_empty() {
            let q: Vec<String> = self
                .qualifiers
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "?{}", q.join("&"))?;
        }
        if let Some(subpath) = &self.subpath {
            write!(f, "#{}", subpath)?;
        }
        Ok(())
    }
}

/// Parse "arch=all&distro=bookworm" into a sorted map
pub fn parse_qualifiers(raw: &str) -> BTreeMap<String, String> {
    raw.split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .map(|(k, v)| (k.to_lowercase(), v.to_string()))
        .collect()
}

/// A known vulnerability affecting a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityRef {
    pub vulnerability_id: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub summary: String,
    pub severity: Option<String>,
    pub fixed_version: Option<String>,
}

/// Package data as produced by a scanner, manifest parser or SBOM loader
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageData {
    #[serde(rename = "type")]
    pub package_type: String,
    pub namespace: Option<String>,
    pub name: String,
    pub version: Option<String>,
    pub qualifiers: BTreeMap<String, String>,
    pub subpath: Option<String>,
    pub declared_license_expression: Option<String>,
    pub copyright: Option<String>,
    pub description: Option<String>,
    pub homepage_url: Option<String>,
    pub download_url: Option<String>,
    pub filename: Option<String>,
    pub md5: Option<String>,
    pub sha256: Option<String>,
    pub datasource_id: Option<String>,
    pub extra_data: Map<String, Value>,
    pub dependencies: Vec<DependencyData>,
}

impl PackageData {
    pub fn new(package_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package_type: package_type.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Build package data from a purl string (identity fields only)
    pub fn from_purl(purl: &str) -> Result<Self, PurlError> {
        let purl: PackageUrl = purl.parse()?;
        Ok(Self {
            package_type: purl.package_type,
            namespace: purl.namespace,
            name: purl.name,
            version: purl.version,
            qualifiers: purl.qualifiers,
            subpath: purl.subpath,
            ..Default::default()
        })
    }

    pub fn purl(&self) -> PackageUrl {
        PackageUrl {
            package_type: self.package_type.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            qualifiers: self.qualifiers.clone(),
            subpath: self.subpath.clone(),
        }
    }
}

/// A package instance identified in a project's codebase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPackage {
    pub uuid: Uuid,
    pub project: ProjectId,
    #[serde(rename = "type")]
    pub package_type: String,
    pub namespace: Option<String>,
    pub name: String,
    pub version: Option<String>,
    #[serde(default)]
    pub qualifiers: BTreeMap<String, String>,
    pub subpath: Option<String>,
    pub declared_license_expression: Option<String>,
    pub copyright: Option<String>,
    pub description: Option<String>,
    pub homepage_url: Option<String>,
    pub download_url: Option<String>,
    pub filename: Option<String>,
    pub md5: Option<String>,
    pub sha256: Option<String>,
    pub datasource_id: Option<String>,
    #[serde(default)]
    pub affected_by_vulnerabilities: Vec<VulnerabilityRef>,
    #[serde(default)]
    pub extra_data: Map<String, Value>,
}

impl DiscoveredPackage {
    pub fn from_data(project: ProjectId, data: &PackageData) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            project,
            package_type: data.package_type.clone(),
            namespace: data.namespace.clone(),
            name: data.name.clone(),
            version: data.version.clone(),
            qualifiers: data.qualifiers.clone(),
            subpath: data.subpath.clone(),
            declared_license_expression: data.declared_license_expression.clone(),
            copyright: data.copyright.clone(),
            description: data.description.clone(),
            homepage_url: data.homepage_url.clone(),
            download_url: data.download_url.clone(),
            filename: data.filename.clone(),
            md5: data.md5.clone(),
            sha256: data.sha256.clone(),
            datasource_id: data.datasource_id.clone(),
            affected_by_vulnerabilities: Vec::new(),
            extra_data: data.extra_data.clone(),
        }
    }

    /// Fill fields that are still empty from newer data; identity never changes
    pub fn update_from(&mut self, data: &PackageData) -> bool {
        let mut changed = false;
        macro_rules! fill {
            ($($field:ident),*) => {
                $(
                    if self.$field.is_none() && data.$field.is_some() {
                        self.$field = data.$field.clone();
                        changed = true;
                    }
                )*
            };
        }
        fill!(
            declared_license_expression,
            copyright,
            description,
            homepage_url,
            download_url,
            filename,
            md5,
            sha256,
            datasource_id
        );
        for (key, value) in &data.extra_data {
            if !self.extra_data.contains_key(key) {
                self.extra_data.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    pub fn purl(&self) -> PackageUrl {
        PackageUrl {
            package_type: self.package_type.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            qualifiers: self.qualifiers.clone(),
            subpath: self.subpath.clone(),
        }
    }

    pub fn package_url(&self) -> String {
        self.purl().to_string()
    }

    pub fn is_vulnerable(&self) -> bool {
        !self.affected_by_vulnerabilities.is_empty()
    }
}
