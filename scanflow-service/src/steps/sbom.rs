// SBOM Loading
// CycloneDX JSON, SPDX JSON and AboutCode .ABOUT files into package data

use crate::error::StepError;
use crate::execution::context::StepContext;
use crate::models::{status, CodebaseResource, DependencyData, PackageData, PackageUrl};
use crate::store::ResourceFilter;

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbomKind {
    About,
    Spdx,
    CycloneDx,
}

impl SbomKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SbomKind::About => "about",
            SbomKind::Spdx => "spdx",
            SbomKind::CycloneDx => "cyclonedx",
        }
    }
}

/// Detect the SBOM flavour of a file from its name, then its JSON content
pub fn get_default_package_type(path: &Path) -> Option<SbomKind> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    if name.ends_with(".about") {
        return Some(SbomKind::About);
    }
    if name.ends_with(".spdx.json") {
        return Some(SbomKind::Spdx);
    }
    if name.ends_with(".cdx.json") || name.ends_with(".bom.json") {
        return Some(SbomKind::CycloneDx);
    }
    if !name.ends_with(".json") {
        return None;
    }

    let content = fs::read_to_string(path).ok()?;
    let json: Value = serde_json::from_str(&content).ok()?;
    if json.get("spdxVersion").is_some() {
        return Some(SbomKind::Spdx);
    }
    let schema = json.get("$schema").and_then(Value::as_str).unwrap_or_default();
    let format = json.get("bomFormat").and_then(Value::as_str).unwrap_or_default();
    if format.eq_ignore_ascii_case("cyclonedx") || schema.contains("cyclonedx") {
        return Some(SbomKind::CycloneDx);
    }
    None
}

/// Convert an SPDX license expression to lowercase license keys
///
/// `MIT OR GPL-2.0-only WITH LicenseRef-scancode-generic-exception`
/// becomes `mit OR gpl-2.0 WITH generic-exception`.
pub fn convert_spdx_expression(expression: &str) -> String {
    let spaced = expression.replace('(', " ( ").replace(')', " ) ");
    let tokens: Vec<String> = spaced
        .split_whitespace()
        .map(|token| match token {
            "AND" | "OR" | "WITH" | "(" | ")" => token.to_string(),
            license => {
                let key = license
                    .strip_prefix("LicenseRef-scancode-")
                    .or_else(|| license.strip_prefix("LicenseRef-"))
                    .unwrap_or(license)
                    .to_lowercase();
                if let Some(base) = key.strip_suffix("-or-later") {
                    format!("{}-plus", base)
                } else {
                    key.strip_suffix("-only").unwrap_or(&key).to_string()
                }
            }
        })
        .collect();
    tokens.join(" ").replace("( ", "(").replace(" )", ")")
}

fn text(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "NOASSERTION" && *s != "NONE")
        .map(str::to_string)
}

fn identity_from_purl(purl: &str) -> Option<PackageData> {
    PackageData::from_purl(purl).ok()
}

// =============================================================================
// CycloneDX
// =============================================================================

fn cyclonedx_component(component: &Value) -> Option<PackageData> {
    let mut data = match text(component, "purl") {
        Some(purl) => identity_from_purl(&purl)?,
        None => {
            let mut data = PackageData::new("generic", text(component, "name")?);
            data.namespace = text(component, "group");
            data.version = text(component, "version");
            data
        }
    };

    data.description = text(component, "description");
    data.copyright = text(component, "copyright");

    let licenses: Vec<String> = component
        .get("licenses")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            text(entry, "expression").or_else(|| {
                let license = entry.get("license")?;
                text(license, "id").or_else(|| text(license, "name"))
            })
        })
        .collect();
    if !licenses.is_empty() {
        data.declared_license_expression = Some(convert_spdx_expression(&licenses.join(" AND ")));
    }

    for hash in component.get("hashes").and_then(Value::as_array).into_iter().flatten() {
        match (text(hash, "alg").as_deref(), text(hash, "content")) {
            (Some("MD5"), Some(content)) => data.md5 = Some(content),
            (Some("SHA-256"), Some(content)) => data.sha256 = Some(content),
            _ => {}
        }
    }

    for reference in component
        .get("externalReferences")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        match (text(reference, "type").as_deref(), text(reference, "url")) {
            (Some("website"), Some(url)) => data.homepage_url = Some(url),
            (Some("distribution"), Some(url)) => data.download_url = Some(url),
            _ => {}
        }
    }

    data.datasource_id = Some("cyclonedx_json".to_string());
    Some(data)
}

fn flatten_components<'a>(components: &'a [Value], out: &mut Vec<&'a Value>) {
    for component in components {
        out.push(component);
        if let Some(nested) = component.get("components").and_then(Value::as_array) {
            flatten_components(nested, out);
        }
    }
}

pub fn parse_cyclonedx(content: &str) -> Result<Vec<PackageData>, StepError> {
    let json: Value = serde_json::from_str(content)?;
    let mut components = Vec::new();
    if let Some(list) = json.get("components").and_then(Value::as_array) {
        flatten_components(list, &mut components);
    }

    let mut packages = Vec::new();
    let mut by_ref: HashMap<String, usize> = HashMap::new();
    let mut purl_by_ref: HashMap<String, String> = HashMap::new();

    for component in components {
        let Some(data) = cyclonedx_component(component) else {
            continue;
        };
        let purl = data.purl().to_string();
        if let Some(bom_ref) = text(component, "bom-ref") {
            by_ref.insert(bom_ref.clone(), packages.len());
            purl_by_ref.insert(bom_ref, purl.clone());
        }
        by_ref.entry(purl.clone()).or_insert(packages.len());
        purl_by_ref.entry(purl.clone()).or_insert(purl);
        packages.push(data);
    }

    for entry in json.get("dependencies").and_then(Value::as_array).into_iter().flatten() {
        let Some(index) = text(entry, "ref").and_then(|r| by_ref.get(&r).copied()) else {
            continue;
        };
        for target in entry.get("dependsOn").and_then(Value::as_array).into_iter().flatten() {
            let Some(target) = target.as_str() else {
                continue;
            };
            let purl = purl_by_ref
                .get(target)
                .cloned()
                .unwrap_or_else(|| target.to_string());
            let mut dep = DependencyData::new(purl.clone());
            dep.is_resolved = purl
                .parse::<PackageUrl>()
                .map(|p| p.version.is_some())
                .unwrap_or(false);
            dep.datasource_id = Some("cyclonedx_json".to_string());
            packages[index].dependencies.push(dep);
        }
    }

    Ok(packages)
}

// =============================================================================
// SPDX
// =============================================================================

fn spdx_package(package: &Value) -> Option<PackageData> {
    let purl = package
        .get("externalRefs")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|r| text(r, "referenceType").as_deref() == Some("purl"))
        .and_then(|r| text(r, "referenceLocator"));

    let mut data = match purl {
        Some(purl) => identity_from_purl(&purl)?,
        None => {
            let mut data = PackageData::new("generic", text(package, "name")?);
            data.version = text(package, "versionInfo");
            data
        }
    };

    data.declared_license_expression = text(package, "licenseDeclared")
        .or_else(|| text(package, "licenseConcluded"))
        .map(|l| convert_spdx_expression(&l));
    data.copyright = text(package, "copyrightText");
    data.download_url = text(package, "downloadLocation");
    data.homepage_url = text(package, "homepage");
    data.description = text(package, "description").or_else(|| text(package, "summary"));
    data.filename = text(package, "packageFileName");

    for checksum in package.get("checksums").and_then(Value::as_array).into_iter().flatten() {
        match (text(checksum, "algorithm").as_deref(), text(checksum, "checksumValue")) {
            (Some("MD5"), Some(value)) => data.md5 = Some(value),
            (Some("SHA256"), Some(value)) => data.sha256 = Some(value),
            _ => {}
        }
    }

    data.datasource_id = Some("spdx_document".to_string());
    Some(data)
}

pub fn parse_spdx(content: &str) -> Result<Vec<PackageData>, StepError> {
    let json: Value = serde_json::from_str(content)?;
    let mut packages = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for package in json.get("packages").and_then(Value::as_array).into_iter().flatten() {
        let Some(data) = spdx_package(package) else {
            continue;
        };
        if let Some(id) = text(package, "SPDXID") {
            by_id.insert(id, packages.len());
        }
        packages.push(data);
    }

    let mut edges = Vec::new();
    for relation in json.get("relationships").and_then(Value::as_array).into_iter().flatten() {
        let (Some(from), Some(to)) = (
            text(relation, "spdxElementId"),
            text(relation, "relatedSpdxElement"),
        ) else {
            continue;
        };
        match text(relation, "relationshipType").as_deref() {
            Some("DEPENDS_ON") => edges.push((from, to)),
            Some("DEPENDENCY_OF") => edges.push((to, from)),
            _ => {}
        }
    }

    for (from, to) in edges {
        let (Some(&from), Some(&to)) = (by_id.get(&from), by_id.get(&to)) else {
            continue;
        };
        let target = packages[to].purl();
        let mut dep = DependencyData::new(target.to_string());
        dep.is_resolved = target.version.is_some();
        dep.datasource_id = Some("spdx_document".to_string());
        packages[from].dependencies.push(dep);
    }

    Ok(packages)
}

// =============================================================================
// AboutCode .ABOUT
// =============================================================================

pub fn parse_about(content: &str) -> Result<Vec<PackageData>, StepError> {
    let value: serde_yaml::Value = serde_yaml::from_str(content)
        .map_err(|e| StepError::analysis(format!("invalid ABOUT file: {}", e)))?;
    let field = |key: &str| {
        value
            .get(key)
            .and_then(|v| match v {
                serde_yaml::Value::String(s) => Some(s.trim().to_string()),
                serde_yaml::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
    };

    let purl = field("package_url").or_else(|| field("purl"));
    let mut data = match purl.as_deref().and_then(identity_from_purl) {
        Some(data) => data,
        None => {
            let name = field("name")
                .ok_or_else(|| StepError::analysis("ABOUT file without name or package_url"))?;
            let mut data = PackageData::new(field("type").unwrap_or_else(|| "generic".to_string()), name);
            data.namespace = field("namespace");
            data.version = field("version");
            data
        }
    };

    data.filename = field("about_resource");
    data.download_url = field("download_url");
    data.homepage_url = field("homepage_url");
    data.declared_license_expression = field("license_expression");
    data.copyright = field("copyright");
    data.description = field("description");
    data.md5 = field("checksum_md5").or_else(|| field("md5"));
    data.sha256 = field("checksum_sha256").or_else(|| field("sha256"));
    data.datasource_id = Some("about_file".to_string());

    let mut extra = Map::new();
    if let Some(license_file) = field("license_file") {
        extra.insert("license_file".to_string(), Value::String(license_file));
    }
    data.extra_data = extra;

    Ok(vec![data])
}

/// Parse any supported SBOM file
pub fn parse_sbom(path: &Path) -> Result<Vec<PackageData>, StepError> {
    let kind = get_default_package_type(path).ok_or_else(|| {
        StepError::analysis(format!("{} is not a supported SBOM", path.display()))
    })?;
    let content = fs::read_to_string(path)?;
    match kind {
        SbomKind::About => parse_about(&content),
        SbomKind::Spdx => parse_spdx(&content),
        SbomKind::CycloneDx => parse_cyclonedx(&content),
    }
}

fn record_sbom(ctx: &StepContext, resource: &CodebaseResource, packages: Vec<PackageData>) -> Result<usize, StepError> {
    let scope = ctx.scope();
    let mut created = 0;

    for package in packages {
        let Some(stored) = ctx.save_errors(scope.update_or_create_package(&package), Some(&resource.path)) else {
            continue;
        };
        scope.attach_package(&resource.key(), &stored)?;
        for dependency in &package.dependencies {
            let dependency = dependency.clone().in_datafile(resource.path.clone());
            scope.add_dependency(&dependency, Some(stored.uuid))?;
        }
        created += 1;
    }
    scope.set_status(&resource.path, status::SBOM)?;
    Ok(created)
}

/// Load packages and dependencies from every SBOM file of the codebase
pub fn load_sbom_packages(ctx: &StepContext) -> Result<(), StepError> {
    let codebase = ctx.project().codebase_path();
    let candidates: Vec<CodebaseResource> = ctx
        .scope()
        .query_resources(ResourceFilter::files())
        .iter()
        .filter(|r| get_default_package_type(&codebase.join(&r.path)).is_some())
        .collect();

    if candidates.is_empty() {
        return Err(StepError::analysis("no SBOM file found in the inputs"));
    }

    let mut loaded = 0;
    for resource in &candidates {
        let location = codebase.join(&resource.path);
        match parse_sbom(&location) {
            Ok(packages) => loaded += record_sbom(ctx, resource, packages)?,
            Err(err) if err.is_recoverable() => {
                ctx.save_errors::<(), _>(Err(err), Some(&resource.path));
            }
            Err(err) => return Err(err),
        }
    }

    ctx.log(format!("{} packages loaded from {} SBOM files", loaded, candidates.len()));
    Ok(())
}
