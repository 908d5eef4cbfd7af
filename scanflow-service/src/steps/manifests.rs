// Package Manifests
// Minimal readers for package.json, requirements.txt and Cargo.toml, plus dependency resolution

use crate::error::StepError;
use crate::execution::context::StepContext;
use crate::models::{
    status, CodebaseResource, DependencyData, PackageData, PackageUrl, ResourceType,
};
use crate::store::ResourceFilter;

use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Packages and dependencies read from one manifest
#[derive(Debug, Default)]
pub struct Manifest {
    pub package: Option<PackageData>,
    /// Dependencies of the project itself when the manifest declares no package
    pub dependencies: Vec<DependencyData>,
}

/// Manifest file names this module understands
pub fn is_manifest(name: &str) -> bool {
    matches!(name, "package.json" | "Cargo.toml")
        || (name.starts_with("requirements") && name.ends_with(".txt"))
}

/// Lowercase a license declaration and join words with dashes ("GPL 2.0" -> "gpl-2.0")
pub fn normalize_license(statement: &str) -> Option<String> {
    let normalized = statement
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();
    Some(normalized).filter(|s| !s.is_empty())
}

pub fn parse_manifest(path: &Path, datafile_path: &str) -> Result<Manifest, StepError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let content = fs::read_to_string(path)?;

    match name.as_str() {
        "package.json" => parse_package_json(&content, datafile_path),
        "Cargo.toml" => parse_cargo_toml(&content, datafile_path),
        _ if is_manifest(&name) => Ok(Manifest {
            package: None,
            dependencies: parse_requirements(&content, datafile_path),
        }),
        _ => Err(StepError::analysis(format!("unsupported manifest: {}", name))),
    }
}

fn npm_purl(name: &str) -> String {
    match name.strip_prefix('@').and_then(|n| n.split_once('/')) {
        Some((scope, name)) => PackageUrl::new("npm", name)
            .with_namespace(format!("%40{}", scope))
            .to_string(),
        None => PackageUrl::new("npm", name).to_string(),
    }
}

pub fn parse_package_json(content: &str, datafile_path: &str) -> Result<Manifest, StepError> {
    let json: JsonValue = serde_json::from_str(content)?;
    let name = json["name"]
        .as_str()
        .ok_or_else(|| StepError::analysis(format!("{}: missing package name", datafile_path)))?;

    let mut package = match npm_purl(name).parse::<PackageUrl>() {
        Ok(purl) => {
            let mut data = PackageData::new("npm", purl.name);
            data.namespace = purl.namespace;
            data
        }
        Err(err) => return Err(StepError::analysis(err.to_string())),
    };
    package.version = json["version"].as_str().map(str::to_string);
    package.description = json["description"].as_str().map(str::to_string);
    package.homepage_url = json["homepage"].as_str().map(str::to_string);
    package.declared_license_expression = match &json["license"] {
        JsonValue::String(license) => normalize_license(license),
        JsonValue::Object(obj) => obj
            .get("type")
            .and_then(JsonValue::as_str)
            .and_then(normalize_license),
        _ => None,
    };
    package.datasource_id = Some("npm_package_json".to_string());

    for (section, runtime, optional) in [
        ("dependencies", true, false),
        ("devDependencies", false, false),
        ("peerDependencies", true, false),
        ("optionalDependencies", true, true),
    ] {
        let Some(deps) = json[section].as_object() else {
            continue;
        };
        for (dep_name, requirement) in deps {
            let mut dep = DependencyData::new(npm_purl(dep_name))
                .with_scope(section)
                .in_datafile(datafile_path);
            dep.extracted_requirement = requirement.as_str().map(str::to_string);
            dep.is_runtime = runtime;
            dep.is_optional = optional;
            dep.datasource_id = package.datasource_id.clone();
            package.dependencies.push(dep);
        }
    }

    Ok(Manifest {
        package: Some(package),
        dependencies: Vec::new(),
    })
}

pub fn parse_requirements(content: &str, datafile_path: &str) -> Vec<DependencyData> {
    let mut dependencies = Vec::new();

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() || line.starts_with('-') {
            continue;
        }
        // drop environment markers and extras
        let line = line.split(';').next().unwrap_or_default().trim();
        let split_at = line
            .find(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | ' ' | '['))
            .unwrap_or(line.len());
        let name = line[..split_at].trim().to_lowercase();
        if name.is_empty() {
            continue;
        }
        let requirement = line[split_at..]
            .trim_start_matches(|c: char| c == '[' || c.is_alphanumeric() || c == ']' || c == ',')
            .trim()
            .to_string();

        let pinned = requirement
            .strip_prefix("==")
            .map(str::trim)
            .filter(|v| !v.is_empty() && !v.contains(['*', ',']));
        let mut purl = PackageUrl::new("pypi", name);
        if let Some(version) = pinned {
            purl = purl.with_version(version);
        }

        let is_resolved = pinned.is_some();

        let mut dep = DependencyData::new(purl.to_string())
            .with_scope("install")
            .in_datafile(datafile_path);
        dep.extracted_requirement = Some(requirement).filter(|r| !r.is_empty());
        dep.is_resolved = is_resolved;
        dep.datasource_id = Some("pip_requirements".to_string());
        dependencies.push(dep);
    }

    dependencies
}

pub fn parse_cargo_toml(content: &str, datafile_path: &str) -> Result<Manifest, StepError> {
    let value: toml::Value = toml::from_str(content)
        .map_err(|e| StepError::analysis(format!("{}: invalid TOML: {}", datafile_path, e)))?;

    let Some(meta) = value.get("package") else {
        // a virtual workspace manifest declares no package
        return Ok(Manifest::default());
    };
    let name = meta
        .get("name")
        .and_then(toml::Value::as_str)
        .ok_or_else(|| StepError::analysis(format!("{}: missing package name", datafile_path)))?;

    let text = |key: &str| meta.get(key).and_then(toml::Value::as_str).map(str::to_string);
    let mut package = PackageData::new("cargo", name);
    package.version = text("version");
    package.description = text("description");
    package.homepage_url = text("homepage").or_else(|| text("repository"));
    package.declared_license_expression = text("license").map(|l| l.to_lowercase());
    package.datasource_id = Some("cargo_toml".to_string());

    for (section, runtime) in [
        ("dependencies", true),
        ("dev-dependencies", false),
        ("build-dependencies", false),
    ] {
        let Some(table) = value.get(section).and_then(toml::Value::as_table) else {
            continue;
        };
        for (dep_name, spec) in table {
            let (requirement, optional) = match spec {
                toml::Value::String(version) => (Some(version.clone()), false),
                toml::Value::Table(t) => (
                    t.get("version").and_then(toml::Value::as_str).map(str::to_string),
                    t.get("optional").and_then(toml::Value::as_bool).unwrap_or(false),
                ),
                _ => (None, false),
            };
            let mut dep = DependencyData::new(PackageUrl::new("cargo", dep_name.clone()).to_string())
                .with_scope(section)
                .in_datafile(datafile_path);
            dep.extracted_requirement = requirement;
            dep.is_runtime = runtime;
            dep.is_optional = optional;
            dep.datasource_id = package.datasource_id.clone();
            package.dependencies.push(dep);
        }
    }

    Ok(Manifest {
        package: Some(package),
        dependencies: Vec::new(),
    })
}

/// Store the packages and dependencies read from one manifest resource
fn record_manifest(ctx: &StepContext, resource: &CodebaseResource, manifest: Manifest) -> Result<(), StepError> {
    let scope = ctx.scope();

    if let Some(package) = manifest.package {
        let stored = scope.update_or_create_package(&package)?;
        scope.attach_package(&resource.key(), &stored)?;
        for dependency in &package.dependencies {
            scope.add_dependency(dependency, Some(stored.uuid))?;
        }
    }
    for dependency in &manifest.dependencies {
        scope.add_dependency(dependency, None)?;
    }
    scope.set_status(&resource.path, status::APPLICATION_PACKAGE)?;
    Ok(())
}

/// Read every supported manifest in the codebase into packages and dependencies
pub fn scan_for_application_packages(ctx: &StepContext) -> Result<(), StepError> {
    let codebase = ctx.project().codebase_path();
    let manifests: Vec<CodebaseResource> = ctx
        .scope()
        .query_resources(ResourceFilter::new().of_type(ResourceType::File))
        .iter()
        .filter(|r| is_manifest(&r.name))
        .collect();

    let mut parsed = 0;
    for resource in &manifests {
        let location = codebase.join(&resource.path);
        match parse_manifest(&location, &resource.path) {
            Ok(manifest) => {
                record_manifest(ctx, resource, manifest)?;
                parsed += 1;
            }
            Err(err) if err.is_recoverable() => {
                ctx.save_errors::<(), _>(Err(err), Some(&resource.path));
            }
            Err(err) => return Err(err),
        }
    }

    debug!(found = manifests.len(), parsed, "application manifests");
    ctx.log(format!("{} package manifests parsed", parsed));
    Ok(())
}

/// Link unresolved dependencies to packages of the project with the same identity
pub fn resolve_dependencies(ctx: &StepContext) -> Result<(), StepError> {
    let scope = ctx.scope();
    let packages = scope.packages();
    let mut resolved = 0;

    for dependency in scope.dependencies() {
        if dependency.resolved_to.is_some() {
            continue;
        }
        let Ok(wanted) = dependency.purl.parse::<PackageUrl>() else {
            ctx.add_warning(format!("invalid dependency purl: {}", dependency.purl));
            continue;
        };

        let candidate = packages.iter().find(|p| {
            p.package_type == wanted.package_type
                && p.namespace == wanted.namespace
                && p.name == wanted.name
                && (wanted.version.is_none() || p.version == wanted.version)
        });
        if let Some(package) = candidate {
            let newly_resolved = scope.modify_dependency(&dependency.dependency_uid, |d| {
                if d.resolved_to.is_some() {
                    return false;
                }
                d.resolve_to(package.uuid);
                true
            })?;
            if newly_resolved {
                resolved += 1;
            }
        }
    }

    ctx.log(format!("{} dependencies resolved", resolved));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::testing::TestHarness;
    use crate::steps::codebase::collect_and_create_codebase_resources;

    #[test]
    fn test_parse_package_json() {
        let content = r#"{
            "name": "@acme/app",
            "version": "1.2.0",
            "license": "MIT",
            "dependencies": {"lodash": "^4.17.21"},
            "devDependencies": {"jest": "^29.0.0"}
        }"#;
        let manifest = parse_package_json(content, "package.json").unwrap();
        let package = manifest.package.unwrap();

        assert_eq!(package.purl().to_string(), "pkg:npm/%40acme/app@1.2.0");
        assert_eq!(package.declared_license_expression.as_deref(), Some("mit"));
        assert_eq!(package.dependencies.len(), 2);
        let jest = package
            .dependencies
            .iter()
            .find(|d| d.purl == "pkg:npm/jest")
            .unwrap();
        assert!(!jest.is_runtime);
        assert_eq!(jest.scope.as_deref(), Some("devDependencies"));
    }

    #[test]
    fn test_parse_requirements() {
        let content = "# comment\nDjango==4.0.8\nrequests>=2.0 ; python_version > '3'\n-r other.txt\n\ntoml\n";
        let deps = parse_requirements(content, "requirements.txt");

        assert_eq!(deps.len(), 3);
        assert_eq!(deps[0].purl, "pkg:pypi/django@4.0.8");
        assert!(deps[0].is_resolved);
        assert_eq!(deps[1].purl, "pkg:pypi/requests");
        assert_eq!(deps[1].extracted_requirement.as_deref(), Some(">=2.0"));
        assert!(!deps[1].is_resolved);
        assert_eq!(deps[2].purl, "pkg:pypi/toml");
        assert!(deps[2].extracted_requirement.is_none());
    }

    #[test]
    fn test_parse_cargo_toml() {
        let content = r#"
[package]
name = "demo"
version = "0.1.0"
license = "MIT OR Apache-2.0"

[dependencies]
serde = { version = "1.0", features = ["derive"] }
log = "0.4"
tokio = { version = "1", optional = true }

[dev-dependencies]
tempfile = "3"
"#;
        let manifest = parse_cargo_toml(content, "Cargo.toml").unwrap();
        let package = manifest.package.unwrap();
        assert_eq!(package.purl().to_string(), "pkg:cargo/demo@0.1.0");
        assert_eq!(
            package.declared_license_expression.as_deref(),
            Some("mit or apache-2.0")
        );
        assert_eq!(package.dependencies.len(), 4);
        assert!(package
            .dependencies
            .iter()
            .any(|d| d.purl == "pkg:cargo/tokio" && d.is_optional));
    }

    #[test]
    fn test_invalid_manifest_is_an_analysis_error() {
        let err = parse_package_json("{ not json", "package.json").unwrap_err();
        assert!(err.is_recoverable());
        let err = parse_cargo_toml("[package", "Cargo.toml").unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_scan_and_resolve() {
        let harness = TestHarness::new();
        harness.write_codebase(
            "app/package.json",
            br#"{"name": "app", "version": "1.0.0", "dependencies": {"lib": "1.0.0"}}"#,
        );
        harness.write_codebase(
            "app/node_modules/lib/package.json",
            br#"{"name": "lib", "version": "1.0.0"}"#,
        );
        harness.write_codebase("broken/package.json", b"{");
        let ctx = harness.context("scan_for_application_packages");

        collect_and_create_codebase_resources(&ctx).unwrap();
        scan_for_application_packages(&ctx).unwrap();
        resolve_dependencies(&ctx).unwrap();

        let scope = harness.scope();
        assert_eq!(scope.packages().len(), 2);
        let lib = scope.package_by_purl("pkg:npm/lib@1.0.0").unwrap();
        let deps = scope.dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].resolved_to, Some(lib.uuid));

        let messages = scope.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].resource_path.as_deref(), Some("broken/package.json"));
    }
}
