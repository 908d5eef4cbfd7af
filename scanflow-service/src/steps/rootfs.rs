// Root Filesystem Steps
// Distro detection and system package collection from dpkg and apk databases

use crate::error::StepError;
use crate::execution::context::StepContext;
use crate::models::{status, DependencyData, PackageData, PackageUrl};
use crate::store::ResourceFilter;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

const OS_RELEASE: [&str; 2] = ["etc/os-release", "usr/lib/os-release"];
const DPKG_STATUS: &str = "var/lib/dpkg/status";
const APK_INSTALLED: &str = "lib/apk/db/installed";

/// Top-level directories of a root filesystem never worth analyzing
const UNINTERESTING_DIRS: [&str; 6] = ["proc", "sys", "dev", "tmp", "run", "var/cache"];

#[derive(Debug, Error)]
pub enum RootfsError {
    #[error("distro not found in root filesystem {0:?}")]
    DistroNotFound(String),
}

/// Operating system identity read from os-release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distro {
    pub identifier: String,
    pub version_id: Option<String>,
    pub pretty_name: Option<String>,
}

impl Distro {
    pub fn from_os_release(content: &str) -> Option<Self> {
        let fields: BTreeMap<&str, String> = content
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim(), value.trim().trim_matches('"').to_string()))
            .collect();
        Some(Self {
            identifier: fields.get("ID")?.to_lowercase(),
            version_id: fields.get("VERSION_ID").cloned(),
            pretty_name: fields.get("PRETTY_NAME").cloned(),
        })
    }
}

/// A directory of the codebase that looks like a filesystem root
#[derive(Debug, Clone)]
pub struct RootFs {
    /// Path relative to codebase/, empty for the codebase itself
    pub relative: String,
    pub location: PathBuf,
    pub distro: Option<Distro>,
}

impl RootFs {
    /// Resource path of an absolute path inside this root
    pub fn resource_path(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if self.relative.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.relative, path)
        }
    }

    fn namespace_or(&self, default: &str) -> String {
        self.distro
            .as_ref()
            .map(|d| d.identifier.clone())
            .unwrap_or_else(|| default.to_string())
    }
}

fn root_of<'a>(relative: &'a str, marker: &str) -> Option<&'a str> {
    if relative == marker {
        return Some("");
    }
    relative
        .strip_suffix(marker)
        .and_then(|prefix| prefix.strip_suffix('/'))
}

/// Locate root filesystems under `codebase` by their os-release or package database
pub fn find_root_filesystems(codebase: &Path) -> Vec<RootFs> {
    let markers: Vec<&str> = OS_RELEASE
        .iter()
        .copied()
        .chain([DPKG_STATUS, APK_INSTALLED])
        .collect();

    let mut roots: BTreeMap<String, PathBuf> = BTreeMap::new();
    for entry in WalkDir::new(codebase).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(codebase) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        if let Some(root) = markers.iter().find_map(|m| root_of(&relative, m)) {
            roots
                .entry(root.to_string())
                .or_insert_with(|| codebase.join(root));
        }
    }

    roots
        .into_iter()
        .map(|(relative, location)| {
            let distro = OS_RELEASE
                .iter()
                .filter_map(|p| fs::read_to_string(location.join(p)).ok())
                .find_map(|content| Distro::from_os_release(&content));
            RootFs {
                relative,
                location,
                distro,
            }
        })
        .collect()
}

/// Log every root filesystem found and its distro
pub fn find_root_filesystems_step(ctx: &StepContext) -> Result<(), StepError> {
    let roots = find_root_filesystems(&ctx.project().codebase_path());
    if roots.is_empty() {
        ctx.add_warning("No root filesystem found in the codebase");
    }

    for root in &roots {
        let label = if root.relative.is_empty() { "/" } else { &root.relative };
        match &root.distro {
            Some(distro) => ctx.log(format!(
                "Root filesystem {} is {}",
                label,
                distro.pretty_name.as_deref().unwrap_or(&distro.identifier)
            )),
            None => {
                ctx.save_errors::<(), _>(Err(RootfsError::DistroNotFound(label.to_string())), None);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Package databases
// =============================================================================

/// A package read from a system database, with the files it installed
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub data: PackageData,
    pub files: Vec<String>,
}

/// Split a control-file style database into field maps; continuation lines are joined
fn parse_stanzas(content: &str, separator: char) -> Vec<Vec<(String, String)>> {
    let mut stanzas = Vec::new();
    let mut current: Vec<(String, String)> = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                stanzas.push(std::mem::take(&mut current));
            }
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = current.last_mut() {
                value.push('\n');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(separator) {
            current.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    if !current.is_empty() {
        stanzas.push(current);
    }
    stanzas
}

fn field<'a>(stanza: &'a [(String, String)], key: &str) -> Option<&'a str> {
    stanza
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

/// `libc6 (>= 2.34), zlib1g | libz` into (name, requirement) pairs, first alternative only
fn parse_deb_depends(value: &str) -> Vec<(String, Option<String>)> {
    value
        .split(',')
        .filter_map(|entry| entry.split('|').next())
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('(') {
            Some((name, requirement)) => (
                name.trim().split(':').next().unwrap_or_default().to_string(),
                Some(requirement.trim_end_matches(')').trim().to_string()),
            ),
            None => (entry.split(':').next().unwrap_or_default().to_string(), None),
        })
        .collect()
}

/// Read `var/lib/dpkg/status` and the matching `info/*.list` files
pub fn read_dpkg_database(root: &RootFs) -> std::io::Result<Vec<InstalledPackage>> {
    let content = fs::read_to_string(root.location.join(DPKG_STATUS))?;
    let info_dir = root.location.join("var/lib/dpkg/info");
    let namespace = root.namespace_or("debian");
    let mut packages = Vec::new();

    for stanza in parse_stanzas(&content, ':') {
        let installed = field(&stanza, "Status").is_some_and(|s| s.ends_with(" installed"));
        let Some(name) = field(&stanza, "Package") else {
            continue;
        };
        if !installed {
            continue;
        }

        let mut data = PackageData::new("deb", name).with_namespace(namespace.clone());
        data.version = field(&stanza, "Version").map(str::to_string);
        let arch = field(&stanza, "Architecture");
        if let Some(arch) = arch {
            data.qualifiers.insert("arch".to_string(), arch.to_string());
        }
        data.homepage_url = field(&stanza, "Homepage").map(str::to_string);
        data.description = field(&stanza, "Description").map(str::to_string);
        data.datasource_id = Some("debian_installed_status_db".to_string());

        for (dep, requirement) in parse_deb_depends(field(&stanza, "Depends").unwrap_or_default()) {
            let purl = PackageUrl::new("deb", dep).with_namespace(namespace.clone());
            let mut dependency = DependencyData::new(purl.to_string()).with_scope("depends");
            if let Some(requirement) = requirement {
                dependency = dependency.with_requirement(requirement);
            }
            dependency.datasource_id = data.datasource_id.clone();
            data.dependencies.push(dependency);
        }

        let mut list_names = vec![format!("{}.list", name)];
        if let Some(arch) = arch {
            list_names.push(format!("{}:{}.list", name, arch));
        }
        let files = list_names
            .iter()
            .find_map(|n| fs::read_to_string(info_dir.join(n)).ok())
            .map(|list| {
                list.lines()
                    .filter(|l| !l.is_empty() && *l != "/.")
                    .map(|l| root.resource_path(l))
                    .collect()
            })
            .unwrap_or_default();

        packages.push(InstalledPackage { data, files });
    }
    Ok(packages)
}

/// Read `lib/apk/db/installed`
pub fn read_apk_database(root: &RootFs) -> std::io::Result<Vec<InstalledPackage>> {
    let content = fs::read_to_string(root.location.join(APK_INSTALLED))?;
    let namespace = root.namespace_or("alpine");
    let mut packages = Vec::new();

    for stanza in parse_stanzas(&content, ':') {
        let Some(name) = field(&stanza, "P") else {
            continue;
        };
        let mut data = PackageData::new("apk", name).with_namespace(namespace.clone());
        data.version = field(&stanza, "V").map(str::to_string);
        if let Some(arch) = field(&stanza, "A") {
            data.qualifiers.insert("arch".to_string(), arch.to_string());
        }
        data.declared_license_expression = field(&stanza, "L").map(|l| l.to_lowercase());
        data.homepage_url = field(&stanza, "U").map(str::to_string);
        data.description = field(&stanza, "T").map(str::to_string);
        data.datasource_id = Some("alpine_installed_db".to_string());

        // virtual provides such as so:libc.musl-x86_64.so.1 are not packages
        for dep in field(&stanza, "D")
            .unwrap_or_default()
            .split_whitespace()
            .filter(|d| !d.contains(':') && !d.starts_with('!'))
        {
            let name = dep.split(['<', '>', '=', '~']).next().unwrap_or(dep);
            let purl = PackageUrl::new("apk", name).with_namespace(namespace.clone());
            let mut dependency = DependencyData::new(purl.to_string()).with_scope("depends");
            if name.len() < dep.len() {
                dependency = dependency.with_requirement(&dep[name.len()..]);
            }
            dependency.datasource_id = data.datasource_id.clone();
            data.dependencies.push(dependency);
        }

        let mut folder = String::new();
        let mut files = Vec::new();
        for (key, value) in &stanza {
            match key.as_str() {
                "F" => folder = value.clone(),
                "R" if folder.is_empty() => files.push(root.resource_path(value)),
                "R" => files.push(root.resource_path(&format!("{}/{}", folder, value))),
                _ => {}
            }
        }

        packages.push(InstalledPackage { data, files });
    }
    Ok(packages)
}

fn record_installed(
    ctx: &StepContext,
    database_path: &str,
    installed: Vec<InstalledPackage>,
) -> Result<usize, StepError> {
    let scope = ctx.scope();
    let mut created = 0;

    for package in installed {
        let Some(stored) = ctx.save_errors(scope.update_or_create_package(&package.data), Some(database_path)) else {
            continue;
        };
        created += 1;

        for dependency in &package.data.dependencies {
            let dependency = dependency.clone().in_datafile(database_path);
            scope.add_dependency(&dependency, Some(stored.uuid))?;
        }
        for path in &package.files {
            if !scope.resource_at(path).is_ok_and(|r| r.is_file()) {
                continue;
            }
            scope.attach_package(&scope.key(path), &stored)?;
            scope.set_status(path, status::SYSTEM_PACKAGE)?;
        }
    }

    if scope.has_resource(database_path) {
        scope.set_status(database_path, status::SYSTEM_PACKAGE)?;
    }
    Ok(created)
}

/// Create system packages from the dpkg and apk databases of every root filesystem
pub fn collect_system_packages(ctx: &StepContext) -> Result<(), StepError> {
    let roots = find_root_filesystems(&ctx.project().codebase_path());
    let mut created = 0;

    for root in &roots {
        if root.location.join(DPKG_STATUS).is_file() {
            let database = root.resource_path(DPKG_STATUS);
            if let Some(installed) = ctx.save_errors(read_dpkg_database(root), Some(&database)) {
                created += record_installed(ctx, &database, installed)?;
            }
        }
        if root.location.join(APK_INSTALLED).is_file() {
            let database = root.resource_path(APK_INSTALLED);
            if let Some(installed) = ctx.save_errors(read_apk_database(root), Some(&database)) {
                created += record_installed(ctx, &database, installed)?;
            }
        }
    }

    ctx.log(format!("{} system packages collected", created));
    Ok(())
}

/// Flag resources under pseudo filesystems and caches of each root
pub fn flag_uninteresting_codebase_resources(ctx: &StepContext) -> Result<(), StepError> {
    let scope = ctx.scope();
    let mut flagged = 0;

    for root in find_root_filesystems(&ctx.project().codebase_path()) {
        for dir in UNINTERESTING_DIRS {
            let filter = ResourceFilter::new()
                .under(root.resource_path(dir))
                .without_status();
            for path in scope.query_resources(filter).paths() {
                scope.set_status(&path, status::IGNORED_NOT_INTERESTING)?;
                flagged += 1;
            }
        }
    }

    ctx.log(format!("{} uninteresting resources flagged", flagged));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::testing::TestHarness;
    use crate::steps::codebase::collect_and_create_codebase_resources;

    const DPKG: &str = "Package: bash\n\
Status: install ok installed\n\
Architecture: amd64\n\
Version: 5.2.15-2\n\
Depends: base-files (>= 2.1.12), debianutils (>= 5.6-0.1)\n\
Description: GNU Bourne Again SHell\n more text\n\
\n\
Package: removed\n\
Status: deinstall ok config-files\n\
Version: 1.0\n";

    const APK: &str = "P:musl\nV:1.2.4-r2\nA:x86_64\nL:MIT\nT:the musl c library\nD:so:libc.musl-x86_64.so.1\n\
F:lib\nR:ld-musl-x86_64.so.1\n\n\
P:busybox\nV:1.36.1-r5\nL:GPL-2.0-only\nD:musl>=1.2 so:libc.musl-x86_64.so.1\nF:bin\nR:busybox\n";

    #[test]
    fn test_distro_from_os_release() {
        let distro = Distro::from_os_release(
            "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nID=debian\nVERSION_ID=\"12\"\n",
        )
        .unwrap();
        assert_eq!(distro.identifier, "debian");
        assert_eq!(distro.version_id.as_deref(), Some("12"));
        assert!(Distro::from_os_release("NAME=unknown").is_none());
    }

    #[test]
    fn test_parse_deb_depends() {
        let deps = parse_deb_depends("libc6 (>= 2.34), zlib1g | libz, perl:any");
        assert_eq!(
            deps,
            vec![
                ("libc6".to_string(), Some(">= 2.34".to_string())),
                ("zlib1g".to_string(), None),
                ("perl".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_collect_debian_system_packages() {
        let harness = TestHarness::new();
        harness.write_codebase("etc/os-release", b"ID=debian\nVERSION_ID=\"12\"\n");
        harness.write_codebase("var/lib/dpkg/status", DPKG.as_bytes());
        harness.write_codebase("var/lib/dpkg/info/bash.list", b"/.\n/bin\n/bin/bash\n");
        harness.write_codebase("bin/bash", b"\x7fELF");
        harness.write_codebase("proc/cpuinfo", b"cpu");
        let ctx = harness.context("collect_system_packages");

        collect_and_create_codebase_resources(&ctx).unwrap();
        find_root_filesystems_step(&ctx).unwrap();
        collect_system_packages(&ctx).unwrap();
        flag_uninteresting_codebase_resources(&ctx).unwrap();

        let scope = harness.scope();
        let packages = scope.packages();
        assert_eq!(packages.len(), 1);
        assert_eq!(
            packages[0].package_url(),
            "pkg:deb/debian/bash@5.2.15-2?arch=amd64"
        );
        assert_eq!(scope.dependencies().len(), 2);
        assert_eq!(
            scope.resource_at("bin/bash").unwrap().status.as_deref(),
            Some(status::SYSTEM_PACKAGE)
        );
        assert_eq!(
            scope.resource_at("proc/cpuinfo").unwrap().status.as_deref(),
            Some(status::IGNORED_NOT_INTERESTING)
        );
        assert!(scope.messages().is_empty());
    }

    #[test]
    fn test_collect_alpine_packages_in_layer() {
        let harness = TestHarness::new();
        harness.write_codebase("image/layer1/lib/apk/db/installed", APK.as_bytes());
        harness.write_codebase("image/layer1/bin/busybox", b"bb");
        let ctx = harness.context("collect_system_packages");

        collect_and_create_codebase_resources(&ctx).unwrap();
        find_root_filesystems_step(&ctx).unwrap();
        collect_system_packages(&ctx).unwrap();

        let scope = harness.scope();
        assert_eq!(scope.packages().len(), 2);
        let busybox = scope
            .package_by_purl("pkg:apk/alpine/busybox@1.36.1-r5")
            .unwrap();
        assert_eq!(busybox.declared_license_expression.as_deref(), Some("gpl-2.0-only"));
        assert_eq!(scope.package_resources(busybox.uuid).len(), 1);

        let deps = scope.dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].purl, "pkg:apk/alpine/musl");
        assert_eq!(deps[0].extracted_requirement.as_deref(), Some(">=1.2"));

        // no os-release in the layer: recorded as an error message, not a failure
        let messages = scope.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].description.contains("image/layer1"));
    }
}
