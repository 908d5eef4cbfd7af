// CycloneDX Report
// CycloneDX 1.5 JSON bill of materials built from discovered packages

use crate::models::DiscoveredPackage;
use crate::report::{ReportEncoder, ReportResult, TOOL_NAME, TOOL_VERSION};
use crate::store::ProjectSnapshot;

use chrono::Utc;
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub const SPEC_VERSION: &str = "1.5";

fn component(package: &DiscoveredPackage) -> Value {
    let purl = package.package_url();
    let mut component = Map::new();
    component.insert("type".into(), json!("library"));
    component.insert("bom-ref".into(), json!(purl));
    component.insert("name".into(), json!(package.name));
    if let Some(namespace) = &package.namespace {
        component.insert("group".into(), json!(namespace));
    }
    if let Some(version) = &package.version {
        component.insert("version".into(), json!(version));
    }
    component.insert("purl".into(), json!(purl));
    if let Some(description) = &package.description {
        component.insert("description".into(), json!(description));
    }
    if let Some(copyright) = &package.copyright {
        component.insert("copyright".into(), json!(copyright));
    }
    if let Some(license) = package.declared_license_expression.as_deref().filter(|l| !l.is_empty()) {
        component.insert("licenses".into(), json!([{ "expression": license }]));
    }

    let hashes: Vec<Value> = [("MD5", &package.md5), ("SHA-256", &package.sha256)]
        .into_iter()
        .filter_map(|(alg, value)| value.as_ref().map(|v| json!({ "alg": alg, "content": v })))
        .collect();
    if !hashes.is_empty() {
        component.insert("hashes".into(), Value::Array(hashes));
    }

    let references: Vec<Value> = [("website", &package.homepage_url), ("distribution", &package.download_url)]
        .into_iter()
        .filter_map(|(kind, url)| url.as_ref().map(|u| json!({ "type": kind, "url": u })))
        .collect();
    if !references.is_empty() {
        component.insert("externalReferences".into(), Value::Array(references));
    }

    Value::Object(component)
}

/// `dependsOn` targets of a package: the resolved package purl when known
fn depends_on(snapshot: &ProjectSnapshot, package: &DiscoveredPackage) -> Vec<String> {
    let mut targets: Vec<String> = snapshot
        .dependencies_of(Some(package.uuid))
        .map(|dep| {
            dep.resolved_to
                .and_then(|uuid| snapshot.package(uuid))
                .map(DiscoveredPackage::package_url)
                .unwrap_or_else(|| dep.purl.clone())
        })
        .collect();
    targets.sort();
    targets.dedup();
    targets
}

pub struct CycloneDxEncoder;

impl CycloneDxEncoder {
    pub fn document(&self, snapshot: &ProjectSnapshot) -> Value {
        let components: Vec<Value> = snapshot.packages.iter().map(component).collect();
        let dependencies: Vec<Value> = snapshot
            .packages
            .iter()
            .map(|package| {
                json!({
                    "ref": package.package_url(),
                    "dependsOn": depends_on(snapshot, package),
                })
            })
            .collect();

        json!({
            "bomFormat": "CycloneDX",
            "specVersion": SPEC_VERSION,
            "serialNumber": format!("urn:uuid:{}", Uuid::new_v4()),
            "version": 1,
            "metadata": {
                "timestamp": Utc::now().to_rfc3339(),
                "tools": [{ "name": TOOL_NAME, "version": TOOL_VERSION }],
                "component": {
                    "type": "application",
                    "bom-ref": snapshot.project.id.to_string(),
                    "name": snapshot.project.name,
                },
            },
            "components": components,
            "dependencies": dependencies,
        })
    }
}

impl ReportEncoder for CycloneDxEncoder {
    fn name(&self) -> &'static str {
        "cyclonedx"
    }

    fn extension(&self) -> &'static str {
        "cdx.json"
    }

    fn encode(&self, snapshot: &ProjectSnapshot) -> ReportResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.document(snapshot))?)
    }
}
