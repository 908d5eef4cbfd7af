// SPDX Report
// SPDX 2.3 JSON document describing discovered packages and their dependencies

use crate::models::DiscoveredPackage;
use crate::report::{ReportEncoder, ReportResult, TOOL_NAME, TOOL_VERSION};
use crate::store::ProjectSnapshot;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

pub const SPDX_VERSION: &str = "SPDX-2.3";
pub const NOASSERTION: &str = "NOASSERTION";
const DOCUMENT_ID: &str = "SPDXRef-DOCUMENT";

fn or_noassertion(value: &Option<String>) -> String {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .unwrap_or(NOASSERTION)
        .to_string()
}

fn package_entry(spdx_id: &str, package: &DiscoveredPackage) -> Value {
    let mut entry = Map::new();
    entry.insert("SPDXID".into(), json!(spdx_id));
    entry.insert("name".into(), json!(package.name));
    if let Some(version) = &package.version {
        entry.insert("versionInfo".into(), json!(version));
    }
    let license = or_noassertion(&package.declared_license_expression);
    entry.insert("licenseDeclared".into(), json!(license));
    entry.insert("licenseConcluded".into(), json!(NOASSERTION));
    entry.insert("copyrightText".into(), json!(or_noassertion(&package.copyright)));
    entry.insert("downloadLocation".into(), json!(or_noassertion(&package.download_url)));
    entry.insert("filesAnalyzed".into(), json!(false));
    if let Some(homepage) = &package.homepage_url {
        entry.insert("homepage".into(), json!(homepage));
    }
    if let Some(description) = &package.description {
        entry.insert("description".into(), json!(description));
    }
    if let Some(filename) = &package.filename {
        entry.insert("packageFileName".into(), json!(filename));
    }

    let checksums: Vec<Value> = [("MD5", &package.md5), ("SHA256", &package.sha256)]
        .into_iter()
        .filter_map(|(alg, value)| {
            value
                .as_ref()
                .map(|v| json!({ "algorithm": alg, "checksumValue": v }))
        })
        .collect();
    if !checksums.is_empty() {
        entry.insert("checksums".into(), Value::Array(checksums));
    }

    entry.insert(
        "externalRefs".into(),
        json!([{
            "referenceCategory": "PACKAGE-MANAGER",
            "referenceType": "purl",
            "referenceLocator": package.package_url(),
        }]),
    );
    Value::Object(entry)
}

fn relationship(from: &str, kind: &str, to: &str) -> Value {
    json!({
        "spdxElementId": from,
        "relationshipType": kind,
        "relatedSpdxElement": to,
    })
}

pub struct SpdxEncoder;

impl SpdxEncoder {
    pub fn document(&self, snapshot: &ProjectSnapshot) -> Value {
        let ids: HashMap<_, String> = snapshot
            .packages
            .iter()
            .enumerate()
            .map(|(index, package)| (package.uuid, format!("SPDXRef-package-{}", index + 1)))
            .collect();

        let mut packages = Vec::new();
        let mut relationships = Vec::new();
        for package in &snapshot.packages {
            let id = &ids[&package.uuid];
            packages.push(package_entry(id, package));
            relationships.push(relationship(DOCUMENT_ID, "DESCRIBES", id));
        }

        // Only dependencies resolved to a package of the project become relationships
        for dependency in &snapshot.dependencies {
            let (Some(from), Some(to)) = (
                dependency.for_package.and_then(|uuid| ids.get(&uuid)),
                dependency.resolved_to.and_then(|uuid| ids.get(&uuid)),
            ) else {
                continue;
            };
            relationships.push(relationship(from, "DEPENDS_ON", to));
        }

        json!({
            "spdxVersion": SPDX_VERSION,
            "dataLicense": "CC0-1.0",
            "SPDXID": DOCUMENT_ID,
            "name": format!("{}-{}", TOOL_NAME, snapshot.project.name),
            "documentNamespace": format!(
                "https://scanflow.invalid/spdxdocs/{}-{}",
                snapshot.project.name.replace(' ', "-"),
                Uuid::new_v4()
            ),
            "creationInfo": {
                "created": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                "creators": [format!("Tool: {}-{}", TOOL_NAME, TOOL_VERSION)],
            },
            "packages": packages,
            "relationships": relationships,
        })
    }
}

impl ReportEncoder for SpdxEncoder {
    fn name(&self) -> &'static str {
        "spdx"
    }

    fn extension(&self) -> &'static str {
        "spdx.json"
    }

    fn encode(&self, snapshot: &ProjectSnapshot) -> ReportResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.document(snapshot))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::populated_harness;
    use crate::steps::sbom::parse_spdx;

    #[test]
    fn test_spdx_document() {
        let harness = populated_harness();
        let snapshot = harness.store.snapshot(harness.project_id).unwrap();
        let document = SpdxEncoder.document(&snapshot);

        assert_eq!(document["spdxVersion"], SPDX_VERSION);
        assert_eq!(document["dataLicense"], "CC0-1.0");
        let created = document["creationInfo"]["created"].as_str().unwrap();
        assert!(created.ends_with('Z'));

        let packages = document["packages"].as_array().unwrap();
        assert_eq!(packages.len(), 2);
        let asgiref = packages.iter().find(|p| p["name"] == "asgiref").unwrap();
        assert_eq!(asgiref["licenseDeclared"], NOASSERTION);
        assert_eq!(asgiref["downloadLocation"], NOASSERTION);

        let relationships = document["relationships"].as_array().unwrap();
        assert_eq!(
            relationships
                .iter()
                .filter(|r| r["relationshipType"] == "DESCRIBES")
                .count(),
            2
        );
        assert_eq!(
            relationships
                .iter()
                .filter(|r| r["relationshipType"] == "DEPENDS_ON")
                .count(),
            1
        );
    }

    #[test]
    fn test_spdx_reloads_as_sbom() {
        let harness = populated_harness();
        let snapshot = harness.store.snapshot(harness.project_id).unwrap();
        let encoded = SpdxEncoder.encode(&snapshot).unwrap();

        let packages = parse_spdx(std::str::from_utf8(&encoded).unwrap()).unwrap();
        let django = packages.iter().find(|p| p.name == "django").unwrap();
        assert_eq!(django.version.as_deref(), Some("4.0.8"));
        assert_eq!(django.declared_license_expression.as_deref(), Some("bsd-new"));
        assert_eq!(django.sha256, Some("cd".repeat(32)));
        assert_eq!(django.dependencies.len(), 1);
        assert_eq!(django.dependencies[0].purl, "pkg:pypi/asgiref@3.3.0");

        let asgiref = packages.iter().find(|p| p.name == "asgiref").unwrap();
        assert_eq!(asgiref.declared_license_expression, None);
        assert_eq!(asgiref.download_url, None);
    }
}
