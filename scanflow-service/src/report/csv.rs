// CSV Report
// One row per codebase resource with its package-urls

use crate::report::{ReportEncoder, ReportResult};
use crate::store::ProjectSnapshot;

const HEADER: [&str; 10] = [
    "path",
    "type",
    "name",
    "extension",
    "size",
    "md5",
    "sha256",
    "status",
    "file_type",
    "for_packages",
];

/// Quote a field when it holds a separator, a quote or a line break
pub fn escape_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn write_row<S: AsRef<str>>(out: &mut String, fields: &[S]) {
    let line: Vec<String> = fields.iter().map(|f| escape_field(f.as_ref())).collect();
    out.push_str(&line.join(","));
    out.push_str("\r\n");
}

pub struct CsvEncoder;

impl ReportEncoder for CsvEncoder {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn extension(&self) -> &'static str {
        "csv"
    }

    fn encode(&self, snapshot: &ProjectSnapshot) -> ReportResult<Vec<u8>> {
        let mut out = String::new();
        write_row(&mut out, &HEADER);

        let by_resource = snapshot.packages_by_resource();
        for resource in &snapshot.resources {
            let packages: Vec<String> = by_resource
                .get(resource.path.as_str())
                .into_iter()
                .flatten()
                .map(|package| package.package_url())
                .collect();
            let row = [
                resource.path.clone(),
                resource.resource_type.to_string(),
                resource.name.clone(),
                resource.extension.clone(),
                resource.size.map(|s| s.to_string()).unwrap_or_default(),
                resource.md5.clone().unwrap_or_default(),
                resource.sha256.clone().unwrap_or_default(),
                resource.status.clone().unwrap_or_default(),
                resource.file_type.clone().unwrap_or_default(),
                packages.join("\n"),
            ];
            write_row(&mut out, &row);
        }
        Ok(out.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::populated_harness;

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_csv_report() {
        let harness = populated_harness();
        let snapshot = harness.store.snapshot(harness.project_id).unwrap();
        let content = String::from_utf8(CsvEncoder.encode(&snapshot).unwrap()).unwrap();
        let lines: Vec<&str> = content.split("\r\n").filter(|l| !l.is_empty()).collect();

        assert_eq!(lines[0], HEADER.join(","));
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("\"README, \"\"quoted\"\".md\",file,"));
        assert!(lines
            .iter()
            .any(|l| l.starts_with("site-packages/django/__init__.py,file,__init__.py,.py,12,")
                && l.ends_with(",pkg:pypi/django@4.0.8")));
    }
}
