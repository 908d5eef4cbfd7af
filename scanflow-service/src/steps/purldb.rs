// Package Matching
// Enrich discovered packages and match unknown files against a package index

use crate::error::StepError;
use crate::execution::context::StepContext;
use crate::models::status;
use crate::steps::index::PackageIndex;
use crate::store::ResourceFilter;

use std::sync::Arc;

fn package_index(ctx: &StepContext) -> Result<Arc<dyn PackageIndex>, StepError> {
    ctx.services()
        .package_index
        .clone()
        .ok_or_else(|| StepError::defect("package index is not configured"))
}

/// Fill missing package details from the index
pub fn enrich_discovered_packages(ctx: &StepContext) -> Result<(), StepError> {
    let index = package_index(ctx)?;
    let scope = ctx.scope();
    let mut enriched = 0;

    for package in scope.packages() {
        let Some(data) = index.lookup(&package.purl())? else {
            continue;
        };
        if scope.modify_package(package.uuid, |p| p.update_from(&data))? {
            enriched += 1;
        }
    }

    ctx.log(format!("{} packages enriched from the package index", enriched));
    Ok(())
}

/// Match files without a status to indexed packages by SHA-256
pub fn match_resources_to_index(ctx: &StepContext) -> Result<(), StepError> {
    let index = package_index(ctx)?;
    let scope = ctx.scope();
    let mut matched = 0;

    for resource in scope.query_resources(ResourceFilter::files().without_status()).iter() {
        let Some(sha256) = resource.sha256.as_deref() else {
            continue;
        };
        let Some(data) = index.match_sha256(sha256)? else {
            continue;
        };
        let Some(package) = ctx.save_errors(scope.update_or_create_package(&data), Some(&resource.path)) else {
            continue;
        };
        scope.attach_package(&resource.key(), &package)?;
        scope.set_status(&resource.path, status::MATCHED_TO_PURLDB)?;
        matched += 1;
    }

    ctx.log(format!("{} resources matched to the package index", matched));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PackageData;
    use crate::steps::codebase::collect_and_create_codebase_resources;
    use crate::steps::index::JsonPackageIndex;
    use crate::steps::ExternalServices;
    use crate::execution::testing::TestHarness;
    use crate::utils::file_checksums;

    #[test]
    fn test_unconfigured_index_is_a_defect() {
        let harness = TestHarness::new();
        let ctx = harness.context("match_resources_to_index");
        let err = match_resources_to_index(&ctx).unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_match_and_enrich() {
        let harness = TestHarness::new();
        harness.write_codebase("lib/zlib.so", b"zlib bytes");
        harness.write_codebase("lib/other.so", b"other bytes");
        let location = harness.project().codebase_path().join("lib/zlib.so");
        let (_, sha256) = file_checksums(&location).unwrap();

        let mut zlib = PackageData::new("deb", "zlib1g")
            .with_namespace("debian")
            .with_version("1.2.13");
        zlib.sha256 = Some(sha256);
        let mut bash = PackageData::new("deb", "bash")
            .with_namespace("debian")
            .with_version("5.2");
        bash.declared_license_expression = Some("gpl-3.0-plus".to_string());
        let index = JsonPackageIndex::from_packages(vec![zlib, bash.clone()]);
        let services = ExternalServices::new().with_package_index(Arc::new(index));
        let ctx = harness.context_with("match_to_purldb", services);

        let scope = harness.scope();
        bash.declared_license_expression = None;
        scope.update_or_create_package(&bash).unwrap();
        collect_and_create_codebase_resources(&ctx).unwrap();

        match_resources_to_index(&ctx).unwrap();
        enrich_discovered_packages(&ctx).unwrap();

        let zlib_file = scope.resource_at("lib/zlib.so").unwrap();
        assert_eq!(zlib_file.status.as_deref(), Some(status::MATCHED_TO_PURLDB));
        assert_eq!(scope.resource_packages("lib/zlib.so").len(), 1);
        assert!(scope.resource_at("lib/other.so").unwrap().status.is_none());
        let bash = scope.package_by_purl("pkg:deb/debian/bash@5.2").unwrap();
        assert_eq!(bash.declared_license_expression.as_deref(), Some("gpl-3.0-plus"));
    }
}
