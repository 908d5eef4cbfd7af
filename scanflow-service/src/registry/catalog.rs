// Built-in Pipelines
// The static pipeline table shipped with the engine

use crate::error::ServiceResult;
use crate::registry::{PipelineDefinition, StepDescriptor, StepRegistry};
use crate::steps::{archive, codebase, d2d, docker, elf, inputs, manifests, purldb, rootfs, sbom, vulnerabilities};

fn collect_codebase() -> StepDescriptor {
    StepDescriptor::from_fn(
        "collect_and_create_codebase_resources",
        "Create a resource for every file and directory of the codebase.",
        codebase::collect_and_create_codebase_resources,
    )
}

fn flag_empty_files() -> StepDescriptor {
    StepDescriptor::from_fn(
        "flag_empty_files",
        "Flag empty files.",
        codebase::flag_empty_files,
    )
}

fn flag_ignored_resources() -> StepDescriptor {
    StepDescriptor::from_fn(
        "flag_ignored_resources",
        "Flag resources matching the project's ignored patterns.",
        codebase::flag_ignored_resources,
    )
}

fn scan_for_application_packages() -> StepDescriptor {
    StepDescriptor::from_fn(
        "scan_for_application_packages",
        "Create application packages from package manifests.",
        manifests::scan_for_application_packages,
    )
}

fn flag_not_analyzed() -> StepDescriptor {
    StepDescriptor::from_fn(
        "flag_not_analyzed_codebase_resources",
        "Flag files no step has looked at.",
        codebase::flag_not_analyzed_codebase_resources,
    )
}

fn find_elf_binaries() -> StepDescriptor {
    StepDescriptor::from_fn(
        "find_elf_binaries",
        "Recognise ELF binaries and record their header.",
        elf::find_elf_binaries,
    )
}

fn root_filesystem_steps() -> [StepDescriptor; 3] {
    [
        StepDescriptor::from_fn(
            "find_root_filesystems",
            "Locate root filesystems and identify their distro.",
            rootfs::find_root_filesystems_step,
        ),
        StepDescriptor::from_fn(
            "collect_system_packages",
            "Create system packages from installed package databases.",
            rootfs::collect_system_packages,
        ),
        StepDescriptor::from_fn(
            "flag_uninteresting_codebase_resources",
            "Flag pseudo filesystems and caches.",
            rootfs::flag_uninteresting_codebase_resources,
        ),
    ]
}

fn scan_codebase() -> PipelineDefinition {
    PipelineDefinition::new("scan_codebase", "Scan a codebase for application packages.")
        .description("Inputs are copied to the codebase, archives are extracted, then every file is collected and package manifests are parsed.")
        .step(StepDescriptor::from_fn(
            "copy_inputs_to_codebase_directory",
            "Copy input files to the codebase directory.",
            inputs::copy_inputs_to_codebase_directory,
        ))
        .step(StepDescriptor::from_fn(
            "extract_archives",
            "Extract archives found in the codebase.",
            archive::extract_archives_step,
        ))
        .step(collect_codebase())
        .step(flag_empty_files())
        .step(flag_ignored_resources())
        .step(scan_for_application_packages())
        .step(find_elf_binaries().in_groups(&["elf"]))
        .step(flag_not_analyzed())
}

fn docker() -> PipelineDefinition {
    let mut pipeline = PipelineDefinition::new("docker", "Analyze Docker images.")
        .description("Image layers are extracted side by side, then system and application packages are collected from each layer.")
        .step(
            StepDescriptor::from_fn(
                "extract_images",
                "Extract images and their layers from docker-save archives.",
                docker::extract_images,
            )
            .stop_on_failure(),
        )
        .step(collect_codebase());
    for step in root_filesystem_steps() {
        pipeline = pipeline.step(step);
    }
    pipeline
        .step(StepDescriptor::from_fn(
            "flag_whiteout_files",
            "Flag layer whiteout markers.",
            docker::flag_whiteout_files,
        ))
        .step(flag_empty_files())
        .step(flag_ignored_resources())
        .step(scan_for_application_packages())
        .step(find_elf_binaries().in_groups(&["elf"]))
        .step(flag_not_analyzed())
}

fn root_filesystem() -> PipelineDefinition {
    let mut pipeline = PipelineDefinition::new(
        "root_filesystem",
        "Analyze unpacked root filesystems or VM images.",
    )
    .step(StepDescriptor::from_fn(
        "extract_inputs_to_codebase_directory",
        "Extract input archives to the codebase directory.",
        archive::extract_inputs_to_codebase_directory,
    ))
    .step(collect_codebase());
    for step in root_filesystem_steps() {
        pipeline = pipeline.step(step);
    }
    pipeline
        .step(flag_empty_files())
        .step(flag_ignored_resources())
        .step(scan_for_application_packages())
        .step(find_elf_binaries().in_groups(&["elf"]))
        .step(flag_not_analyzed())
}

fn resolve_dependencies() -> PipelineDefinition {
    PipelineDefinition::new(
        "resolve_dependencies",
        "Resolve dependencies declared in package manifests.",
    )
    .step(StepDescriptor::from_fn(
        "copy_inputs_to_codebase_directory",
        "Copy input files to the codebase directory.",
        inputs::copy_inputs_to_codebase_directory,
    ))
    .step(collect_codebase())
    .step(scan_for_application_packages())
    .step(StepDescriptor::from_fn(
        "resolve_dependencies",
        "Link dependencies to the discovered packages that satisfy them.",
        manifests::resolve_dependencies,
    ))
}

fn load_sbom() -> PipelineDefinition {
    PipelineDefinition::new("load_sbom", "Load packages from SPDX, CycloneDX or AboutCode files.")
        .step(StepDescriptor::from_fn(
            "copy_inputs_to_codebase_directory",
            "Copy input files to the codebase directory.",
            inputs::copy_inputs_to_codebase_directory,
        ))
        .step(collect_codebase())
        .step(
            StepDescriptor::from_fn(
                "load_sbom_packages",
                "Create packages and dependencies from SBOM files.",
                sbom::load_sbom_packages,
            )
            .stop_on_failure(),
        )
        .step(StepDescriptor::from_fn(
            "resolve_dependencies",
            "Link dependencies to the discovered packages that satisfy them.",
            manifests::resolve_dependencies,
        ))
}

fn match_to_purldb() -> PipelineDefinition {
    PipelineDefinition::new(
        "match_to_purldb",
        "Match packages and files against the package index.",
    )
    .addon()
    .step(StepDescriptor::from_fn(
        "match_resources_to_index",
        "Match unknown files to indexed packages by checksum.",
        purldb::match_resources_to_index,
    ))
    .step(StepDescriptor::from_fn(
        "enrich_discovered_packages",
        "Complete discovered packages with indexed details.",
        purldb::enrich_discovered_packages,
    ))
}

fn find_vulnerabilities() -> PipelineDefinition {
    PipelineDefinition::new(
        "find_vulnerabilities",
        "Look up discovered packages in the vulnerability index.",
    )
    .addon()
    .step(StepDescriptor::from_fn(
        "find_vulnerabilities",
        "Attach known advisories to packages.",
        vulnerabilities::find_vulnerabilities,
    ))
}

fn deploy_to_develop() -> PipelineDefinition {
    PipelineDefinition::new(
        "deploy_to_develop",
        "Map deployed files back to their development sources.",
    )
    .description("Inputs tagged \"from\" hold the development sources, inputs tagged \"to\" the deployed artifacts.")
    .step(
        StepDescriptor::from_fn(
            "get_inputs",
            "Check the from and to inputs.",
            d2d::get_inputs,
        )
        .stop_on_failure(),
    )
    .step(StepDescriptor::from_fn(
        "extract_inputs_to_codebase_directory",
        "Extract from and to inputs into their codebase directories.",
        d2d::extract_inputs_to_codebase_directory,
    ))
    .step(collect_codebase())
    .step(StepDescriptor::from_fn(
        "map_checksum",
        "Map deployed files to develop files with the same checksum.",
        d2d::map_checksum,
    ))
    .step(
        StepDescriptor::from_fn(
            "map_java_to_class",
            "Map compiled classes to their Java sources.",
            d2d::map_java_to_class,
        )
        .in_groups(&["java"]),
    )
    .step(StepDescriptor::from_fn(
        "flag_mapped_resources",
        "Flag mapped deployed files and those requiring review.",
        d2d::flag_mapped_resources,
    ))
}

fn inspect_elf_binaries() -> PipelineDefinition {
    PipelineDefinition::new("inspect_elf_binaries", "Inspect ELF binaries.")
        .step(StepDescriptor::from_fn(
            "extract_inputs_to_codebase_directory",
            "Extract input archives to the codebase directory.",
            archive::extract_inputs_to_codebase_directory,
        ))
        .step(collect_codebase())
        .step(find_elf_binaries())
}

impl StepRegistry {
    /// Registry holding every built-in pipeline plus the legacy names
    pub fn builtin() -> ServiceResult<StepRegistry> {
        Ok(StepRegistry::builder()
            .register(scan_codebase())?
            .register(docker())?
            .register(root_filesystem())?
            .register(resolve_dependencies())?
            .register(load_sbom())?
            .register(match_to_purldb())?
            .register(find_vulnerabilities())?
            .register(deploy_to_develop())?
            .register(inspect_elf_binaries())?
            .alias("analyze_docker_image", "docker")
            .alias("analyze_root_filesystem_or_vm_image", "root_filesystem")
            .alias("map_deploy_to_develop", "deploy_to_develop")
            .alias("scan_package", "scan_codebase")
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DOWNLOAD_STEP;

    #[test]
    fn test_builtin_pipelines() {
        let registry = StepRegistry::builtin().unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "deploy_to_develop",
                "docker",
                "find_vulnerabilities",
                "inspect_elf_binaries",
                "load_sbom",
                "match_to_purldb",
                "resolve_dependencies",
                "root_filesystem",
                "scan_codebase",
            ]
        );
        assert_eq!(registry.resolve("analyze_docker_image").unwrap().name, "docker");

        let steps = registry.resolve_steps("docker", None).unwrap();
        assert_eq!(steps[0].name, DOWNLOAD_STEP);
        assert!(steps[1].stop_on_failure);

        let addon = registry.resolve_steps("find_vulnerabilities", None).unwrap();
        assert_eq!(addon.len(), 1);
        assert!(registry.resolve("match_to_purldb").unwrap().is_addon);
    }

    #[test]
    fn test_deploy_to_develop_groups() {
        let registry = StepRegistry::builtin().unwrap();
        assert_eq!(registry.info("deploy_to_develop").unwrap().available_groups, vec!["java"]);

        let without_java = registry
            .resolve_steps("deploy_to_develop", Some(&["elf".to_string()]))
            .unwrap();
        assert!(without_java.iter().all(|s| s.name != "map_java_to_class"));
    }
}
