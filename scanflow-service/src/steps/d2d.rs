// Deploy-to-Develop Steps
// Map deployed files under codebase/to/ back to their sources under codebase/from/

use crate::error::StepError;
use crate::execution::context::StepContext;
use crate::models::{status, CodebaseRelation, CodebaseResource};
use crate::steps::archive::{archive_kind, extract_archive, extract_target};
use crate::steps::inputs::input_files;
use crate::store::ResourceFilter;

use std::collections::HashMap;
use std::fs;

pub const FROM: &str = "from";
pub const TO: &str = "to";

/// Both sides must be present before anything is extracted
pub fn get_inputs(ctx: &StepContext) -> Result<(), StepError> {
    let from = input_files(ctx, Some(FROM)).len();
    let to = input_files(ctx, Some(TO)).len();
    if from == 0 || to == 0 {
        return Err(StepError::analysis(format!(
            "deploy-to-develop needs inputs tagged \"{}\" and \"{}\" (found {} and {})",
            FROM, TO, from, to
        )));
    }
    ctx.log(format!("{} develop and {} deploy inputs", from, to));
    Ok(())
}

/// Extract (or copy) tagged inputs into codebase/from/ and codebase/to/
pub fn extract_inputs_to_codebase_directory(ctx: &StepContext) -> Result<(), StepError> {
    let codebase = ctx.project().codebase_path();
    for side in [FROM, TO] {
        let directory = codebase.join(side);
        fs::create_dir_all(&directory)?;
        for (source, location) in input_files(ctx, Some(side)) {
            let destination = directory.join(&source.filename);
            if archive_kind(&location).is_some() {
                ctx.save_errors(extract_archive(&location, &extract_target(&destination)), None);
            } else {
                fs::copy(&location, destination)?;
            }
        }
    }
    Ok(())
}

fn side_files(ctx: &StepContext, side: &str) -> Vec<CodebaseResource> {
    ctx.scope()
        .query_resources(ResourceFilter::files().under(side))
        .iter()
        .collect()
}

fn relate(ctx: &StepContext, from: &str, to: &str, map_type: &str) -> Result<bool, StepError> {
    let relation = CodebaseRelation::new(ctx.project().id, from, to, map_type);
    Ok(ctx.scope().add_relation(relation)?)
}

/// Relate deployed files to develop files with the same SHA-256
pub fn map_checksum(ctx: &StepContext) -> Result<(), StepError> {
    let mut by_sha256: HashMap<String, Vec<String>> = HashMap::new();
    for resource in side_files(ctx, FROM) {
        if let Some(sha256) = resource.sha256 {
            by_sha256.entry(sha256).or_default().push(resource.path);
        }
    }

    let mut mapped = 0;
    for resource in side_files(ctx, TO) {
        if resource.status.is_some() {
            continue;
        }
        let Some(sources) = resource.sha256.as_ref().and_then(|s| by_sha256.get(s)) else {
            continue;
        };
        for source in sources {
            relate(ctx, source, &resource.path, "sha256")?;
        }
        mapped += 1;
    }

    ctx.log(format!("{} resources mapped by checksum", mapped));
    Ok(())
}

/// `package com.example;` declaration of a Java source file
pub fn java_package(source: &str) -> Option<String> {
    source
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("package "))
        .map(|rest| rest.trim_end_matches(';').trim().to_string())
        .filter(|p| !p.is_empty())
}

/// Qualified path of the source a class was compiled from, `Outer$Inner.class` included
fn class_source_segments(path: &str) -> Option<Vec<String>> {
    let stem = path.strip_suffix(".class")?;
    let mut segments: Vec<String> = stem.split('/').map(str::to_string).collect();
    let last = segments.pop()?;
    segments.push(last.split('$').next().unwrap_or(&last).to_string());
    Some(segments)
}

/// Relate compiled .class files to the .java sources declaring the same qualified name
pub fn map_java_to_class(ctx: &StepContext) -> Result<(), StepError> {
    let codebase = ctx.project().codebase_path();
    let mut by_qualified: HashMap<String, String> = HashMap::new();
    for resource in side_files(ctx, FROM) {
        if !resource.extension.eq_ignore_ascii_case(".java") {
            continue;
        }
        let Some(content) = ctx.save_errors(fs::read_to_string(codebase.join(&resource.path)), Some(&resource.path)) else {
            continue;
        };
        let class_name = resource.name.trim_end_matches(".java");
        let qualified = match java_package(&content) {
            Some(package) => format!("{}/{}", package.replace('.', "/"), class_name),
            None => class_name.to_string(),
        };
        by_qualified.insert(qualified, resource.path);
    }

    let mut mapped = 0;
    for resource in side_files(ctx, TO) {
        if resource.status.is_some() {
            continue;
        }
        let Some(segments) = class_source_segments(&resource.path) else {
            continue;
        };
        let source = (0..segments.len())
            .map(|start| segments[start..].join("/"))
            .find_map(|candidate| by_qualified.get(&candidate));
        if let Some(source) = source {
            relate(ctx, source, &resource.path, "java_to_class")?;
            mapped += 1;
        }
    }

    ctx.log(format!("{} class files mapped to Java sources", mapped));
    Ok(())
}

/// Deployed files with a relation become MAPPED, the rest REQUIRES_REVIEW
pub fn flag_mapped_resources(ctx: &StepContext) -> Result<(), StepError> {
    let scope = ctx.scope();
    let related: std::collections::HashSet<String> =
        scope.relations().into_iter().map(|r| r.to_path).collect();

    let mut unmapped = 0;
    for resource in side_files(ctx, TO) {
        if resource.status.is_some() {
            continue;
        }
        if related.contains(&resource.path) {
            scope.set_status(&resource.path, status::MAPPED)?;
        } else {
            scope.set_status(&resource.path, status::REQUIRES_REVIEW)?;
            unmapped += 1;
        }
    }

    ctx.log(format!("{} deployed resources require review", unmapped));
    Ok(())
}
