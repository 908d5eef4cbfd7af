// Codebase Steps
// Resource collection from codebase/ and status flagging shared by most pipelines

use crate::error::StepError;
use crate::execution::context::StepContext;
use crate::models::{status, NewResource, ResourceType};
use crate::store::ResourceFilter;
use crate::utils::file_checksums;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

const INSERT_BATCH: usize = 500;

/// Build a resource record for a path on disk, relative to `root`
fn new_resource(ctx: &StepContext, root: &Path, entry: &walkdir::DirEntry) -> Option<NewResource> {
    let relative = entry.path().strip_prefix(root).ok()?;
    let relative = relative.to_string_lossy().replace('\\', "/");
    if relative.is_empty() {
        return None;
    }

    let file_type = entry.file_type();
    let resource = if file_type.is_symlink() {
        NewResource::new(relative, ResourceType::Symlink)
    } else if file_type.is_dir() {
        NewResource::directory(relative)
    } else {
        let mut resource = NewResource::file(relative.clone());
        if let Some(metadata) = ctx.save_errors(entry.metadata(), Some(&relative)) {
            resource = resource.with_size(metadata.len());
        }
        if let Some((md5, sha256)) = ctx.save_errors(file_checksums(entry.path()), Some(&relative)) {
            resource = resource.with_checksums(md5, sha256);
        }
        resource
    };
    Some(resource)
}

/// Insert resources in batches; paths already present are left untouched
fn insert_resources(ctx: &StepContext, resources: Vec<NewResource>) -> Result<usize, StepError> {
    let scope = ctx.scope();
    let mut created = 0;

    for chunk in resources.chunks(INSERT_BATCH) {
        match scope.add_resources(chunk.to_vec()) {
            Ok(count) => created += count,
            Err(err) if err.is_duplicate_path() => {
                for resource in chunk {
                    let (_, is_new) = scope.get_or_create_resource(resource.clone());
                    created += usize::from(is_new);
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(created)
}

/// Walk `root` and create one resource per entry, with paths relative to `root`
pub fn collect_resources_from(ctx: &StepContext, root: &Path) -> Result<usize, StepError> {
    if !root.is_dir() {
        return Ok(0);
    }

    let resources: Vec<NewResource> = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| ctx.save_errors(entry, None))
        .filter_map(|entry| new_resource(ctx, root, &entry))
        .collect();

    debug!(root = %root.display(), count = resources.len(), "collected resources");
    insert_resources(ctx, resources)
}

/// Create a resource for every file, directory and symlink under codebase/
pub fn collect_and_create_codebase_resources(ctx: &StepContext) -> Result<(), StepError> {
    let created = collect_resources_from(ctx, &ctx.project().codebase_path())?;
    ctx.log(format!("{} codebase resources created", created));
    Ok(())
}

/// Flag files of size zero that have no status yet
pub fn flag_empty_files(ctx: &StepContext) -> Result<(), StepError> {
    let scope = ctx.scope();
    let empty: Vec<String> = scope
        .query_resources(ResourceFilter::files().without_status())
        .iter()
        .filter(|r| r.size == Some(0))
        .map(|r| r.path)
        .collect();

    for path in &empty {
        scope.set_status(path, status::IGNORED_EMPTY_FILE)?;
    }
    Ok(())
}

/// Compile `ignored_patterns` with gitignore semantics, rooted at the codebase
///
/// A pattern without a slash matches a name at any depth; `docs/` also covers
/// everything below the directory.
pub fn ignored_patterns_matcher(root: &Path, patterns: &[String]) -> Result<Gitignore, StepError> {
    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        builder
            .add_line(None, pattern)
            .map_err(|e| StepError::analysis(format!("invalid ignored pattern {}: {}", pattern, e)))?;
    }
    builder
        .build()
        .map_err(|e| StepError::analysis(format!("invalid ignored patterns: {}", e)))
}

/// Flag resources matching the project's `ignored_patterns` setting
pub fn flag_ignored_resources(ctx: &StepContext) -> Result<(), StepError> {
    let patterns = &ctx.project().settings.ignored_patterns;
    if patterns.is_empty() {
        return Ok(());
    }
    let matcher = ignored_patterns_matcher(&ctx.project().codebase_path(), patterns)?;

    let scope = ctx.scope();
    let ignored: Vec<String> = scope
        .query_resources(ResourceFilter::new().without_status())
        .iter()
        .filter(|r| {
            matcher
                .matched_path_or_any_parents(&r.path, r.is_dir())
                .is_ignore()
        })
        .map(|r| r.path)
        .collect();

    for path in &ignored {
        scope.set_status(path, status::IGNORED_PATTERN)?;
    }
    ctx.log(format!("{} resources flagged as ignored", ignored.len()));
    Ok(())
}

/// Files left without any status were not looked at by any step
pub fn flag_not_analyzed_codebase_resources(ctx: &StepContext) -> Result<(), StepError> {
    let scope = ctx.scope();
    let remaining = scope
        .query_resources(ResourceFilter::files().without_status())
        .paths();
    for path in &remaining {
        scope.set_status(path, status::NOT_ANALYZED)?;
    }
    ctx.log(format!("{} resources not analyzed", remaining.len()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::testing::TestHarness;
    use crate::models::ProjectSettings;

    #[test]
    fn test_collect_and_create_codebase_resources() {
        let harness = TestHarness::new();
        harness.write_codebase("bin/ls", b"\x7fELF");
        harness.write_codebase("etc/empty.conf", b"");
        let ctx = harness.context("collect_and_create_codebase_resources");

        collect_and_create_codebase_resources(&ctx).unwrap();

        let scope = harness.scope();
        let ls = scope.resource_at("bin/ls").unwrap();
        assert!(ls.is_file());
        assert_eq!(ls.size, Some(4));
        assert_eq!(ls.sha256.as_deref().map(str::len), Some(64));
        assert!(scope.resource_at("bin").unwrap().is_dir());
        assert_eq!(scope.resource_count(), 4);

        // running again keeps existing rows
        collect_and_create_codebase_resources(&ctx).unwrap();
        assert_eq!(scope.resource_count(), 4);
        assert!(harness.run().log.iter().any(|l| l.ends_with("0 codebase resources created")));
    }

    #[test]
    fn test_flag_empty_and_ignored() {
        let harness = TestHarness::new();
        harness.update_project(|p| {
            p.settings = ProjectSettings {
                ignored_patterns: vec!["*.pyc".to_string()],
                ..ProjectSettings::default()
            }
        });
        harness.write_codebase("app/main.py", b"print()");
        harness.write_codebase("app/main.pyc", b"\x00\x01");
        harness.write_codebase("app/__init__.py", b"");
        let ctx = harness.context("flag");

        collect_and_create_codebase_resources(&ctx).unwrap();
        flag_empty_files(&ctx).unwrap();
        flag_ignored_resources(&ctx).unwrap();

        let scope = harness.scope();
        assert_eq!(
            scope.resource_at("app/__init__.py").unwrap().status.as_deref(),
            Some(status::IGNORED_EMPTY_FILE)
        );
        assert_eq!(
            scope.resource_at("app/main.pyc").unwrap().status.as_deref(),
            Some(status::IGNORED_PATTERN)
        );
        assert!(scope.resource_at("app/main.py").unwrap().status.is_none());

        flag_not_analyzed_codebase_resources(&ctx).unwrap();
        assert_eq!(
            scope.resource_at("app/main.py").unwrap().status.as_deref(),
            Some(status::NOT_ANALYZED)
        );
        assert!(scope.resource_at("app").unwrap().status.is_none());
    }

    #[test]
    fn test_ignored_patterns_matcher() {
        let patterns = vec![
            "*.pyc".to_string(),
            ".git*".to_string(),
            "docs/".to_string(),
            " ".to_string(),
        ];
        let matcher = ignored_patterns_matcher(Path::new("/codebase"), &patterns).unwrap();
        let ignored = |path: &str, is_dir: bool| matcher.matched_path_or_any_parents(path, is_dir).is_ignore();

        assert!(ignored("src/app/__init__.pyc", false));
        assert!(ignored("repo/.gitignore", false));
        assert!(ignored("docs", true));
        assert!(ignored("docs/guide/index.md", false));
        assert!(!ignored("src/app/__init__.py", false));
        assert!(!ignored("src/docs.md", false));
    }

    #[test]
    fn test_invalid_ignored_pattern_is_an_analysis_error() {
        let patterns = vec!["src/[".to_string()];
        let err = ignored_patterns_matcher(Path::new("/codebase"), &patterns).unwrap_err();
        assert!(matches!(err, StepError::Analysis(_)), "{:?}", err);
    }
}
