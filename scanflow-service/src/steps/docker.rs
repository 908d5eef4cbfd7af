// Docker Image Steps
// docker-save archive layout, per-layer extraction and whiteout flagging

use crate::error::StepError;
use crate::execution::context::StepContext;
use crate::models::{status, ProjectMessage};
use crate::steps::archive::{archive_kind, extract_archive, extract_target};
use crate::steps::inputs::input_files;
use crate::store::ResourceFilter;

use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;
use tar::Archive;

/// Prefix of the marker files that delete a path from lower layers
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// One entry of a docker-save `manifest.json`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageManifest {
    pub config: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
    pub layers: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ImageConfig {
    os: Option<String>,
    architecture: Option<String>,
}

impl ImageManifest {
    /// Directory name for the image inside codebase/
    pub fn directory_name(&self, fallback: &str) -> String {
        self.repo_tags
            .as_ref()
            .and_then(|tags| tags.first())
            .map(|tag| tag.replace([':', '/'], "_"))
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Layer identifier from its archive path: `abc/layer.tar` or `blobs/sha256/abc`
pub fn layer_id(layer: &str) -> String {
    let path = Path::new(layer);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| layer.to_string());
    if file_name == "layer.tar" {
        if let Some(parent) = path.parent().and_then(|p| p.file_name()) {
            return parent.to_string_lossy().to_string();
        }
    }
    file_name
        .strip_suffix(".tar.gz")
        .or_else(|| file_name.strip_suffix(".tar"))
        .unwrap_or(&file_name)
        .to_string()
}

/// Unpack a layer tarball, gzip-compressed or not
pub fn unpack_layer(path: &Path, target: &Path) -> io::Result<()> {
    let mut magic = [0u8; 2];
    let is_gzip = File::open(path)?.read(&mut magic)? == 2 && magic == [0x1f, 0x8b];

    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = if is_gzip {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    fs::create_dir_all(target)?;
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(false);
    archive.unpack(target)
}

pub fn read_image_manifests(extracted: &Path) -> Result<Vec<ImageManifest>, StepError> {
    let location = extracted.join("manifest.json");
    if !location.is_file() {
        return Err(StepError::analysis(format!(
            "{} has no manifest.json; not a docker image archive",
            extracted.display()
        )));
    }
    let content = fs::read_to_string(location)?;
    Ok(serde_json::from_str(&content)?)
}

fn extract_image(ctx: &StepContext, manifest: &ImageManifest, extracted: &Path, name: &str) -> Result<(), StepError> {
    let image_dir = ctx.project().codebase_path().join(name);
    let config: ImageConfig = fs::read_to_string(extracted.join(&manifest.config))
        .ok()
        .and_then(|c| serde_json::from_str(&c).ok())
        .unwrap_or_default();

    for layer in &manifest.layers {
        let target = image_dir.join(layer_id(layer));
        if let Err(err) = unpack_layer(&extracted.join(layer), &target) {
            ctx.add_error(format!("layer {} of {}: {}", layer, name, err));
        }
    }

    ctx.log(format!("Image {} extracted with {} layers", name, manifest.layers.len()));
    let message = ProjectMessage::info(ctx.project().id, ctx.step_name(), format!("Image {}", name))
        .with_detail("layers", manifest.layers.len().to_string())
        .with_detail("os", config.os.unwrap_or_default())
        .with_detail("architecture", config.architecture.unwrap_or_default());
    ctx.add_message(message);
    Ok(())
}

/// Extract each image input, then each of its layers into codebase/<image>/<layer>/
pub fn extract_images(ctx: &StepContext) -> Result<(), StepError> {
    let inputs = input_files(ctx, None);
    if inputs.is_empty() {
        return Err(StepError::analysis("no image archive in the inputs"));
    }

    let tmp = ctx.project().tmp_path();
    for (source, location) in inputs {
        if archive_kind(&location).is_none() {
            ctx.add_error(format!("{} is not an image archive", source.filename));
            continue;
        }
        let extracted = extract_target(&tmp.join(&source.filename));
        if ctx.save_errors(extract_archive(&location, &extracted), None).is_none() {
            continue;
        }
        let Some(manifests) = ctx.save_errors(read_image_manifests(&extracted), None) else {
            continue;
        };

        let stem = source
            .filename
            .trim_end_matches(".gz")
            .trim_end_matches(".tar")
            .to_string();
        for (index, manifest) in manifests.iter().enumerate() {
            let fallback = if index == 0 {
                stem.clone()
            } else {
                format!("{}-{}", stem, index)
            };
            extract_image(ctx, manifest, &extracted, &manifest.directory_name(&fallback))?;
        }
    }
    Ok(())
}

/// Flag layer whiteout markers, they are not real files
pub fn flag_whiteout_files(ctx: &StepContext) -> Result<(), StepError> {
    let scope = ctx.scope();
    let whiteouts: Vec<String> = scope
        .query_resources(ResourceFilter::files().without_status())
        .iter()
        .filter(|r| r.name.starts_with(WHITEOUT_PREFIX))
        .map(|r| r.path)
        .collect();

    for path in &whiteouts {
        scope.set_status(path, status::IGNORED_WHITEOUT)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::testing::TestHarness;
    use crate::steps::archive::tests::make_tar;
    use crate::steps::codebase::collect_and_create_codebase_resources;

    fn image_archive() -> Vec<u8> {
        let base = make_tar(&[("etc/os-release", b"ID=alpine\n".as_slice()), ("bin/sh", b"sh".as_slice())]);
        let top = make_tar(&[("etc/.wh.motd", b"".as_slice()), ("app/run.sh", b"run".as_slice())]);
        let manifest = br#"[{"Config": "config.json", "RepoTags": ["demo:1.0"], "Layers": ["aaa/layer.tar", "bbb/layer.tar"]}]"#;
        let config = br#"{"os": "linux", "architecture": "amd64"}"#;
        make_tar(&[
            ("manifest.json", manifest.as_slice()),
            ("config.json", config.as_slice()),
            ("aaa/layer.tar", base.as_slice()),
            ("bbb/layer.tar", top.as_slice()),
        ])
    }

    #[test]
    fn test_layer_id() {
        assert_eq!(layer_id("abc123/layer.tar"), "abc123");
        assert_eq!(layer_id("blobs/sha256/ff00"), "ff00");
        assert_eq!(layer_id("ff00.tar.gz"), "ff00");
    }

    #[test]
    fn test_extract_images_and_flag_whiteouts() {
        let harness = TestHarness::new();
        harness.add_input("demo.tar", &image_archive(), None);
        let ctx = harness.context("extract_images");

        extract_images(&ctx).unwrap();
        let codebase = harness.project().codebase_path();
        assert!(codebase.join("demo_1.0/aaa/bin/sh").is_file());
        assert!(codebase.join("demo_1.0/bbb/app/run.sh").is_file());

        collect_and_create_codebase_resources(&ctx).unwrap();
        flag_whiteout_files(&ctx).unwrap();

        let scope = harness.scope();
        let whiteout = scope.resource_at("demo_1.0/bbb/etc/.wh.motd").unwrap();
        assert_eq!(whiteout.status.as_deref(), Some(status::IGNORED_WHITEOUT));

        let messages = scope.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].details["architecture"], "amd64");
    }

    #[test]
    fn test_non_image_tarball_is_reported() {
        let harness = TestHarness::new();
        harness.add_input("plain.tar", &make_tar(&[("a.txt", b"a".as_slice())]), None);
        harness.add_input("notes.txt", b"hello", None);
        let ctx = harness.context("extract_images");

        extract_images(&ctx).unwrap();
        let messages = harness.scope().messages();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().any(|m| m.description.contains("manifest.json")));
        assert!(messages.iter().any(|m| m.description.contains("notes.txt")));
    }
}
