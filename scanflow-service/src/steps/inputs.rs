// Input Steps
// Fetching missing inputs and copying them into the codebase directory

use crate::error::StepError;
use crate::execution::context::StepContext;
use crate::models::InputSource;
use crate::steps::Step;

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("HTTP {status} while fetching {url}")]
    Status { url: String, status: u16 },

    #[error("skopeo executable is not installed; cannot fetch {0}")]
    SkopeoMissing(String),

    #[error("skopeo failed for {reference}: {output}")]
    Skopeo { reference: String, output: String },

    #[error("IO error while fetching: {0}")]
    Io(#[from] std::io::Error),
}

/// A fetched file
#[derive(Debug, Clone)]
pub struct Download {
    pub url: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Fetch a URL into `directory` under `filename`
pub async fn fetch_url(url: &str, directory: &Path, filename: &str) -> Result<Download, FetchError> {
    if url.starts_with("docker://") {
        fetch_docker_image(url, directory, filename).await
    } else {
        fetch_http(url, directory, filename).await
    }
}

pub async fn fetch_http(url: &str, directory: &Path, filename: &str) -> Result<Download, FetchError> {
    let response = reqwest::get(url).await.map_err(|e| FetchError::Http {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    if !response.status().is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let bytes = response.bytes().await.map_err(|e| FetchError::Http {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    tokio::fs::create_dir_all(directory).await?;
    let path = directory.join(filename);
    tokio::fs::write(&path, &bytes).await?;

    Ok(Download {
        url: url.to_string(),
        path,
        size: bytes.len() as u64,
    })
}

/// Save a container image as a docker-archive tarball with skopeo
pub async fn fetch_docker_image(
    reference: &str,
    directory: &Path,
    filename: &str,
) -> Result<Download, FetchError> {
    let skopeo =
        which::which("skopeo").map_err(|_| FetchError::SkopeoMissing(reference.to_string()))?;

    tokio::fs::create_dir_all(directory).await?;
    let path = directory.join(filename);
    let target = format!("docker-archive:{}", path.display());
    info!(reference, "fetching image with skopeo");

    let output = Command::new(skopeo)
        .arg("copy")
        .arg(reference)
        .arg(&target)
        .output()
        .await?;

    if !output.status.success() {
        return Err(FetchError::Skopeo {
            reference: reference.to_string(),
            output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let size = tokio::fs::metadata(&path).await?.len();
    Ok(Download {
        url: reference.to_string(),
        path,
        size,
    })
}

/// Download every input source missing on disk
///
/// Uploaded inputs cannot be re-fetched: a missing one is an error. Every
/// problem is logged and collected, then reported as one analysis failure.
pub struct DownloadMissingInputs;

#[async_trait]
impl Step for DownloadMissingInputs {
    async fn run(&self, ctx: &StepContext) -> Result<(), StepError> {
        let project = ctx.project();
        let mut errors = Vec::new();

        for source in &project.input_sources {
            if project.input_exists(source) {
                continue;
            }

            if source.is_uploaded {
                let msg = format!("Uploaded file {} not available.", source.filename);
                ctx.log(&msg);
                errors.push(msg);
                continue;
            }

            let Some(url) = source.download_url.as_deref() else {
                continue;
            };
            ctx.log(format!("Fetching input from {}", url));
            if let Err(err) = fetch_url(url, &project.input_path(), &source.filename).await {
                ctx.log(format!("{} could not be fetched.", url));
                errors.push(err.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(StepError::analysis(format!(
                "input files unavailable: {}",
                errors.join("; ")
            )))
        }
    }
}

/// Copy every file of input/ into codebase/
pub fn copy_inputs_to_codebase_directory(ctx: &StepContext) -> Result<(), StepError> {
    let project = ctx.project();
    let codebase = project.codebase_path();
    fs::create_dir_all(&codebase)?;

    for source in &project.input_sources {
        let from = project.input_location(source);
        if !from.is_file() {
            ctx.add_error(format!("input {} is missing", source.filename));
            continue;
        }
        fs::copy(&from, codebase.join(&source.filename))?;
    }
    Ok(())
}

/// Input files of the project present on disk, optionally restricted to a tag
pub fn input_files(ctx: &StepContext, tag: Option<&str>) -> Vec<(InputSource, PathBuf)> {
    let project = ctx.project();
    project
        .input_sources
        .iter()
        .filter(|s| tag.is_none() || s.tag.as_deref() == tag)
        .map(|s| (s.clone(), project.input_location(s)))
        .filter(|(_, path)| path.is_file())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::testing::TestHarness;

    #[tokio::test]
    async fn test_missing_uploaded_input_is_an_analysis_error() {
        let harness = TestHarness::new();
        harness.update_project(|p| p.add_input_source(InputSource::uploaded("gone.tar", None)));
        let ctx = harness.context("download_missing_inputs");

        let err = DownloadMissingInputs.run(&ctx).await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("gone.tar"));
        assert!(harness.run().log.iter().any(|l| l.ends_with("Uploaded file gone.tar not available.")));
    }

    #[tokio::test]
    async fn test_present_inputs_are_skipped() {
        let harness = TestHarness::new();
        harness.add_input("present.txt", b"hello", None);
        let ctx = harness.context("download_missing_inputs");

        DownloadMissingInputs.run(&ctx).await.unwrap();
        assert!(harness.run().log.is_empty());
    }

    #[test]
    fn test_copy_inputs_to_codebase_directory() {
        let harness = TestHarness::new();
        harness.add_input("a.txt", b"a", None);
        harness.add_input("b.txt", b"b", Some("to"));
        let ctx = harness.context("copy");

        copy_inputs_to_codebase_directory(&ctx).unwrap();
        let codebase = harness.project().codebase_path();
        assert!(codebase.join("a.txt").is_file());
        assert!(codebase.join("b.txt").is_file());
        assert_eq!(input_files(&ctx, Some("to")).len(), 1);
    }
}
