// Project Model
// A named analysis target with its work directory and input sources

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type ProjectId = Uuid;

/// Per-project settings read by the built-in steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    /// Glob-style patterns; matching resources are flagged as ignored
    #[serde(default)]
    pub ignored_patterns: Vec<String>,

    /// Extract archives found inside extracted archives
    #[serde(default = "default_true")]
    pub extract_recursively: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            ignored_patterns: Vec::new(),
            extract_recursively: true,
        }
    }
}

/// An input file, either uploaded (copied in) or fetched from a URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSource {
    pub filename: String,
    pub download_url: Option<String>,
    pub is_uploaded: bool,
    pub tag: Option<String>,
}

impl InputSource {
    pub fn uploaded(filename: impl Into<String>, tag: Option<String>) -> Self {
        Self {
            filename: filename.into(),
            download_url: None,
            is_uploaded: true,
            tag,
        }
    }

    /// A URL input; the filename is derived from the last path segment,
    /// or from the image reference for `docker://` URLs
    pub fn from_url(url: impl Into<String>, tag: Option<String>) -> Self {
        let url = url.into();
        let filename = match url.strip_prefix("docker://") {
            Some(reference) => format!("{}.tar", safe_name(reference)),
            None => url
                .rsplit('/')
                .find(|segment| !segment.is_empty())
                .and_then(|segment| segment.split(['?', '#']).next())
                .filter(|name| !name.is_empty())
                .unwrap_or("download")
                .to_string(),
        };

        Self {
            filename,
            download_url: Some(url),
            is_uploaded: false,
            tag,
        }
    }

    pub fn is_docker_image(&self) -> bool {
        self.download_url
            .as_deref()
            .is_some_and(|url| url.starts_with("docker://"))
    }

    /// Split the "path:tag" syntax used for input files
    pub fn split_file_tag(value: &str) -> (&str, Option<String>) {
        match value.split_once(':') {
            Some((path, tag)) if !tag.is_empty() => (path, Some(tag.to_string())),
            Some((path, _)) => (path, None),
            None => (value, None),
        }
    }

    /// Split the "url#tag" syntax used for input URLs
    pub fn split_url_tag(value: &str) -> (&str, Option<String>) {
        match value.rsplit_once('#') {
            Some((url, tag)) if !tag.is_empty() => (url, Some(tag.to_string())),
            Some((url, _)) => (url, None),
            None => (value, None),
        }
    }
}

/// A named analysis target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub work_directory: PathBuf,
    #[serde(default)]
    pub settings: ProjectSettings,
    #[serde(default)]
    pub input_sources: Vec<InputSource>,
}

impl Project {
    /// Create a project whose work directory lives under `work_root/projects`
    pub fn new(name: impl Into<String>, work_root: &Path) -> Self {
        let name = name.into();
        let id = Uuid::new_v4();
        let short_id = &id.simple().to_string()[..8];
        let work_directory = work_root
            .join("projects")
            .join(format!("{}-{}", slugify(&name), short_id));

        Self {
            id,
            name,
            created_at: Utc::now(),
            work_directory,
            settings: ProjectSettings::default(),
            input_sources: Vec::new(),
        }
    }

    pub fn with_settings(mut self, settings: ProjectSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn input_path(&self) -> PathBuf {
        self.work_directory.join("input")
    }

    pub fn codebase_path(&self) -> PathBuf {
        self.work_directory.join("codebase")
    }

    pub fn output_path(&self) -> PathBuf {
        self.work_directory.join("output")
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.work_directory.join("tmp")
    }

    /// Create the work directory layout (idempotent)
    pub fn setup_work_directory(&self) -> io::Result<()> {
        for dir in [
            self.input_path(),
            self.codebase_path(),
            self.output_path(),
            self.tmp_path(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Location of an input source inside the input directory
    pub fn input_location(&self, source: &InputSource) -> PathBuf {
        self.input_path().join(&source.filename)
    }

    pub fn input_exists(&self, source: &InputSource) -> bool {
        self.input_location(source).is_file()
    }

    /// Register an input source, replacing any previous one with the same filename
    pub fn add_input_source(&mut self, source: InputSource) {
        self.input_sources.retain(|s| s.filename != source.filename);
        self.input_sources.push(source);
    }

    /// Copy a local file into the input directory and register it as uploaded
    pub fn copy_input_from(&mut self, location: &Path, tag: Option<String>) -> io::Result<InputSource> {
        let filename = location
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} has no file name", location.display()),
                )
            })?;

        fs::create_dir_all(self.input_path())?;
        fs::copy(location, self.input_path().join(&filename))?;

        let source = InputSource::uploaded(filename, tag);
        self.add_input_source(source.clone());
        Ok(source)
    }

    /// Input sources carrying the given tag
    pub fn inputs_with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a InputSource> + 'a {
        self.input_sources
            .iter()
            .filter(move |s| s.tag.as_deref() == Some(tag))
    }

    /// Timestamped output file path, e.g. `output/results-2024-01-31-10-20-30.json`
    pub fn output_file_path(&self, name: &str, extension: &str) -> PathBuf {
        let stamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
        self.output_path()
            .join(format!("{}-{}.{}", name, stamp, extension))
    }
}

/// Replace every character that is not alphanumeric with '_'
fn safe_name(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn slugify(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_directory_layout() {
        let project = Project::new("My Analysis", Path::new("/work"));
        let dir = project.work_directory.to_string_lossy().to_string();

        assert!(dir.starts_with("/work/projects/my-analysis-"));
        assert!(project.codebase_path().ends_with("codebase"));
        assert!(project.input_path().ends_with("input"));
    }

    #[test]
    fn test_split_file_tag() {
        assert_eq!(
            InputSource::split_file_tag("/tmp/app.tar:from"),
            ("/tmp/app.tar", Some("from".to_string()))
        );
        assert_eq!(InputSource::split_file_tag("/tmp/app.tar"), ("/tmp/app.tar", None));
    }

    #[test]
    fn test_split_url_tag() {
        assert_eq!(
            InputSource::split_url_tag("https://host/a.zip#to"),
            ("https://host/a.zip", Some("to".to_string()))
        );
        assert_eq!(
            InputSource::split_url_tag("https://host/a.zip"),
            ("https://host/a.zip", None)
        );
    }

    #[test]
    fn test_input_source_from_url() {
        let source = InputSource::from_url("https://example.com/dl/pkg-1.0.tar.gz?x=1", None);
        assert_eq!(source.filename, "pkg-1.0.tar.gz");
        assert!(!source.is_uploaded);

        let image = InputSource::from_url("docker://alpine:3.18", None);
        assert_eq!(image.filename, "alpine_3_18.tar");
        assert!(image.is_docker_image());
    }

    #[test]
    fn test_copy_input_from_registers_source() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("sbom.json");
        std::fs::write(&file, "{}").unwrap();

        let mut project = Project::new("p", root.path());
        project.setup_work_directory().unwrap();
        let source = project.copy_input_from(&file, Some("sbom".to_string())).unwrap();

        assert!(project.input_exists(&source));
        assert_eq!(project.inputs_with_tag("sbom").count(), 1);
    }
}
