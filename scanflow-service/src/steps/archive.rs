// Archive Extraction
// Tar and gzip-compressed tar extraction into "<archive>-extract" directories

use crate::error::StepError;
use crate::execution::context::StepContext;

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;
use walkdir::WalkDir;

/// Suffix of the directory an archive is extracted to
pub const EXTRACT_SUFFIX: &str = "-extract";

/// Maximum nesting depth when extracting recursively
const MAX_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    TarGz,
}

/// Recognise an archive by its file name
pub fn archive_kind(path: &Path) -> Option<ArchiveKind> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveKind::TarGz)
    } else if name.ends_with(".tar") {
        Some(ArchiveKind::Tar)
    } else {
        None
    }
}

fn open_archive(path: &Path, kind: ArchiveKind) -> io::Result<Archive<Box<dyn Read>>> {
    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = match kind {
        ArchiveKind::Tar => Box::new(file),
        ArchiveKind::TarGz => Box::new(GzDecoder::new(file)),
    };
    Ok(Archive::new(reader))
}

/// Unpack an archive into `target`; entries escaping `target` are refused by `tar`
pub fn extract_archive(path: &Path, target: &Path) -> io::Result<()> {
    let kind = archive_kind(path).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a supported archive", path.display()),
        )
    })?;
    fs::create_dir_all(target)?;
    let mut archive = open_archive(path, kind)?;
    archive.set_preserve_permissions(false);
    archive.unpack(target)
}

/// Target directory for an archive: "<path>-extract"
pub fn extract_target(path: &Path) -> PathBuf {
    let mut target = path.as_os_str().to_owned();
    target.push(EXTRACT_SUFFIX);
    PathBuf::from(target)
}

/// Extract every archive under `location`; returns one error line per failure
pub fn extract_archives(location: &Path, recurse: bool) -> Vec<String> {
    let mut errors = Vec::new();
    let mut pending = find_archives(location);
    let mut depth = 0;

    while !pending.is_empty() && depth < MAX_DEPTH {
        let mut extracted = Vec::new();
        for archive in pending {
            let target = extract_target(&archive);
            if target.exists() {
                continue;
            }
            debug!(archive = %archive.display(), "extracting");
            match extract_archive(&archive, &target) {
                Ok(()) => extracted.push(target),
                Err(err) => errors.push(format!("{}: {}", archive.display(), err)),
            }
        }

        if !recurse {
            break;
        }
        pending = extracted.iter().flat_map(|dir| find_archives(dir)).collect();
        depth += 1;
    }

    errors
}

fn find_archives(location: &Path) -> Vec<PathBuf> {
    WalkDir::new(location)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && archive_kind(e.path()).is_some())
        .map(|e| e.into_path())
        .collect()
}

/// Extract archives found in codebase/ (recursively unless the project disables it)
pub fn extract_archives_step(ctx: &StepContext) -> Result<(), StepError> {
    let project = ctx.project();
    let errors = extract_archives(
        &project.codebase_path(),
        project.settings.extract_recursively,
    );
    if !errors.is_empty() {
        ctx.add_error(errors.join("\n"));
    }
    Ok(())
}

/// Extract each input archive into its own codebase/ directory, copy other inputs as-is
pub fn extract_inputs_to_codebase_directory(ctx: &StepContext) -> Result<(), StepError> {
    let project = ctx.project();
    let codebase = project.codebase_path();
    fs::create_dir_all(&codebase)?;

    for source in &project.input_sources {
        let from = project.input_location(source);
        if !from.is_file() {
            ctx.add_error(format!("input {} is missing", source.filename));
            continue;
        }
        match archive_kind(&from) {
            Some(_) => {
                let target = extract_target(&codebase.join(&source.filename));
                ctx.save_errors(extract_archive(&from, &target), None);
            }
            None => {
                fs::copy(&from, codebase.join(&source.filename))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    /// Build a tar archive from (path, content) pairs
    pub(crate) fn make_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_archive_kind() {
        assert_eq!(archive_kind(Path::new("a.tar")), Some(ArchiveKind::Tar));
        assert_eq!(archive_kind(Path::new("a.TAR.GZ")), Some(ArchiveKind::TarGz));
        assert_eq!(archive_kind(Path::new("a.tgz")), Some(ArchiveKind::TarGz));
        assert_eq!(archive_kind(Path::new("a.zip")), None);
    }

    #[test]
    fn test_extract_archives_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let inner = make_tar(&[("lib/inner.txt", b"inner".as_slice())]);
        let outer = gzip(&make_tar(&[("readme.md", b"hi".as_slice()), ("nested.tar", inner.as_slice())]));
        fs::write(dir.path().join("outer.tar.gz"), outer).unwrap();

        let errors = extract_archives(dir.path(), true);
        assert!(errors.is_empty(), "{:?}", errors);

        let outer_dir = dir.path().join("outer.tar.gz-extract");
        assert!(outer_dir.join("readme.md").is_file());
        assert!(outer_dir
            .join("nested.tar-extract")
            .join("lib/inner.txt")
            .is_file());
    }

    #[test]
    fn test_extract_archives_without_recursion() {
        let dir = tempfile::tempdir().unwrap();
        let inner = make_tar(&[("inner.txt", b"inner".as_slice())]);
        fs::write(dir.path().join("outer.tar"), make_tar(&[("nested.tar", inner.as_slice())])).unwrap();

        extract_archives(dir.path(), false);
        let outer_dir = dir.path().join("outer.tar-extract");
        assert!(outer_dir.join("nested.tar").is_file());
        assert!(!outer_dir.join("nested.tar-extract").exists());
    }

    #[test]
    fn test_corrupt_archive_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.tgz"), b"not gzip").unwrap();
        let errors = extract_archives(dir.path(), true);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("broken.tgz"));
    }
}
