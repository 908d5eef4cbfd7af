// Utility Functions
// Common helpers for durations and file fingerprints

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Render a duration in seconds, e.g. "75 seconds (1.2 minutes)"
pub fn humanize_time(seconds: f64) -> String {
    let mut message = format!("{:.0} seconds", seconds);
    if seconds > 86400.0 {
        message.push_str(&format!(" ({:.1} days)", seconds / 86400.0));
    }
    if seconds > 3600.0 {
        message.push_str(&format!(" ({:.1} hours)", seconds / 3600.0));
    } else if seconds > 60.0 {
        message.push_str(&format!(" ({:.1} minutes)", seconds / 60.0));
    }
    message
}

/// Hex-encoded md5 and sha256 of a file, streamed in chunks
pub fn file_checksums(path: &Path) -> io::Result<(String, String)> {
    let mut file = File::open(path)?;
    let mut md5_ctx = md5::Context::new();
    let mut sha256 = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        md5_ctx.consume(&buffer[..read]);
        sha256.update(&buffer[..read]);
    }

    Ok((
        format!("{:x}", md5_ctx.compute()),
        hex::encode(sha256.finalize()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humanize_time() {
        assert_eq!(humanize_time(2.4), "2 seconds");
        assert_eq!(humanize_time(90.0), "90 seconds (1.5 minutes)");
        assert_eq!(humanize_time(7200.0), "7200 seconds (2.0 hours)");
    }

    #[test]
    fn test_file_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let (md5, sha256) = file_checksums(&path).unwrap();
        assert_eq!(md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
