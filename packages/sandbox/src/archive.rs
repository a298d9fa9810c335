// ABOUTME: In-memory tar archive builder for injecting a single source file into a sandbox
// ABOUTME: Produces deterministic single-entry archives without touching the host filesystem

use tar::{Builder, EntryType, Header};
use thiserror::Error;

/// Longest name that fits the ustar name field without extensions
const MAX_FILENAME_LEN: usize = 100;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Invalid archive filename '{0}': {1}")]
    InvalidFilename(String, &'static str),

    #[error("Failed to encode archive: {0}")]
    Encoding(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Reject anything that could name a path other than a plain file in the target directory
fn validate_filename(filename: &str) -> Result<()> {
    let reason = if filename.is_empty() {
        Some("name is empty")
    } else if filename == "." || filename == ".." {
        Some("name refers to a directory")
    } else if filename.contains('/') || filename.contains('\\') {
        Some("name contains a path separator")
    } else if filename.contains('\0') {
        Some("name contains a NUL byte")
    } else if filename.len() > MAX_FILENAME_LEN {
        Some("name is too long")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ArchiveError::InvalidFilename(filename.to_string(), reason)),
        None => Ok(()),
    }
}

/// Build a single-entry tar archive holding `source` under `filename`
///
/// Header fields that would vary between hosts (mtime, owner, mode) are pinned so
/// identical input always yields identical bytes.
pub fn build(filename: &str, source: &str) -> Result<Vec<u8>> {
    validate_filename(filename)?;

    let data = source.as_bytes();

    let mut header = Header::new_ustar();
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);

    let mut archive = Builder::new(Vec::with_capacity(data.len() + 2048));
    archive.mode(tar::HeaderMode::Deterministic);
    archive.append_data(&mut header, filename, data)?;

    Ok(archive.into_inner()?)
}
