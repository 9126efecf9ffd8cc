//! Input validation: make sure a user-supplied path is a readable PDF before
//! pdfium sees it.
//!
//! We check the `%PDF` magic bytes up front so callers get
//! [`Letter2JsonError::NotAPdf`] rather than an opaque pdfium load error.

use crate::error::Letter2JsonError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Validate a local file path and return it in owned form.
pub fn resolve_local(path: impl AsRef<Path>) -> Result<PathBuf, Letter2JsonError> {
    let path = path.as_ref().to_path_buf();

    if !path.exists() {
        return Err(Letter2JsonError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != PDF_MAGIC {
                return Err(Letter2JsonError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Letter2JsonError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(Letter2JsonError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

/// Check in-memory bytes for the PDF header.
pub fn check_magic(bytes: &[u8], origin: &Path) -> Result<(), Letter2JsonError> {
    if bytes.len() >= 4 && &bytes[..4] != PDF_MAGIC {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(Letter2JsonError::NotAPdf {
            path: origin.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_reported() {
        let err = resolve_local("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, Letter2JsonError::FileNotFound { .. }));
    }

    #[test]
    fn non_pdf_is_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"PK\x03\x04 zip archive").unwrap();
        let err = resolve_local(tmp.path()).unwrap_err();
        assert!(matches!(err, Letter2JsonError::NotAPdf { magic, .. } if &magic == b"PK\x03\x04"));
    }

    #[test]
    fn pdf_header_is_accepted() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"%PDF-1.7\n").unwrap();
        assert_eq!(resolve_local(tmp.path()).unwrap(), tmp.path());
    }

    #[test]
    fn byte_magic_check() {
        assert!(check_magic(b"%PDF-1.4", Path::new("<bytes>")).is_ok());
        assert!(check_magic(b"GIF89a", Path::new("<bytes>")).is_err());
    }
}
