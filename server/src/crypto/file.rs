//! File wrappers around the crypto engine for operational tooling.
//!
//! `encrypt_file("data.csv")` writes `data.csv.enc`; `decrypt_file("data.csv.enc")`
//! restores `data.csv`. The input is read and closed before the output is created,
//! and a failed write never leaves a partial output behind.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::crypto::engine::{self, AssetKey, CryptoError};

/// Marker suffix appended to encrypted files.
pub const ENCRYPTED_SUFFIX: &str = ".enc";

/// Encrypt the file at `path`, writing `path + ".enc"`. Returns the output path.
pub fn encrypt_file(path: impl AsRef<Path>, key: &AssetKey) -> Result<PathBuf, CryptoError> {
    let path = path.as_ref();
    let plaintext = std::fs::read(path)?;
    let bundle = engine::encrypt(&plaintext, key)?;

    let mut out = path.as_os_str().to_owned();
    out.push(ENCRYPTED_SUFFIX);
    let out = PathBuf::from(out);
    write_output(&out, &bundle)?;

    tracing::debug!("Encrypted {} -> {}", path.display(), out.display());
    Ok(out)
}

/// Decrypt the file at `enc_path` (which must end in `.enc`), writing the path
/// with the suffix stripped. Returns the output path.
pub fn decrypt_file(enc_path: impl AsRef<Path>, key: &AssetKey) -> Result<PathBuf, CryptoError> {
    let enc_path = enc_path.as_ref();
    let out = strip_suffix(enc_path)?;

    let bundle = std::fs::read(enc_path)?;
    // Authenticate before the output file exists
    let plaintext = engine::decrypt(&bundle, key)?;
    write_output(&out, &plaintext)?;

    tracing::debug!("Decrypted {} -> {}", enc_path.display(), out.display());
    Ok(out)
}

fn strip_suffix(enc_path: &Path) -> Result<PathBuf, CryptoError> {
    let as_str = enc_path
        .to_str()
        .ok_or_else(|| CryptoError::InvalidPath(enc_path.display().to_string()))?;
    match as_str.strip_suffix(ENCRYPTED_SUFFIX) {
        Some(stem) if !stem.is_empty() && !stem.ends_with(std::path::MAIN_SEPARATOR) => {
            Ok(PathBuf::from(stem))
        }
        _ => Err(CryptoError::InvalidPath(format!(
            "{} does not end with {}",
            as_str, ENCRYPTED_SUFFIX
        ))),
    }
}

fn write_output(path: &Path, data: &[u8]) -> Result<(), CryptoError> {
    let result = File::create(path).and_then(|mut file| {
        file.write_all(data)?;
        file.sync_all()
    });
    if let Err(e) = result {
        let _ = std::fs::remove_file(path);
        return Err(e.into());
    }
    Ok(())
}
