//! Delivered purchase payloads on disk.
//!
//! Layout under the data directory:
//! - `downloads/{cid}` for decrypted assets
//! - `downloads/{cid}.result.txt` for computed results

use std::path::{Path, PathBuf};

use crate::content::ContentId;
use crate::delivery::DeliveryPayload;

const DOWNLOADS_DIR: &str = "downloads";
const RESULT_SUFFIX: &str = ".result.txt";

#[derive(Debug, Clone)]
pub struct DeliveryOutbox {
    dir: PathBuf,
}

impl DeliveryOutbox {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join(DOWNLOADS_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a payload for `cid` is written to.
    pub fn path_for(&self, cid: &ContentId, payload: &DeliveryPayload) -> PathBuf {
        match payload {
            DeliveryPayload::Asset(_) => self.dir.join(cid.as_str()),
            DeliveryPayload::Computed(_) => self.dir.join(format!("{}{}", cid, RESULT_SUFFIX)),
        }
    }

    /// Write (or overwrite) the payload. Replays of the same purchase produce the same file.
    pub fn write(&self, cid: &ContentId, payload: &DeliveryPayload) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(cid, payload);
        let tmp = path.with_extension("partial");
        let bytes = match payload {
            DeliveryPayload::Asset(bytes) => bytes.as_slice(),
            DeliveryPayload::Computed(text) => text.as_bytes(),
        };
        if let Err(e) = std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, &path)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(path)
    }
}
