// src/delivery/mod.rs
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::utils::error::DeliveryError;

/// Capability to deliver a named byte payload to the user as a downloadable
/// file, uniformly callable regardless of host environment. Each call is
/// one-shot: the payload lands under exactly the given filename and any
/// transient resource is released before the call returns.
pub trait FileDelivery {
    fn deliver(&self, filename: &str, bytes: &[u8], mime: &str) -> Result<PathBuf, DeliveryError>;
}

/// Delivers payloads as files in a base directory.
pub struct DirectoryDelivery {
    base_dir: PathBuf,
}

impl DirectoryDelivery {
    /// Creates the delivery target, creating the base directory if needed.
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self, DeliveryError> {
        let base_path = base_dir.as_ref().to_path_buf();

        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(DeliveryError::Io)?;
        }

        Ok(Self {
            base_dir: base_path,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl FileDelivery for DirectoryDelivery {
    fn deliver(&self, filename: &str, bytes: &[u8], mime: &str) -> Result<PathBuf, DeliveryError> {
        // A service-supplied name must not escape the delivery directory.
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(DeliveryError::UnsafeFilename(filename.to_string()));
        }

        let file_path = self.base_dir.join(filename);

        let mut file = fs::File::create(&file_path).map_err(DeliveryError::Io)?;
        file.write_all(bytes).map_err(DeliveryError::Io)?;

        tracing::info!(
            "Delivered {} ({} bytes, {})",
            file_path.display(),
            bytes.len(),
            mime
        );

        Ok(file_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_exact_filename_and_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let delivery = DirectoryDelivery::new(dir.path()).expect("delivery target");

        let path = delivery
            .deliver("table_1.csv", b"A,B\n1,2\n", "text/csv")
            .expect("delivery succeeds");

        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("table_1.csv"));
        let content = fs::read_to_string(&path).expect("file exists");
        assert_eq!(content, "A,B\n1,2\n");
    }

    #[test]
    fn creates_missing_base_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("exports").join("run1");

        let delivery = DirectoryDelivery::new(&nested).expect("delivery target");
        assert!(nested.is_dir());
        delivery
            .deliver("out.csv", b"x", "text/csv")
            .expect("delivery succeeds");
        assert!(nested.join("out.csv").is_file());
    }

    #[test]
    fn refuses_filenames_that_escape_the_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let delivery = DirectoryDelivery::new(dir.path()).expect("delivery target");

        for bad in ["../escape.csv", "a/b.csv", "a\\b.csv", ""] {
            let result = delivery.deliver(bad, b"x", "text/csv");
            assert!(
                matches!(result, Err(DeliveryError::UnsafeFilename(_))),
                "expected refusal for {:?}",
                bad
            );
        }
    }
}
