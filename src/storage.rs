//! Media directory holding cover images and rendered PDFs.

use crate::error::{AppError, Result};
use std::fs::OpenOptions;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Subdirectory for rendered book PDFs.
pub const PDF_DIR: &str = "book_pdfs";

/// Subdirectory for cover images.
pub const IMAGE_DIR: &str = "book_images";

const MAX_NAME_ATTEMPTS: u32 = 1000;

static STAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Canonical media-relative path of a book's PDF.
pub fn pdf_path(book_id: i64) -> String {
    format!("{}/book_{}.pdf", PDF_DIR, book_id)
}

/// Filesystem store addressed by media-relative paths.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Media root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a media-relative path, refusing anything that escapes the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        let safe = !relative.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(AppError::Validation(format!(
                "Invalid media path: {}",
                relative
            )));
        }
        Ok(self.root.join(rel))
    }

    /// Write a book's PDF next to its final location without replacing it yet.
    ///
    /// Each staged file gets its own temporary name, so concurrent renders
    /// of one book never share a partially written file.
    pub fn stage_pdf(&self, book_id: i64, bytes: &[u8]) -> Result<StagedPdf> {
        let relative = pdf_path(book_id);
        let target = self.resolve(&relative)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let seq = STAGE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = target.with_extension(format!("pdf.{}.{}.tmp", std::process::id(), seq));
        std::fs::write(&tmp, bytes)?;

        tracing::debug!(book_id, path = %tmp.display(), size = bytes.len(), "Staged PDF");
        Ok(StagedPdf {
            relative,
            tmp,
            target,
            committed: false,
        })
    }

    /// Write a book's PDF, replacing the previous one, and return its relative path.
    pub fn write_pdf(&self, book_id: i64, bytes: &[u8]) -> Result<String> {
        self.stage_pdf(book_id, bytes)?.commit()
    }

    /// Remove a book's PDF if it exists.
    pub fn remove_pdf(&self, book_id: i64) -> Result<()> {
        let target = self.resolve(&pdf_path(book_id))?;
        match std::fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read any stored file.
    pub fn read(&self, relative: &str) -> Result<Vec<u8>> {
        let path = self.resolve(relative)?;
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("File {}", relative))
            } else {
                e.into()
            }
        })
    }

    /// Read a cover image. Any failure is reported as an unavailable image.
    pub fn read_image(&self, relative: &str) -> Result<Vec<u8>> {
        let path = self.resolve(relative)?;
        std::fs::read(&path).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read cover image");
            AppError::ImageUnavailable(format!("{}: {}", relative, e))
        })
    }

    /// Copy a local image into the cover directory and return its relative path.
    ///
    /// An existing cover is never replaced: a clashing name gets a numeric
    /// suffix (`cover.png`, `cover_1.png`, ...).
    pub fn import_image(&self, source: &Path) -> Result<String> {
        let stem = source
            .file_stem()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                AppError::Validation(format!("Invalid image path: {}", source.display()))
            })?;
        let ext = source.extension().and_then(|e| e.to_str());

        let mut input = std::fs::File::open(source)
            .map_err(|e| AppError::ImageUnavailable(format!("{}: {}", source.display(), e)))?;
        std::fs::create_dir_all(self.root.join(IMAGE_DIR))?;

        for n in 0..MAX_NAME_ATTEMPTS {
            let name = match (n, ext) {
                (0, Some(ext)) => format!("{}.{}", stem, ext),
                (0, None) => stem.to_string(),
                (n, Some(ext)) => format!("{}_{}.{}", stem, n, ext),
                (n, None) => format!("{}_{}", stem, n),
            };
            let relative = format!("{}/{}", IMAGE_DIR, name);
            let target = self.resolve(&relative)?;

            let mut output = match OpenOptions::new().write(true).create_new(true).open(&target) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };
            std::io::copy(&mut input, &mut output)?;

            tracing::debug!(source = %source.display(), path = %relative, "Imported cover image");
            return Ok(relative);
        }

        Err(AppError::Validation(format!(
            "Too many cover images named {}",
            stem
        )))
    }
}

/// PDF written to a temporary file, waiting to replace the book's artifact.
///
/// Dropping it without [`StagedPdf::commit`] removes the temporary file.
#[derive(Debug)]
pub struct StagedPdf {
    relative: String,
    tmp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedPdf {
    /// Media-relative path the PDF will live at.
    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// Move the PDF into place and return its relative path.
    pub fn commit(mut self) -> Result<String> {
        std::fs::rename(&self.tmp, &self.target)?;
        self.committed = true;
        Ok(self.relative.clone())
    }
}

impl Drop for StagedPdf {
    fn drop(&mut self) {
        if !self.committed
            && let Err(e) = std::fs::remove_file(&self.tmp)
        {
            tracing::debug!(path = %self.tmp.display(), error = %e, "Failed to discard staged PDF");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_path_is_derived_from_book_id() {
        assert_eq!(pdf_path(7), "book_pdfs/book_7.pdf");
    }

    #[test]
    fn resolve_rejects_escaping_paths() {
        let store = ArtifactStore::new("/srv/media");
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
        assert!(store.resolve("").is_err());
        assert_eq!(
            store.resolve("book_images/a.png").unwrap(),
            PathBuf::from("/srv/media/book_images/a.png")
        );
    }

    #[test]
    fn write_pdf_overwrites_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let rel = store.write_pdf(3, b"first").unwrap();
        store.write_pdf(3, b"second").unwrap();

        assert_eq!(store.read(&rel).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(dir.path().join(PDF_DIR)).unwrap().count(), 1);

        store.remove_pdf(3).unwrap();
        assert!(matches!(store.read(&rel), Err(AppError::NotFound(_))));
        store.remove_pdf(3).unwrap();
    }

    #[test]
    fn missing_image_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(matches!(
            store.read_image("book_images/missing.png"),
            Err(AppError::ImageUnavailable(_))
        ));
    }

    #[test]
    fn missing_image_error_names_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let err = store.read_image("book_images/missing.png").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("book_images/missing.png"));
        assert!(!message.contains(&*dir.path().to_string_lossy()));
    }

    #[test]
    fn staged_pdf_is_discarded_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.write_pdf(4, b"current").unwrap();

        let staged = store.stage_pdf(4, b"next").unwrap();
        assert_eq!(staged.relative(), "book_pdfs/book_4.pdf");
        drop(staged);

        assert_eq!(store.read("book_pdfs/book_4.pdf").unwrap(), b"current");
        assert_eq!(std::fs::read_dir(dir.path().join(PDF_DIR)).unwrap().count(), 1);

        let a = store.stage_pdf(4, b"a").unwrap();
        let b = store.stage_pdf(4, b"b").unwrap();
        b.commit().unwrap();
        a.commit().unwrap();
        assert_eq!(store.read("book_pdfs/book_4.pdf").unwrap(), b"a");
    }

    #[test]
    fn imported_images_never_overwrite_each_other() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("a")).unwrap();
        std::fs::create_dir_all(src.path().join("b")).unwrap();
        std::fs::write(src.path().join("a/cover.png"), b"first cover").unwrap();
        std::fs::write(src.path().join("b/cover.png"), b"second cover").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let a = store.import_image(&src.path().join("a/cover.png")).unwrap();
        let b = store.import_image(&src.path().join("b/cover.png")).unwrap();

        assert_eq!(a, "book_images/cover.png");
        assert_eq!(b, "book_images/cover_1.png");
        assert_eq!(store.read_image(&a).unwrap(), b"first cover");
        assert_eq!(store.read_image(&b).unwrap(), b"second cover");
    }

    #[test]
    fn importing_missing_image_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(matches!(
            store.import_image(&dir.path().join("nope.png")),
            Err(AppError::ImageUnavailable(_))
        ));
    }
}
