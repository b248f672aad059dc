//! pdfium library binding.
//!
//! pdfium is a shared library loaded at runtime. We look for it in a few
//! well-known places before falling back to the system loader path, so a
//! `libpdfium` dropped next to the binary works without any configuration.

use crate::error::FormSegError;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::debug;

/// Directories searched for the pdfium shared library, in order, after
/// `PDFIUM_LIB_PATH`.
const SEARCH_DIRS: &[&str] = &["./", "/usr/lib", "/usr/local/lib", "/opt/homebrew/lib"];

/// Bind to a pdfium library.
///
/// Search order: `PDFIUM_LIB_PATH` (a file or a directory), the current
/// directory, common library directories, then the system library path.
pub fn bind_pdfium() -> Result<Pdfium, FormSegError> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(p) = std::env::var("PDFIUM_LIB_PATH") {
        if !p.is_empty() {
            let p = PathBuf::from(p);
            if p.is_dir() {
                candidates.push(Pdfium::pdfium_platform_library_name_at_path(&p));
            } else {
                candidates.push(p);
            }
        }
    }
    candidates.extend(
        SEARCH_DIRS
            .iter()
            .map(|dir| Pdfium::pdfium_platform_library_name_at_path(dir)),
    );

    let mut last_err = String::new();
    for path in &candidates {
        match Pdfium::bind_to_library(path) {
            Ok(bindings) => {
                debug!("Bound pdfium at {}", path.display());
                return Ok(Pdfium::new(bindings));
            }
            Err(e) => last_err = format!("{}: {:?}", path.display(), e),
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| FormSegError::PdfiumBindingFailed(format!("{e:?} (last tried {last_err})")))
}

/// Load a PDF held in memory.
pub fn load_document<'a>(
    pdfium: &'a Pdfium,
    bytes: &'a [u8],
) -> Result<PdfDocument<'a>, FormSegError> {
    pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| FormSegError::CorruptPdf {
            detail: format!("{e:?}"),
        })
}
