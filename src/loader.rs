//! Input loading: image files are read as-is, PDFs are rasterized with
//! `pdftoppm` (poppler-utils) into a temporary directory.

use anyhow::{anyhow, bail, Context, Result};
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::request::PageImage;

/// File extensions accepted by the CLI and the upload endpoint.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "tiff", "tif", "bmp", "gif"];

const PDF_DPI: &str = "300";

/// Lowercased extension of `path`, if any.
fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_supported(path: &Path) -> bool {
    extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Load the pages of one input file from disk.
pub async fn load_pages(path: &Path) -> Result<Vec<PageImage>> {
    if !is_supported(path) {
        bail!("Unsupported file type: {:?}", path);
    }
    if extension(path).as_deref() == Some("pdf") {
        return rasterize_pdf(path).await;
    }

    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    Ok(vec![image_page(0, data)?])
}

/// Load pages from uploaded bytes; `filename` decides how they are read.
pub async fn load_pages_from_bytes(filename: &str, data: Vec<u8>) -> Result<Vec<PageImage>> {
    let path = Path::new(filename);
    if !is_supported(path) {
        bail!("Unsupported file type: {}", filename);
    }
    if extension(path).as_deref() != Some("pdf") {
        return Ok(vec![image_page(0, data)?]);
    }

    let file = tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile()
        .context("Failed to create temp file")?;
    tokio::fs::write(file.path(), &data)
        .await
        .context("Failed to write uploaded PDF")?;
    rasterize_pdf(file.path()).await
}

/// Wrap encoded image bytes, sniffing the MIME type from the content.
fn image_page(index: usize, data: Vec<u8>) -> Result<PageImage> {
    let format = image::guess_format(&data).context("Unrecognized image data")?;
    let mime = match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        ImageFormat::WebP => "image/webp",
        other => bail!("Unsupported image format: {:?}", other),
    };
    Ok(PageImage::new(index, data, mime))
}

/// Rasterize every page of a PDF to PNG at 300 dpi.
async fn rasterize_pdf(pdf: &Path) -> Result<Vec<PageImage>> {
    let dir = tempfile::tempdir().context("Failed to create temp dir")?;
    let prefix = dir.path().join("page");

    debug!("Rasterizing {:?} at {} dpi", pdf, PDF_DPI);
    let output = Command::new("pdftoppm")
        .args(["-png", "-r", PDF_DPI])
        .arg(pdf)
        .arg(&prefix)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow!("pdftoppm not found (install poppler-utils)")
            } else {
                anyhow!("Failed to run pdftoppm: {}", e)
            }
        })?;

    if !output.status.success() {
        bail!(
            "pdftoppm failed on {:?}: {}",
            pdf,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir.path()).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if let Some(number) = page_number(&path) {
            files.push((number, path));
        }
    }
    // Zero padding width depends on the page count, so sort numerically
    files.sort_by_key(|(number, _)| *number);

    if files.is_empty() {
        bail!("pdftoppm produced no pages for {:?}", pdf);
    }

    let mut pages = Vec::with_capacity(files.len());
    for (index, (_, path)) in files.into_iter().enumerate() {
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read rasterized page {:?}", path))?;
        pages.push(PageImage::new(index, data, "image/png"));
    }

    info!("Rasterized {:?} into {} page(s)", pdf, pages.len());
    Ok(pages)
}

/// Page number from a `page-NN.png` file name.
fn page_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    if extension(path).as_deref() != Some("png") {
        return None;
    }
    stem.strip_prefix("page-")?.parse().ok()
}

/// List supported files under `dir`, sorted by path.
pub fn discover_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk(dir, recursive, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(dir: &Path, recursive: bool, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                walk(&path, recursive, files)?;
            }
        } else if is_supported(&path) {
            files.push(path);
        } else {
            debug!("Skipping unsupported file {:?}", path);
        }
    }
    Ok(())
}

/// Resolve a CLI input argument into the files to process.
pub fn collect_inputs(input: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if input.is_dir() {
        let files = discover_files(input, recursive)?;
        if files.is_empty() {
            warn!("No supported files found in {:?}", input);
        }
        Ok(files)
    } else if input.is_file() {
        if !is_supported(input) {
            bail!(
                "Unsupported file type: {:?} (supported: {})",
                input,
                SUPPORTED_EXTENSIONS.join(", ")
            );
        }
        Ok(vec![input.to_path_buf()])
    } else {
        bail!("Input not found: {:?}", input)
    }
}
