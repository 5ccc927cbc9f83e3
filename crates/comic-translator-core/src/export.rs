//! Writing finished pages out as images and a combined PDF.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, Stream};
use tracing::{debug, info};

use crate::config::{ExportConfig, ExportImageFormat};
use crate::error::{Error, Result};
use crate::page::Page;
use crate::preprocess::load_image;
use crate::util::write_atomic;

/// A4 in PDF points.
pub const A4_SIZE: (f32, f32) = (595.28, 841.89);

/// One lettered page ready for export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPage {
    pub index: usize,
    /// File stem of the source image
    pub stem: String,
    /// The rendered artifact
    pub image_path: PathBuf,
}

impl ExportPage {
    /// Export entry for a finished page; `None` unless the page is `Done`.
    pub fn from_page(page: &Page) -> Option<Self> {
        if !page.processing_status.is_done() {
            return None;
        }
        Some(Self {
            index: page.index,
            stem: page.stem(),
            image_path: page.rendered_image_ref.clone()?,
        })
    }
}

/// What an export produced.
#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    pub images: Vec<PathBuf>,
    pub document: Option<PathBuf>,
    /// Pages left out because they are not finished
    pub skipped_pages: Vec<usize>,
}

/// Destination for finished pages.
pub trait ExportWriter: Send + Sync {
    /// Write one image per page; returns the written paths in page order.
    fn write_images(&self, pages: &[ExportPage]) -> Result<Vec<PathBuf>>;

    /// Write one document containing every page.
    fn write_document(&self, pages: &[ExportPage]) -> Result<PathBuf>;
}

/// Writes `<stem>_translated.<ext>` images and `<chapter>.pdf` into a
/// directory.
#[derive(Debug, Clone)]
pub struct FileExportWriter {
    output_dir: PathBuf,
    document_name: String,
    format: ExportImageFormat,
    jpeg_quality: u8,
}

impl FileExportWriter {
    pub fn new(output_dir: impl Into<PathBuf>, chapter_name: &str, config: &ExportConfig) -> Self {
        Self {
            output_dir: output_dir.into(),
            document_name: sanitize_file_name(chapter_name),
            format: config.image_format,
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn image_path(&self, page: &ExportPage) -> PathBuf {
        self.output_dir
            .join(format!("{}_translated.{}", page.stem, self.format.extension()))
    }
}

impl ExportWriter for FileExportWriter {
    fn write_images(&self, pages: &[ExportPage]) -> Result<Vec<PathBuf>> {
        if pages.is_empty() {
            return Err(Error::Export("no pages to export".to_string()));
        }

        let mut written = Vec::with_capacity(pages.len());
        for page in pages {
            let image = load_image(&page.image_path)?.to_rgb8();
            let path = self.image_path(page);
            let bytes = encode_rgb(&image, self.format, self.jpeg_quality, &path)?;
            write_atomic(&path, &bytes)?;
            debug!("Exported page {} to {}", page.index, path.display());
            written.push(path);
        }

        info!("Exported {} images to {}", written.len(), self.output_dir.display());
        Ok(written)
    }

    fn write_document(&self, pages: &[ExportPage]) -> Result<PathBuf> {
        if pages.is_empty() {
            return Err(Error::Export("no pages to put in the document".to_string()));
        }

        let path = self.output_dir.join(format!("{}.pdf", self.document_name));
        let bytes = build_pdf(pages, self.jpeg_quality)?;
        write_atomic(&path, &bytes)?;

        info!("Wrote {}-page PDF {}", pages.len(), path.display());
        Ok(path)
    }
}

/// Page size in points for an image fit inside A4, aspect ratio preserved.
#[allow(clippy::cast_precision_loss)]
pub fn fit_to_a4(width: u32, height: u32) -> (f32, f32) {
    let (w, h) = (width as f32, height as f32);
    let scale = (A4_SIZE.0 / w).min(A4_SIZE.1 / h);
    (w * scale, h * scale)
}

/// One page per image, each image embedded as a JPEG XObject filling its page.
fn build_pdf(pages: &[ExportPage], jpeg_quality: u8) -> Result<Vec<u8>> {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let mut kids = Vec::with_capacity(pages.len());

    for page in pages {
        let image = load_image(&page.image_path)?.to_rgb8();
        let (width, height) = image.dimensions();
        let jpeg = encode_rgb(&image, ExportImageFormat::Jpg, jpeg_quality, &page.image_path)?;

        let image_dict = Dictionary::from_iter([
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Image".to_vec())),
            ("Width", Object::Integer(i64::from(width))),
            ("Height", Object::Integer(i64::from(height))),
            ("ColorSpace", Object::Name(b"DeviceRGB".to_vec())),
            ("BitsPerComponent", Object::Integer(8)),
            ("Filter", Object::Name(b"DCTDecode".to_vec())),
        ]);
        let image_id =
            document.add_object(Object::Stream(Stream::new(image_dict, jpeg).with_compression(false)));

        let (page_w, page_h) = fit_to_a4(width, height);
        let content = format!("q\n{page_w:.2} 0 0 {page_h:.2} 0 0 cm\n/Im0 Do\nQ\n");
        let content_id = document.add_object(Object::Stream(Stream::new(
            Dictionary::new(),
            content.into_bytes(),
        )));

        let resources = Dictionary::from_iter([(
            "XObject",
            Object::Dictionary(Dictionary::from_iter([("Im0", Object::Reference(image_id))])),
        )]);
        let page_id = document.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(page_w),
                    Object::Real(page_h),
                ]),
            ),
            ("Contents", Object::Reference(content_id)),
            ("Resources", Object::Dictionary(resources)),
        ]));
        kids.push(Object::Reference(page_id));
    }

    let count = i64::try_from(kids.len()).map_err(|e| Error::Export(e.to_string()))?;
    document.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(count)),
        ])),
    );

    let catalog_id = document.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    document.trailer.set("Root", Object::Reference(catalog_id));

    let mut output = Vec::new();
    document
        .save_to(&mut output)
        .map_err(|e| Error::PdfSave(format!("Failed to save chapter PDF: {e}")))?;
    Ok(output)
}

/// Encode an RGB image; `path` only labels errors.
pub(crate) fn encode_rgb(
    image: &RgbImage,
    format: ExportImageFormat,
    jpeg_quality: u8,
    path: &Path,
) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let encoded = match format {
        ExportImageFormat::Png => image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png),
        ExportImageFormat::Jpg => JpegEncoder::new_with_quality(&mut bytes, jpeg_quality).encode_image(image),
    };
    encoded.map_err(|e| Error::ImageWrite {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(bytes)
}

/// Replace characters that are not allowed in file names on common systems.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "chapter".to_string()
    } else {
        cleaned
    }
}
