use std::path::Path;

use image::RgbaImage;
use logging_timer::time;

use crate::types::RasterImage;

/// Scale at which PDF pages are rendered, keeping bubbles large enough to
/// sample reliably.
pub const PDF_RENDER_SCALE: f32 = 2.0;

#[derive(Debug, thiserror::Error)]
pub enum DocumentDecodeError {
    #[error("unsupported document type {0:?}; try a different file format")]
    UnsupportedType(String),

    #[error("failed to decode image: {0}; try a different file format")]
    Image(String),

    #[cfg(feature = "pdfium")]
    #[error("failed to process PDF file: {0}; try uploading an image (JPG, PNG) instead")]
    Pdf(String),

    #[error("PDF support is not available; try uploading an image (JPG, PNG) instead")]
    PdfUnavailable,

    #[error("document has no pages")]
    NoPages,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
}

impl DocumentKind {
    pub fn from_mime(mime: &str) -> Result<Self, DocumentDecodeError> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "application/pdf" => Ok(DocumentKind::Pdf),
            "image/jpeg" | "image/jpg" | "image/png" | "image/bmp" => Ok(DocumentKind::Image),
            other => Err(DocumentDecodeError::UnsupportedType(other.to_string())),
        }
    }

    /// MIME type implied by a file extension.
    pub fn mime_for_path(path: &Path) -> Option<&'static str> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some("application/pdf"),
            "jpg" | "jpeg" => Some("image/jpeg"),
            "png" => Some("image/png"),
            "bmp" => Some("image/bmp"),
            _ => None,
        }
    }
}

/// Decodes a single encoded image into RGBA pixels.
pub trait ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, DocumentDecodeError>;
}

/// Renders PDF pages one at a time, so a long document never has to sit in
/// memory as bitmaps all at once.
pub trait PdfRenderer {
    fn page_count(&self, bytes: &[u8]) -> Result<usize, DocumentDecodeError>;

    /// Renders the 0-based page `index` at `scale`.
    fn render_page(
        &self,
        bytes: &[u8],
        index: usize,
        scale: f32,
    ) -> Result<RgbaImage, DocumentDecodeError>;
}

/// Decoder backed by the `image` crate, guessing the format from the bytes.
#[derive(Copy, Clone, Debug, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, DocumentDecodeError> {
        image::load_from_memory(bytes)
            .map(|img| img.into_rgba8())
            .map_err(|e| DocumentDecodeError::Image(e.to_string()))
    }
}

/// Turns a document into raster images, one page at a time.
pub struct PageRasterizer {
    decoder: Box<dyn ImageDecoder>,
    pdf_renderer: Option<Box<dyn PdfRenderer>>,
    pdf_scale: f32,
}

impl Default for PageRasterizer {
    fn default() -> Self {
        Self::new(Box::new(ImageCrateDecoder), None)
    }
}

impl PageRasterizer {
    pub fn new(decoder: Box<dyn ImageDecoder>, pdf_renderer: Option<Box<dyn PdfRenderer>>) -> Self {
        Self {
            decoder,
            pdf_renderer,
            pdf_scale: PDF_RENDER_SCALE,
        }
    }

    pub fn supports_pdf(&self) -> bool {
        self.pdf_renderer.is_some()
    }

    fn pdf_renderer(&self) -> Result<&dyn PdfRenderer, DocumentDecodeError> {
        self.pdf_renderer
            .as_deref()
            .ok_or(DocumentDecodeError::PdfUnavailable)
    }

    /// Number of pages in `bytes` declared as `kind`. An image is always
    /// exactly one page; a PDF without pages is an error.
    pub fn page_count(&self, bytes: &[u8], kind: DocumentKind) -> Result<usize, DocumentDecodeError> {
        let count = match kind {
            DocumentKind::Image => 1,
            DocumentKind::Pdf => self.pdf_renderer()?.page_count(bytes)?,
        };
        if count == 0 {
            return Err(DocumentDecodeError::NoPages);
        }
        Ok(count)
    }

    /// Rasterizes the 0-based page `index`. There is no retry: a page that
    /// fails to decode will fail again.
    #[time]
    pub fn render_page(
        &self,
        bytes: &[u8],
        kind: DocumentKind,
        index: usize,
    ) -> Result<RasterImage, DocumentDecodeError> {
        let pixels = match kind {
            DocumentKind::Image => self.decoder.decode(bytes)?,
            DocumentKind::Pdf => self.pdf_renderer()?.render_page(bytes, index, self.pdf_scale)?,
        };
        log::debug!("rasterized page {} ({}x{})", index + 1, pixels.width(), pixels.height());
        Ok(RasterImage::new(index, pixels))
    }
}

#[cfg(feature = "pdfium")]
pub use self::pdfium::PdfiumRenderer;

#[cfg(feature = "pdfium")]
mod pdfium {
    use std::path::Path;

    use image::RgbaImage;
    use pdfium_render::prelude::*;

    use super::{DocumentDecodeError, PdfRenderer};

    pub struct PdfiumRenderer {
        pdfium: Pdfium,
    }

    fn pdf_error(e: PdfiumError) -> DocumentDecodeError {
        DocumentDecodeError::Pdf(e.to_string())
    }

    impl PdfiumRenderer {
        /// Binds to the pdfium library in `library_dir`, or to the system
        /// library when no directory is given.
        pub fn new(library_dir: Option<&Path>) -> Result<Self, DocumentDecodeError> {
            let bindings = match library_dir {
                Some(dir) => {
                    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
                }
                None => Pdfium::bind_to_system_library(),
            }
            .map_err(|e| DocumentDecodeError::Pdf(format!("cannot load pdfium: {}", e)))?;

            Ok(Self {
                pdfium: Pdfium::new(bindings),
            })
        }
    }

    impl PdfRenderer for PdfiumRenderer {
        fn page_count(&self, bytes: &[u8]) -> Result<usize, DocumentDecodeError> {
            let document = self
                .pdfium
                .load_pdf_from_byte_slice(bytes, None)
                .map_err(pdf_error)?;
            Ok(document.pages().len() as usize)
        }

        fn render_page(
            &self,
            bytes: &[u8],
            index: usize,
            scale: f32,
        ) -> Result<RgbaImage, DocumentDecodeError> {
            let document = self
                .pdfium
                .load_pdf_from_byte_slice(bytes, None)
                .map_err(pdf_error)?;
            let page_error =
                |e: PdfiumError| DocumentDecodeError::Pdf(format!("page {}: {}", index + 1, e));
            let page_index = u16::try_from(index)
                .map_err(|_| DocumentDecodeError::Pdf(format!("page {}: out of range", index + 1)))?;
            let page = document.pages().get(page_index).map_err(page_error)?;

            let config = PdfRenderConfig::new().scale_page_by_factor(scale);
            let bitmap = page.render_with_config(&config).map_err(page_error)?;
            let (width, height) = (bitmap.width() as u32, bitmap.height() as u32);
            RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes()).ok_or_else(|| {
                DocumentDecodeError::Pdf(format!("page {}: truncated bitmap", index + 1))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::image_utils::{BLACK_RGBA, WHITE_RGBA};

    /// `n` pages; page `i` is `10 * (i + 1)` pixels wide before scaling.
    struct FakePdf(usize);

    impl PdfRenderer for FakePdf {
        fn page_count(&self, _bytes: &[u8]) -> Result<usize, DocumentDecodeError> {
            Ok(self.0)
        }

        fn render_page(
            &self,
            _bytes: &[u8],
            index: usize,
            scale: f32,
        ) -> Result<RgbaImage, DocumentDecodeError> {
            assert!(index < self.0, "page {} of {}", index, self.0);
            let width = (10.0 * (index + 1) as f32 * scale) as u32;
            Ok(RgbaImage::from_pixel(width, 10, WHITE_RGBA))
        }
    }

    fn png_bytes(img: &RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("encodes png");
        bytes
    }

    #[test]
    fn image_yields_exactly_one_page() {
        let mut img = RgbaImage::from_pixel(8, 6, WHITE_RGBA);
        img.put_pixel(3, 2, BLACK_RGBA);
        let rasterizer = PageRasterizer::default();
        let bytes = png_bytes(&img);
        assert_eq!(rasterizer.page_count(&bytes, DocumentKind::Image).ok(), Some(1));

        let page = rasterizer
            .render_page(&bytes, DocumentKind::Image, 0)
            .expect("decodes");
        assert_eq!(page.page_index, 0);
        assert_eq!(page.pixels, img);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let result = PageRasterizer::default().render_page(b"not an image", DocumentKind::Image, 0);
        assert!(matches!(result, Err(DocumentDecodeError::Image(_))));
    }

    #[test]
    fn pdf_pages_render_one_at_a_time_at_fixed_scale() {
        let rasterizer = PageRasterizer::new(Box::new(ImageCrateDecoder), Some(Box::new(FakePdf(3))));
        assert_eq!(rasterizer.page_count(b"%PDF", DocumentKind::Pdf).ok(), Some(3));

        let third = rasterizer.render_page(b"%PDF", DocumentKind::Pdf, 2).expect("renders");
        assert_eq!(third.page_number(), 3);
        assert_eq!(third.width(), 60);
    }

    #[test]
    fn pdf_without_renderer_is_a_decode_error() {
        let rasterizer = PageRasterizer::default();
        assert!(matches!(
            rasterizer.page_count(b"%PDF", DocumentKind::Pdf),
            Err(DocumentDecodeError::PdfUnavailable)
        ));
        assert!(matches!(
            rasterizer.render_page(b"%PDF", DocumentKind::Pdf, 0),
            Err(DocumentDecodeError::PdfUnavailable)
        ));
    }

    #[test]
    fn empty_pdf_is_an_error() {
        let rasterizer = PageRasterizer::new(Box::new(ImageCrateDecoder), Some(Box::new(FakePdf(0))));
        let result = rasterizer.page_count(b"%PDF", DocumentKind::Pdf);
        assert!(matches!(result, Err(DocumentDecodeError::NoPages)));
    }

    #[test]
    fn document_kind_from_mime_and_extension() {
        assert_eq!(DocumentKind::from_mime("application/pdf").ok(), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_mime("IMAGE/PNG").ok(), Some(DocumentKind::Image));
        assert!(DocumentKind::from_mime("text/csv").is_err());
        assert_eq!(
            DocumentKind::mime_for_path(Path::new("scans/sheet.JPG")),
            Some("image/jpeg")
        );
        assert_eq!(DocumentKind::mime_for_path(Path::new("key.csv")), None);
    }
}
