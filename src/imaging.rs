//! Reading source images and exporting redacted composites.
//!
//! Beyond width and height, we treat images as opaque bytes. The only time
//! we decode pixels is when painting the final composite.

use std::{fmt, io::Cursor, sync::Arc};

use image::{ImageFormat, ImageReader, Rgba, RgbaImage};

use crate::{
    errors::RedactError,
    model::{ImageDimensions, ProjectedRect},
    prelude::*,
};

/// The color we paint over sensitive words.
const REDACTION_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// An encoded image plus its natural size.
#[derive(Clone)]
pub struct SourceImage {
    /// A name for logs, usually the file name.
    pub name: String,

    /// The encoded image, in whatever format it came in.
    pub bytes: Arc<[u8]>,

    /// Natural pixel size.
    pub dimensions: ImageDimensions,
}

impl fmt::Debug for SourceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceImage")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl SourceImage {
    /// Wrap encoded image bytes, reading just enough to learn the size.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, RedactError> {
        let name = name.into();
        let (width, height) = ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|err| RedactError::ImageReadFailed(format!("{name}: {err}")))?
            .into_dimensions()
            .map_err(|err| RedactError::ImageReadFailed(format!("{name}: {err}")))?;
        Ok(Self {
            name,
            bytes: Arc::from(bytes),
            dimensions: ImageDimensions::new(width, height),
        })
    }

    /// Load an image from disk.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self, RedactError> {
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            RedactError::ImageReadFailed(format!("{}: {}", path.display(), err))
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_bytes(name, bytes)
    }
}

/// Everything needed to render a redacted composite, captured from a
/// `Ready` session.
#[derive(Clone, Debug)]
pub struct ExportSnapshot {
    pub image: Arc<SourceImage>,

    /// Rectangles to paint, in image pixel coordinates.
    pub rects: Vec<ProjectedRect>,
}

impl ExportSnapshot {
    /// Decode the image and paint over every rectangle.
    pub fn render(&self) -> Result<RgbaImage, RedactError> {
        let decoded = ImageReader::new(Cursor::new(&self.image.bytes[..]))
            .with_guessed_format()
            .map_err(|err| RedactError::ExportFailed(err.to_string()))?
            .decode()
            .map_err(|err| RedactError::ExportFailed(err.to_string()))?;
        let mut canvas = decoded.to_rgba8();
        for rect in &self.rects {
            fill_rect(&mut canvas, rect);
        }
        Ok(canvas)
    }

    /// Render the composite and write it to `path` as a PNG.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn write_png(&self, path: &Path) -> Result<(), RedactError> {
        // Decoding and encoding are CPU-bound, so keep them off the executor.
        let snapshot = self.clone();
        let png = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, RedactError> {
            let canvas = snapshot.render()?;
            let mut png = Cursor::new(vec![]);
            canvas
                .write_to(&mut png, ImageFormat::Png)
                .map_err(|err| RedactError::ExportFailed(err.to_string()))?;
            Ok(png.into_inner())
        })
        .await
        .map_err(|err| RedactError::ExportFailed(err.to_string()))??;

        tokio::fs::write(path, png).await.map_err(|err| {
            RedactError::ExportFailed(format!("{}: {}", path.display(), err))
        })?;
        info!(rects = self.rects.len(), "Wrote redacted image");
        Ok(())
    }
}

/// Paint `rect`, clipped to the canvas.
fn fill_rect(canvas: &mut RgbaImage, rect: &ProjectedRect) {
    let clip = |v: f64, max: u32| v.clamp(0.0, f64::from(max)) as u32;
    let x0 = clip(rect.left.floor(), canvas.width());
    let y0 = clip(rect.top.floor(), canvas.height());
    let x1 = clip((rect.left + rect.width).ceil(), canvas.width());
    let y1 = clip((rect.top + rect.height).ceil(), canvas.height());
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, REDACTION_COLOR);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A white PNG of the given size.
    pub(crate) fn white_png(width: u32, height: u32) -> Vec<u8> {
        let mut png = Cursor::new(vec![]);
        RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();
        png.into_inner()
    }

    #[test]
    fn reads_dimensions() {
        let image = SourceImage::from_bytes("white.png", white_png(40, 20)).unwrap();
        assert_eq!(image.dimensions, ImageDimensions::new(40, 20));
    }

    #[test]
    fn rejects_garbage() {
        let err = SourceImage::from_bytes("junk", b"junk".to_vec()).unwrap_err();
        assert!(matches!(err, RedactError::ImageReadFailed(_)));
    }

    #[tokio::test]
    async fn missing_file_is_an_image_read_error() {
        let err = SourceImage::load(Path::new("/nonexistent/photo.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, RedactError::ImageReadFailed(_)));
    }

    #[test]
    fn paints_clipped_rectangles() {
        let image = SourceImage::from_bytes("white.png", white_png(10, 10)).unwrap();
        let snapshot = ExportSnapshot {
            image: Arc::new(image),
            rects: vec![ProjectedRect {
                left: -2.0,
                top: 6.5,
                width: 5.0,
                height: 100.0,
            }],
        };
        let canvas = snapshot.render().unwrap();
        assert_eq!(*canvas.get_pixel(0, 6), REDACTION_COLOR);
        assert_eq!(*canvas.get_pixel(2, 9), REDACTION_COLOR);
        assert_eq!(*canvas.get_pixel(3, 9), Rgba([255, 255, 255, 255]));
        assert_eq!(*canvas.get_pixel(0, 5), Rgba([255, 255, 255, 255]));
    }

    #[tokio::test]
    async fn undecodable_image_is_an_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = ExportSnapshot {
            image: Arc::new(SourceImage {
                name: "truncated.png".to_owned(),
                bytes: Arc::from(&white_png(8, 8)[..40]),
                dimensions: ImageDimensions::new(8, 8),
            }),
            rects: vec![],
        };
        assert!(matches!(snapshot.render(), Err(RedactError::ExportFailed(_))));
        let err = snapshot
            .write_png(&dir.path().join("out.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, RedactError::ExportFailed(_)));
    }

    #[tokio::test]
    async fn writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let image = SourceImage::from_bytes("white.png", white_png(8, 8)).unwrap();
        let snapshot = ExportSnapshot {
            image: Arc::new(image),
            rects: vec![],
        };
        snapshot.write_png(&path).await.unwrap();
        let written = SourceImage::load(&path).await.unwrap();
        assert_eq!(written.dimensions, ImageDimensions::new(8, 8));
    }
}
