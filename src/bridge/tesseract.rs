//! OCR engine wrapping the `tesseract` CLI tool.

use std::io::Cursor;

use image::ImageReader;
use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure,
    model::{BoundingBox, ImageDimensions, OcrWord},
    prelude::*,
};

use super::{protocol::OcrResponse, worker::OcrEngine};

/// Tesseract's TSV level for individual words.
const WORD_LEVEL: u32 = 5;

/// OCR engine wrapping the `tesseract` CLI tool.
#[derive(Clone, Debug)]
pub struct TesseractOcrEngine {
    /// Languages to pass to `-l`, like `eng` or `eng+deu`.
    lang: String,
}

impl TesseractOcrEngine {
    /// Create a new `tesseract` engine.
    pub fn new(lang: impl Into<String>) -> Self {
        Self { lang: lang.into() }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all, fields(bytes = image.len()))]
    async fn recognize(&self, image: &[u8]) -> Result<OcrResponse> {
        let reader = ImageReader::new(Cursor::new(image))
            .with_guessed_format()
            .context("cannot inspect image")?;
        let format = reader
            .format()
            .ok_or_else(|| anyhow!("unrecognized image format"))?;
        let (width, height) = reader
            .into_dimensions()
            .context("cannot read image dimensions")?;
        let extension = format
            .extensions_str()
            .first()
            .ok_or_else(|| anyhow!("cannot determine extension for {:?}", format))?;

        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join(format!("input.{}", extension));
        tokio::fs::write(&input_path, image)
            .await
            .context("cannot write tesseract input file")?;

        // Run tesseract, asking for word boxes as TSV on stdout.
        let output = Command::new("tesseract")
            .arg(&input_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.lang)
            .arg("tsv")
            .output()
            .await
            .context("cannot run tesseract")?;
        check_for_command_failure("tesseract", &output)?;

        let (text, boxes) = parse_tsv(&output.stdout)?;
        Ok(OcrResponse {
            text,
            boxes,
            image_size: ImageDimensions::new(width, height),
        })
    }
}

/// One row of `tesseract ... tsv` output.
#[derive(Debug, Deserialize)]
struct TsvRow {
    level: u32,
    page_num: u32,
    block_num: u32,
    par_num: u32,
    line_num: u32,
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    conf: f64,
    #[serde(default)]
    text: Option<String>,
}

/// Turn Tesseract TSV into the full text and one box per word.
///
/// Words on the same line are joined with spaces, and lines with newlines.
fn parse_tsv(tsv: &[u8]) -> Result<(String, Vec<OcrWord>)> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .from_reader(tsv);

    let mut text = String::new();
    let mut words = vec![];
    let mut current_line = None;
    for row in rdr.deserialize::<TsvRow>() {
        let row = row.context("cannot parse tesseract TSV output")?;
        if row.level != WORD_LEVEL {
            continue;
        }
        let Some(word) = row.text.as_deref().map(str::trim).filter(|w| !w.is_empty())
        else {
            continue;
        };

        let line = (row.page_num, row.block_num, row.par_num, row.line_num);
        match current_line {
            Some(prev) if prev == line => text.push(' '),
            Some(_) => text.push('\n'),
            None => {}
        }
        current_line = Some(line);
        text.push_str(word);

        words.push(OcrWord {
            text: word.to_owned(),
            bbox: BoundingBox::new(
                row.left,
                row.top,
                row.left + row.width,
                row.top + row.height,
            ),
            confidence: (row.conf >= 0.0).then(|| row.conf.min(100.0)),
        });
    }
    Ok((text.trim().to_owned(), words))
}
