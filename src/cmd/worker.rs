//! The `worker` subcommand.

use std::sync::Arc;

use clap::{Args, ValueEnum};

use crate::{
    bridge::{
        tesseract::TesseractOcrEngine,
        transport::stdio_transport,
        worker::{OcrEngine, serve},
    },
    prelude::*,
};

/// OCR engines we can run.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum EngineName {
    /// The `tesseract` CLI tool.
    #[default]
    Tesseract,
}

/// Worker command line arguments.
#[derive(Debug, Args)]
pub struct WorkerOpts {
    /// The OCR engine to use.
    #[clap(long, value_enum, default_value_t = EngineName::Tesseract)]
    pub engine: EngineName,

    /// OCR languages, in the engine's own notation.
    #[clap(long, default_value = "eng")]
    pub lang: String,
}

/// The `worker` subcommand. Answers OCR requests on stdin and stdout until
/// the host closes stdin.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_worker(opts: &WorkerOpts) -> Result<()> {
    let engine: Arc<dyn OcrEngine> = match opts.engine {
        EngineName::Tesseract => Arc::new(TesseractOcrEngine::new(&opts.lang)),
    };
    serve(stdio_transport(), engine).await
}
