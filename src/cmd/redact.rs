//! The `redact` subcommand.

use std::sync::{Arc, Mutex};

use clap::Args;
use schemars::JsonSchema;

use crate::{
    async_utils::io::write_json_pretty,
    bridge::{OcrBridge, transport::ProcessTransport},
    config::RedactConfig,
    enrich::{EnrichmentCoordinator, EnrichmentSummary, http::HttpEntityClassifier},
    imaging::SourceImage,
    model::{ContainerSize, OcrResult, ProjectedRect},
    pipeline::{RedactionPipeline, RunOutcome, SharedSession, lock},
    prelude::*,
    session::{RedactionSession, SessionState},
    ui::{ProgressConfig, Ui},
};

/// Redact command line arguments.
#[derive(Debug, Args)]
pub struct RedactOpts {
    /// The image to redact.
    pub image_path: PathBuf,

    /// Where to write the redacted PNG. Defaults to `<stem>.redacted.png`
    /// next to the input.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    /// Where to write the JSON report. Defaults to standard output.
    #[clap(long = "report")]
    pub report_path: Option<PathBuf>,

    /// Display area to compute overlay rectangles for, as `WIDTHxHEIGHT`.
    /// Defaults to the image's natural size.
    #[clap(long, value_name = "WxH")]
    pub container: Option<ContainerSize>,

    /// Configuration file (TOML, or JSON with a `.json` extension).
    #[clap(long = "config")]
    pub config_path: Option<PathBuf>,

    /// Report on the original image, and don't export a redacted copy.
    #[clap(long)]
    pub show_original: bool,
}

/// What we found in one image.
#[derive(Debug, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionReport {
    /// The image's file name.
    pub image: String,

    /// Final session state. Always `ready` for a report we write.
    pub state: SessionState,

    /// Recognized words and their entities.
    pub result: OcrResult,

    /// Indices into `result.words` of words we consider sensitive.
    pub sensitive_words: Vec<usize>,

    /// The display area `overlays` were computed for.
    pub container: ContainerSize,

    /// Where to draw black boxes in `container`. Empty when showing the
    /// original.
    pub overlays: Vec<ProjectedRect>,

    /// Whether the original image is being shown.
    pub show_original: bool,

    /// Where we wrote the redacted image, if we did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redacted_path: Option<PathBuf>,

    /// How the classifier calls went.
    pub summary: EnrichmentSummary,
}

/// The `redact` subcommand.
#[instrument(level = "debug", skip_all, fields(image = %opts.image_path.display()))]
pub async fn cmd_redact(ui: Ui, opts: &RedactOpts) -> Result<()> {
    let config = RedactConfig::load(opts.config_path.as_deref()).await?;
    let image = SourceImage::load(&opts.image_path).await?;
    let container = opts
        .container
        .unwrap_or_else(|| ContainerSize::from(image.dimensions));

    // Start the OCR worker.
    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "🔌",
        msg: "Starting OCR worker",
        done_msg: "Started OCR worker",
    });
    let transport = spawn_worker(&config)?;
    let bridge = OcrBridge::connect(Box::new(transport), config.bridge.timeouts()).await?;
    spinner.finish_using_style();

    let classifier =
        HttpEntityClassifier::new(&config.classifier.url, Some(config.classifier.timeout()))?;
    let coordinator =
        EnrichmentCoordinator::new(Arc::new(classifier), Some(config.classifier.timeout()));
    let pipeline = RedactionPipeline::new(bridge, coordinator);

    let session: SharedSession = Arc::new(Mutex::new(RedactionSession::new(
        config.policy.clone(),
        config.overlay.padding,
    )));
    lock(&session).select_image(image);

    // Recognize and classify.
    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "🔍",
        msg: "Looking for sensitive text",
        done_msg: "Looked for sensitive text",
    });
    let summary = match pipeline.run(&session).await {
        Ok(RunOutcome::Ready(summary)) => summary,
        // Nobody else touches our session, so this would be a bug.
        Ok(RunOutcome::Superseded) => return Err(anyhow!("recognition run was superseded")),
        Err(err) => {
            spinner.finish_and_clear();
            let session = lock(&session);
            error!(
                state = %session.state(),
                "Could not redact {}: {}",
                opts.image_path.display(),
                session.last_error().unwrap_or("unknown error"),
            );
            return Err(err.into());
        }
    };
    spinner.finish_using_style();

    if opts.show_original {
        lock(&session).toggle_visibility()?;
    }

    // Export, unless we're showing the original.
    let mut redacted_path = None;
    if !opts.show_original {
        let snapshot = lock(&session).export_snapshot()?;
        let path = match &opts.output_path {
            Some(path) => path.clone(),
            None => default_output_path(&opts.image_path),
        };
        snapshot.write_png(&path).await?;
        ui.display_message(
            "🖤",
            &format!(
                "Blacked out {} region(s), wrote {}",
                snapshot.rects.len(),
                path.display()
            ),
        );
        redacted_path = Some(path);
    }

    let report = {
        let session = lock(&session);
        let result = session
            .result()
            .ok_or_else(|| anyhow!("session has no result after a successful run"))?;
        RedactionReport {
            image: session
                .image()
                .map(|image| image.name.clone())
                .unwrap_or_default(),
            state: session.state(),
            result: OcrResult::clone(result),
            sensitive_words: session.sensitive_words().map(|(idx, _)| idx).collect(),
            container,
            overlays: session.overlay_rects(container),
            show_original: session.show_original(),
            redacted_path,
            summary,
        }
    };
    write_json_pretty(opts.report_path.as_deref(), &report).await
}

/// Start the configured worker, or our own `worker` subcommand.
fn spawn_worker(config: &RedactConfig) -> Result<ProcessTransport> {
    match config.bridge.worker_command.split_first() {
        Some((program, args)) => ProcessTransport::spawn(Path::new(program), args),
        None => {
            let exe = std::env::current_exe()
                .context("cannot find our own executable to run the OCR worker")?;
            ProcessTransport::spawn(&exe, &["worker".to_owned()])
        }
    }
}

/// `photos/IMG_1.jpg` becomes `photos/IMG_1.redacted.png`.
fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_owned());
    input.with_file_name(format!("{stem}.redacted.png"))
}
