use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use scriptgrade::models::AssignmentSpec;
use scriptgrade::pipeline::assessment::pdf_renderer::PdfiumRenderer;
use scriptgrade::pipeline::assessment::{
    AssessmentOutcome, Assessor, CancellationToken, HttpOcrProvider, OcrProvider, PageLoader,
    PageSource, ReplayOcrProvider,
};
use scriptgrade::pipeline_config::AssessmentConfig;

#[derive(Parser, Debug)]
#[command(
    name = "scriptgrade",
    version,
    about = "Grade a handwriting submission against an assignment"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assess page images or PDFs and print the JSON report
    Assess(AssessArgs),
}

#[derive(Args, Debug)]
struct AssessArgs {
    /// Assignment specification (JSON)
    #[arg(short = 's', long = "spec")]
    spec: PathBuf,

    /// Replay recorded OCR responses (JSON array, one entry per page)
    #[arg(long = "ocr-replay", conflicts_with = "ocr_url")]
    ocr_replay: Option<PathBuf>,

    /// OCR service endpoint (overrides the config file)
    #[arg(long = "ocr-url")]
    ocr_url: Option<String>,

    /// Assessment config (JSON, partial allowed)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Never stretch low-contrast pages
    #[arg(long = "no-auto-correct")]
    no_auto_correct: bool,

    /// Page files in submission order (PNG, JPEG, TIFF or PDF)
    #[arg(required = true)]
    pages: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    scriptgrade::init_tracing();

    match cli.command {
        Command::Assess(args) => assess(args),
    }
}

fn assess(args: AssessArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => AssessmentConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AssessmentConfig::default(),
    };
    if args.no_auto_correct {
        config.preprocess.auto_correct = false;
    }
    if let Some(url) = &args.ocr_url {
        config.ocr.endpoint = url.clone();
    }

    let spec = AssignmentSpec::from_file(&args.spec)
        .with_context(|| format!("loading assignment {}", args.spec.display()))?;

    let sources = args
        .pages
        .iter()
        .map(|path| {
            PageSource::from_path(path).with_context(|| format!("reading {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let ocr: Box<dyn OcrProvider> = match &args.ocr_replay {
        Some(path) => Box::new(
            ReplayOcrProvider::from_file(path)
                .with_context(|| format!("loading OCR replay {}", path.display()))?,
        ),
        None => Box::new(HttpOcrProvider::from_config(&config.ocr)?),
    };

    let mut loader = PageLoader::new().with_render_dpi(config.render_dpi);
    if sources.iter().any(|s| matches!(s, PageSource::Pdf(_))) {
        loader = loader.with_pdf_renderer(Box::new(PdfiumRenderer::new()?));
    }

    let assessor = Assessor::new(ocr, config).with_page_loader(loader);
    let outcome = assessor.run(&sources, &spec, &CancellationToken::new(), None)?;

    match outcome {
        AssessmentOutcome::Completed(report) => {
            println!("{}", report.to_json_pretty()?);
            Ok(())
        }
        AssessmentOutcome::Cancelled { stage } => {
            eprintln!("assessment cancelled before {stage}");
            std::process::exit(2);
        }
    }
}
