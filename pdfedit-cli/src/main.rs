use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use directories::ProjectDirs;
use pdfedit_core::batch;
use pdfedit_core::stamp::apply_header_footer;
use pdfedit_core::{DocumentSession, EditScript, EditorConfig, FontResolver, HeaderFooter, PageRange};
use pdfedit_render::PdfiumBackend;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "pdfedit", version, about = "Edit, merge and split PDF documents")]
struct Args {
    /// Config file to use instead of the per-user one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Concatenate documents in the given order
    Merge {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(required = true, num_args = 2..)]
        inputs: Vec<PathBuf>,
    },
    /// Write every page to its own file
    Split {
        input: PathBuf,
        /// Defaults to the input's directory
        #[arg(short, long = "out-dir")]
        out_dir: Option<PathBuf>,
    },
    /// Copy selected pages (1-based) into a new document
    Extract {
        input: PathBuf,
        #[arg(short, long, value_delimiter = ',', required = true)]
        pages: Vec<usize>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Build a one-page document from a PNG or JPEG
    FromImage {
        image: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Add headers and footers
    Stamp(StampArgs),
    /// Replay a JSON edit script onto a document and save it
    Apply {
        input: PathBuf,
        #[arg(short, long)]
        edits: PathBuf,
        /// Defaults to overwriting the input
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Rasterise one page to PNG
    Render {
        input: PathBuf,
        /// 1-based
        #[arg(short, long, default_value_t = 1)]
        page: usize,
        #[arg(short, long, default_value_t = 1.0)]
        scale: f32,
        #[arg(short, long, default_value_t = 0)]
        rotation: i32,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Debug, ClapArgs)]
struct StampArgs {
    input: PathBuf,
    /// Defaults to overwriting the input
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// JSON header/footer layout; the flags below override its slots
    #[arg(long)]
    layout: Option<PathBuf>,
    #[arg(long)]
    header_left: Option<String>,
    #[arg(long)]
    header_center: Option<String>,
    #[arg(long)]
    header_right: Option<String>,
    #[arg(long)]
    footer_left: Option<String>,
    #[arg(long)]
    footer_center: Option<String>,
    #[arg(long)]
    footer_right: Option<String>,
    #[arg(long)]
    font_size: Option<f32>,
    /// all, odd, even, 3-7 or 1,4,9
    #[arg(long)]
    range: Option<PageRange>,
}

impl StampArgs {
    fn header_footer(&self) -> Result<HeaderFooter> {
        let mut stamp = match &self.layout {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("failed to read layout {:?}", path))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("failed to parse layout {:?}", path))?
            }
            None => HeaderFooter::default(),
        };

        let slots = [
            (&mut stamp.header.left, &self.header_left),
            (&mut stamp.header.center, &self.header_center),
            (&mut stamp.header.right, &self.header_right),
            (&mut stamp.footer.left, &self.footer_left),
            (&mut stamp.footer.center, &self.footer_center),
            (&mut stamp.footer.right, &self.footer_right),
        ];
        for (slot, value) in slots {
            if let Some(value) = value {
                *slot = Some(value.clone());
            }
        }
        if let Some(size) = self.font_size {
            stamp.font_size = size;
        }
        if let Some(range) = &self.range {
            stamp.range = range.clone();
        }
        Ok(stamp)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pdfedit", "pdfedit")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;
    let config = match &args.config {
        Some(path) => EditorConfig::load(path)?,
        None => EditorConfig::load_or_default(&project_dirs)?,
    };

    let command = args.command;
    offload(move || run(command, config)).await
}

/// Runs blocking document work off the async runtime.
async fn offload<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("document worker panicked")?
}

fn run(command: Command, config: EditorConfig) -> Result<()> {
    let backend = Arc::new(PdfiumBackend::new()?);

    match command {
        Command::Merge { output, inputs } => {
            let pages = batch::merge(backend.as_ref(), &inputs, &output)?;
            println!("{}: {pages} pages", output.display());
        }
        Command::Split { input, out_dir } => {
            let out_dir = out_dir.unwrap_or_else(|| parent_dir(&input));
            for path in batch::split(backend.as_ref(), &input, &out_dir)? {
                println!("{}", path.display());
            }
        }
        Command::Extract {
            input,
            pages,
            output,
        } => {
            let indices = page_indices(&pages)?;
            let count = batch::extract(backend.as_ref(), &input, &indices, &output)?;
            println!("{}: {count} pages", output.display());
        }
        Command::FromImage { image, output } => {
            let (width, height) =
                batch::create_from_image(backend.as_ref(), &image, &output, &config.image_page)?;
            println!("{}: {width:.0}x{height:.0} pt", output.display());
        }
        Command::Stamp(stamp_args) => {
            let stamp = stamp_args.header_footer()?;
            let output = stamp_args
                .output
                .clone()
                .unwrap_or_else(|| stamp_args.input.clone());
            let fonts = FontResolver::for_config(&config.fonts);
            let stamped =
                apply_header_footer(backend.as_ref(), &fonts, &stamp_args.input, &output, &stamp)?;
            println!("{}: stamped {stamped} pages", output.display());
        }
        Command::Apply {
            input,
            edits,
            output,
        } => {
            let raw = fs::read_to_string(&edits)
                .with_context(|| format!("failed to read edit script {:?}", edits))?;
            let script = EditScript::from_json(&raw)
                .with_context(|| format!("failed to parse edit script {:?}", edits))?;

            let mut session = DocumentSession::new(backend, &config);
            session.load(&input)?;
            session.apply_script(script);
            let report = session.save(output.as_deref().unwrap_or(input.as_path()))?;
            info!(skipped = report.skipped_edits, "edit script applied");
            println!(
                "{}: {} pages, {} edits skipped",
                report.path.display(),
                report.page_count,
                report.skipped_edits
            );
        }
        Command::Render {
            input,
            page,
            scale,
            rotation,
            output,
        } => {
            let index = page_indices(&[page])?[0];
            let mut session = DocumentSession::new(backend, &config);
            let page_count = session.load(&input)?;
            if index >= page_count {
                bail!("page {page} does not exist; the document has {page_count}");
            }
            let rotation = pdfedit_core::coords::normalize_rotation(rotation);
            let image = session
                .render_page(index, scale, rotation)
                .ok_or_else(|| anyhow!("failed to render page {page}"))?;
            image
                .save(&output)
                .with_context(|| format!("failed to write {:?}", output))?;
            println!("{}: {}x{}", output.display(), image.width(), image.height());
        }
    }
    Ok(())
}

/// 1-based page numbers from the command line to 0-based indices.
fn page_indices(pages: &[usize]) -> Result<Vec<usize>> {
    pages
        .iter()
        .map(|&page| {
            page.checked_sub(1)
                .ok_or_else(|| anyhow!("page numbers start at 1"))
        })
        .collect()
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pdfedit.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // Console output goes to stderr so stdout stays machine-readable.
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;
    use tempfile::tempdir;

    #[test]
    fn command_line_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn extract_takes_comma_separated_pages() {
        let args =
            Args::try_parse_from(["pdfedit", "extract", "in.pdf", "-p", "3,1", "-o", "out.pdf"])
                .unwrap();
        match args.command {
            Command::Extract { pages, .. } => {
                assert_eq!(page_indices(&pages).unwrap(), [2, 0]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn page_zero_is_rejected() {
        assert!(page_indices(&[1, 0]).is_err());
    }

    #[test]
    fn merge_needs_two_inputs() {
        assert!(Args::try_parse_from(["pdfedit", "merge", "-o", "m.pdf", "a.pdf"]).is_err());
    }

    #[test]
    fn stamp_flags_override_layout() {
        let dir = tempdir().unwrap();
        let layout = dir.path().join("layout.json");
        fs::write(
            &layout,
            r#"{"header": {"left": "Report", "right": "{date}"}, "font_size": 8}"#,
        )
        .unwrap();

        let args = Args::try_parse_from([
            "pdfedit",
            "stamp",
            "in.pdf",
            "--layout",
            layout.to_str().unwrap(),
            "--header-right",
            "{filename}",
            "--footer-center",
            "{page} / {total}",
            "--range",
            "2-4",
        ])
        .unwrap();
        let Command::Stamp(stamp_args) = args.command else {
            panic!("expected stamp");
        };
        let stamp = stamp_args.header_footer().unwrap();

        assert_eq!(stamp.header.left.as_deref(), Some("Report"));
        assert_eq!(stamp.header.right.as_deref(), Some("{filename}"));
        assert_eq!(stamp.footer.center.as_deref(), Some("{page} / {total}"));
        assert_eq!(stamp.font_size, 8.0);
        assert_eq!(stamp.range, PageRange::Span { first: 2, last: 4 });
    }

    #[test]
    fn split_defaults_next_to_input() {
        assert_eq!(parent_dir(Path::new("a/b.pdf")), PathBuf::from("a"));
        assert_eq!(parent_dir(Path::new("b.pdf")), PathBuf::from("."));
    }

    #[tokio::test]
    async fn offloaded_errors_reach_the_caller() {
        let ok = offload(|| Ok(2 + 2)).await.unwrap();
        assert_eq!(ok, 4);

        let err = offload(|| -> Result<()> { bail!("boom") }).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
