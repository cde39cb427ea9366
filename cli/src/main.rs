use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{ArgAction, Parser};
use miette::{Context as _, Diagnostic, GraphicalReportHandler, IntoDiagnostic as _, Result};
use nbopen_resolver::{GitHubForge, MaterializedNotebook, Materializer, Resolver};
use tokio::signal;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, prelude::*};

mod launch;

use launch::LaunchOutcome;

#[derive(Parser)]
#[command(name = "nbopen")]
#[command(version)]
#[command(about = "Fetch a notebook from a reference and open it in Jupyter")]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv, -vvvv).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Notebook reference: `owner/repo[@ref][#path]`, a repository blob URL,
    /// a gist URL, or a raw file URL.
    #[arg(value_name = "REFERENCE")]
    reference: String,

    /// Save the notebook here instead of a scoped temporary directory.
    #[arg(long = "output-dir", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Download only: print the notebook path without starting Jupyter.
    /// Without `--output-dir` the notebook lands in the current directory.
    #[arg(long = "no-launch")]
    no_launch: bool,

    /// Extra arguments passed through to `jupyter notebook`.
    #[arg(value_name = "JUPYTER_ARGS", last = true)]
    jupyter_args: Vec<String>,
}

enum Outcome {
    Done,
    Interrupted,
}

#[tokio::main]
async fn main() -> ExitCode {
    miette::set_panic_hook();
    let cli = Cli::parse();

    if let Err(report) = init_tracing(cli.verbose) {
        render_report(&report);
        return ExitCode::from(1);
    }

    match run(cli).await {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::Interrupted) => ExitCode::from(130),
        Err(report) => {
            render_report(&report);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<Outcome> {
    // An interrupt during resolution or download must still unwind through
    // here so the scoped temporary directory is dropped.
    let notebook = tokio::select! {
        notebook = prepare(&cli) => notebook?,
        res = signal::ctrl_c() => {
            res.into_diagnostic().wrap_err("failed to listen for interrupt")?;
            return Ok(Outcome::Interrupted);
        }
    };

    if cli.no_launch {
        println!("{}", notebook.path().display());
        return Ok(Outcome::Done);
    }

    let outcome = launch::jupyter_notebook(notebook.path(), &cli.jupyter_args).await;
    // `notebook` is dropped after Jupyter winds down, removing the
    // temporary directory on every exit path
    match outcome? {
        LaunchOutcome::Exited(status) if status.success() => Ok(Outcome::Done),
        LaunchOutcome::Exited(status) => Err(miette::miette!("jupyter exited with {status}")),
        LaunchOutcome::Interrupted => Ok(Outcome::Interrupted),
    }
}

async fn prepare(cli: &Cli) -> Result<MaterializedNotebook> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("nbopen/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(30))
        .build()
        .into_diagnostic()
        .wrap_err("failed to construct HTTP client")?;

    let resolver = Resolver::new(GitHubForge::new(client.clone()));
    let descriptor = resolver.resolve(&cli.reference).await?;

    let materializer = Materializer::new(client);
    let notebook = match output_dir(cli) {
        Some(dir) => materializer.materialize_into(&descriptor, &dir).await?,
        None => materializer.materialize(&descriptor).await?,
    };
    Ok(notebook)
}

fn output_dir(cli: &Cli) -> Option<PathBuf> {
    match (&cli.output_dir, cli.no_launch) {
        (Some(dir), _) => Some(dir.clone()),
        // a temporary notebook would vanish before anyone could use it
        (None, true) => Some(PathBuf::from(".")),
        (None, false) => None,
    }
}

fn init_tracing(verbose: u8) -> Result<()> {
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::try_from_default_env().into_diagnostic()?
    } else {
        let level = match verbose {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        };
        EnvFilter::new(format!(
            "error,nbopen={level},nbopen_resolver={level},nbopen_notebook={level}"
        ))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_fmt::layer())
        .with(ErrorLayer::default())
        .init();

    Ok(())
}

fn render_report(report: &miette::Report) {
    let diagnostic: &dyn Diagnostic = &**report;
    let handler = GraphicalReportHandler::new();
    let mut out = String::new();
    if handler.render_report(&mut out, diagnostic).is_ok() {
        eprint!("{out}");
    } else {
        eprintln!("{report}");
    }
}
