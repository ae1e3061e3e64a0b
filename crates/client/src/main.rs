use clap::{ArgAction, Parser, ValueEnum};
use rill_client::{Engine, OutputSpec};
use rill_common::{EngineConfig, RillError, TaskContext};
use rill_planner::describe::SchemaDetail;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

#[derive(Debug, Parser)]
#[command(name = "rill", about = "Streaming SQL over files and generators")]
struct Cli {
    /// SQL query to run.
    query: String,

    /// Print the output schema instead of executing.
    #[arg(long)]
    describe: bool,

    /// Render the physical plan as a DAG image (requires `dot` on PATH).
    /// 1 omits schemas, 2 and above include them.
    #[arg(long)]
    explain: Option<u8>,

    /// Enable plan rewrites.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    optimize: bool,

    #[arg(long, value_enum, default_value_t = OutputKind::LiveTable)]
    output: OutputKind,

    /// YAML configuration file. Defaults to `rill.yml` when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Profiling mode. Accepted for compatibility; backends are not wired
    /// into this build.
    #[arg(long, default_value = "")]
    profile: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
enum OutputKind {
    LiveTable,
    BatchTable,
    Csv,
    Json,
    StreamNative,
}

impl From<OutputKind> for OutputSpec {
    fn from(kind: OutputKind) -> Self {
        match kind {
            OutputKind::LiveTable => OutputSpec::LiveTable,
            OutputKind::BatchTable => OutputSpec::BatchTable,
            OutputKind::Csv => OutputSpec::Csv,
            OutputKind::Json => OutputSpec::Json,
            OutputKind::StreamNative => OutputSpec::StreamNative,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("rill: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> rill_common::Result<()> {
    if !cli.profile.is_empty() {
        return Err(RillError::Unsupported(format!(
            "profiling mode {} is not available in this build",
            cli.profile
        )));
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::from_yaml_file(path)?,
        None if std::path::Path::new("rill.yml").is_file() => {
            EngineConfig::from_yaml_file("rill.yml")?
        }
        None => EngineConfig::default(),
    };

    let engine = Engine::new(config);
    let prepared = engine.prepare(&cli.query, cli.optimize, cli.output.into())?;

    if cli.describe {
        println!("{}", prepared.schema());
        return Ok(());
    }

    if let Some(level) = cli.explain {
        let detail = if level >= 2 {
            SchemaDetail::Include
        } else {
            SchemaDetail::Omit
        };
        let dot = prepared.describe(detail).to_dot();
        return render_dot(&dot, "rill-plan.png");
    }

    let ctx = TaskContext::default();
    let mut stdout = std::io::stdout().lock();
    engine.execute(&prepared, &ctx, &mut stdout)
}

/// Feed a dot document to the external `dot` renderer.
fn render_dot(dot: &str, target: &str) -> rill_common::Result<()> {
    let mut child = Command::new("dot")
        .args(["-Tpng", "-o", target])
        .stdin(Stdio::piped())
        .spawn()
        .map_err(|e| {
            RillError::Unsupported(format!(
                "--explain requires the graphviz `dot` renderer on PATH: {e}"
            ))
        })?;
    child
        .stdin
        .as_mut()
        .expect("stdin piped")
        .write_all(dot.as_bytes())?;
    let status = child.wait()?;
    if !status.success() {
        return Err(RillError::Runtime(format!(
            "dot exited with status {status}"
        )));
    }
    println!("wrote {target}");
    Ok(())
}
