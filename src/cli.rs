//! Command line front-end.
//!
//! ```shell
//! $ restbench run flow.json -c 10 -n 1000
//! $ restbench serve --listen 127.0.0.1:3100
//! ```
//!
//! The flow file holds `{ "runOptions": { ... }, "flow": { ... } }` or a bare
//! flow; flags override the options found in the file.
use std::{
    fs::File,
    io::{Read, stdin, stdout},
    num::NonZeroU64,
    path::PathBuf,
    time::Duration,
};

use anyhow::Context;
use clap::{
    Args, Parser, Subcommand, ValueEnum,
    builder::{
        Styles,
        styling::{AnsiColor, Effects},
    },
};
use serde_json::Value;

use crate::{
    collector::{LogCollector, ReportCollector, SilentCollector},
    opts::{BenchRequest, RunOptions},
    reporter::{BenchReporter, JsonReporter, TextReporter},
    runner::Benchmark,
};

/// Number of iterations running at once when neither the file nor the flags say.
const DEFAULT_LIMIT: u64 = 10;

/// Number of iterations when neither the file nor the flags say.
const DEFAULT_ITERATIONS: u64 = 100;

#[derive(Parser, Debug)]
#[command(
    name = "restbench",
    version,
    about,
    styles(Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default())
    )
)]
#[allow(missing_docs)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the benchmark described by a flow file
    Run(RunCli),

    /// Serve benchmarks over HTTP
    #[cfg(feature = "server")]
    Serve(ServeCli),
}

#[derive(Args, Clone, Debug)]
#[allow(missing_docs)]
pub struct RunCli {
    /// JSON file with the flow, optionally wrapped with runOptions
    ///
    /// Use `-` to read from stdin.
    pub file: PathBuf,

    /// Maximum number of iterations running at once [default: 10]
    #[arg(long, short = 'c')]
    pub limit: Option<NonZeroU64>,

    /// Number of iterations [default: 100]
    #[arg(long, short = 'n')]
    pub iterations: Option<NonZeroU64>,

    /// Number of iterations queued ahead of admission
    ///
    /// Defaults to the lesser of 100000 and the number of iterations.
    #[arg(long)]
    pub prealloc: Option<NonZeroU64>,

    /// Interval of progress reports
    ///
    /// Progress is logged only when set. Examples: --progress 1s, --progress 500ms
    #[arg(long)]
    pub progress: Option<humantime::Duration>,

    /// Request timeout, `0s` waits forever [default: 60s]
    #[arg(long)]
    pub timeout: Option<humantime::Duration>,

    /// Basic authentication user
    #[arg(long, short = 'u', env = "RESTBENCH_USER")]
    pub user: Option<String>,

    /// Basic authentication password
    #[arg(long, short = 'p', env = "RESTBENCH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Run quietly, without progress or error logs
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Output format for the report
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text, ignore_case = true)]
    pub output: ReportFormat,

    /// Output file path for the report
    ///
    /// When set, the report will be written to the specified file instead of stdout.
    #[arg(long, short = 'O')]
    pub output_file: Option<PathBuf>,
}

/// Benchmark report format.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ReportFormat {
    /// Report in plain text format. See [`TextReporter`].
    Text,

    /// Report in JSON format. See [`JsonReporter`].
    Json,
}

impl RunCli {
    /// Applies the flags on top of the options read from the file.
    pub fn run_options(&self, mut options: RunOptions) -> RunOptions {
        let millis = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);

        options.limit = self.limit.map(NonZeroU64::get).or(options.limit).or(Some(DEFAULT_LIMIT));
        options.iterations = self.iterations.map(NonZeroU64::get).or(options.iterations).or(Some(DEFAULT_ITERATIONS));
        options.prealloc = self.prealloc.map(NonZeroU64::get).or(options.prealloc);
        options.progress = self.progress.map(|d| millis(d.into())).or(options.progress);
        options.timeout = self.timeout.map(|d| millis(d.into())).or(options.timeout);
        if self.user.is_some() {
            options.user = self.user.clone();
            options.password = self.password.clone();
        }
        options
    }

    fn read_request(&self) -> anyhow::Result<BenchRequest> {
        let mut text = String::new();
        if self.file.as_os_str() == "-" {
            stdin().read_to_string(&mut text).context("failed to read flow from stdin")?;
        } else {
            File::open(&self.file)
                .and_then(|mut f| f.read_to_string(&mut text))
                .with_context(|| format!("failed to read {}", self.file.display()))?;
        }
        let doc: Value = serde_json::from_str(&text).with_context(|| format!("{} is not JSON", self.file.display()))?;
        Ok(BenchRequest::from_json(doc)?)
    }
}

/// Options of the HTTP front-end.
#[cfg(feature = "server")]
#[derive(Args, Clone, Debug)]
pub struct ServeCli {
    /// Address to listen on
    #[arg(long, short = 'l', default_value = "0.0.0.0:3100")]
    pub listen: std::net::SocketAddr,

    /// Port to listen on, overriding the port of --listen
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
}

#[cfg(feature = "server")]
impl ServeCli {
    /// The address to bind.
    pub fn addr(&self) -> std::net::SocketAddr {
        let mut addr = self.listen;
        if let Some(port) = self.port {
            addr.set_port(port);
        }
        addr
    }
}

/// Runs the parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(run) => run_bench(run).await,
        #[cfg(feature = "server")]
        Command::Serve(serve) => crate::server::serve(serve.addr()).await,
    }
}

async fn run_bench(cli: RunCli) -> anyhow::Result<()> {
    let request = cli.read_request()?;
    let options = cli.run_options(request.run_options);
    let bench = Benchmark::new(&request.flow, &options)?;
    let opts = bench.opts().clone();
    tracing::info!(limit = opts.limit.get(), iterations = opts.iterations.get(), "starting benchmark");

    let handle = bench.start();
    let mut collector: Box<dyn ReportCollector> = if cli.quiet {
        Box::new(SilentCollector::new(&opts, handle.events, handle.cancel).cancel_on_ctrl_c())
    } else {
        Box::new(LogCollector::new(&opts, handle.events, handle.cancel))
    };
    let report = collector.run().await?;
    handle.join.await?;

    let reporter: &dyn BenchReporter = match cli.output {
        ReportFormat::Text => &TextReporter,
        ReportFormat::Json => &JsonReporter,
    };
    match cli.output_file {
        Some(path) => reporter.print(&mut File::create(path)?, &report)?,
        None => reporter.print(&mut stdout(), &report)?,
    }

    if report.total_failure {
        anyhow::bail!("every iteration failed: {}", report.last_error.as_deref().unwrap_or("unknown error"));
    }
    Ok(())
}
