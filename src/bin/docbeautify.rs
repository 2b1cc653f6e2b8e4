//! CLI binary for docbeautify.
//!
//! Runs the HTTP service (default), submits a document to a running server
//! and waits for the result, or checks DeepSeek connectivity.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docbeautify::{
    start_server, AppState, Beautifier, BeautifyRequest, DeepSeekClient, PollConfig,
    PollProgressCallback, PingOutcome, ServerConfig, ServiceConfig, TaskPoller, TaskReport,
    TaskStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── Spinner callback ─────────────────────────────────────────────────────────

/// Terminal spinner driven by poll events. The line is cleared when the
/// last handle is dropped, so an early `?` return leaves no stale spinner.
struct SpinnerCallback {
    bar: ProgressBar,
}

impl SpinnerCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Uploading");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PollProgressCallback for SpinnerCallback {
    fn on_submitted(&self, task_id: &str) {
        self.bar.set_prefix("Waiting");
        self.bar.set_message(format!("task {task_id}"));
    }

    fn on_poll(&self, attempt: u32, report: &TaskReport) {
        self.bar.set_prefix(report.status.to_string());
        self.bar
            .set_message(format!("{}%  {}", report.progress, dim(&format!("poll {attempt}"))));
    }

    fn on_retry(&self, attempt: u32, error: &str) {
        self.bar
            .println(format!("  {} poll {attempt}: {}", red("✗"), dim(error)));
    }

    fn on_finished(&self, status: TaskStatus, attempts: u32) {
        self.bar.finish_and_clear();
        let mark = if status == TaskStatus::Completed {
            green("✔")
        } else {
            red("✘")
        };
        eprintln!("{mark} task {} after {attempts} polls", bold(status.as_str()));
    }
}

impl Drop for SpinnerCallback {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the service on port 8080, serving the front-end from ./public
  docbeautify --port 8080 --static-dir public

  # Beautify a document through a running server
  docbeautify submit report.docx --template professional -o report.html

  # Free-text instructions instead of a template
  docbeautify submit paper.pdf --instructions "two columns, serif font"

  # Check the DeepSeek key
  docbeautify ping

ENVIRONMENT VARIABLES:
  SUPABASE_URL            Supabase project URL (tasks kept in memory when unset)
  SUPABASE_SERVICE_KEY    Supabase key (also SUPABASE_KEY)
  DEEPSEEK_API_KEY        DeepSeek key (documents are converted only when unset)
  DEEPSEEK_MODEL          Model id, default deepseek-chat
  BAIDU_API_KEY           Baidu image-process key (colorize action)
  BAIDU_SECRET_KEY        Baidu image-process secret
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Overrides --verbose / --quiet

A .env file in the working directory is loaded first.
"#;

/// Beautify Word and PDF documents with DeepSeek.
#[derive(Parser, Debug)]
#[command(
    name = "docbeautify",
    version,
    about = "Beautify Word and PDF documents with DeepSeek",
    args_conflicts_with_subcommands = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCBEAUTIFY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCBEAUTIFY_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default).
    Serve(ServeArgs),
    /// Upload a document to a running server and wait for the result.
    Submit(SubmitArgs),
    /// Check DeepSeek connectivity with the configured key.
    Ping,
}

#[derive(Args, Debug, Clone)]
struct ServeArgs {
    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Serve files from this directory for non-API paths.
    #[arg(long, env = "DOCBEAUTIFY_STATIC_DIR")]
    static_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SubmitArgs {
    /// Word (.docx) or PDF file.
    file: PathBuf,

    /// Base URL of a running docbeautify server.
    #[arg(long, env = "DOCBEAUTIFY_SERVER", default_value = "http://127.0.0.1:3000")]
    server: String,

    /// Built-in template id (professional, academic, minimal, colorful, report).
    #[arg(short, long)]
    template: Option<String>,

    /// Free-text styling instructions.
    #[arg(short, long)]
    instructions: Option<String>,

    /// Document title override.
    #[arg(long)]
    title: Option<String>,

    /// Write HTML to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Give up after this many seconds.
    #[arg(long, default_value_t = 600)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is the normal case.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // `submit` shows a spinner, so library logs stay at error level unless
    // --verbose asks for them.
    let submitting = matches!(cli.command, Some(Command::Submit(_)));
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || submitting {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        None => serve(cli.serve).await,
        Some(Command::Serve(args)) => serve(args).await,
        Some(Command::Submit(args)) => submit(args, cli.quiet).await,
        Some(Command::Ping) => ping().await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = ServiceConfig::from_env();
    let beautifier = Beautifier::new(config).context("Invalid service configuration")?;

    let mut state = AppState::new(beautifier);
    if let Some(dir) = args.static_dir {
        anyhow::ensure!(dir.is_dir(), "Static directory {} does not exist", dir.display());
        state = state.with_static_dir(dir);
    }

    let server = ServerConfig {
        host: args.host,
        port: args.port,
    };
    start_server(server, state).await.context("HTTP server failed")
}

async fn submit(args: SubmitArgs, quiet: bool) -> Result<()> {
    let request = BeautifyRequest {
        template: args.template,
        instructions: args.instructions,
        title: args.title,
    };

    let mut poller = TaskPoller::new(&args.server)
        .context("Failed to build HTTP client")?
        .with_config(PollConfig {
            timeout: Duration::from_secs(args.timeout),
            ..PollConfig::default()
        });
    if !quiet {
        poller = poller.with_callback(SpinnerCallback::new());
    }

    let task_id = poller
        .submit_file(&args.file, &request)
        .await
        .with_context(|| format!("Failed to submit {}", args.file.display()))?;
    let report = poller.wait(&task_id).await.context("Task did not complete")?;

    let result = report.result.unwrap_or_default();
    let html = result
        .get("html")
        .and_then(|h| h.as_str())
        .context("Completed task has no HTML")?;

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, html)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !quiet {
                eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(html.as_bytes())
                .context("Failed to write to stdout")?;
            if !html.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }
    }

    if !quiet {
        let tokens = |key: &str| result.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&tokens("input_tokens").to_string()),
            dim(&tokens("output_tokens").to_string()),
        );
        if let Some(url) = result.get("download_url").and_then(|v| v.as_str()) {
            eprintln!("   {}", dim(url));
        }
    }
    Ok(())
}

async fn ping() -> Result<()> {
    let config = ServiceConfig::from_env();
    let outcome = match DeepSeekClient::from_config(&config).context("Failed to build DeepSeek client")? {
        Some(client) => client.ping().await,
        None => PingOutcome::not_configured(&config.model),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("Failed to serialise ping result")?
    );
    if !outcome.success {
        anyhow::bail!(
            "DeepSeek ping failed: {}",
            outcome.error.as_deref().unwrap_or("unexpected upstream status")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_spinner_clears_the_bar() {
        let cb = Arc::new(SpinnerCallback {
            bar: ProgressBar::hidden(),
        });
        cb.on_submitted("abc");
        let bar = cb.bar.clone();
        let poller_handle: Arc<dyn PollProgressCallback> = cb.clone();
        drop(cb);
        assert!(!bar.is_finished());
        drop(poller_handle);
        assert!(bar.is_finished());
    }

    #[test]
    fn submit_args_parse() {
        let cli = Cli::try_parse_from(["docbeautify", "submit", "a.pdf", "--timeout", "5"]).unwrap();
        match cli.command {
            Some(Command::Submit(args)) => {
                assert_eq!(args.file, PathBuf::from("a.pdf"));
                assert_eq!(args.timeout, 5);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
