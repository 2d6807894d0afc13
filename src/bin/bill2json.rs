//! CLI binary for edgequake-bill2json.
//!
//! A thin shim over the library crate: `serve` runs the HTTP API,
//! `extract` runs one bill through the pipeline and prints the envelope,
//! `probe` smoke-tests a running deployment.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_bill2json::pipeline::fetch::is_url;
use edgequake_bill2json::server::{start_server, AppState, HealthResponse};
use edgequake_bill2json::{
    read_local, AmountPolicy, DocumentRequest, ExtractionConfig, ExtractionService,
    ResponseEnvelope,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
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

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP API on 0.0.0.0:8000
  bill2json serve

  # Extract a bill from a URL or a local scan
  bill2json extract https://example.com/bills/discharge.png
  bill2json extract ./scans/pharmacy.jpg --flag-duplicates

  # Use a different provider
  bill2json --provider openai --model gpt-4.1 extract bill.png

  # Smoke-test a deployment
  bill2json probe --base-url http://localhost:8000 \
      --document https://example.com/bills/discharge.png

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY       Anthropic API key (default provider)
  OPENAI_API_KEY          OpenAI API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_PROVIDER      Override provider (anthropic, openai, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  HOST, PORT              Bind address for `serve`
  RUST_LOG                Log filter, overrides -v / -q
"#;

/// Extract medical bill line items into JSON using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "bill2json",
    version,
    about = "Extract medical bill line items into JSON using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    extraction: ExtractionArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "BILL2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "BILL2JSON_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ExtractionArgs {
    /// LLM model ID (e.g. claude-sonnet-4-20250514, gpt-4.1).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: anthropic, openai, gemini, mistral, ollama.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Max LLM output tokens.
    #[arg(long, global = true, env = "BILL2JSON_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "BILL2JSON_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "BILL2JSON_DOWNLOAD_TIMEOUT", default_value_t = 30)]
    download_timeout: u64,

    /// LLM call timeout in seconds (unbounded when unset).
    #[arg(long, global = true, env = "BILL2JSON_API_TIMEOUT")]
    api_timeout: Option<u64>,

    /// Retries on LLM call failure.
    #[arg(long, global = true, env = "BILL2JSON_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Fail the request on a non-numeric item_amount instead of skipping it.
    #[arg(long, global = true, env = "BILL2JSON_STRICT_AMOUNTS")]
    strict_amounts: bool,

    /// Mark repeated items on a page as suspicious.
    #[arg(long, global = true, env = "BILL2JSON_FLAG_DUPLICATES")]
    flag_duplicates: bool,

    /// Path to a text file replacing the built-in extraction prompt.
    #[arg(long, global = true, env = "BILL2JSON_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long, env = "HOST", default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "PORT", default_value_t = 8000)]
        port: u16,
    },
    /// Extract one bill (URL or local file) and print the response JSON.
    Extract {
        /// Local image/PDF path or HTTP/HTTPS URL.
        input: String,
        /// Disable the spinner.
        #[arg(long, env = "BILL2JSON_NO_PROGRESS")]
        no_progress: bool,
    },
    /// Check a running deployment's endpoints.
    Probe {
        /// Base URLs of the deployments to check.
        #[arg(long = "base-url", required = true, num_args = 1..)]
        base_urls: Vec<String>,
        /// Document URL to send to /extract-bill-data.
        #[arg(long)]
        document: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
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
        Command::Serve { ref host, port } => {
            let config = build_config(&cli.extraction).await?;
            let service = ExtractionService::from_config(config)
                .context("Failed to start extraction service")?;
            let addr = format!("{host}:{port}");
            start_server(&addr, AppState::new(service))
                .await
                .with_context(|| format!("Server on {addr} failed"))?;
        }
        Command::Extract {
            ref input,
            no_progress,
        } => {
            let config = build_config(&cli.extraction).await?;
            let service = ExtractionService::from_config(config)
                .context("Failed to start extraction service")?;
            run_extract(&service, input, !cli.quiet && !no_progress).await?;
        }
        Command::Probe {
            ref base_urls,
            ref document,
        } => {
            let ok = run_probe(base_urls, document.as_deref(), cli.extraction.download_timeout)
                .await?;
            if !ok {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(args: &ExtractionArgs) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .max_retries(args.max_retries)
        .download_timeout_secs(args.download_timeout)
        .flag_duplicates(args.flag_duplicates)
        .amount_policy(if args.strict_amounts {
            AmountPolicy::Strict
        } else {
            AmountPolicy::Lenient
        });

    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(secs) = args.api_timeout {
        builder = builder.api_timeout_secs(secs);
    }
    if let Some(ref path) = args.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

async fn run_extract(service: &ExtractionService, input: &str, show_progress: bool) -> Result<()> {
    let spinner = show_progress.then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Extracting");
        bar.set_message(input.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });

    let start = Instant::now();
    let envelope = if is_url(input) {
        service.process(input).await
    } else {
        let doc = read_local(input)
            .await
            .with_context(|| format!("Failed to read {input}"))?;
        service.process_bytes(doc.bytes, doc.media_type).await
    };

    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&envelope).context("Failed to serialise response")?
    );

    if show_progress {
        print_summary(&envelope, start.elapsed());
    }
    Ok(())
}

fn print_summary(envelope: &ResponseEnvelope, elapsed: Duration) {
    match (&envelope.data, &envelope.message) {
        (Some(data), _) => eprintln!(
            "{} {} items  reconciled {:.2}  {}",
            green("✔"),
            bold(&data.total_item_count.to_string()),
            data.reconciled_amount,
            dim(&format!("{:.1}s", elapsed.as_secs_f64())),
        ),
        (None, message) => eprintln!(
            "{} {}",
            red("✘"),
            red(message.as_deref().unwrap_or("extraction failed"))
        ),
    }
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&envelope.usage.input_tokens.to_string()),
        dim(&envelope.usage.output_tokens.to_string()),
    );
}

/// Hit `/health` (and `/extract-bill-data` when a document is given) on each
/// base URL. Returns whether every check passed.
async fn run_probe(base_urls: &[String], document: Option<&str>, timeout_secs: u64) -> Result<bool> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1) * 10))
        .build()
        .context("Failed to build HTTP client")?;

    let mut all_ok = true;
    for base in base_urls {
        let base = base.trim_end_matches('/');
        eprintln!("{}", bold(base));

        let health = async {
            client
                .get(format!("{base}/health"))
                .send()
                .await?
                .error_for_status()?
                .json::<HealthResponse>()
                .await
        }
        .await;
        match health {
            Ok(h) => eprintln!(
                "  {} health  {} / {}  api key configured: {}",
                green("✓"),
                h.provider,
                h.model,
                h.api_key_configured
            ),
            Err(e) => {
                all_ok = false;
                eprintln!("  {} health  {}", red("✗"), red(&e.to_string()));
            }
        }

        let Some(document) = document else {
            continue;
        };
        let start = Instant::now();
        let extract = async {
            client
                .post(format!("{base}/extract-bill-data"))
                .json(&DocumentRequest {
                    document: document.to_string(),
                })
                .send()
                .await?
                .error_for_status()?
                .json::<ResponseEnvelope>()
                .await
        }
        .await;
        match extract {
            Ok(env) if env.is_success => {
                let (items, amount) = env
                    .data
                    .as_ref()
                    .map(|d| (d.total_item_count, d.reconciled_amount))
                    .unwrap_or_default();
                eprintln!(
                    "  {} extract {} items  {:.2}  {} tokens  {}",
                    green("✓"),
                    items,
                    amount,
                    env.usage.total_tokens,
                    dim(&format!("{:.1}s", start.elapsed().as_secs_f64())),
                );
            }
            Ok(env) => {
                all_ok = false;
                eprintln!(
                    "  {} extract {}",
                    red("✗"),
                    red(env.message.as_deref().unwrap_or("no message"))
                );
            }
            Err(e) => {
                all_ok = false;
                eprintln!("  {} extract {}", red("✗"), red(&e.to_string()));
            }
        }
    }
    Ok(all_ok)
}
