use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use tracing::{debug, info, warn};

use locator_synth::dom::{OutputMode, SelectorResult};
use locator_synth::prefs::ModeStore;
use locator_synth::target::is_url;
use locator_synth::{browser, generator, mcp, serialize, xpath};

#[derive(Parser)]
#[command(name = "locator-synth")]
#[command(about = "Stable XPath and CSS locators for web page elements")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a selector for one element of an HTML file, URL, or stdin
    Generate {
        /// HTML file path, URL (http/https), or '-' for stdin
        input: String,

        /// CSS selector identifying the target element
        #[arg(short, long)]
        target: String,

        /// 0-based index among the elements matching --target
        #[arg(short, long, default_value_t = 0)]
        nth: usize,

        /// Preferred output: xpath or css (defaults to the stored mode)
        #[arg(short, long)]
        mode: Option<OutputMode>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Chrome debugging port (for URL mode)
        #[arg(short, long, default_value_t = 9222)]
        port: u16,

        /// Launch a new headless Chrome instead of connecting
        #[arg(short, long)]
        launch: bool,

        /// Count the generated XPath in the live page (URL mode)
        #[arg(long)]
        verify: bool,
    },

    /// Evaluate an XPath expression against an HTML file or stdin
    Query {
        /// HTML file path or '-' for stdin
        input: String,

        /// XPath expression to evaluate
        xpath: String,
    },

    /// Show or change the stored output mode
    Mode {
        #[command(subcommand)]
        action: Option<ModeAction>,
    },

    /// Start as an MCP (Model Context Protocol) server over stdio
    Mcp {
        /// Chrome debugging port to connect to
        #[arg(short, long, default_value_t = 9222)]
        port: u16,

        /// Launch a new headless Chrome instead of connecting
        #[arg(short, long)]
        launch: bool,
    },

    /// Start as an MCP server over HTTP (Streamable HTTP + SSE transport)
    McpHttp {
        /// Chrome debugging port to connect to
        #[arg(short, long, default_value_t = 9222)]
        port: u16,

        /// Launch a new headless Chrome instead of connecting
        #[arg(short, long)]
        launch: bool,

        /// Host to bind the HTTP server to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to serve the MCP HTTP endpoint on
        #[arg(long, default_value_t = 8080)]
        http_port: u16,
    },
}

#[derive(Subcommand)]
enum ModeAction {
    /// Store the preferred output mode
    Set {
        /// xpath or css
        mode: OutputMode,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            input,
            target,
            nth,
            mode,
            format,
            port,
            launch,
            verify,
        } => {
            let mode = mode.unwrap_or_else(|| ModeStore::new().load());
            info!(input = %input, target_css = %target, nth = nth, mode = %mode, "generate command");
            if is_url(&input) {
                let rt = tokio::runtime::Runtime::new()?;
                rt.block_on(run_browser_generate(
                    &input, &target, nth, mode, &format, port, launch, verify,
                ))
            } else {
                let html = read_input(&input)?;
                let result = generator::generate_in_html(&html, &target, nth, mode)?;
                print_output(&result, None, &format)
            }
        }
        Commands::Query { input, xpath } => run_query(&input, &xpath),
        Commands::Mode { action } => {
            let store = ModeStore::new();
            match action {
                None => println!("{}", store.load()),
                Some(ModeAction::Set { mode }) => {
                    let path = store.store(mode)?;
                    info!(mode = %mode, path = %path.display(), "output mode stored");
                    println!("{mode}");
                }
            }
            Ok(())
        }
        Commands::Mcp { port, launch } => {
            info!(port = port, launch = launch, "starting MCP server");
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(mcp::run_mcp_server(launch, port))
        }
        Commands::McpHttp {
            port,
            launch,
            host,
            http_port,
        } => {
            info!(port = port, launch = launch, host = %host, http_port = http_port, "starting MCP HTTP server");
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(mcp::run_mcp_http_server(launch, port, &host, http_port))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_browser_generate(
    url: &str,
    target: &str,
    nth: usize,
    mode: OutputMode,
    format: &str,
    port: u16,
    launch: bool,
    verify: bool,
) -> Result<()> {
    let browser = browser::connect_or_launch(launch, port).await?;
    let loaded = browser::open_page(&browser, url).await?;
    debug!(html_len = loaded.html.len(), final_url = %loaded.url, "fetched page");

    let result = generator::generate_in_html(&loaded.html, target, nth, mode)?;

    let live = if verify {
        let expr = result.xpath();
        let n = browser::count_in_page(&loaded.page, expr).await?;
        if n == 0 {
            warn!(xpath = %expr, "generated selector matches nothing in the live page");
        }
        Some(n)
    } else {
        None
    };
    print_output(&result, live, format)
}

fn run_query(input: &str, expr: &str) -> Result<()> {
    let html = read_input(input)?;
    let doc = scraper::Html::parse_document(&html);
    let matches = xpath::select(&doc, expr).with_context(|| format!("Cannot evaluate {expr:?}"))?;
    info!(xpath = %expr, count = matches.len(), "query complete");
    println!("{} match(es)", matches.len());
    for m in &matches {
        println!("  {}", m.describe());
    }
    Ok(())
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {input}"))
    }
}

fn print_output(result: &SelectorResult, live: Option<usize>, format: &str) -> Result<()> {
    let output = match format {
        "json" => {
            let mut value = serde_json::to_value(result)?;
            if let (Some(n), Some(obj)) = (live, value.as_object_mut()) {
                obj.insert("live_matches".into(), n.into());
            }
            serde_json::to_string_pretty(&value)?
        }
        _ if live.is_some() => serialize::with_live_count(result, live),
        _ => serialize::to_compact_text(result),
    };
    println!("{}", output.trim_end());
    Ok(())
}
