use std::sync::Arc;

use anyhow::Context as _;
use chromiumoxide::Browser;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::sync::RwLock;

use tracing::{debug, info, warn};

use crate::browser::{self, LoadedPage};
use crate::dom::{OutputMode, SelectorResult};
use crate::generator::generate_in_html;
use crate::prefs::ModeStore;
use crate::target::ensure_scriptable_url;
use crate::{serialize, xpath};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateParams {
    /// Full HTML document to generate a selector in
    pub html: String,
    /// CSS selector identifying the target element (e.g., "form button")
    pub target: String,
    /// 0-based index among the elements matching `target` (default: 0)
    #[serde(default)]
    pub nth: Option<usize>,
    /// "xpath" or "css"; falls back to the stored output mode
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LoadPageParams {
    /// The URL to open (e.g., "https://example.com")
    pub url: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PickParams {
    /// CSS selector identifying the target element on the loaded page
    pub target: String,
    /// 0-based index among the elements matching `target` (default: 0)
    #[serde(default)]
    pub nth: Option<usize>,
    /// "xpath" or "css"; falls back to the stored output mode
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CountXPathParams {
    /// XPath expression to evaluate against the loaded page
    pub xpath: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetModeParams {
    /// "xpath" or "css"
    pub mode: String,
}

#[derive(Default)]
struct PickerState {
    browser: Option<Browser>,
    page: Option<LoadedPage>,
    last: Option<SelectorResult>,
}

#[derive(Clone)]
pub struct LocatorServer {
    tool_router: ToolRouter<Self>,
    state: Arc<RwLock<PickerState>>,
    prefs: Arc<ModeStore>,
    launch_browser: bool,
    port: u16,
}

#[tool_router]
impl LocatorServer {
    pub fn new(launch_browser: bool, port: u16) -> Self {
        Self::with_prefs(launch_browser, port, ModeStore::new())
    }

    pub fn with_prefs(launch_browser: bool, port: u16, prefs: ModeStore) -> Self {
        Self {
            tool_router: Self::tool_router(),
            state: Arc::new(RwLock::new(PickerState::default())),
            prefs: Arc::new(prefs),
            launch_browser,
            port,
        }
    }

    #[tool(description = "Generate a stable XPath/CSS selector for an element of the given HTML. The element is chosen by a CSS selector plus optional index. Text candidates are validated against the same document.")]
    async fn generate_selector(
        &self,
        Parameters(params): Parameters<GenerateParams>,
    ) -> String {
        match self.do_generate(params).await {
            Ok(text) => text,
            Err(e) => format!("ERROR: Generation failed: {e}"),
        }
    }

    #[tool(description = "Open a URL in the browser and keep it as the page that 'pick' and 'count_xpath' work on.")]
    async fn load_page(
        &self,
        Parameters(params): Parameters<LoadPageParams>,
    ) -> String {
        match self.do_load_page(&params.url).await {
            Ok(text) => text,
            Err(e) => format!("ERROR: Load failed: {e}"),
        }
    }

    #[tool(description = "Generate a selector for an element of the loaded page and report how many nodes its XPath form matches in the live DOM. The result is remembered as the last selector.")]
    async fn pick(
        &self,
        Parameters(params): Parameters<PickParams>,
    ) -> String {
        match self.do_pick(params).await {
            Ok(text) => text,
            Err(e) => format!("ERROR: Pick failed: {e}"),
        }
    }

    #[tool(description = "Count the nodes an XPath expression selects in the loaded page's live DOM.")]
    async fn count_xpath(
        &self,
        Parameters(params): Parameters<CountXPathParams>,
    ) -> String {
        match self.do_count_xpath(&params.xpath).await {
            Ok(text) => text,
            Err(e) => format!("ERROR: Count failed: {e}"),
        }
    }

    #[tool(description = "Return the most recent selector produced by 'pick'.")]
    async fn last_selector(&self) -> String {
        let state = self.state.read().await;
        match &state.last {
            Some(result) => serialize::to_compact_text(result),
            None => "No selector yet. Use load_page then pick.".to_string(),
        }
    }

    #[tool(description = "Return the stored output mode (xpath or css).")]
    async fn get_output_mode(&self) -> String {
        self.prefs.load().to_string()
    }

    #[tool(description = "Store the output mode used when a request does not name one. Accepts 'xpath' or 'css'.")]
    async fn set_output_mode(
        &self,
        Parameters(params): Parameters<SetModeParams>,
    ) -> String {
        let mode = match params.mode.parse::<OutputMode>() {
            Ok(mode) => mode,
            Err(e) => return format!("ERROR: {e}"),
        };
        match self.prefs.store(mode) {
            Ok(path) => format!("Output mode set to {mode} ({})", path.display()),
            Err(e) => format!("ERROR: Failed to store output mode: {e}"),
        }
    }
}

#[tool_handler]
impl ServerHandler for LocatorServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "locator-synth: stable XPath and CSS selectors for page elements. \
                 Use 'generate_selector' with raw HTML and a CSS target. \
                 Use 'load_page' to open a URL, then 'pick' with a CSS target to get a selector \
                 checked against the live DOM. 'count_xpath' evaluates any XPath on the loaded page. \
                 'get_output_mode' and 'set_output_mode' control whether XPath or CSS is preferred."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

impl LocatorServer {
    fn resolve_mode(&self, requested: Option<&str>) -> OutputMode {
        match requested {
            Some(raw) => OutputMode::normalize(raw),
            None => self.prefs.load(),
        }
    }

    async fn ensure_browser(&self) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if state.browser.is_some() {
            return Ok(());
        }

        info!(launch = self.launch_browser, port = self.port, "initializing browser connection");
        let b = browser::connect_or_launch(self.launch_browser, self.port).await?;
        state.browser = Some(b);
        info!("browser ready");
        Ok(())
    }

    async fn do_generate(&self, params: GenerateParams) -> anyhow::Result<String> {
        let mode = self.resolve_mode(params.mode.as_deref());
        let nth = params.nth.unwrap_or(0);
        debug!(target_css = %params.target, nth = nth, mode = %mode, "generate_selector");
        let result = generate_in_html(&params.html, &params.target, nth, mode)?;
        Ok(serialize::to_compact_text(&result))
    }

    async fn do_load_page(&self, url: &str) -> anyhow::Result<String> {
        info!(url = %url, "load_page");
        ensure_scriptable_url(url)?;
        self.ensure_browser().await?;

        let mut state = self.state.write().await;
        let browser = state.browser.as_ref().context("No browser")?;
        let loaded = browser::open_page(browser, url).await?;
        let summary = format!("Loaded {} ({} bytes of HTML)", loaded.url, loaded.html.len());

        if let Some(previous) = state.page.replace(loaded) {
            if let Err(e) = previous.page.close().await {
                warn!(error = %e, "failed to close previous page");
            }
        }
        state.last = None;
        Ok(summary)
    }

    async fn do_pick(&self, params: PickParams) -> anyhow::Result<String> {
        let mode = self.resolve_mode(params.mode.as_deref());
        let nth = params.nth.unwrap_or(0);

        let (html, page) = {
            let state = self.state.read().await;
            let loaded = state
                .page
                .as_ref()
                .context("No page loaded. Use load_page first.")?;
            (loaded.html.clone(), loaded.page.clone())
        };

        let result = generate_in_html(&html, &params.target, nth, mode)?;
        let live = match browser::count_in_page(&page, result.xpath()).await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "live verification failed");
                None
            }
        };
        if live == Some(0) {
            warn!(strategy = %result.debug.strategy, "generated selector matches nothing in the live page");
        }

        let text = serialize::with_live_count(&result, live);
        self.state.write().await.last = Some(result);
        Ok(text)
    }

    async fn do_count_xpath(&self, expr: &str) -> anyhow::Result<String> {
        let (html, page) = {
            let state = self.state.read().await;
            let loaded = state
                .page
                .as_ref()
                .context("No page loaded. Use load_page first.")?;
            (loaded.html.clone(), loaded.page.clone())
        };

        let live = browser::count_in_page(&page, expr).await?;
        let snapshot = match xpath::count_in_html(&html, expr) {
            Ok(n) => n.to_string(),
            Err(e) => format!("unavailable ({e})"),
        };
        Ok(format!("live matches: {live}\nsnapshot matches: {snapshot}"))
    }
}

pub async fn run_mcp_server(launch: bool, port: u16) -> anyhow::Result<()> {
    info!(launch = launch, port = port, "starting MCP server over stdio");
    let server = LocatorServer::new(launch, port);

    let service = server
        .serve(rmcp::transport::stdio())
        .await
        .context("Failed to start MCP server")?;

    info!("MCP server running, waiting for requests");
    service.waiting().await?;
    info!("MCP server shut down");
    Ok(())
}

pub async fn run_mcp_http_server(
    launch: bool,
    port: u16,
    host: &str,
    http_port: u16,
) -> anyhow::Result<()> {
    use rmcp::transport::streamable_http_server::{
        StreamableHttpServerConfig, StreamableHttpService,
        session::local::LocalSessionManager,
    };
    use tokio_util::sync::CancellationToken;

    let ct = CancellationToken::new();

    let service: StreamableHttpService<LocatorServer, LocalSessionManager> =
        StreamableHttpService::new(
            move || Ok(LocatorServer::new(launch, port)),
            Arc::new(LocalSessionManager::default()),
            StreamableHttpServerConfig {
                cancellation_token: ct.child_token(),
                ..Default::default()
            },
        );

    let router = axum::Router::new().nest_service("/mcp", service);

    let bind_addr = format!("{host}:{http_port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {bind_addr}"))?;

    info!(addr = %bind_addr, "MCP HTTP server listening on http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .context("HTTP server error")?;

    info!("MCP HTTP server shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> (tempfile::TempDir, LocatorServer) {
        let dir = tempfile::tempdir().unwrap();
        let prefs = ModeStore::with_base(dir.path().to_path_buf());
        (dir, LocatorServer::with_prefs(false, 9222, prefs))
    }

    #[tokio::test]
    async fn generate_uses_stored_mode() {
        let (_dir, server) = server();
        let params = || GenerateParams {
            html: r#"<button data-testid="go">Go</button>"#.into(),
            target: "button".into(),
            nth: None,
            mode: None,
        };
        let text = server.generate_selector(Parameters(params())).await;
        assert!(text.starts_with("preferred: //button[@data-testid='go']\n"), "{text}");

        let set = server
            .set_output_mode(Parameters(SetModeParams { mode: "css".into() }))
            .await;
        assert!(set.starts_with("Output mode set to css"), "{set}");
        assert_eq!(server.get_output_mode().await, "css");

        let text = server.generate_selector(Parameters(params())).await;
        assert!(text.starts_with("preferred: [data-testid=\"go\"]\n"), "{text}");
    }

    #[tokio::test]
    async fn explicit_mode_overrides_store() {
        let (_dir, server) = server();
        let text = server
            .generate_selector(Parameters(GenerateParams {
                html: "<p>Hello</p>".into(),
                target: "p".into(),
                nth: Some(0),
                mode: Some("CSS".into()),
            }))
            .await;
        assert!(text.starts_with("preferred: (none)\nalternate: //*[normalize-space(.)='Hello']\n"), "{text}");
    }

    #[tokio::test]
    async fn bad_inputs_are_reported() {
        let (_dir, server) = server();
        let text = server
            .generate_selector(Parameters(GenerateParams {
                html: "<p>x</p>".into(),
                target: "button".into(),
                nth: None,
                mode: None,
            }))
            .await;
        assert!(text.starts_with("ERROR: Generation failed"), "{text}");

        let text = server
            .set_output_mode(Parameters(SetModeParams { mode: "yaml".into() }))
            .await;
        assert!(text.starts_with("ERROR:"), "{text}");
    }

    #[tokio::test]
    async fn page_tools_need_a_loaded_page() {
        let (_dir, server) = server();
        let text = server
            .pick(Parameters(PickParams {
                target: "button".into(),
                nth: None,
                mode: None,
            }))
            .await;
        assert!(text.contains("No page loaded"), "{text}");
        assert!(server.last_selector().await.starts_with("No selector yet"));
    }

    #[tokio::test]
    async fn restricted_urls_are_refused_before_connecting() {
        let (_dir, server) = server();
        let text = server
            .load_page(Parameters(LoadPageParams {
                url: "chrome://settings".into(),
            }))
            .await;
        assert!(text.contains("does not allow page scripts"), "{text}");
    }
}
