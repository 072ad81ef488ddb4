use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request},
    response::Response,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use switchyard::{
    adapters::{
        FileConfigProvider, FileSystemArtifactStore, HttpClientAdapter, HttpMiddlewareWorker,
        RoutingHandler, StaticRouteRegistry,
    },
    config::{
        ServerConfigValidator,
        loader::{load_config, load_config_unchecked},
        models::ServerConfig,
    },
    core::{InboundRequest, Resolver, RouteTable},
    metrics,
    ports::{config_provider::ConfigProvider, http_client::HttpClient},
    tracing_setup,
    utils::{ServerSignal, SignalHandler},
};
use tower_http::trace::TraceLayer;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "switchyard.yaml")]
    config: String,

    /// Log level used when RUST_LOG is not set
    #[clap(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit JSON logs instead of the human-readable format
    #[clap(long, global = true)]
    log_json: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        #[clap(short, long, default_value = "switchyard.yaml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "switchyard.yaml")]
        config: String,
    },
    /// Print the compiled route table
    Inspect {
        #[clap(short, long, default_value = "switchyard.yaml")]
        config: String,
    },
    /// Resolve a single URL and print the result as JSON
    Resolve {
        #[clap(short, long, default_value = "switchyard.yaml")]
        config: String,
        /// Absolute URL, e.g. https://example.com/fr/blog/hello?x=1
        url: String,
        #[clap(short = 'X', long, default_value = "GET")]
        method: String,
        /// Extra request header, "name: value"; may be repeated
        #[clap(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// Start the routing server (default)
    Serve {
        #[clap(short, long, default_value = "switchyard.yaml")]
        config: String,
    },
}

/// Everything the server and the CLI build from one configuration.
struct Engine {
    resolver: Arc<Resolver>,
    registry: Arc<StaticRouteRegistry>,
    artifacts: Arc<FileSystemArtifactStore>,
    http_client: Arc<dyn HttpClient>,
}

impl Engine {
    fn build(config: &ServerConfig) -> Result<Self> {
        let table = RouteTable::compile(&config.routing).context("Failed to compile route table")?;
        let registry = StaticRouteRegistry::from_descriptors(&config.routing.dynamic_routes)
            .context("Invalid dynamic route pattern")?;
        let artifacts = Arc::new(FileSystemArtifactStore::from_config(config));
        let http_client: Arc<dyn HttpClient> =
            Arc::new(HttpClientAdapter::new().context("Failed to create HTTP client adapter")?);

        let mut resolver = Resolver::new(table, artifacts.clone());
        if let Some(worker_config) = &config.middleware_worker {
            let timeout = HttpMiddlewareWorker::timeout(worker_config)?;
            let worker = HttpMiddlewareWorker::new(worker_config, http_client.clone())?;
            resolver = resolver.with_middleware(Arc::new(worker), timeout);
        }

        Ok(Self {
            resolver: Arc::new(resolver),
            registry: Arc::new(registry),
            artifacts,
            http_client,
        })
    }

    /// Swap in the table and routes of a freshly loaded configuration. The
    /// current ones stay active if anything fails.
    fn reload(&self, config: &ServerConfig) -> Result<()> {
        let table = match RouteTable::compile(&config.routing) {
            Ok(table) => table,
            Err(e) => {
                metrics::record_table_reload(false, self.resolver.table().len());
                return Err(e).context("Failed to compile reloaded route table");
            }
        };
        if let Err(e) = self.registry.replace(&config.routing.dynamic_routes) {
            metrics::record_table_reload(false, self.resolver.table().len());
            return Err(e).context("Invalid dynamic route pattern in reloaded config");
        }
        self.resolver.reload(table);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Inspect { config }) => inspect_command(&config).await,
        Some(Commands::Resolve {
            config,
            url,
            method,
            headers,
        }) => {
            tracing_setup::init_tracing_with_config("warn", false, false)?;
            resolve_command(&config, &url, &method, &headers).await
        }
        Some(Commands::Serve { config }) => {
            tracing_setup::init_tracing_with_config(&args.log_level, args.log_json, args.log_json)?;
            serve(&config).await
        }
        None => {
            tracing_setup::init_tracing_with_config(&args.log_level, args.log_json, args.log_json)?;
            serve(&args.config).await
        }
    }
}

async fn serve(config_path: &str) -> Result<()> {
    metrics::init_metrics().context("Failed to initialize metrics")?;

    tracing::info!("Loading initial configuration from {config_path}");
    let config_provider: Arc<dyn ConfigProvider> =
        Arc::new(FileConfigProvider::new(config_path).context("Failed to create config provider")?);
    let config = config_provider
        .load_config()
        .await
        .with_context(|| format!("Failed to load initial config from {config_path}"))?;

    let engine = Arc::new(Engine::build(&config)?);
    tracing::info!(
        entries = engine.resolver.table().len(),
        dynamic_routes = config.routing.dynamic_routes.len(),
        middleware = config.middleware_worker.is_some(),
        "Route table compiled"
    );

    let signals = Arc::new(SignalHandler::new());
    {
        let signals = signals.clone();
        tokio::spawn(async move {
            if let Err(e) = signals.run().await {
                tracing::error!("Signal handler error: {}", e);
            }
        });
    }

    spawn_config_watcher(config_provider.clone(), engine.clone(), signals.clone())?;

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    let handler = RoutingHandler::new(
        engine.resolver.clone(),
        engine.registry.clone(),
        engine.artifacts.clone(),
        engine.http_client.clone(),
        config.max_body_bytes,
    )
    .with_local_port(addr.port());

    let app = Router::new()
        .fallback(
            move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, req: Request| {
                let handler = handler.clone();
                async move {
                    match handler.handle_request(req, Some(client_addr)).await {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::error!("Request handling error: {:?}", e);
                            let mut response = Response::new(Body::from("Internal Server Error"));
                            *response.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
                            response
                        }
                    }
                }
            },
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Switchyard listening on {}", addr);
    println!("Switchyard listening on {addr}");

    let shutdown = {
        let signals = signals.clone();
        async move { signals.wait_for_shutdown().await }
    };
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown);

    let server = tokio::spawn(async move { server.await });
    signals.wait_for_shutdown().await;
    tracing::info!("Shutdown requested, draining connections");
    if !signals.drain(server).await {
        return Err(eyre!("Connections did not drain in time"));
    }
    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// Reload on file changes (debounced) and on SIGHUP.
fn spawn_config_watcher(
    provider: Arc<dyn ConfigProvider>,
    engine: Arc<Engine>,
    signals: Arc<SignalHandler>,
) -> Result<()> {
    let mut file_events = provider.watch()?;
    let mut signal_events = signals.subscribe();
    let debounce = Duration::from_secs(2);

    tokio::spawn(async move {
        tracing::info!("Config watcher task started.");
        let mut last_reload = tokio::time::Instant::now()
            .checked_sub(debounce)
            .unwrap_or_else(tokio::time::Instant::now);

        loop {
            tokio::select! {
                event = file_events.recv() => {
                    if event.is_none() {
                        break;
                    }
                    if last_reload.elapsed() < debounce {
                        tracing::debug!("Debouncing config reload event");
                        while file_events.try_recv().is_ok() {}
                        continue;
                    }
                }
                signal = signal_events.recv() => match signal {
                    Ok(ServerSignal::Reload) => {}
                    Ok(ServerSignal::Shutdown) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
            last_reload = tokio::time::Instant::now();

            match provider.load_config().await {
                Ok(config) => match engine.reload(&config) {
                    Ok(()) => tracing::info!(build_id = %config.routing.build_id, "Configuration reloaded"),
                    Err(e) => tracing::error!("Failed to apply configuration: {:?}. Keeping old route table.", e),
                },
                Err(e) => {
                    metrics::record_table_reload(false, engine.resolver.table().len());
                    tracing::error!("Failed to reload configuration: {:?}. Keeping old route table.", e);
                }
            }
            while file_events.try_recv().is_ok() {}
        }
        tracing::info!("Config watcher task is shutting down.");
    });
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config_unchecked(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:?}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            let routing = &config.routing;
            let rewrites = routing.rewrites.before_files.len()
                + routing.rewrites.after_files.len()
                + routing.rewrites.fallback.len();
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Base Path: {:?}", routing.base_path);
            println!("   • Header Rules: {}", routing.headers.len());
            println!("   • Redirects: {}", routing.redirects.len());
            println!("   • Rewrites: {rewrites}");
            println!("   • Dynamic Routes: {}", routing.dynamic_routes.len());
            println!(
                "   • Locales: {}",
                routing
                    .i18n
                    .as_ref()
                    .map(|i18n| i18n.locales.join(", "))
                    .unwrap_or_else(|| "none".to_string())
            );
            println!("   • Middleware: {}", config.middleware_worker.is_some());
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Rule sources and page names start with '/'");
            println!("   • Destinations are paths or http(s) URLs");
            println!("   • Destination parameters must appear in the source or a 'has' condition");
            println!("   • Verify listen address format (e.g., '127.0.0.1:3000')");
            std::process::exit(1);
        }
    }
}

async fn inspect_command(config_path: &str) -> Result<()> {
    let config = load_config(config_path).await?;
    let table = RouteTable::compile(&config.routing)?;
    println!("{} entries (build {})", table.len(), table.settings().build_id);
    for (index, entry) in table.entries().iter().enumerate() {
        println!("{index:>4}  {}", entry.describe());
    }
    Ok(())
}

async fn resolve_command(
    config_path: &str,
    url: &str,
    method: &str,
    headers: &[String],
) -> Result<()> {
    let config = load_config(config_path).await?;
    let engine = Engine::build(&config)?;

    let url = url::Url::parse(url).with_context(|| format!("Invalid URL: {url}"))?;
    let target = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    };
    let method = http::Method::from_bytes(method.as_bytes())
        .with_context(|| format!("Invalid method: {method}"))?;

    let mut request = InboundRequest::new(method, target).encrypted(url.scheme() == "https");
    if let Some(host) = url.host_str() {
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        request = request.header(http::header::HOST, &host);
    }
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| eyre!("Header must look like 'name: value', got '{header}'"))?;
        let name = http::HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("Invalid header name in '{header}'"))?;
        request = request.header(name, value.trim());
    }

    let result = engine
        .resolver
        .resolve(request, engine.registry.as_ref())
        .await;
    println!("{}", serde_json::to_string_pretty(&result.describe())?);
    Ok(())
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Switchyard configuration

listen_addr: "127.0.0.1:8080"
public_dir: "./public"
pages: ["/", "/about", "/blog/[slug]", "/404"]

routing:
  build_id: "development"
  headers:
    - source: "/:path*"
      headers:
        - key: "x-frame-options"
          value: "DENY"
  redirects:
    - source: "/old-blog/:slug"
      destination: "/blog/:slug"
      permanent: true
  rewrites:
    after_files:
      - source: "/docs/:path*"
        destination: "https://docs.example.com/:path*"
  dynamic_routes:
    - page: "/blog/[slug]"
      pattern: "/blog/:slug"
  # i18n:
  #   locales: ["en", "fr"]
  #   default_locale: "en"

# middleware_worker:
#   endpoint: "http://127.0.0.1:9001"
#   timeout: "10s"
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'switchyard serve --config {config_path}' to start the server");
    Ok(())
}
