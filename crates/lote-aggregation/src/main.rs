use anyhow::Context;
use clap::Parser;
use futures::FutureExt;
use lote_aggregation::{App, Athena, Settings};
use std::sync::Arc;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// lote-aggregation runs a query over an Athena view and summarizes
/// its rows by lot, counting parcels and summing their land area.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(flatten)]
    settings: Settings,
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, clap::Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Command {
    /// Serve invocations over HTTP.
    Serve {
        /// Port to listen on.
        #[clap(long, env = "PORT", default_value = "8080")]
        port: u16,
    },
    /// Run a single invocation, writing its JSON response body to stdout.
    Invoke {
        /// Return the rows of the view rather than their aggregation.
        #[clap(long)]
        rows: bool,
    },
}

fn main() -> Result<(), anyhow::Error> {
    // Use reasonable defaults for printing structured logs to stderr.
    let builder = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr);

    let result = if matches!(std::env::var("LOG_FORMAT"), Ok(v) if v == "json") {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.expect("setting tracing default failed");

    let cli = Cli::parse();
    tracing::info!(?cli, "started!");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let task = runtime.spawn(async move { async_main(cli).await });
    let result = runtime.block_on(task);

    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result?
}

async fn async_main(Cli { settings, cmd }: Cli) -> anyhow::Result<()> {
    let athena = Athena::from_env(settings.region.clone()).await;
    let app = Arc::new(App::new(athena, settings));

    match cmd {
        Command::Serve { port } => serve(app, port).await,
        Command::Invoke { rows } => invoke(&app, rows).await,
    }
}

async fn serve(app: Arc<App<Athena>>, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("[::]:{port}"))
        .await
        .context("failed to bind server port")?;

    tracing::info!(port, "lote-aggregation listening");

    // Future which completes when the server should exit.
    let shutdown = tokio::signal::ctrl_c().map(|_| ());

    axum::serve(listener, lote_aggregation::router(app))
        .with_graceful_shutdown(shutdown)
        .await
        .context("serving HTTP")?;

    Ok(())
}

async fn invoke(app: &App<Athena>, rows: bool) -> anyhow::Result<()> {
    let body = if rows {
        app.view_rows().await.map(serde_json::to_value)
    } else {
        app.lot_aggregation().await.map(serde_json::to_value)
    };

    match body {
        Ok(body) => {
            println!("{}", body?);
            Ok(())
        }
        Err(err) => {
            let err = anyhow::Error::new(err);
            println!("{}", serde_json::json!({ "error": format!("{err:#}") }));
            Err(err)
        }
    }
}
