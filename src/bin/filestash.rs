use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use filestash::app::build;
use filestash::state::AppState;
use filestash::storage::{ObjectStore, S3Config, S3Store};

#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./filestash.sqlite")]
    sqlite_path: String,

    #[arg(long, default_value_t = 8000)]
    port: u16,

    #[arg(long, default_value = "127.0.0.1")]
    bind_address: String,

    /// Bucket holding the uploaded objects.
    #[arg(long)]
    bucket: String,

    #[arg(long)]
    region: Option<String>,

    /// Custom S3-compatible endpoint (garage, minio). Implies path-style
    /// addressing.
    #[arg(long)]
    endpoint: Option<String>,

    /// Base url prepended to object keys to form the public reference.
    #[arg(long)]
    public_base_url: String,

    /// Key prefix under which objects are stored.
    #[arg(long, default_value = "sub")]
    directory: String,
}

#[tokio::main]
async fn main() -> Result<(), axum::BoxError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    tokio::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&cli.sqlite_path)
        .await?;

    let store: Arc<dyn ObjectStore> = Arc::new(
        S3Store::new(S3Config {
            bucket: cli.bucket,
            region: cli.region,
            endpoint: cli.endpoint,
            public_base_url: cli.public_base_url,
        })
        .await,
    );

    let state = AppState::new(&cli.sqlite_path, store, &cli.directory).await?;
    state.db.migrate().await?;

    let addr = IpAddr::from_str(&cli.bind_address)?;
    let addr = SocketAddr::from((addr, cli.port));
    let app = build(state);

    tracing::info!("Listening on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
