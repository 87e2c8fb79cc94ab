// ============================
// crates/backend-bin/src/main.rs
// ============================
use quizroom_backend_lib::{
    config::{Settings, StoreBackend},
    store::{FileStore, MemoryStore, Store},
    ws_router, AppState,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone())),
        )
        .init();

    // The store backend is chosen once at startup; everything downstream
    // depends only on the Store trait.
    match settings.store {
        StoreBackend::Memory => serve(MemoryStore::new(), settings).await,
        StoreBackend::File => {
            let store = FileStore::new(&settings.data_dir)?;
            serve(store, settings).await
        },
    }
}

async fn serve<S: Store + Clone + Send + Sync + 'static>(
    store: S,
    settings: Settings,
) -> anyhow::Result<()> {
    let bind_addr = settings.bind_addr;
    let state = Arc::new(AppState::new(store, settings));
    let app = ws_router::create_router(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("listening on {bind_addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
