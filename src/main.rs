//! The `quarry` server.
//!
//! Usage:
//!
//! ```text
//! quarry                  # settings from quarry.toml (if present) and QUARRY_* variables
//! quarry settings.toml    # settings from the given file
//! ```
//!
//! On startup the snapshot (if configured) is restored and the fact script
//! (if configured) is asserted. The HTTP surface then serves `POST /v1/query`
//! and `POST /v1/facts` until ctrl-c, after which the snapshot is written back.

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use quarry::engine::Engine;
use quarry::error::QuarryError;
use quarry::persist::{PersistenceMode, Persistor};
use quarry::server;
use quarry::settings::Settings;
use quarry::world::World;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1);
    let settings = Settings::load(path.as_deref())?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut world = World::new();
    let mut persistor = match &settings.snapshot {
        Some(snapshot) => {
            let persistor = Persistor::new(PersistenceMode::File(snapshot.clone()))?;
            if let Some(saved_at) = persistor.saved_at()? {
                info!(%saved_at, %snapshot, "restoring snapshot");
                persistor.restore(&mut world)?;
            }
            Some(persistor)
        }
        None => None,
    };

    let engine = Engine::new(world);
    if let Some(facts) = &settings.facts {
        let script = std::fs::read_to_string(facts)?;
        let added = engine.assert_facts(&script)?;
        info!(%facts, added, "fact script loaded");
    }

    let app = server::router(engine.clone(), settings.row_limit);
    let listener = tokio::net::TcpListener::bind(&settings.listen).await?;
    info!("quarry listening on {}", settings.listen);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    if let Some(persistor) = persistor.as_mut() {
        let world = engine.world().read().map_err(|e| QuarryError::Lock(e.to_string()))?;
        persistor.save(&world)?;
    }
    info!("quarry stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error=%e, "could not listen for shutdown signal");
    }
}
