use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use movieguru_sync::{
    config::{BackendKind, Config},
    db::MemoryDocumentStore,
    identity::{FileSessionStore, IdentityStore},
    remote::{DocumentAdapter, IdentityBackend, RemoteAdapter, RestAdapter},
    sync::SyncEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("movieguru_sync=info")),
        )
        .init();

    let config = Config::from_env()?;

    let (remote, identity_backend): (Arc<dyn RemoteAdapter>, Arc<dyn IdentityBackend>) =
        match config.backend_kind() {
            BackendKind::Rest => {
                let adapter = Arc::new(
                    RestAdapter::new(config.api_base_url.clone())
                        .with_provider_ttl(config.provider_cache_ttl_secs),
                );
                let remote: Arc<dyn RemoteAdapter> = adapter.clone();
                (remote, adapter as Arc<dyn IdentityBackend>)
            }
            BackendKind::Document => {
                tracing::warn!("Document backend is process-local, nothing outlives this run");
                let adapter = Arc::new(
                    DocumentAdapter::new(MemoryDocumentStore::new())
                        .with_lookup_ttl(config.provider_cache_ttl_secs),
                );
                let remote: Arc<dyn RemoteAdapter> = adapter.clone();
                (remote, adapter as Arc<dyn IdentityBackend>)
            }
        };

    let identity = IdentityStore::new(
        identity_backend,
        Arc::new(FileSessionStore::new(&config.session_path)),
    );
    let engine = SyncEngine::new(remote.clone(), identity.clone(), config.operation_timeout());

    match identity.restore_session().await? {
        Some(_) => engine.load().await?,
        None => tracing::info!(adapter = remote.name(), "No persisted session"),
    }
    let _follower = engine.follow_identity();

    if let Some(mood) = std::env::args().nth(1) {
        let recommendation = engine.recommend(&mood).await?;
        println!("{}", serde_json::to_string_pretty(&recommendation)?);
    }

    Ok(())
}
