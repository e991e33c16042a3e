use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwap;
use clap::Parser;

use gemproxy_common::{GlobalConfig, GlobalConfigPatch};
use gemproxy_credentials::{GeminiRotator, MasterCipher, TokenCache, VertexRotator};
use gemproxy_gateway::state::AppState;
use gemproxy_lro::LroAffinityCache;
use gemproxy_storage::{AttemptStorage, GlobalConfigStore};

use crate::cli::Cli;
use crate::dsn;

pub struct Bootstrap {
    pub state: Arc<AppState>,
    pub storage: Arc<AttemptStorage>,
    pub config_store: GlobalConfigStore,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    let cli = Cli::parse();
    bootstrap(cli).await
}

pub async fn bootstrap(cli: Cli) -> anyhow::Result<Bootstrap> {
    let dsn = dsn::resolve_dsn(cli.dsn.as_deref().unwrap_or(""))
        .context("resolve database dsn")?;

    let storage = Arc::new(
        AttemptStorage::connect(&dsn)
            .await
            .context("connect attempt storage")?,
    );
    storage.sync().await.context("sync attempt storage schema")?;

    let config_store = GlobalConfigStore::connect(&dsn)
        .await
        .context("connect global config store")?;
    config_store.sync().await.context("sync global config schema")?;

    let db_patch = config_store
        .load()
        .await
        .context("load persisted global config")?
        .and_then(|value| serde_json::from_value::<GlobalConfig>(value).ok())
        .map(GlobalConfigPatch::from)
        .unwrap_or_default();

    let mut merged = db_patch;
    let mut cli_patch = GlobalConfigPatch::from(cli);
    cli_patch.dsn = Some(dsn);
    merged.overlay(cli_patch);

    let global = merged.into_config().context("finalize merged global config")?;

    config_store
        .upsert(serde_json::to_value(&global).context("serialize global config")?)
        .await
        .context("persist merged global config")?;

    ensure_directories(&global.creds_root).context("bootstrap credential directories")?;

    let cipher = match MasterCipher::load_or_create(Path::new(&global.master_key_file)) {
        Ok(cipher) => Some(Arc::new(cipher)),
        Err(err) => {
            tracing::warn!(error = %err, "failed to load or create master key; encrypted key envelopes will yield an empty pool");
            None
        }
    };

    let gemini_dir = Path::new(&global.creds_root).join("gemini");
    let vertex_dir = Path::new(&global.creds_root).join("vertex");

    let gemini = Arc::new(GeminiRotator::new(gemini_dir, cipher));
    gemini.load();
    let vertex = Arc::new(VertexRotator::new(vertex_dir));
    vertex.load();

    let mut client_builder = wreq::Client::builder();
    if let Some(proxy) = global.proxy.as_deref() {
        client_builder = client_builder
            .proxy(wreq::Proxy::all(proxy).context("configure outbound proxy")?);
    }
    let http = Arc::new(client_builder.build().context("build upstream http client")?);

    let state = Arc::new(AppState {
        gemini,
        vertex,
        tokens: Arc::new(TokenCache::new(http.clone())),
        lro: Arc::new(LroAffinityCache::new()),
        storage: Some(storage.clone()),
        http,
        config: Arc::new(ArcSwap::from_pointee(global)),
    });

    Ok(Bootstrap { state, storage, config_store })
}

/// Mirrors the original's `ensure_directories()`: materialize the credential
/// tree against an empty volume rather than fail closed on first run.
fn ensure_directories(creds_root: &str) -> std::io::Result<()> {
    let root = Path::new(creds_root);
    let gemini_dir = root.join("gemini");
    let vertex_dir = root.join("vertex");
    std::fs::create_dir_all(&gemini_dir)?;
    std::fs::create_dir_all(&vertex_dir)?;

    let api_keys_path = gemini_dir.join("api_keys.json");
    if !api_keys_path.exists() {
        tracing::warn!(path = %api_keys_path.display(), "no gemini api_keys.json found; writing empty template");
        std::fs::write(&api_keys_path, b"[]\n")?;
    }
    Ok(())
}
