#[cfg(not(target_arch = "wasm32"))]
#[tokio::main]
async fn main() -> Result<(), String> {
    use hero_viewer::server::{init_tracing, run, ServerConfig};

    let config = ServerConfig::from_env().map_err(|e| e.to_string())?;
    init_tracing(config.log_json);
    run(config).await.map_err(|e| {
        tracing::error!(error = %e, "asset server failed");
        e.to_string()
    })
}

#[cfg(target_arch = "wasm32")]
fn main() {}
