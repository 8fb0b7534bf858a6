//! `sqlrpc server` — Start the HTTP server.

use std::path::PathBuf;

pub async fn run(
    host: String,
    port: u16,
    base_path: String,
    config: Option<PathBuf>,
) -> Result<(), String> {
    let config = sqlrpc_server::ServerConfig {
        host: host.clone(),
        port,
        base_path,
        settings_path: config,
    };

    println!("Starting sqlrpc server on {}:{}...", host, port);

    let addr = sqlrpc_server::start_server(config).await?;
    println!("sqlrpc server listening on http://{}", addr);

    // Keep the process running until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    println!("\nShutting down...");
    Ok(())
}
