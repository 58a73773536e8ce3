mod commands;
mod render;
mod repl;
mod settings;

use tracing_subscriber::EnvFilter;

use crate::repl::Repl;
use crate::settings::SettingsStore;

/// Entry point: logging to stderr, settings from disk and environment, then the REPL on stdin.
#[tokio::main]
async fn main() {
    // stderr keeps log lines out of the rendered reply.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = SettingsStore::load();
    tracing::info!(
        path = ?settings.config_path(),
        base_url = %settings.settings().base_url,
        "starting chatline"
    );

    let result = match Repl::new(settings) {
        Ok(repl) => repl.run().await,
        Err(error) => Err(error),
    };
    if let Err(error) = result {
        tracing::error!(error = %error, "chatline stopped");
        std::process::exit(1);
    }
}
