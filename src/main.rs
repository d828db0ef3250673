use std::process::ExitCode;

use tracing::{error, info};

use botbridge::config::LoggingConfig;
use botbridge::{Application, Config};

#[tokio::main]
async fn main() -> ExitCode {
    // Optional .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let logging = LoggingConfig::from_env();
    if let Err(e) = botbridge::logging::init(&logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        botbridge::logging::init_console_only(&logging.level);
    }

    info!("botbridge {}", env!("CARGO_PKG_VERSION"));

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let app = match Application::build(&config).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match app.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Application error: {}", e);
            ExitCode::FAILURE
        }
    }
}
