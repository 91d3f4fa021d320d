use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};

use llmstxt::app::App;
use llmstxt::cli::Args;
use llmstxt::config::Config;
use llmstxt::logging::setup_logging;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Configuration errors are reported before logging exists.
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return ExitCode::from(2);
        }
    };

    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        services = ?args.services,
        "starting llmstxt"
    );

    let mut app = match App::new(config).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "startup failed");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = app.setup_services(&args.services) {
        error!(error = ?e, "service setup failed");
        return ExitCode::from(2);
    }

    app.start_services();
    app.run().await
}
