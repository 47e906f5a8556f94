use std::sync::Arc;

use lanmodule::telemetry::{init_logging, LogFormat};
use lanmodule::{serve, Module, Settings};

#[actix_web::main]
async fn main() -> lanmodule::Result<()> {
    init_logging(LogFormat::from_env())?;

    let settings = Settings::from_env()?;
    let module = match Module::from_settings(&settings) {
        Ok(module) => Arc::new(module),
        Err(e) => {
            tracing::error!(config = %settings.config_path.display(), error = %e, "failed to create module");
            return Err(e);
        }
    };

    // Scan peers in the background so the server comes up right away.
    let scanner = module.clone();
    let interval = settings.scan_interval;
    tokio::spawn(async move {
        match interval {
            Some(every) => {
                let mut ticker = tokio::time::interval(every);
                loop {
                    ticker.tick().await;
                    scanner.check_modules_up().await;
                }
            }
            None => {
                scanner.check_modules_up().await;
            }
        }
    });

    serve(module, &settings.host, settings.port).await
}
