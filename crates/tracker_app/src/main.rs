use tracing_subscriber::EnvFilter;
use tracker_app::app::{run, AppConfig};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let config = AppConfig::from_env().unwrap_or_default();
    if let Err(err) = run(config) {
        eprintln!("Failed to produce tracker report: {err:#}");
        std::process::exit(1);
    }
}
