use log::info;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, web};

use devctl::{AppConfig, AppState, GpioController, SysfsBackend, TaskRunner};

#[cfg(all(feature = "hardware-gpio", not(feature = "mock-gpio")))]
use devctl::KernelSysfs;
#[cfg(any(not(feature = "hardware-gpio"), feature = "mock-gpio"))]
use devctl::MockSysfs;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DEVCTL_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = AppConfig::load_from_file(&config_path)
        .unwrap_or_else(|e| panic!("Failed to load config: {e}"));

    #[cfg(all(feature = "hardware-gpio", not(feature = "mock-gpio")))]
    let backend = Arc::new(KernelSysfs::new());
    #[cfg(any(not(feature = "hardware-gpio"), feature = "mock-gpio"))]
    let backend = Arc::new(MockSysfs::new(&config.gpio.sysfs_root));

    serve(config, backend).await
}

async fn serve<B: SysfsBackend + 'static>(
    config: AppConfig,
    backend: Arc<B>,
) -> std::io::Result<()> {
    let app_state = AppState {
        gpio: Arc::new(GpioController::new(&config.gpio.sysfs_root, backend)),
        tasks: Arc::new(TaskRunner::new(config.tasks.clone(), &config.log_dir)),
        pins: Arc::new(config.gpio.pins.clone()),
    };

    let http_cfg = config.http.clone();
    let scope_path = http_cfg.path.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .service(app_state.api_scope(&scope_path))
    })
    .client_request_timeout(Duration::from_secs(http_cfg.timeout));

    let bind_addrs: String;
    let server = match (&http_cfg.unix_socket, &http_cfg.host) {
        (Some(socket_path), Some(host)) => {
            if Path::new(socket_path).exists() {
                fs::remove_file(socket_path)?;
            }
            bind_addrs = format!("{} and {}", socket_path, host);

            server.bind_uds(socket_path)?.bind_auto_h2c(host)?
        }
        (Some(socket_path), None) => {
            if Path::new(socket_path).exists() {
                fs::remove_file(socket_path)?;
            }
            bind_addrs = socket_path.clone();

            server.bind_uds(socket_path)?
        }
        (None, Some(host)) => {
            bind_addrs = host.clone();

            server.bind_auto_h2c(host)?
        }
        (None, None) => {
            panic!("Config error: either 'unix_socket' or 'host' must be specified")
        }
    };

    info!(
        "Serving {} pins and {} tasks from {} on {}...",
        config.gpio.pins.len(),
        config.tasks.len(),
        config.gpio.sysfs_root.display(),
        bind_addrs
    );

    server.run().await
}
