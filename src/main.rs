use actix_web::{middleware, web, App, HttpServer};
use log::{info, warn};
use std::io;
use std::path::Path;

use shardbucket::api::{configure_master, configure_node, fresh_log_context};
use shardbucket::app_state::AppState;
use shardbucket::config::{AppConfig, Role};

fn init_logging(config_file: &str) {
    if Path::new(config_file).exists() {
        match log4rs::init_file(config_file, Default::default()) {
            Ok(()) => return,
            Err(e) => eprintln!("Failed to load log config {}: {}, falling back to env_logger", config_file, e),
        }
    }
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config = AppConfig::load().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    init_logging(&config.logging.config_file);

    let state = AppState::from_config(config.clone()).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    match config.role {
        Role::Master => {
            if config.nodes.health_sweep_enabled {
                state.sweep_worker().start_background();
            } else {
                warn!("Scheduled health sweep disabled; node health only changes on pings and manual checks");
            }
        }
        Role::Node => {
            state.heartbeat_worker().start_background();
        }
    }

    let role = config.role;
    let payload_limit = config.server.max_payload_size;
    let data = web::Data::new(state);
    info!("Starting {:?} on {}:{}", role, config.server.host, config.server.port);

    let mut server = HttpServer::new(move || {
        let app = App::new()
            .wrap(middleware::Logger::default())
            .wrap_fn(fresh_log_context)
            .app_data(web::PayloadConfig::default().limit(payload_limit))
            .app_data(data.clone());
        match role {
            Role::Master => app.configure(configure_master),
            Role::Node => app.configure(configure_node),
        }
    });
    if config.server.workers > 0 {
        server = server.workers(config.server.workers);
    }

    server
        .bind((config.server.host.as_str(), config.server.port))?
        .run()
        .await
}
