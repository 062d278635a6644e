mod config;
mod inference;
mod routes;
mod triage;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use config::TriageConfig;
use routes::{UploadLimit, configure_routes, json_config};
use triage::error::ConfigurationError;
use triage::pipeline::TriagePipeline;

fn startup_error(e: ConfigurationError) -> std::io::Error {
    log::error!("Startup failed: {}", e);
    std::io::Error::new(std::io::ErrorKind::Other, format!("Startup failed: {}", e))
}

/// Models are loaded before the runtime starts; `pipeline` outlives the
/// server so the blocking HTTP clients are never dropped on a runtime thread.
fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = std::env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    log::info!("Loading models...");
    let config = TriageConfig::load().map_err(startup_error)?;
    let pipeline = web::Data::new(config.build_pipeline().map_err(startup_error)?);
    log::info!("All models ready to use.");

    actix_web::rt::System::new().block_on(serve(config, pipeline.clone()))
}

async fn serve(config: TriageConfig, pipeline: web::Data<TriagePipeline>) -> std::io::Result<()> {
    let bind_address = config.bind_address();
    let max_upload = config.server.max_upload_bytes;
    let limit = web::Data::new(UploadLimit(max_upload));
    // Base64 inflates uploads by a third.
    let json_limit = max_upload / 3 * 4 + 1024;

    log::info!("Starting server on {}", bind_address);
    log::info!("  POST /predict          (images + description -> issue + urgency)");
    log::info!("  POST /classify         (image only -> category)");
    log::info!("  POST /predict_urgency  (text only -> urgency)");

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(json_config(json_limit))
            .app_data(pipeline.clone())
            .app_data(limit.clone())
            .configure(configure_routes)
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server.bind(&bind_address)?.run().await
}
