mod appointments;
mod auth;
mod catalog;
mod config;
mod dashboard;
mod db;
mod error;
mod identity;
mod invoices;
mod models;
mod repairs;
mod routes;
mod scheduling;
mod state;
mod templates;

#[cfg(test)]
mod testing;

use actix_web::{middleware, web, App, HttpServer};

use crate::{config::Config, state::AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(err) = run().await {
        eprintln!("Startup error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let config = Config::from_env();
    let pool = db::connect(&config.database_url).await?;

    db::run_migrations(&pool).await?;
    db::seed_defaults(&pool).await?;

    let address = format!("0.0.0.0:{}", config.port);
    let state = AppState::new(pool, config);

    log::info!("Starting garage desk on http://{address}");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind(address)?
    .run()
    .await?;

    Ok(())
}
