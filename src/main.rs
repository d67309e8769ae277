use std::env;

use actix_request_identifier::{IdReuse, RequestIdentifier};
use actix_web::web::Data;
use tracing_actix_web::TracingLogger;

use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use crate::database::connect::{create_db_connection_pool, run_migrations};
use crate::routes::{
    create_booking_handler, get_booking_handler, slots_handler, update_booking_handler,
    webhook_handler,
};

mod availability;
mod config;
mod database;
mod error;
mod ledger;
mod responses;
mod routes;
mod schema;
mod webhook;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // setup tracing and use bunyan formatter
    let formatting_layer = BunyanFormattingLayer::new("slotbook".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(filter_fn(|metadata| *metadata.level() <= tracing::Level::INFO))
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    let db = create_db_connection_pool();
    run_migrations(&db);

    let schedule = config::load_schedule_config();
    let reconciler = webhook::Reconciler::new(schedule.dedup_ttl);

    let server = actix_web::HttpServer::new(move || {
        actix_web::App::new()
            .wrap(RequestIdentifier::with_uuid().use_incoming_id(IdReuse::UseIncoming))
            .wrap(TracingLogger::default())
            .app_data(Data::new(db.clone()))
            .app_data(Data::new(schedule.clone()))
            .app_data(Data::new(reconciler.clone()))
            .service(slots_handler)
            .service(create_booking_handler)
            .service(update_booking_handler)
            .service(get_booking_handler)
            .service(webhook_handler)
    });

    server.bind(env::var("BIND_ADDRESS")?)?.run().await?;
    Ok(())
}
