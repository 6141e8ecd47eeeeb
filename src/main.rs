use reader_gateway::{
    config::Config,
    domain::MemoryStore,
    gateway::{ConnectionManager, GatewayServices},
    server::{Server, ServerConfig},
    telemetry,
};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let config = Config::load()?;
    tracing::info!("Loaded configuration: {:?}", config);

    // Records live for the lifetime of the process.
    let services = GatewayServices::from_store(MemoryStore::new(), config.gateway.clone());
    let gateway = ConnectionManager::new(services);

    let server_config = ServerConfig {
        host: &config.server.host,
        port: config.server.port,
    };
    let server = Server::new(gateway, server_config).await?;
    server.run().await
}
