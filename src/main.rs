use lambda_http::{run, service_fn, Request};
use lambda_runtime::Error;
use redis_event_shipper::config::Config;
use redis_event_shipper::store::RedisStore;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    redis_event_shipper::set_up_logging();

    info!(
        "Initializing {} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::load_from_env()?;
    info!(
        "using redis database {}, key field {}, missing key policy {}",
        config.redis_database_index, config.key_field, config.missing_key_policy
    );
    let store = RedisStore::new(&config)?;

    run(service_fn(|request: Request| {
        redis_event_shipper::handler(&store, &config, request)
    }))
    .await
}
