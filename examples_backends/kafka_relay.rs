use tracing::{error, info};
use tracing_log_relay::{
    backend::parse_dsn,
    dispatcher::Dispatcher,
    env::{dispatcher_config_from_env, writer_configs_from_env},
    init::init_tracing,
    record::{Level, LogRecord},
};

#[tokio::main]
async fn main() {
    let dispatcher = Dispatcher::new(dispatcher_config_from_env("kafka_relay"))
        .expect("open buffer file");
    init_tracing(dispatcher.clone()).expect("set global subscriber");

    // Logged before any writer exists: goes to the buffer, replayed later.
    info!("relay starting");

    // Example DSN: zookeeper://zk1:2181,zk2:2181/logstash
    let mut configs = writer_configs_from_env();
    if configs.is_empty() {
        let dsn = std::env::var("LOG_RELAY_DSN")
            .unwrap_or_else(|_| "zookeeper://localhost:2181".to_string());
        configs.push(parse_dsn(&dsn).expect("invalid LOG_RELAY_DSN"));
    }
    dispatcher
        .add_writers(configs)
        .await
        .expect("start kafka writer");

    error!(topic = "logstash", "simulated error shipped via kafka");
    dispatcher
        .log(LogRecord::new(Level::Fatal, "direct record").with_module("demo"))
        .await;

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    dispatcher.shutdown();
}
