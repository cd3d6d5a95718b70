use crawlhub::common::model::config::Config;
use crawlhub::common::state::State;
use crawlhub::configapi::ConfigApi;
use crawlhub::engine::run;
use crawlhub::utils::logger::LoggerConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&path)?;
    LoggerConfig::for_process(config.logger.as_ref()).init()?;

    let state = State::new(config).await?;
    let process = ConfigApi::initialize(&state).await?;
    run(&state, &process).await?;
    Ok(())
}
