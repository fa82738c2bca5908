use anyhow::Result;
use com::Interrupt;

use crate::config::MissionConfig;
use crate::mission::MissionOutcome;

mod config;
mod mission;
mod waypoints;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = MissionConfig::from_env();
    let interrupt = Interrupt::new();

    tokio::spawn({
        let interrupt = interrupt.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupt received");
                interrupt.trigger();
            }
        }
    });

    // The vehicle is only ever touched from this one blocking thread.
    let outcome = tokio::task::spawn_blocking(move || -> Result<MissionOutcome> {
        let vehicle = mission::connect(&config, &interrupt)?;
        mission::execute(vehicle, &config, &interrupt)
    }).await??;

    log::info!("Mission finished: {outcome:?}");
    Ok(())
}
