//! Connects to the vehicle and prints its state once a second, until Ctrl-C.

use std::time::Duration;

use anyhow::Result;
use com::{Interrupt, Vehicle, VehicleState};

const ENDPOINT: &str = "tcpout:127.0.0.1:5762";

fn describe(state: &VehicleState) -> String {
    let mode = state.mode.map_or_else(|| "?".to_string(), |mode| mode.name());
    let position = state.location.map_or_else(
        || "no position".to_string(),
        |l| format!("{:.7}, {:.7} @ {:.2} m", l.lat, l.lon, l.alt),
    );
    format!(
        "mode {mode} | armed {} | armable {} | gps fix {} | ekf {} | {position}",
        state.armed, state.armable, state.gps_fix, if state.ekf_ok { "ok" } else { "bad" },
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let endpoint = std::env::var("CIRCLE_MISSION_ENDPOINT").unwrap_or_else(|_| ENDPOINT.to_string());
    let interrupt = Interrupt::new();

    tokio::spawn({
        let interrupt = interrupt.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.trigger();
            }
        }
    });

    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut vehicle = com::connect(&endpoint, false, &interrupt)?;
        while interrupt.sleep(Duration::from_secs(1)).is_ok() {
            log::info!("{}", describe(&vehicle.state()?));
        }
        vehicle.close()?;
        Ok(())
    }).await?
}

#[cfg(test)]
mod tests {
    use com::{FlightMode, LocationGlobalRelative};

    use super::*;

    #[test]
    fn describes_unknown_state() {
        let line = describe(&VehicleState::default());
        assert!(line.starts_with("mode ? | armed false"));
        assert!(line.ends_with("no position"));
    }

    #[test]
    fn describes_flying_state() {
        let state = VehicleState {
            mode: Some(FlightMode::Guided),
            armed: true,
            ekf_ok: true,
            gps_fix: 3,
            location: Some(LocationGlobalRelative::new(-35.3632621, 149.1652374, 40.)),
            ..Default::default()
        };
        let line = describe(&state);
        assert!(line.contains("mode GUIDED"));
        assert!(line.contains("gps fix 3 | ekf ok"));
        assert!(line.ends_with("-35.3632621, 149.1652374 @ 40.00 m"));
    }
}
