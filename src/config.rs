use std::time::Duration;

use com::Interrupt;
use com::Poller;

/// Default flight controller link: the SITL serial-over-TCP port.
pub const ENDPOINT: &str = "tcpout:127.0.0.1:5762";
/// Endpoint value selecting the built-in simulator.
pub const SIM_ENDPOINT: &str = "sim";
pub const ENDPOINT_ENV: &str = "CIRCLE_MISSION_ENDPOINT";

pub const TARGET_ALTITUDE: f64 = 40.;
/// Circle radius in degrees, about 1 km of latitude.
pub const CIRCLE_RADIUS: f64 = 0.008983;
pub const WAYPOINT_COUNT: usize = 36;

#[derive(Debug, Clone)]
pub struct MissionConfig {
    pub endpoint: String,
    pub wait_ready: bool,
    pub target_altitude: f64,
    pub circle_radius: f64,
    pub waypoint_count: usize,
    /// Pause between two goto commands.
    pub waypoint_interval: Duration,
    pub poll_interval: Duration,
    /// Growth of the poll interval while waiting for pre-arm checks.
    pub armable_backoff: f64,
    pub max_poll_interval: Duration,
    pub armable_timeout: Duration,
    pub arm_timeout: Duration,
    pub takeoff_timeout: Duration,
    pub mode_timeout: Duration,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            endpoint: ENDPOINT.to_string(),
            wait_ready: true,
            target_altitude: TARGET_ALTITUDE,
            circle_radius: CIRCLE_RADIUS,
            waypoint_count: WAYPOINT_COUNT,
            waypoint_interval: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            armable_backoff: 1.5,
            max_poll_interval: Duration::from_secs(4),
            armable_timeout: Duration::from_secs(120),
            arm_timeout: Duration::from_secs(30),
            takeoff_timeout: Duration::from_secs(120),
            mode_timeout: Duration::from_secs(30),
        }
    }
}

impl MissionConfig {
    pub fn from_env() -> Self {
        Self::default().with_endpoint(std::env::var(ENDPOINT_ENV).ok())
    }

    fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        if let Some(endpoint) = endpoint.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()) {
            log::debug!("Endpoint overridden: {endpoint}");
            self.endpoint = endpoint;
        }
        self
    }

    pub fn is_simulated(&self) -> bool {
        self.endpoint == SIM_ENDPOINT
    }

    pub fn armable_poller(&self, interrupt: &Interrupt) -> Poller {
        Poller::new(self.poll_interval, self.armable_timeout)
            .with_backoff(self.armable_backoff, self.max_poll_interval)
            .with_interrupt(interrupt)
    }

    pub fn poller(&self, timeout: Duration, interrupt: &Interrupt) -> Poller {
        Poller::new(self.poll_interval, timeout).with_interrupt(interrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_scripted_mission() {
        let config = MissionConfig::default();
        assert_eq!(config.endpoint, "tcpout:127.0.0.1:5762");
        assert_eq!(config.target_altitude, 40.);
        assert_eq!(config.circle_radius, 0.008983);
        assert_eq!(config.waypoint_count, 36);
        assert_eq!(config.waypoint_interval, Duration::from_secs(2));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(!config.is_simulated());
    }

    #[test]
    fn endpoint_override() {
        let config = MissionConfig::default().with_endpoint(Some(" sim ".into()));
        assert!(config.is_simulated());

        let config = MissionConfig::default().with_endpoint(Some("".into()));
        assert_eq!(config.endpoint, ENDPOINT);

        let config = MissionConfig::default().with_endpoint(None);
        assert_eq!(config.endpoint, ENDPOINT);
    }

    #[test]
    fn armable_wait_backs_off() {
        let config = MissionConfig::default();
        let schedule: Vec<_> = config.armable_poller(&Interrupt::new()).intervals().take(5).collect();
        assert_eq!(schedule[0], Duration::from_secs(1));
        assert_eq!(schedule[1], Duration::from_millis(1500));
        assert_eq!(schedule[4], Duration::from_secs(4));

        let fixed = config.poller(config.mode_timeout, &Interrupt::new());
        assert_eq!(fixed.timeout(), Duration::from_secs(30));
        assert!(fixed.intervals().take(3).all(|d| d == Duration::from_secs(1)));
    }
}
