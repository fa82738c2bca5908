//! The scripted flight: arm, take off, fly a circle, return to launch.
//!
//! Waypoints are dispatched on a timer without checking arrival. A slow vehicle may skip some of
//! them; the circle is only as good as `waypoint_interval` allows.

use anyhow::Result;
use com::{FlightMode, Interrupt, LocationGlobalRelative, MavError, SimConfig, SimVehicle, Vehicle};

use crate::config::MissionConfig;
use crate::waypoints;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionStage {
    Connected,
    Armed,
    Airborne,
    Circling,
    Returning,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionOutcome {
    Completed,
    Interrupted,
}

/// Owns the vehicle for the length of a mission and closes it exactly once, whichever way the
/// mission ends.
pub struct Session<V: Vehicle> {
    vehicle: V,
    released: bool,
}

impl<V: Vehicle> Session<V> {
    pub fn open(vehicle: V) -> Self {
        log::info!("Stage: {:?}", MissionStage::Connected);
        Self { vehicle, released: false }
    }

    pub fn vehicle(&self) -> &V {
        &self.vehicle
    }

    pub fn close(mut self) -> Result<(), MavError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), MavError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let closed = self.vehicle.close();
        log::info!("Stage: {:?}", MissionStage::Closed);
        log::info!("Vehicle object closed.");
        closed
    }
}

impl<V: Vehicle> Drop for Session<V> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("Closing the vehicle failed: {e}");
        }
    }
}

/// Opens the vehicle the configuration points at.
pub fn connect(config: &MissionConfig, interrupt: &Interrupt) -> Result<Box<dyn Vehicle + Send>> {
    if config.is_simulated() {
        return Ok(Box::new(SimVehicle::new(SimConfig::default())));
    }
    Ok(Box::new(com::connect(&config.endpoint, config.wait_ready, interrupt)?))
}

/// Arms in GUIDED and climbs until 95% of `target_altitude`. Returns the altitude that satisfied
/// the check.
pub fn arm_and_takeoff<V: Vehicle>(vehicle: &V,
                                   target_altitude: f64,
                                   config: &MissionConfig,
                                   interrupt: &Interrupt) -> Result<f64, MavError> {
    log::info!("Basic pre-arm checks");
    config.armable_poller(interrupt).until("vehicle to become armable", || -> Result<_, MavError> {
        if vehicle.state()?.armable {
            return Ok(Some(()));
        }
        log::info!("Waiting for vehicle to initialise...");
        Ok(None)
    })?;

    log::info!("Arming motors");
    vehicle.set_mode(FlightMode::Guided)?;
    vehicle.arm()?;

    config.poller(config.arm_timeout, interrupt).until("arming", || -> Result<_, MavError> {
        if vehicle.state()?.armed {
            return Ok(Some(()));
        }
        log::info!("Waiting for arming...");
        Ok(None)
    })?;
    log::info!("Stage: {:?}", MissionStage::Armed);

    log::info!("Taking off!");
    vehicle.simple_takeoff(target_altitude)?;

    let reached = config.poller(config.takeoff_timeout, interrupt).until("target altitude", || -> Result<_, MavError> {
        let altitude = vehicle.state()?.altitude().ok_or(MavError::NoPosition())?;
        log::info!("Altitude: {altitude:.2}");
        if waypoints::altitude_reached(altitude, target_altitude) {
            log::info!("Reached target altitude");
            return Ok(Some(altitude));
        }
        Ok(None)
    })?;
    log::info!("Stage: {:?}", MissionStage::Airborne);
    Ok(reached)
}

/// Sends one goto per circle point around the position held on entry. Returns that center.
pub fn fly_circle<V: Vehicle>(vehicle: &V,
                              radius: f64,
                              altitude: f64,
                              config: &MissionConfig,
                              interrupt: &Interrupt) -> Result<LocationGlobalRelative, MavError> {
    log::info!("Flying in a circular pattern...");
    log::info!("Stage: {:?}", MissionStage::Circling);
    let center = vehicle.state()?.location.ok_or(MavError::NoPosition())?;

    for (i, waypoint) in waypoints::circle(center, radius, altitude, config.waypoint_count).enumerate() {
        log::debug!("Waypoint {i}: {:.6}, {:.6} @ {:.1} m", waypoint.lat, waypoint.lon, waypoint.alt);
        vehicle.simple_goto(waypoint)?;
        interrupt.sleep(config.waypoint_interval)?;
    }
    Ok(center)
}

pub fn return_to_launch<V: Vehicle>(vehicle: &V,
                                    config: &MissionConfig,
                                    interrupt: &Interrupt) -> Result<(), MavError> {
    log::info!("Returning to launch...");
    log::info!("Stage: {:?}", MissionStage::Returning);
    vehicle.set_mode(FlightMode::Rtl)?;
    config.poller(config.mode_timeout, interrupt).until("RTL mode", || -> Result<_, MavError> {
        Ok(FlightMode::Rtl.confirmed_by(vehicle.state()?.mode).then_some(()))
    })
}

pub fn run<V: Vehicle>(vehicle: &V, config: &MissionConfig, interrupt: &Interrupt) -> Result<(), MavError> {
    arm_and_takeoff(vehicle, config.target_altitude, config, interrupt)?;
    fly_circle(vehicle, config.circle_radius, config.target_altitude, config, interrupt)?;
    return_to_launch(vehicle, config, interrupt)
}

/// Runs the mission and releases the vehicle. An interrupt ends the mission early but is not an
/// error; every other failure is returned after the vehicle was closed.
pub fn execute<V: Vehicle>(vehicle: V, config: &MissionConfig, interrupt: &Interrupt) -> Result<MissionOutcome> {
    let session = Session::open(vehicle);
    let outcome = match run(session.vehicle(), config, interrupt) {
        Ok(()) => Ok(MissionOutcome::Completed),
        Err(e) if e.is_interrupted() => {
            log::warn!("Mission interrupted by user.");
            Ok(MissionOutcome::Interrupted)
        }
        Err(e) => Err(e),
    };
    session.close()?;
    Ok(outcome?)
}
