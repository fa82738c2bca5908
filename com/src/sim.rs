//! Kinematic copter simulator.
//!
//! Time advances one tick per call on the vehicle, so a run is deterministic no matter how fast
//! the caller polls. Commands take effect `latency_ticks` later, the way a real autopilot only
//! reports a change on a following heartbeat.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use mavlink::ardupilotmega::{MavResult, MavState};

use crate::MavError::{Closed, InvalidCommand};
use crate::{FlightMode, LocationGlobalRelative, MavError, MavResponse, Vehicle, VehicleState};

const ACCEPTED: MavResponse = Ok(MavResult::MAV_RESULT_ACCEPTED);
const ARRIVAL_RADIUS_M: f64 = 1.;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub home: LocationGlobalRelative,
    /// Ticks before pre-arm checks pass.
    pub boot_ticks: u32,
    pub latency_ticks: u32,
    /// Simulated seconds per tick.
    pub tick_s: f64,
    pub climb_rate: f64,
    pub ground_speed: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            home: LocationGlobalRelative::new(-35.363261, 149.165230, 0.),
            boot_ticks: 3,
            latency_ticks: 2,
            tick_s: 1.,
            climb_rate: 2.5,
            ground_speed: 10.,
        }
    }
}

/// Command as received by the simulator, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    SetMode(FlightMode),
    Arm,
    Disarm,
    Takeoff(f64),
    Goto(LocationGlobalRelative),
}

#[derive(Debug)]
struct Sim {
    config: SimConfig,
    ticks: u32,
    position: LocationGlobalRelative,
    armed: bool,
    mode: FlightMode,
    target_alt: Option<f64>,
    target: Option<LocationGlobalRelative>,
    pending_mode: Option<(u32, FlightMode)>,
    pending_armed: Option<(u32, bool)>,
    commands: Vec<SimCommand>,
    closes: usize,
}

impl Sim {
    fn new(config: SimConfig) -> Self {
        Self {
            position: config.home,
            config,
            ticks: 0,
            armed: false,
            mode: FlightMode::Stabilize,
            target_alt: None,
            target: None,
            pending_mode: None,
            pending_armed: None,
            commands: Vec::new(),
            closes: 0,
        }
    }

    fn is_armable(&self) -> bool {
        self.ticks >= self.config.boot_ticks
    }

    fn due(&self) -> u32 {
        self.ticks + self.config.latency_ticks
    }

    fn step(&mut self) {
        self.ticks += 1;

        if let Some((due, mode)) = self.pending_mode {
            if due <= self.ticks {
                self.mode = mode;
                self.pending_mode = None;
            }
        }
        if let Some((due, armed)) = self.pending_armed {
            if due <= self.ticks {
                self.armed = armed;
                self.pending_armed = None;
            }
        }
        if !self.armed {
            return;
        }

        let climb = self.config.climb_rate * self.config.tick_s;
        let travel = self.config.ground_speed * self.config.tick_s;
        match self.mode {
            FlightMode::Guided => {
                if let Some(target_alt) = self.target_alt {
                    self.position.alt = approach(self.position.alt, target_alt, climb);
                }
                if let Some(target) = self.target {
                    if self.position.alt > 0. {
                        self.position = self.position.stepped_towards(&target, travel);
                    }
                }
            }
            FlightMode::Rtl => {
                let home = self.config.home;
                if self.position.ground_distance_m(&home) > ARRIVAL_RADIUS_M {
                    self.position = self.position.stepped_towards(&home, travel);
                } else {
                    self.descend(climb);
                }
            }
            FlightMode::Land => self.descend(climb),
            _ => (),
        }
    }

    fn descend(&mut self, rate: f64) {
        self.position.alt = approach(self.position.alt, 0., rate);
        if self.position.alt <= 0. {
            log::debug!("Sim: landed, disarming");
            self.armed = false;
            self.target_alt = None;
            self.target = None;
        }
    }

    fn snapshot(&self) -> VehicleState {
        let booted = self.is_armable();
        VehicleState {
            armable: booted,
            armed: self.armed,
            mode: Some(self.mode),
            location: Some(self.position),
            system_status: Some(match (booted, self.armed) {
                (false, _) => MavState::MAV_STATE_BOOT,
                (true, false) => MavState::MAV_STATE_STANDBY,
                (true, true) => MavState::MAV_STATE_ACTIVE,
            }),
            gps_fix: if booted { 3 } else { 0 },
            ekf_ok: booted,
            target_system: 1,
            target_component: 1,
            last_heartbeat: Some(Instant::now()),
        }
    }
}

fn approach(current: f64, target: f64, step: f64) -> f64 {
    if (target - current).abs() <= step {
        target
    } else {
        current + step.copysign(target - current)
    }
}

/// In-process [`Vehicle`] for tests and dry runs.
#[derive(Debug)]
pub struct SimVehicle {
    sim: Arc<Mutex<Sim>>,
}

/// Read-only view on a [`SimVehicle`] that stays usable after the vehicle has been moved away.
#[derive(Debug, Clone)]
pub struct SimHandle {
    sim: Arc<Mutex<Sim>>,
}

impl SimVehicle {
    pub fn new(config: SimConfig) -> Self {
        log::info!("Starting simulated vehicle at {:?}", config.home);
        Self { sim: Arc::new(Mutex::new(Sim::new(config))) }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle { sim: self.sim.clone() }
    }

    /// Advances one tick and hands out the simulation, unless closed.
    fn tick(&self) -> Result<MutexGuard<'_, Sim>, MavError> {
        let mut sim = lock(&self.sim);
        if sim.closes > 0 {
            return Err(Closed());
        }
        sim.step();
        Ok(sim)
    }
}

impl Default for SimVehicle {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl Vehicle for SimVehicle {
    fn state(&self) -> Result<VehicleState, MavError> {
        Ok(self.tick()?.snapshot())
    }

    fn set_mode(&self, mode: FlightMode) -> MavResponse {
        let mut sim = self.tick()?;
        sim.commands.push(SimCommand::SetMode(mode));
        sim.pending_mode = Some((sim.due(), mode));
        ACCEPTED
    }

    fn arm(&self) -> MavResponse {
        let mut sim = self.tick()?;
        sim.commands.push(SimCommand::Arm);
        if !sim.is_armable() {
            log::warn!("Sim: arming refused, pre-arm checks pending");
            return Err(InvalidCommand());
        }
        sim.pending_armed = Some((sim.due(), true));
        ACCEPTED
    }

    fn disarm(&self) -> MavResponse {
        let mut sim = self.tick()?;
        sim.commands.push(SimCommand::Disarm);
        if sim.position.alt > 0. {
            return Err(InvalidCommand());
        }
        sim.pending_armed = Some((sim.due(), false));
        ACCEPTED
    }

    fn simple_takeoff(&self, altitude: f64) -> MavResponse {
        let mut sim = self.tick()?;
        sim.commands.push(SimCommand::Takeoff(altitude));
        if !sim.armed || sim.mode != FlightMode::Guided {
            return Err(InvalidCommand());
        }
        sim.target_alt = Some(altitude);
        ACCEPTED
    }

    fn simple_goto(&self, location: LocationGlobalRelative) -> MavResponse {
        let mut sim = self.tick()?;
        sim.commands.push(SimCommand::Goto(location));
        if !sim.armed || sim.mode != FlightMode::Guided {
            return Err(InvalidCommand());
        }
        sim.target = Some(location);
        sim.target_alt = Some(location.alt);
        ACCEPTED
    }

    fn close(&mut self) -> Result<(), MavError> {
        let mut sim = lock(&self.sim);
        sim.closes += 1;
        log::debug!("Sim: closed ({} time(s))", sim.closes);
        Ok(())
    }
}

impl SimHandle {
    pub fn commands(&self) -> Vec<SimCommand> {
        lock(&self.sim).commands.clone()
    }

    pub fn gotos(&self) -> Vec<LocationGlobalRelative> {
        lock(&self.sim)
            .commands
            .iter()
            .filter_map(|command| match command {
                SimCommand::Goto(location) => Some(*location),
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        lock(&self.sim).closes
    }

    pub fn ticks(&self) -> u32 {
        lock(&self.sim).ticks
    }

    /// Current state, without advancing time.
    pub fn peek(&self) -> VehicleState {
        lock(&self.sim).snapshot()
    }
}

fn lock(sim: &Mutex<Sim>) -> MutexGuard<'_, Sim> {
    sim.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll_until(vehicle: &SimVehicle, done: impl Fn(&VehicleState) -> bool) -> VehicleState {
        for _ in 0..1000 {
            let state = vehicle.state().unwrap();
            if done(&state) {
                return state;
            }
        }
        panic!("simulation never reached the expected state");
    }

    #[test]
    fn boots_before_it_can_arm() {
        let vehicle = SimVehicle::default();
        assert!(matches!(vehicle.arm(), Err(MavError::InvalidCommand())));
        let state = poll_until(&vehicle, |s| s.armable);
        assert_eq!(state.system_status, Some(MavState::MAV_STATE_STANDBY));
        assert!(vehicle.arm().is_ok());
    }

    #[test]
    fn commands_apply_after_latency() {
        let vehicle = SimVehicle::new(SimConfig { latency_ticks: 3, ..Default::default() });
        vehicle.set_mode(FlightMode::Guided).unwrap();
        assert_eq!(vehicle.state().unwrap().mode, Some(FlightMode::Stabilize));
        assert_eq!(vehicle.state().unwrap().mode, Some(FlightMode::Stabilize));
        assert_eq!(vehicle.state().unwrap().mode, Some(FlightMode::Guided));
    }

    #[test]
    fn takeoff_needs_guided_and_armed() {
        let vehicle = SimVehicle::new(SimConfig { boot_ticks: 0, ..Default::default() });
        assert!(vehicle.simple_takeoff(10.).is_err());

        vehicle.set_mode(FlightMode::Guided).unwrap();
        vehicle.arm().unwrap();
        poll_until(&vehicle, |s| s.armed);
        vehicle.simple_takeoff(10.).unwrap();

        let state = poll_until(&vehicle, |s| s.altitude() == Some(10.));
        assert_eq!(state.location.unwrap().lat, SimConfig::default().home.lat);
    }

    #[test]
    fn climbs_at_configured_rate() {
        let vehicle = SimVehicle::new(SimConfig {
            boot_ticks: 0,
            latency_ticks: 0,
            climb_rate: 2.,
            ..Default::default()
        });
        vehicle.set_mode(FlightMode::Guided).unwrap();
        vehicle.arm().unwrap();
        vehicle.simple_takeoff(40.).unwrap();
        let climb: Vec<f64> = (0..3).map(|_| vehicle.state().unwrap().altitude().unwrap()).collect();
        assert_eq!(climb, vec![2., 4., 6.]);
    }

    #[test]
    fn rtl_flies_home_lands_and_disarms() {
        let home = SimConfig::default().home;
        let vehicle = SimVehicle::new(SimConfig { boot_ticks: 0, ..Default::default() });
        vehicle.set_mode(FlightMode::Guided).unwrap();
        vehicle.arm().unwrap();
        poll_until(&vehicle, |s| s.armed);
        vehicle.simple_goto(LocationGlobalRelative::new(home.lat + 0.001, home.lon, 20.)).unwrap();
        poll_until(&vehicle, |s| s.location.unwrap().lat > home.lat + 0.0009);

        vehicle.set_mode(FlightMode::Rtl).unwrap();
        let landed = poll_until(&vehicle, |s| !s.armed);
        let position = landed.location.unwrap();
        assert_eq!(position.alt, 0.);
        assert!(position.ground_distance_m(&home) <= ARRIVAL_RADIUS_M);
    }

    #[test]
    fn disarms_on_the_ground_only() {
        let vehicle = SimVehicle::new(SimConfig { boot_ticks: 0, ..Default::default() });
        let handle = vehicle.handle();
        vehicle.set_mode(FlightMode::Guided).unwrap();
        vehicle.arm().unwrap();
        poll_until(&vehicle, |s| s.armed);
        vehicle.disarm().unwrap();
        poll_until(&vehicle, |s| !s.armed);

        vehicle.arm().unwrap();
        poll_until(&vehicle, |s| s.armed);
        vehicle.simple_takeoff(10.).unwrap();
        poll_until(&vehicle, |s| s.altitude() > Some(0.));
        assert!(matches!(vehicle.disarm(), Err(MavError::InvalidCommand())));
        assert!(vehicle.state().unwrap().armed);
        let disarms = handle.commands().into_iter().filter(|c| *c == SimCommand::Disarm).count();
        assert_eq!(disarms, 2);
    }

    #[test]
    fn closed_vehicle_rejects_calls() {
        let mut vehicle = SimVehicle::default();
        let handle = vehicle.handle();
        vehicle.close().unwrap();
        assert!(matches!(vehicle.state(), Err(MavError::Closed())));
        assert!(matches!(vehicle.arm(), Err(MavError::Closed())));
        assert_eq!(handle.close_count(), 1);
        assert_eq!(handle.commands(), vec![]);
    }
}
