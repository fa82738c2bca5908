use mavlink::ardupilotmega::{self, MavMessage, MavResult};
use thiserror::Error;

pub use mavlink::MavlinkVersion as Mavlink;

pub use crate::link::MavlinkVehicle;
pub use crate::location::LocationGlobalRelative;
pub use crate::mode::FlightMode;
pub use crate::sim::{SimCommand, SimConfig, SimHandle, SimVehicle};
pub use crate::state::VehicleState;
pub use crate::wait::{Interrupt, Poller, WaitError};

mod link;
mod location;
mod mode;
mod sim;
mod state;
mod wait;

pub type MavRequest = Result<usize, MavError>;
pub type MavResponse = Result<MavResult, MavError>;

#[derive(Error, Debug)]
pub enum MavError {
    #[error("Failed")] Failed(),
    #[error("Command rejected")] InvalidCommand(),
    #[error("Command unsupported")] UnsupportedCommand(),
    #[error("Unable to communicate")] SendError(),
    #[error("No MAVLink device found (disconnected)")] NoMavlinkDeviceFoundError(),
    #[error("Vehicle position is not known yet")] NoPosition(),
    #[error("Vehicle connection is closed")] Closed(),
    #[error(transparent)] Wait(#[from] WaitError),
}

impl MavError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, MavError::Wait(WaitError::Interrupted))
    }
}

/// A connected vehicle.
///
/// Reads return a snapshot of the last known state; commands return once the autopilot
/// acknowledged them, which does not mean the vehicle has acted on them yet.
pub trait Vehicle {
    fn state(&self) -> Result<VehicleState, MavError>;

    fn set_mode(&self, mode: FlightMode) -> MavResponse;

    fn arm(&self) -> MavResponse;

    fn disarm(&self) -> MavResponse;

    /// Climb to `altitude` meters above home. Needs GUIDED mode and armed motors.
    fn simple_takeoff(&self, altitude: f64) -> MavResponse;

    /// Fly to `location` in GUIDED mode.
    fn simple_goto(&self, location: LocationGlobalRelative) -> MavResponse;

    /// Releases the link. Later calls on the vehicle fail with [`MavError::Closed`].
    fn close(&mut self) -> Result<(), MavError>;
}

impl<V: Vehicle + ?Sized> Vehicle for Box<V> {
    fn state(&self) -> Result<VehicleState, MavError> {
        (**self).state()
    }

    fn set_mode(&self, mode: FlightMode) -> MavResponse {
        (**self).set_mode(mode)
    }

    fn arm(&self) -> MavResponse {
        (**self).arm()
    }

    fn disarm(&self) -> MavResponse {
        (**self).disarm()
    }

    fn simple_takeoff(&self, altitude: f64) -> MavResponse {
        (**self).simple_takeoff(altitude)
    }

    fn simple_goto(&self, location: LocationGlobalRelative) -> MavResponse {
        (**self).simple_goto(location)
    }

    fn close(&mut self) -> Result<(), MavError> {
        (**self).close()
    }
}

/// Opens a MAVLink v2 link to `address` (e.g. `tcpout:127.0.0.1:5762`).
///
/// With `wait_ready` the call also waits until the vehicle reported its mode and position. Raising
/// `interrupt` abandons either wait.
pub fn connect(address: &str, wait_ready: bool, interrupt: &Interrupt) -> anyhow::Result<MavlinkVehicle> {
    MavlinkVehicle::connect(address, Mavlink::V2, wait_ready, interrupt)
}

/// Heartbeat identifying this program as a ground station.
pub fn heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(ardupilotmega::HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: ardupilotmega::MavType::MAV_TYPE_GCS,
        autopilot: ardupilotmega::MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: ardupilotmega::MavModeFlag::empty(),
        system_status: ardupilotmega::MavState::MAV_STATE_ACTIVE,
        mavlink_version: 0x3,
    })
}

/// Asks the autopilot to stream every telemetry group at `rate_hz`.
pub fn request_stream(target_system: u8, target_component: u8, rate_hz: u16) -> MavMessage {
    MavMessage::REQUEST_DATA_STREAM(
        ardupilotmega::REQUEST_DATA_STREAM_DATA {
            target_system,
            target_component,
            req_stream_id: 0,
            req_message_rate: rate_hz,
            start_stop: 1,
        },
    )
}
