use std::time::Instant;

use mavlink::ardupilotmega::{
    EkfStatusFlags, MavAutopilot, MavMessage, MavModeFlag, MavState, MavType,
};
use mavlink::MavHeader;

use crate::location::LocationGlobalRelative;
use crate::mode::FlightMode;

/// Last known state of the vehicle, rebuilt from telemetry as it arrives.
#[derive(Debug, Clone, Default)]
pub struct VehicleState {
    pub armable: bool,
    pub armed: bool,
    pub mode: Option<FlightMode>,
    pub location: Option<LocationGlobalRelative>,
    pub system_status: Option<MavState>,
    pub gps_fix: u8,
    pub ekf_ok: bool,
    pub target_system: u8,
    pub target_component: u8,
    pub last_heartbeat: Option<Instant>,
}

impl VehicleState {
    /// Folds one incoming message into the state. Messages from other ground stations are ignored.
    pub fn apply(&mut self, header: &MavHeader, msg: &MavMessage) {
        match msg {
            MavMessage::HEARTBEAT(hb) => {
                if hb.mavtype == MavType::MAV_TYPE_GCS
                    || hb.autopilot == MavAutopilot::MAV_AUTOPILOT_INVALID {
                    return;
                }
                self.target_system = header.system_id;
                self.target_component = header.component_id;
                self.armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                self.mode = Some(FlightMode::from_custom_mode(hb.custom_mode));
                self.system_status = Some(hb.system_status);
                self.last_heartbeat = Some(Instant::now());
            }
            MavMessage::GLOBAL_POSITION_INT(position) =>
                self.location = Some(LocationGlobalRelative::from_global_position_int(position)),
            MavMessage::GPS_RAW_INT(gps) => self.gps_fix = gps.fix_type as u8,
            MavMessage::EKF_STATUS_REPORT(ekf) => self.ekf_ok = ekf_ok(ekf.flags),
            _ => return,
        }
        self.armable = self.compute_armable();
    }

    /// Mode and position are both known.
    pub fn is_ready(&self) -> bool {
        self.mode.is_some() && self.location.is_some()
    }

    pub fn altitude(&self) -> Option<f64> {
        self.location.map(|location| location.alt)
    }

    pub(crate) fn compute_armable(&self) -> bool {
        let booting = matches!(
            self.system_status,
            None | Some(MavState::MAV_STATE_UNINIT) | Some(MavState::MAV_STATE_BOOT)
        );
        !booting && self.gps_fix > 1 && self.ekf_ok
    }
}

/// Pre-arm EKF health, as DroneKit's `is_armable` judges it: the EKF predicts an absolute
/// horizontal position. ArduCopter runs its own, stricter checks when asked to arm.
pub fn ekf_ok(flags: EkfStatusFlags) -> bool {
    flags.contains(EkfStatusFlags::EKF_PRED_POS_HORIZ_ABS)
}
