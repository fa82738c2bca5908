use std::fmt;

use mavlink::ardupilotmega::CopterMode::{self, *};
use num_traits::FromPrimitive;

/// ArduCopter flight mode as reported in the heartbeat `custom_mode` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightMode {
    Stabilize,
    Acro,
    AltHold,
    Auto,
    Guided,
    Loiter,
    Rtl,
    Circle,
    Land,
    PosHold,
    Drift,
    Sport,
    Flip,
    AutoTune,
    Brake,
    Throw,
    AvoidAdsb,
    GuidedNoGps,
    SmartRtl,
    FlowHold,
    Follow,
    ZigZag,
    SystemId,
    AutoRotate,
    AutoRtl,
    /// A custom mode this crate has no name for.
    Other(u32),
}

const NAMED: &[(FlightMode, CopterMode, &str)] = &[
    (FlightMode::Stabilize, COPTER_MODE_STABILIZE, "STABILIZE"),
    (FlightMode::Acro, COPTER_MODE_ACRO, "ACRO"),
    (FlightMode::AltHold, COPTER_MODE_ALT_HOLD, "ALT_HOLD"),
    (FlightMode::Auto, COPTER_MODE_AUTO, "AUTO"),
    (FlightMode::Guided, COPTER_MODE_GUIDED, "GUIDED"),
    (FlightMode::Loiter, COPTER_MODE_LOITER, "LOITER"),
    (FlightMode::Rtl, COPTER_MODE_RTL, "RTL"),
    (FlightMode::Circle, COPTER_MODE_CIRCLE, "CIRCLE"),
    (FlightMode::Land, COPTER_MODE_LAND, "LAND"),
    (FlightMode::Drift, COPTER_MODE_DRIFT, "DRIFT"),
    (FlightMode::Sport, COPTER_MODE_SPORT, "SPORT"),
    (FlightMode::Flip, COPTER_MODE_FLIP, "FLIP"),
    (FlightMode::AutoTune, COPTER_MODE_AUTOTUNE, "AUTOTUNE"),
    (FlightMode::PosHold, COPTER_MODE_POSHOLD, "POSHOLD"),
    (FlightMode::Brake, COPTER_MODE_BRAKE, "BRAKE"),
    (FlightMode::Throw, COPTER_MODE_THROW, "THROW"),
    (FlightMode::AvoidAdsb, COPTER_MODE_AVOID_ADSB, "AVOID_ADSB"),
    (FlightMode::GuidedNoGps, COPTER_MODE_GUIDED_NOGPS, "GUIDED_NOGPS"),
    (FlightMode::SmartRtl, COPTER_MODE_SMART_RTL, "SMART_RTL"),
    (FlightMode::FlowHold, COPTER_MODE_FLOWHOLD, "FLOWHOLD"),
    (FlightMode::Follow, COPTER_MODE_FOLLOW, "FOLLOW"),
    (FlightMode::ZigZag, COPTER_MODE_ZIGZAG, "ZIGZAG"),
    (FlightMode::SystemId, COPTER_MODE_SYSTEMID, "SYSTEMID"),
    (FlightMode::AutoRotate, COPTER_MODE_AUTOROTATE, "AUTOROTATE"),
    (FlightMode::AutoRtl, COPTER_MODE_AUTO_RTL, "AUTO_RTL"),
];

impl FlightMode {
    pub fn from_custom_mode(custom_mode: u32) -> Self {
        CopterMode::from_u32(custom_mode)
            .and_then(|copter| NAMED.iter().find(|(_, c, _)| *c == copter))
            .map(|(mode, _, _)| *mode)
            .unwrap_or(FlightMode::Other(custom_mode))
    }

    pub fn custom_mode(&self) -> u32 {
        match self {
            FlightMode::Other(raw) => *raw,
            named => NAMED
                .iter()
                .find(|(mode, _, _)| mode == named)
                .map(|(_, copter, _)| *copter as u32)
                .unwrap_or_default(),
        }
    }

    /// Upper-case name, as ground stations display it.
    pub fn name(&self) -> String {
        match self {
            FlightMode::Other(raw) => format!("MODE({raw})"),
            named => NAMED
                .iter()
                .find(|(mode, _, _)| mode == named)
                .map(|(_, _, name)| name.to_string())
                .unwrap_or_default(),
        }
    }

    /// True only when the reported mode's name is exactly `self`'s name.
    pub fn confirmed_by(&self, reported: Option<FlightMode>) -> bool {
        reported.map_or(false, |mode| mode.name() == self.name())
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_mode_numbers_match_arducopter() {
        assert_eq!(FlightMode::Stabilize.custom_mode(), 0);
        assert_eq!(FlightMode::Guided.custom_mode(), 4);
        assert_eq!(FlightMode::Rtl.custom_mode(), 6);
        assert_eq!(FlightMode::Land.custom_mode(), 9);
        assert_eq!(FlightMode::from_custom_mode(4), FlightMode::Guided);
        assert_eq!(FlightMode::from_custom_mode(6), FlightMode::Rtl);
    }

    #[test]
    fn unnamed_modes_keep_their_number() {
        let mode = FlightMode::from_custom_mode(250);
        assert_eq!(mode, FlightMode::Other(250));
        assert_eq!(mode.custom_mode(), 250);
        assert_eq!(mode.name(), "MODE(250)");
    }

    #[test]
    fn confirmation_requires_exact_name() {
        assert!(FlightMode::Rtl.confirmed_by(Some(FlightMode::Rtl)));
        assert!(!FlightMode::Rtl.confirmed_by(Some(FlightMode::SmartRtl)));
        assert!(!FlightMode::Rtl.confirmed_by(Some(FlightMode::Guided)));
        assert!(!FlightMode::Rtl.confirmed_by(None));
    }

    #[test]
    fn every_arducopter_mode_has_a_name() {
        assert_eq!(FlightMode::from_custom_mode(11), FlightMode::Drift);
        assert_eq!(FlightMode::from_custom_mode(20).name(), "GUIDED_NOGPS");
        assert_eq!(FlightMode::from_custom_mode(27).name(), "AUTO_RTL");
        for raw in [0, 1, 2, 3, 4, 5, 6, 7, 9, 11, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27] {
            let mode = FlightMode::from_custom_mode(raw);
            assert!(!matches!(mode, FlightMode::Other(_)), "custom mode {raw}");
            assert_eq!(mode.custom_mode(), raw);
        }
        assert!(!FlightMode::Guided.confirmed_by(Some(FlightMode::GuidedNoGps)));
    }
}
