use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use mavlink::{
    ardupilotmega::{
        COMMAND_ACK_DATA,
        COMMAND_INT_DATA,
        COMMAND_LONG_DATA,
        MavCmd::{
            self,
            MAV_CMD_COMPONENT_ARM_DISARM,
            MAV_CMD_DO_REPOSITION,
            MAV_CMD_DO_SET_MODE,
            MAV_CMD_NAV_TAKEOFF,
        },
        MavFrame,
        MavMessage,
        MavResult::{self,
                    MAV_RESULT_ACCEPTED, MAV_RESULT_DENIED,
                    MAV_RESULT_FAILED, MAV_RESULT_UNSUPPORTED,
        },
        STATUSTEXT_DATA,
    },
    error::MessageReadError,
    MavConnection,
    MavHeader,
    MavlinkVersion,
};

use crate::MavError::{Closed, Failed, InvalidCommand, NoMavlinkDeviceFoundError, SendError,
                      UnsupportedCommand};
use crate::{heartbeat, request_stream, FlightMode, Interrupt, LocationGlobalRelative, MavError,
            MavRequest, MavResponse, Poller, Vehicle, VehicleState};

type Connection = Box<dyn MavConnection<MavMessage> + Sync + Send>;

const TIMEOUT: Duration = Duration::from_secs(10);
const READY_TIMEOUT: Duration = Duration::from_secs(30);
const WAIT_FOR_RESPONSE: Duration = Duration::from_secs(1);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);
const STREAM_RATE_HZ: u16 = 4;

const GCS_HEADER: MavHeader = MavHeader { system_id: 255, component_id: 190, sequence: 0 };

/// Vehicle reached over a MAVLink connection.
///
/// A receiver thread folds telemetry into a shared [`VehicleState`] and forwards command
/// acknowledgements; a second thread keeps a ground-station heartbeat going. Both stop on
/// [`Vehicle::close`] or drop. The heartbeat thread is joined there; the receiver is blocked in
/// `recv` and only sees the stop flag once the next frame (or a link error) arrives, so it is
/// joined only if it already finished and otherwise exits on its own, releasing its share of the
/// connection.
pub struct MavlinkVehicle {
    link: Arc<Connection>,
    header: MavHeader,
    state: Arc<Mutex<VehicleState>>,
    acks: Mutex<Receiver<COMMAND_ACK_DATA>>,
    stop: Interrupt,
    receiver: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl MavlinkVehicle {
    pub fn connect(address: &str,
                   version: MavlinkVersion,
                   wait_ready: bool,
                   interrupt: &Interrupt) -> Result<MavlinkVehicle> {
        log::info!("Connecting to {address}");
        let mut connection = mavlink::connect::<MavMessage>(address)?;
        connection.set_protocol_version(version);

        let link: Arc<Connection> = Arc::new(connection);
        let state = Arc::new(Mutex::new(VehicleState::default()));
        let stop = Interrupt::new();
        let (ack_tx, ack_rx) = mpsc::channel();

        let receiver = spawn_receiver(link.clone(), state.clone(), ack_tx, stop.clone())?;
        let heartbeat = spawn_heartbeat(link.clone(), stop.clone()).map_err(|e| {
            stop.trigger();
            e
        })?;

        let vehicle = MavlinkVehicle {
            link,
            header: GCS_HEADER,
            state,
            acks: Mutex::new(ack_rx),
            stop,
            receiver: Some(receiver),
            heartbeat: Some(heartbeat),
        };
        vehicle.establish(wait_ready, interrupt)?;
        Ok(vehicle)
    }

    fn establish(&self, wait_ready: bool, interrupt: &Interrupt) -> Result<(), MavError> {
        log::info!("Establishing a MAVLink connection... ({TIMEOUT:?})");
        let poll = Duration::from_millis(100);
        Poller::new(poll, TIMEOUT)
            .with_interrupt(interrupt)
            .until("autopilot heartbeat", || Ok::<_, MavError>(self.snapshot().last_heartbeat))
            .map_err(|e| if e.is_interrupted() { e } else { NoMavlinkDeviceFoundError() })?;

        let state = self.snapshot();
        log::info!("Heartbeat from system {} component {}", state.target_system, state.target_component);
        self.send(request_stream(state.target_system, state.target_component, STREAM_RATE_HZ))?;

        if wait_ready {
            Poller::new(poll, READY_TIMEOUT)
                .with_interrupt(interrupt)
                .until("vehicle mode and position", || {
                    Ok::<_, MavError>(self.snapshot().is_ready().then_some(()))
                })?;
            log::info!("Vehicle ready");
        }
        Ok(())
    }

    fn snapshot(&self) -> VehicleState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn is_closed(&self) -> bool {
        self.stop.is_triggered()
    }

    pub fn send(&self, msg: MavMessage) -> MavRequest {
        if self.is_closed() {
            return Err(Closed());
        }
        self.link.send(&self.header, &msg).map_err(|_| SendError())
    }

    fn command(&self, r#type: MavCmd, params: &[f32; 7]) -> MavResponse {
        let acks = self.acks.lock().unwrap_or_else(PoisonError::into_inner);
        // Acks for earlier, already answered commands.
        while acks.try_recv().is_ok() {}

        self.command_unchecked(r#type, params)?;
        await_ack(&acks, r#type)
    }

    fn command_unchecked(&self, r#type: MavCmd, params: &[f32; 7]) -> MavRequest {
        let state = self.snapshot();
        let data = MavMessage::COMMAND_LONG(
            COMMAND_LONG_DATA {
                param1: params[0],
                param2: params[1],
                param3: params[2],
                param4: params[3],
                param5: params[4],
                param6: params[5],
                param7: params[6],
                command: r#type,
                target_system: state.target_system,
                target_component: state.target_component,
                confirmation: 0,
            }
        );
        self.send(data)
    }

    fn reposition(&self, location: &LocationGlobalRelative) -> MavResponse {
        let acks = self.acks.lock().unwrap_or_else(PoisonError::into_inner);
        while acks.try_recv().is_ok() {}

        let state = self.snapshot();
        let data = MavMessage::COMMAND_INT(
            COMMAND_INT_DATA {
                // Default ground speed, no mode change, keep current yaw.
                param1: -1.,
                param2: 0.,
                param3: 0.,
                param4: f32::NAN,
                x: location.lat_int(),
                y: location.lon_int(),
                z: location.alt as f32,
                command: MAV_CMD_DO_REPOSITION,
                target_system: state.target_system,
                target_component: state.target_component,
                frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
                current: 0,
                autocontinue: 0,
            }
        );
        self.send(data)?;
        await_ack(&acks, MAV_CMD_DO_REPOSITION)
    }
}

impl Vehicle for MavlinkVehicle {
    fn state(&self) -> Result<VehicleState, MavError> {
        if self.is_closed() {
            return Err(Closed());
        }
        Ok(self.snapshot())
    }

    fn set_mode(&self, mode: FlightMode) -> MavResponse {
        log::debug!("Requesting mode {mode}");
        self.command(MAV_CMD_DO_SET_MODE,
                     &[1., mode.custom_mode() as f32, 0., 0., 0., 0., 0.])
    }

    fn arm(&self) -> MavResponse {
        self.command(MAV_CMD_COMPONENT_ARM_DISARM,
                     &[1., 0., 0., 0., 0., 0., 0.])
    }

    fn disarm(&self) -> MavResponse {
        self.command(MAV_CMD_COMPONENT_ARM_DISARM, DEFAULT_PARAMS)
    }

    fn simple_takeoff(&self, altitude: f64) -> MavResponse {
        self.command(MAV_CMD_NAV_TAKEOFF,
                     &[0., 0., 0., 0., 0., 0., altitude as f32])
    }

    fn simple_goto(&self, location: LocationGlobalRelative) -> MavResponse {
        self.reposition(&location)
    }

    fn close(&mut self) -> Result<(), MavError> {
        if self.is_closed() {
            return Ok(());
        }
        self.stop.trigger();
        if let Some(heartbeat) = self.heartbeat.take() {
            let _ = heartbeat.join();
        }
        self.receiver = self.receiver.take().and_then(reap);
        if self.receiver.is_some() {
            log::debug!("Receiver thread exits on the next frame");
        }
        log::debug!("MAVLink link closed");
        Ok(())
    }
}

impl Drop for MavlinkVehicle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

const DEFAULT_PARAMS: &[f32; 7] = &[0., 0., 0., 0., 0., 0., 0.];

fn await_ack(acks: &Receiver<COMMAND_ACK_DATA>, r#type: MavCmd) -> MavResponse {
    let start = Instant::now();
    loop {
        let remaining = WAIT_FOR_RESPONSE.saturating_sub(start.elapsed());
        let ack = match acks.recv_timeout(remaining) {
            Ok(ack) => ack,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("No COMMAND_ACK for {:?} within {WAIT_FOR_RESPONSE:?}", r#type);
                return Ok(MavResult::default());
            }
            Err(RecvTimeoutError::Disconnected) => return Err(NoMavlinkDeviceFoundError()),
        };
        if ack.command != r#type {
            continue;
        }
        return match ack.result {
            MAV_RESULT_ACCEPTED => Ok(ack.result),
            MAV_RESULT_DENIED => Err(InvalidCommand()),
            MAV_RESULT_FAILED => Err(Failed()),
            MAV_RESULT_UNSUPPORTED => Err(UnsupportedCommand()),
            MavResult::MAV_RESULT_TEMPORARILY_REJECTED => continue,
            MavResult::MAV_RESULT_IN_PROGRESS => continue,
            MavResult::MAV_RESULT_CANCELLED => continue,
        };
    }
}

/// Joins `thread` if it already finished, otherwise hands it back.
fn reap(thread: JoinHandle<()>) -> Option<JoinHandle<()>> {
    if !thread.is_finished() {
        return Some(thread);
    }
    if thread.join().is_err() {
        log::warn!("MAVLink thread panicked");
    }
    None
}

fn spawn_receiver(link: Arc<Connection>,
                  state: Arc<Mutex<VehicleState>>,
                  acks: Sender<COMMAND_ACK_DATA>,
                  stop: Interrupt) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("mavlink-rx".into()).spawn(move || {
        while !stop.is_triggered() {
            match link.recv() {
                Ok((header, msg)) => {
                    match &msg {
                        MavMessage::COMMAND_ACK(ack) => { let _ = acks.send(ack.clone()); }
                        MavMessage::STATUSTEXT(text) =>
                            log::info!("[{:?}] {}", text.severity, status_text(text)),
                        _ => (),
                    }
                    state.lock().unwrap_or_else(PoisonError::into_inner).apply(&header, &msg);
                }
                Err(MessageReadError::Io(e)) => {
                    if let std::io::ErrorKind::WouldBlock = e.kind() {
                        thread::sleep(Duration::from_millis(10));
                        continue;
                    } else {
                        log::error!("recv error: {e:?}");
                        break;
                    }
                }
                Err(e) => log::debug!("Dropped unparsable message: {e:?}"),
            }
        }
    })
}

fn spawn_heartbeat(link: Arc<Connection>, stop: Interrupt) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("mavlink-hb".into()).spawn(move || loop {
        if let Err(e) = link.send(&GCS_HEADER, &heartbeat()) {
            log::warn!("Heartbeat send failed: {e:?}");
        }
        if stop.sleep(HEARTBEAT_PERIOD).is_err() {
            break;
        }
    })
}

fn status_text(data: &STATUSTEXT_DATA) -> String {
    let text: Vec<u8> = data.text.iter().copied().take_while(|&c| c != 0).collect();
    String::from_utf8_lossy(&text).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(command: MavCmd, result: MavResult) -> COMMAND_ACK_DATA {
        COMMAND_ACK_DATA { command, result, ..Default::default() }
    }

    #[test]
    fn acks_for_other_commands_are_skipped() {
        let (tx, rx) = mpsc::channel();
        tx.send(ack(MAV_CMD_DO_SET_MODE, MAV_RESULT_ACCEPTED)).unwrap();
        tx.send(ack(MAV_CMD_NAV_TAKEOFF, MAV_RESULT_DENIED)).unwrap();
        assert!(matches!(await_ack(&rx, MAV_CMD_NAV_TAKEOFF), Err(MavError::InvalidCommand())));
    }

    #[test]
    fn ack_result_maps_to_response() {
        let (tx, rx) = mpsc::channel();
        tx.send(ack(MAV_CMD_COMPONENT_ARM_DISARM, MAV_RESULT_ACCEPTED)).unwrap();
        assert_eq!(await_ack(&rx, MAV_CMD_COMPONENT_ARM_DISARM).unwrap(), MAV_RESULT_ACCEPTED);

        tx.send(ack(MAV_CMD_COMPONENT_ARM_DISARM, MAV_RESULT_FAILED)).unwrap();
        assert!(matches!(await_ack(&rx, MAV_CMD_COMPONENT_ARM_DISARM), Err(MavError::Failed())));

        tx.send(ack(MAV_CMD_DO_REPOSITION, MAV_RESULT_UNSUPPORTED)).unwrap();
        assert!(matches!(await_ack(&rx, MAV_CMD_DO_REPOSITION), Err(MavError::UnsupportedCommand())));
    }

    #[test]
    fn in_progress_waits_for_the_final_result() {
        let (tx, rx) = mpsc::channel();
        tx.send(ack(MAV_CMD_NAV_TAKEOFF, MavResult::MAV_RESULT_IN_PROGRESS)).unwrap();
        tx.send(ack(MAV_CMD_NAV_TAKEOFF, MAV_RESULT_DENIED)).unwrap();
        assert!(matches!(await_ack(&rx, MAV_CMD_NAV_TAKEOFF), Err(MavError::InvalidCommand())));
    }

    #[test]
    fn missing_ack_counts_as_accepted() {
        let (_tx, rx) = mpsc::channel();
        let start = Instant::now();
        assert_eq!(await_ack(&rx, MAV_CMD_DO_SET_MODE).unwrap(), MAV_RESULT_ACCEPTED);
        assert!(start.elapsed() >= WAIT_FOR_RESPONSE);
    }

    #[test]
    fn lost_receiver_is_reported() {
        let (tx, rx) = mpsc::channel::<COMMAND_ACK_DATA>();
        drop(tx);
        assert!(matches!(await_ack(&rx, MAV_CMD_DO_SET_MODE),
                         Err(MavError::NoMavlinkDeviceFoundError())));
    }

    #[test]
    fn finished_threads_are_joined_running_ones_kept() {
        let done = thread::spawn(|| ());
        while !done.is_finished() {
            thread::yield_now();
        }
        assert!(reap(done).is_none());

        let (tx, rx) = mpsc::channel::<()>();
        let blocked = thread::spawn(move || {
            let _ = rx.recv();
        });
        let kept = reap(blocked).expect("blocked thread is still running");
        drop(tx);
        kept.join().unwrap();
    }
}
