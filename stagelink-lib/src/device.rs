//! The stage session.
//!
//! One task owns the reassembly accumulator, the completion gate and the
//! request/response correlation table; everything else talks to it over
//! channels. Responses carry no request ids, so correlation is by
//! response type (the first payload byte) and at most one request per
//! response type may be outstanding; the scheduler's one-command-at-a-
//! time discipline is what makes that safe.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, warn};

use crate::api::{ApiCommand, HID_REPORT_INPUT, HID_REPORT_INPUT_STATE, HID_REPORT_OUTPUT};
use crate::config::{ConfigPacket, Rgb, StageConfig};
use crate::device_info::DeviceInfo;
use crate::error::StageError;
use crate::inputs::StageInputs;
use crate::packet::{FrameAssembler, PacketEvent, make_packets};
use crate::scheduler::{CONFIG_WRITE_INTERVAL, CommandScheduler, Poll};
use crate::sensor_test::{SensorTestData, SensorTestMode};

/// Bounded wait for a correlated response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Number of LEDs on the platform light strip; fixed by the hardware.
const LIGHT_STRIP_LEDS: usize = 44;

/// How frames reach the stage: 64-byte HID reports tagged with a report
/// id. Opening, closing and enumerating devices is the embedder's job;
/// the session only writes. Inbound reports are handed to the session
/// through [`StageSession::push_report`].
pub trait StageTransport: Send + 'static {
    fn write_report(&mut self, report_id: u8, data: &[u8]) -> Result<(), StageError>;
}

enum Completion {
    Response {
        response_type: u8,
        tx: oneshot::Sender<Result<Bytes, StageError>>,
    },
    Ack(oneshot::Sender<Result<(), StageError>>),
}

/// A queued command once its response sender is parked in the
/// correlation table.
enum SubmissionCompletion {
    Response(u8),
    Ack(oneshot::Sender<Result<(), StageError>>),
}

struct Submission {
    data: Vec<u8>,
    completion: SubmissionCompletion,
}

enum ActorMsg {
    Submit {
        data: Vec<u8>,
        completion: Completion,
    },
    Report {
        report_id: u8,
        data: Vec<u8>,
    },
    GetInfo(oneshot::Sender<Option<DeviceInfo>>),
    SetInfo(DeviceInfo),
    GetConfig(oneshot::Sender<Option<ConfigPacket>>),
    SetConfig(ConfigPacket),
}

struct SessionActor<T: StageTransport> {
    transport: T,
    rx: mpsc::Receiver<ActorMsg>,
    assembler: FrameAssembler,
    scheduler: CommandScheduler<Submission>,
    pending_responses: HashMap<u8, oneshot::Sender<Result<Bytes, StageError>>>,
    outstanding_ack: Option<oneshot::Sender<Result<(), StageError>>>,
    inputs_tx: watch::Sender<StageInputs>,
    info: Option<DeviceInfo>,
    config: Option<ConfigPacket>,
}

impl<T: StageTransport> SessionActor<T> {
    async fn run(mut self) {
        loop {
            let deadline = self.pump();
            let throttle = deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.handle_msg(msg),
                    None => break,
                },
                _ = sleep_until(throttle), if deadline.is_some() => {}
            }
        }
        debug!("stage session closed");
    }

    /// Drive the scheduler until it has nothing releasable, returning the
    /// throttle deadline if one is pending.
    fn pump(&mut self) -> Option<Instant> {
        loop {
            match self.scheduler.poll(Instant::now()) {
                Poll::Release(submission) => self.transmit(submission),
                Poll::WaitUntil(deadline) => return Some(deadline),
                Poll::Idle => return None,
            }
        }
    }

    fn handle_msg(&mut self, msg: ActorMsg) {
        match msg {
            ActorMsg::Submit { data, completion } => self.submit(data, completion),
            ActorMsg::Report { report_id, data } => self.handle_report(report_id, &data),
            ActorMsg::GetInfo(tx) => {
                let _ = tx.send(self.info.clone());
            }
            ActorMsg::SetInfo(info) => self.info = Some(info),
            ActorMsg::GetConfig(tx) => {
                let _ = tx.send(self.config);
            }
            ActorMsg::SetConfig(packet) => self.config = Some(packet),
        }
    }

    fn submit(&mut self, data: Vec<u8>, completion: Completion) {
        let completion = match completion {
            Completion::Response { response_type, tx } => {
                match self.pending_responses.entry(response_type) {
                    Entry::Occupied(mut entry) => {
                        if entry.get().is_closed() {
                            // The previous caller gave up waiting.
                            entry.insert(tx);
                        } else {
                            let _ = tx.send(Err(StageError::RequestPending(response_type)));
                            return;
                        }
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(tx);
                    }
                }
                SubmissionCompletion::Response(response_type)
            }
            Completion::Ack(tx) => SubmissionCompletion::Ack(tx),
        };
        let is_config_write = data
            .first()
            .is_some_and(|&byte| ApiCommand::from(byte).is_config_write());
        self.scheduler
            .submit(Submission { data, completion }, is_config_write);
    }

    fn transmit(&mut self, submission: Submission) {
        let Submission { data, completion } = submission;
        debug!(
            cmd = data.first().copied().unwrap_or_default(),
            len = data.len(),
            "sending command"
        );
        let mut result = Ok(());
        for frame in make_packets(&data) {
            if let Err(err) = self.transport.write_report(HID_REPORT_OUTPUT, &frame) {
                result = Err(err);
                break;
            }
        }
        match result {
            Ok(()) => {
                if let SubmissionCompletion::Ack(tx) = completion {
                    if let Some(old) = self.outstanding_ack.replace(tx) {
                        let _ = old.send(Err(StageError::Protocol(
                            "command finished without an acknowledgement".to_string(),
                        )));
                    }
                }
            }
            Err(err) => {
                // The wire never carried the command, so no finished
                // signal will come; free the channel and surface the
                // failure to whoever submitted it.
                self.scheduler.write_failed();
                match completion {
                    SubmissionCompletion::Response(response_type) => {
                        if let Some(tx) = self.pending_responses.remove(&response_type) {
                            let _ = tx.send(Err(err));
                        }
                    }
                    SubmissionCompletion::Ack(tx) => {
                        let _ = tx.send(Err(err));
                    }
                }
            }
        }
    }

    fn handle_report(&mut self, report_id: u8, data: &[u8]) {
        match report_id {
            HID_REPORT_INPUT_STATE => match StageInputs::decode(data) {
                Ok(inputs) => {
                    self.inputs_tx.send_replace(inputs);
                }
                Err(err) => warn!(%err, "bad input-state report"),
            },
            HID_REPORT_INPUT => {
                if data.is_empty() {
                    return;
                }
                // Process the whole report's events before the scheduler
                // pumps again: an ack and the finished signal arrive in
                // the same frame, and the ack belongs to the command that
                // just finished, not the next one.
                for event in self.assembler.feed(data) {
                    self.handle_event(event);
                }
            }
            other => debug!(report_id = other, "ignoring report"),
        }
    }

    fn handle_event(&mut self, event: PacketEvent) {
        match event {
            PacketEvent::HostCommandFinished => self.scheduler.host_command_finished(),
            PacketEvent::Ack => match self.outstanding_ack.take() {
                Some(tx) => {
                    let _ = tx.send(Ok(()));
                }
                None => debug!("unsolicited ack dropped"),
            },
            PacketEvent::Data(payload) => {
                let Some(&response_type) = payload.first() else {
                    warn!("empty response payload dropped");
                    return;
                };
                match self.pending_responses.remove(&response_type) {
                    Some(tx) => {
                        let _ = tx.send(Ok(payload));
                    }
                    None => debug!(response_type, "unsolicited response dropped"),
                }
            }
        }
    }
}

/// Handle to a connected stage.
///
/// Cheap to clone; all clones talk to the same owning task. The session
/// caches at most the most recently decoded device info and
/// configuration, overwritten on each new response.
#[derive(Clone)]
pub struct StageSession {
    tx: mpsc::Sender<ActorMsg>,
    inputs_rx: watch::Receiver<StageInputs>,
}

impl StageSession {
    /// Spawn the owning task for an already opened transport.
    pub fn new<T: StageTransport>(transport: T) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let (inputs_tx, inputs_rx) = watch::channel(StageInputs::new());
        let actor = SessionActor {
            transport,
            rx,
            assembler: FrameAssembler::new(),
            scheduler: CommandScheduler::new(),
            pending_responses: HashMap::new(),
            outstanding_ack: None,
            inputs_tx,
            info: None,
            config: None,
        };
        tokio::spawn(actor.run());
        Self { tx, inputs_rx }
    }

    /// Feed one inbound HID report (report id plus payload) from the
    /// transport.
    pub async fn push_report(&self, report_id: u8, data: &[u8]) -> Result<(), StageError> {
        self.tx
            .send(ActorMsg::Report {
                report_id,
                data: data.to_vec(),
            })
            .await
            .map_err(|_| StageError::SessionClosed)
    }

    /// Blocking variant of [`StageSession::push_report`] for dedicated
    /// reader threads.
    pub fn push_report_blocking(&self, report_id: u8, data: &[u8]) -> Result<(), StageError> {
        self.tx
            .blocking_send(ActorMsg::Report {
                report_id,
                data: data.to_vec(),
            })
            .map_err(|_| StageError::SessionClosed)
    }

    /// Panel on/off state notifications, the fire-and-forget path.
    pub fn inputs(&self) -> watch::Receiver<StageInputs> {
        self.inputs_rx.clone()
    }

    /// Convenience startup sequence: device info, configuration, then an
    /// initial round of test data.
    pub async fn init(&self) -> Result<SensorTestData, StageError> {
        self.update_device_info().await?;
        self.update_config().await?;
        self.update_test_data(SensorTestMode::default()).await
    }

    pub async fn update_device_info(&self) -> Result<DeviceInfo, StageError> {
        let payload = self
            .request(
                vec![ApiCommand::GetDeviceInfo.into()],
                ApiCommand::DeviceInfoResponse.into(),
            )
            .await?;
        let info = DeviceInfo::decode(&payload)?;
        self.send_msg(ActorMsg::SetInfo(info.clone())).await?;
        Ok(info)
    }

    /// Read the configuration, using the command generation the firmware
    /// expects. Fetches device info first when it is not cached yet.
    pub async fn update_config(&self) -> Result<StageConfig, StageError> {
        let info = self.needs_info().await?;
        let cmd = if info.firmware_version < 5 {
            ApiCommand::GetConfig
        } else {
            ApiCommand::GetConfigV5
        };
        let payload = self.request(vec![cmd.into()], cmd.into()).await?;
        if payload.len() < 4 {
            return Err(StageError::InsufficientData {
                expected: 4,
                actual: payload.len(),
            });
        }
        // The record sits between a two-byte header and a trailing byte.
        let record = &payload[2..payload.len() - 1];
        let packet = ConfigPacket::decode(record, info.firmware_version)?;
        self.send_msg(ActorMsg::SetConfig(packet)).await?;
        Ok(packet.config)
    }

    /// Write a configuration back to the stage.
    ///
    /// A configuration must have been read first; writing blind is a
    /// programming error because the legacy write-back length and the
    /// firmware generation both come from the last read.
    pub async fn write_config(&self, config: StageConfig) -> Result<(), StageError> {
        let info = self
            .cached_info()
            .await?
            .ok_or(StageError::ConfigNotLoaded)?;
        let packet = self
            .cached_config()
            .await?
            .ok_or(StageError::ConfigNotLoaded)?
            .with_config(config);
        let record = packet.encode(info.firmware_version);
        let cmd = if info.firmware_version < 5 {
            ApiCommand::WriteConfig
        } else {
            ApiCommand::WriteConfigV5
        };
        let mut data = Vec::with_capacity(2 + record.len());
        data.push(cmd.into());
        data.push(record.len() as u8);
        data.extend_from_slice(&record);
        // A queued config write may sit out the once-per-second limiter
        // before its bounded response wait begins.
        self.submit_for_ack(data, CONFIG_WRITE_INTERVAL + RESPONSE_TIMEOUT)
            .await?;
        self.send_msg(ActorMsg::SetConfig(packet)).await
    }

    /// Run a sensor test. The configuration must have been read first:
    /// interpreting the readings requires the stage's sensor technology.
    pub async fn update_test_data(
        &self,
        mode: SensorTestMode,
    ) -> Result<SensorTestData, StageError> {
        let packet = self
            .cached_config()
            .await?
            .ok_or(StageError::ConfigNotLoaded)?;
        let payload = self
            .request(
                vec![ApiCommand::GetSensorTestData.into(), mode.into()],
                ApiCommand::GetSensorTestData.into(),
            )
            .await?;
        SensorTestData::decode(&payload, mode, packet.config.is_fsr())
    }

    pub async fn set_light_strip(&self, color: Rgb) -> Result<(), StageError> {
        let strip_index = 0;
        let mut data = Vec::with_capacity(3 + LIGHT_STRIP_LEDS * 3);
        data.push(ApiCommand::SetLightStrip.into());
        data.push(strip_index);
        data.push(LIGHT_STRIP_LEDS as u8);
        for _ in 0..LIGHT_STRIP_LEDS {
            data.extend_from_slice(&[color.r, color.g, color.b]);
        }
        self.submit_for_ack(data, RESPONSE_TIMEOUT).await
    }

    pub async fn factory_reset(&self) -> Result<(), StageError> {
        let info = self.needs_info().await?;
        if info.firmware_version >= 5 {
            // Factory reset restores the stored platform strip color
            // without applying it to the lights; re-send it so they
            // match.
            let config = self.needs_config().await?;
            self.set_light_strip(config.platform_strip_color).await?;
        }
        self.submit_for_ack(vec![ApiCommand::FactoryReset.into()], RESPONSE_TIMEOUT)
            .await
    }

    pub async fn force_recalibration(&self) -> Result<(), StageError> {
        self.submit_for_ack(vec![ApiCommand::ForceRecalibration.into()], RESPONSE_TIMEOUT)
            .await
    }

    pub async fn set_serial_number(&self, serial: &[u8; 16]) -> Result<(), StageError> {
        let mut data = vec![ApiCommand::SetSerialNumbers.into()];
        data.extend_from_slice(serial);
        self.submit_for_ack(data, RESPONSE_TIMEOUT).await
    }

    pub async fn set_panel_test_mode(&self, enabled: bool) -> Result<(), StageError> {
        let mode = if enabled { b'1' } else { b'0' };
        self.submit_for_ack(
            vec![ApiCommand::SetPanelTestMode.into(), mode],
            RESPONSE_TIMEOUT,
        )
        .await
    }

    async fn needs_info(&self) -> Result<DeviceInfo, StageError> {
        match self.cached_info().await? {
            Some(info) => Ok(info),
            None => self.update_device_info().await,
        }
    }

    async fn needs_config(&self) -> Result<StageConfig, StageError> {
        match self.cached_config().await? {
            Some(packet) => Ok(packet.config),
            None => self.update_config().await,
        }
    }

    async fn cached_info(&self) -> Result<Option<DeviceInfo>, StageError> {
        let (tx, rx) = oneshot::channel();
        self.send_msg(ActorMsg::GetInfo(tx)).await?;
        rx.await.map_err(|_| StageError::SessionClosed)
    }

    async fn cached_config(&self) -> Result<Option<ConfigPacket>, StageError> {
        let (tx, rx) = oneshot::channel();
        self.send_msg(ActorMsg::GetConfig(tx)).await?;
        rx.await.map_err(|_| StageError::SessionClosed)
    }

    async fn request(&self, data: Vec<u8>, response_type: u8) -> Result<Bytes, StageError> {
        let (tx, rx) = oneshot::channel();
        self.send_msg(ActorMsg::Submit {
            data,
            completion: Completion::Response { response_type, tx },
        })
        .await?;
        match timeout(RESPONSE_TIMEOUT, rx).await? {
            Ok(result) => result,
            Err(_) => Err(StageError::SessionClosed),
        }
    }

    async fn submit_for_ack(&self, data: Vec<u8>, wait: Duration) -> Result<(), StageError> {
        let (tx, rx) = oneshot::channel();
        self.send_msg(ActorMsg::Submit {
            data,
            completion: Completion::Ack(tx),
        })
        .await?;
        match timeout(wait, rx).await? {
            Ok(result) => result,
            Err(_) => Err(StageError::SessionClosed),
        }
    }

    async fn send_msg(&self, msg: ActorMsg) -> Result<(), StageError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| StageError::SessionClosed)
    }
}
