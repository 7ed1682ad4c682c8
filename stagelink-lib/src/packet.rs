//! Frame-level codec for the stage transport.
//!
//! The stage expects 64-byte HID reports. The report id is carried by the
//! HID layer rather than in the data, which leaves 63 bytes of frame: a
//! two-byte preamble `[flags, len]` followed by up to 61 payload bytes and
//! zero padding. Logical commands and responses span one or more frames
//! between a `START` flag and an `END` flag.

use bytes::Bytes;
use modular_bitfield::prelude::*;
use tracing::{debug, warn};

/// Frame size excluding the HID report id.
pub const MAX_PACKET_SIZE: usize = 63;
/// Flags byte plus payload-length byte.
pub const PACKET_PREAMBLE_SIZE: usize = 2;
/// Payload bytes available per frame.
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - PACKET_PREAMBLE_SIZE;

/// A zero-length frame whose low three flag bits are all set is a
/// content-free acknowledgement, not data.
const ACK_MASK: u8 = 0x07;

#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFlags {
    pub end_of_command: bool,
    /// The device finished executing the previous host command. Always
    /// set together with `end_of_command`.
    pub host_cmd_finished: bool,
    pub start_of_command: bool,
    #[skip]
    unused: B4,
    /// Broadcast-style response to a device-info probe; any application
    /// on the host may have requested it.
    pub device_info: bool,
}

/// Split an outbound command into transmit-ready frames.
///
/// A zero-length payload produces no frames at all: the degenerate
/// `flags == START|END, len == 0` frame would read back as noise and is
/// suppressed. Callers that need a frame purely to carry flags should use
/// [`flags_only_frame`] instead.
pub fn make_packets(data: &[u8]) -> Vec<[u8; MAX_PACKET_SIZE]> {
    let mut packets = Vec::new();
    let mut idx = 0;
    loop {
        let chunk = (data.len() - idx).min(MAX_PAYLOAD_SIZE);
        let mut flags = FrameFlags::new();
        if idx == 0 {
            flags.set_start_of_command(true);
        }
        if idx + chunk == data.len() {
            flags.set_end_of_command(true);
        }

        let mut frame = [0u8; MAX_PACKET_SIZE];
        frame[0] = flags.into_bytes()[0];
        frame[1] = chunk as u8;
        frame[PACKET_PREAMBLE_SIZE..PACKET_PREAMBLE_SIZE + chunk]
            .copy_from_slice(&data[idx..idx + chunk]);

        if !(frame[0] == 0x05 && frame[1] == 0x00) {
            packets.push(frame);
        }

        idx += chunk;
        if idx >= data.len() {
            break;
        }
    }
    packets
}

/// Build a single frame carrying only flags, for out-of-band probes that
/// have no payload.
pub fn flags_only_frame(flags: FrameFlags) -> [u8; MAX_PACKET_SIZE] {
    let mut frame = [0u8; MAX_PACKET_SIZE];
    frame[0] = flags.into_bytes()[0];
    frame
}

/// Protocol events produced by reassembling inbound frames.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketEvent {
    /// The device finished the previous host command; it is safe to send
    /// the next one.
    HostCommandFinished,
    /// Content-free confirmation response.
    Ack,
    /// A fully reassembled response payload.
    Data(Bytes),
}

/// Reassembles inbound frames into logical payloads.
///
/// Exactly one assembly buffer is live at a time: `START` moves it from
/// idle to assembling (clearing stale data if a prior `END` was lost) and
/// `END` always returns it to idle, emitting an event.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    current: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reduce one inbound frame into zero or more protocol events.
    pub fn feed(&mut self, frame: &[u8]) -> Vec<PacketEvent> {
        // Preamble-only frames are noise or keep-alives.
        if frame.len() <= PACKET_PREAMBLE_SIZE {
            return Vec::new();
        }
        let flags = FrameFlags::from_bytes([frame[0]]);
        let len = frame[1] as usize;

        if flags.device_info() {
            // Another application's probe may have triggered this;
            // reassembly is unaffected.
            debug!("frame carries the device-info flag");
        }

        if PACKET_PREAMBLE_SIZE + len > frame.len() {
            warn!(len, frame_len = frame.len(), "oversized frame dropped");
            return Vec::new();
        }
        let body = &frame[PACKET_PREAMBLE_SIZE..PACKET_PREAMBLE_SIZE + len];
        let is_ack = (frame[0] & ACK_MASK) == ACK_MASK && len == 0;

        if flags.start_of_command() && !self.current.is_empty() {
            // The previous command never saw its END frame. Recover by
            // dropping the stale bytes; the data is gone either way.
            warn!(
                dropped = self.current.len(),
                "start of command while still assembling; dropping buffered bytes"
            );
            self.current.clear();
        }
        self.current.extend_from_slice(body);

        let mut events = Vec::new();
        if flags.host_cmd_finished() {
            events.push(PacketEvent::HostCommandFinished);
        }
        if flags.end_of_command() {
            let payload = Bytes::from(std::mem::take(&mut self.current));
            if is_ack {
                events.push(PacketEvent::Ack);
            } else {
                events.push(PacketEvent::Data(payload));
            }
        }
        events
    }
}
