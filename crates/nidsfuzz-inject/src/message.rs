//! `TuningMessage` wire format and the framing state machine that
//! reassembles one from a streamed byte buffer.

use nidsfuzz_core::error::{Error, Result};

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    NoOp = 0x00,
    EchoNodelay = 0x01,
    EchoWait = 0x02,
}

impl Opcode {
    fn from_u16(v: u16) -> Result<Opcode> {
        match v {
            0x00 => Ok(Opcode::NoOp),
            0x01 => Ok(Opcode::EchoNodelay),
            0x02 => Ok(Opcode::EchoWait),
            other => Err(Error::Injection(format!("unknown tuning opcode: {other:#x}"))),
        }
    }

    /// Chooses the opcode for a test case from whether the request and/or
    /// response bytes are non-empty. `None` means the case should be
    /// skipped (neither side sends anything).
    pub fn for_pair(request: &[u8], response: &[u8]) -> std::option::Option<Opcode> {
        match (!request.is_empty(), !response.is_empty()) {
            (true, true) => Some(Opcode::EchoWait),
            (true, false) => Some(Opcode::NoOp),
            (false, true) => Some(Opcode::EchoNodelay),
            (false, false) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuningMessage {
    pub opcode: Opcode,
    pub port: u16,
    pub data: Vec<u8>,
}

impl TuningMessage {
    pub fn new(opcode: Opcode, port: u16, data: Vec<u8>) -> TuningMessage {
        TuningMessage { opcode, port, data }
    }

    /// Serializes as `!HHL` (big-endian opcode, port, length) followed by
    /// `data`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.data.len());
        buf.extend_from_slice(&(self.opcode as u16).to_be_bytes());
        buf.extend_from_slice(&self.port.to_be_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    fn decode_header(bytes: &[u8]) -> Result<(Opcode, u16, u32)> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Injection("short tuning message header".to_string()));
        }
        let opcode = Opcode::from_u16(u16::from_be_bytes([bytes[0], bytes[1]]))?;
        let port = u16::from_be_bytes([bytes[2], bytes[3]]);
        let length = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok((opcode, port, length))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiverState {
    AwaitHeader,
    AwaitBody { opcode: Opcode, port: u16, length: u32 },
}

/// Reassembles `TuningMessage`s from a byte stream that may deliver partial
/// reads. Feed it chunks via [`Self::feed`]; completed messages are
/// returned as they become available.
#[derive(Debug)]
pub struct MessageReceiver {
    state: ReceiverState,
    buffer: Vec<u8>,
}

impl MessageReceiver {
    pub fn new() -> MessageReceiver {
        MessageReceiver {
            state: ReceiverState::AwaitHeader,
            buffer: Vec::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<TuningMessage> {
        self.buffer.extend_from_slice(bytes);
        let mut messages = Vec::new();

        loop {
            match self.state {
                ReceiverState::AwaitHeader => {
                    if self.buffer.len() < HEADER_LEN {
                        break;
                    }
                    match TuningMessage::decode_header(&self.buffer) {
                        Ok((opcode, port, length)) => {
                            self.buffer.drain(0..HEADER_LEN);
                            self.state = ReceiverState::AwaitBody { opcode, port, length };
                        }
                        Err(_) => {
                            self.buffer.clear();
                            self.state = ReceiverState::AwaitHeader;
                            break;
                        }
                    }
                }
                ReceiverState::AwaitBody { opcode, port, length } => {
                    let length = length as usize;
                    if self.buffer.len() < length {
                        break;
                    }
                    let data = self.buffer.drain(0..length).collect();
                    messages.push(TuningMessage { opcode, port, data });
                    self.state = ReceiverState::AwaitHeader;
                }
            }
        }

        messages
    }
}

impl Default for MessageReceiver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_and_feed() {
        let message = TuningMessage::new(Opcode::EchoWait, 4242, b"payload".to_vec());
        let encoded = message.encode();

        let mut receiver = MessageReceiver::new();
        let decoded = receiver.feed(&encoded);
        assert_eq!(decoded, vec![message]);
    }

    #[test]
    fn reassembles_across_partial_reads() {
        let message = TuningMessage::new(Opcode::NoOp, 1, b"ab".to_vec());
        let encoded = message.encode();

        let mut receiver = MessageReceiver::new();
        assert!(receiver.feed(&encoded[..5]).is_empty());
        let decoded = receiver.feed(&encoded[5..]);
        assert_eq!(decoded, vec![message]);
    }

    #[test]
    fn opcode_choice_matches_request_response_presence() {
        assert_eq!(Opcode::for_pair(b"req", b"resp"), Some(Opcode::EchoWait));
        assert_eq!(Opcode::for_pair(b"req", b""), Some(Opcode::NoOp));
        assert_eq!(Opcode::for_pair(b"", b"resp"), Some(Opcode::EchoNodelay));
        assert_eq!(Opcode::for_pair(b"", b""), None);
    }

    #[test]
    fn bad_header_resets_the_receiver() {
        let mut receiver = MessageReceiver::new();
        let garbage = [0xFFu8; HEADER_LEN];
        assert!(receiver.feed(&garbage).is_empty());
        assert_eq!(receiver.state, ReceiverState::AwaitHeader);
    }
}
