//! MQTT 3.1.1 packets
//!
//! Only the subset a viewing client needs: connect, subscribe, QoS 0
//! publish, keep-alive and disconnect. Each packet travels in one binary
//! WebSocket frame.

use crate::error::{Result, SessionError};

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;
const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// CONNECT packet contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// PUBLISH packet contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// MQTT control packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck { session_present: bool, return_code: u8 },
    Publish(Publish),
    Subscribe { packet_id: u16, topics: Vec<String> },
    SubAck { packet_id: u16, return_codes: Vec<u8> },
    PingReq,
    PingResp,
    Disconnect,
}

/// Describe a CONNACK return code
pub fn connack_reason(code: u8) -> &'static str {
    match code {
        0 => "accepted",
        1 => "unacceptable protocol version",
        2 => "identifier rejected",
        3 => "server unavailable",
        4 => "bad user name or password",
        5 => "not authorized",
        _ => "unknown return code",
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| {
        SessionError::Protocol(format!("string of {} bytes exceeds 65535", s.len()))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn check_remaining_length(len: usize) -> Result<()> {
    if len > MAX_REMAINING_LENGTH {
        return Err(SessionError::Protocol(format!(
            "packet body of {} bytes exceeds the remaining length limit",
            len
        )));
    }
    Ok(())
}

/// Append an MQTT variable-length "remaining length" field
pub fn encode_remaining_length(mut len: usize, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// Decode a remaining-length field; returns the value and the bytes consumed
pub fn decode_remaining_length(bytes: &[u8]) -> Result<(usize, usize)> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, &byte) in bytes.iter().enumerate().take(4) {
        value += usize::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        multiplier *= 128;
    }
    Err(SessionError::Protocol("malformed remaining length".to_string()))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| SessionError::Protocol("packet truncated".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes([self.u8()?, self.u8()?]))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let bytes = self.bytes;
        let end = self.pos + n;
        let slice = bytes
            .get(self.pos..end)
            .ok_or_else(|| SessionError::Protocol("packet truncated".to_string()))?;
        self.pos = end;
        Ok(slice)
    }

    fn str(&mut self) -> Result<String> {
        let len = usize::from(self.u16()?);
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| SessionError::Protocol("string is not UTF-8".to_string()))
    }

    fn rest(&mut self) -> &'a [u8] {
        let bytes = self.bytes;
        self.pos = bytes.len().min(self.pos);
        let rest = &bytes[self.pos..];
        self.pos = bytes.len();
        rest
    }
}

impl Packet {
    /// Serialize to wire bytes
    ///
    /// Fails if a string field or the whole packet exceeds the MQTT limits.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let (header, body) = match self {
            Packet::Connect(connect) => {
                let mut body = Vec::new();
                put_str(&mut body, PROTOCOL_NAME)?;
                body.push(PROTOCOL_LEVEL);
                let mut flags = 0u8;
                if connect.clean_session {
                    flags |= 0x02;
                }
                if connect.username.is_some() {
                    flags |= 0x80;
                }
                if connect.password.is_some() {
                    flags |= 0x40;
                }
                body.push(flags);
                body.extend_from_slice(&connect.keep_alive.to_be_bytes());
                put_str(&mut body, &connect.client_id)?;
                if let Some(username) = &connect.username {
                    put_str(&mut body, username)?;
                }
                if let Some(password) = &connect.password {
                    put_str(&mut body, password)?;
                }
                (0x10, body)
            }
            Packet::ConnAck {
                session_present,
                return_code,
            } => (0x20, vec![u8::from(*session_present), *return_code]),
            Packet::Publish(publish) => {
                let mut body = Vec::new();
                put_str(&mut body, &publish.topic)?;
                body.extend_from_slice(&publish.payload);
                (0x30 | u8::from(publish.retain), body)
            }
            Packet::Subscribe { packet_id, topics } => {
                let mut body = packet_id.to_be_bytes().to_vec();
                for topic in topics {
                    put_str(&mut body, topic)?;
                    body.push(0);
                }
                (0x82, body)
            }
            Packet::SubAck {
                packet_id,
                return_codes,
            } => {
                let mut body = packet_id.to_be_bytes().to_vec();
                body.extend_from_slice(return_codes);
                (0x90, body)
            }
            Packet::PingReq => (0xC0, Vec::new()),
            Packet::PingResp => (0xD0, Vec::new()),
            Packet::Disconnect => (0xE0, Vec::new()),
        };

        check_remaining_length(body.len())?;
        let mut buf = Vec::with_capacity(body.len() + 5);
        buf.push(header);
        encode_remaining_length(body.len(), &mut buf);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Parse one packet from wire bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = *bytes
            .first()
            .ok_or_else(|| SessionError::Protocol("empty packet".to_string()))?;
        let (remaining, consumed) = decode_remaining_length(&bytes[1..])?;
        let body = bytes
            .get(1 + consumed..)
            .filter(|body| body.len() == remaining)
            .ok_or_else(|| SessionError::Protocol("length mismatch".to_string()))?;

        let mut reader = Reader { bytes: body, pos: 0 };
        let flags = header & 0x0F;

        let packet = match header >> 4 {
            1 => {
                let name = reader.str()?;
                let level = reader.u8()?;
                if name != PROTOCOL_NAME || level != PROTOCOL_LEVEL {
                    return Err(SessionError::Protocol(format!(
                        "unsupported protocol {} level {}",
                        name, level
                    )));
                }
                let connect_flags = reader.u8()?;
                let keep_alive = reader.u16()?;
                let client_id = reader.str()?;
                let username = if connect_flags & 0x80 != 0 {
                    Some(reader.str()?)
                } else {
                    None
                };
                let password = if connect_flags & 0x40 != 0 {
                    Some(reader.str()?)
                } else {
                    None
                };
                Packet::Connect(Connect {
                    client_id,
                    keep_alive,
                    clean_session: connect_flags & 0x02 != 0,
                    username,
                    password,
                })
            }
            2 => Packet::ConnAck {
                session_present: reader.u8()? & 0x01 != 0,
                return_code: reader.u8()?,
            },
            3 => {
                let qos = (flags >> 1) & 0x03;
                let topic = reader.str()?;
                if qos > 0 {
                    reader.u16()?;
                }
                Packet::Publish(Publish {
                    topic,
                    payload: reader.rest().to_vec(),
                    retain: flags & 0x01 != 0,
                })
            }
            8 => {
                let packet_id = reader.u16()?;
                let mut topics = Vec::new();
                while reader.pos < body.len() {
                    topics.push(reader.str()?);
                    reader.u8()?;
                }
                Packet::Subscribe { packet_id, topics }
            }
            9 => Packet::SubAck {
                packet_id: reader.u16()?,
                return_codes: reader.rest().to_vec(),
            },
            12 => Packet::PingReq,
            13 => Packet::PingResp,
            14 => Packet::Disconnect,
            other => {
                return Err(SessionError::Protocol(format!(
                    "unsupported packet type {}",
                    other
                )))
            }
        };

        Ok(packet)
    }
}
