//! Tally wire protocol
//!
//! Every frame is `[kind: u8][len: u16 BE][payload]`. Payloads are capped at
//! [`MAX_PAYLOAD`] bytes; anything larger, an unknown kind or a payload of the
//! wrong size for its kind is a protocol error and ends the connection.
//!
//! | kind | frame       | payload                              |
//! |------|-------------|--------------------------------------|
//! | 0x01 | Auth        | credential (see [`super::credential`]) |
//! | 0x02 | AuthAccept  | empty                                |
//! | 0x03 | AuthReject  | empty                                |
//! | 0x10 | State       | seq u64 BE, mask u8, bits u8         |
//! | 0x11 | Heartbeat   | empty                                |

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, TallyError};
use crate::tally::WireSnapshot;

pub const HEADER_LEN: usize = 3;
pub const MAX_PAYLOAD: usize = 64;

const KIND_AUTH: u8 = 0x01;
const KIND_AUTH_ACCEPT: u8 = 0x02;
const KIND_AUTH_REJECT: u8 = 0x03;
const KIND_STATE: u8 = 0x10;
const KIND_HEARTBEAT: u8 = 0x11;

const STATE_PAYLOAD_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Auth { credential: Vec<u8> },
    AuthAccept,
    AuthReject,
    State { seq: u64, snapshot: WireSnapshot },
    Heartbeat,
}

impl Frame {
    pub fn kind(&self) -> u8 {
        match self {
            Frame::Auth { .. } => KIND_AUTH,
            Frame::AuthAccept => KIND_AUTH_ACCEPT,
            Frame::AuthReject => KIND_AUTH_REJECT,
            Frame::State { .. } => KIND_STATE,
            Frame::Heartbeat => KIND_HEARTBEAT,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Frame::Auth { .. } => "auth",
            Frame::AuthAccept => "auth-accept",
            Frame::AuthReject => "auth-reject",
            Frame::State { .. } => "state",
            Frame::Heartbeat => "heartbeat",
        }
    }

    /// Append the encoded frame to `dst`
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        match self {
            Frame::Auth { credential } => {
                if credential.is_empty() || credential.len() > MAX_PAYLOAD {
                    return Err(TallyError::protocol(format!(
                        "auth payload of {} bytes",
                        credential.len()
                    )));
                }
                dst.reserve(HEADER_LEN + credential.len());
                dst.put_u8(KIND_AUTH);
                dst.put_u16(credential.len() as u16);
                dst.put_slice(credential);
            }
            Frame::State { seq, snapshot } => {
                dst.reserve(HEADER_LEN + STATE_PAYLOAD_LEN);
                dst.put_u8(KIND_STATE);
                dst.put_u16(STATE_PAYLOAD_LEN as u16);
                dst.put_u64(*seq);
                dst.put_u8(snapshot.mask);
                dst.put_u8(snapshot.bits);
            }
            Frame::AuthAccept | Frame::AuthReject | Frame::Heartbeat => {
                dst.reserve(HEADER_LEN);
                dst.put_u8(self.kind());
                dst.put_u16(0);
            }
        }
        Ok(())
    }

    /// Take one complete frame off the front of `src`
    ///
    /// Returns `Ok(None)` when more bytes are needed; nothing is consumed in
    /// that case.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let kind = src[0];
        let len = u16::from_be_bytes([src[1], src[2]]) as usize;
        if len > MAX_PAYLOAD {
            return Err(TallyError::protocol(format!(
                "frame 0x{:02x} declares {} byte payload (max {})",
                kind, len, MAX_PAYLOAD
            )));
        }
        if src.len() < HEADER_LEN + len {
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let mut payload = src.split_to(len);

        let frame = match kind {
            KIND_AUTH => {
                if len == 0 {
                    return Err(TallyError::protocol("empty auth payload"));
                }
                Frame::Auth {
                    credential: payload.to_vec(),
                }
            }
            KIND_AUTH_ACCEPT => expect_empty(Frame::AuthAccept, len)?,
            KIND_AUTH_REJECT => expect_empty(Frame::AuthReject, len)?,
            KIND_HEARTBEAT => expect_empty(Frame::Heartbeat, len)?,
            KIND_STATE => {
                if len != STATE_PAYLOAD_LEN {
                    return Err(TallyError::protocol(format!(
                        "state payload of {} bytes, expected {}",
                        len, STATE_PAYLOAD_LEN
                    )));
                }
                let seq = payload.get_u64();
                let mask = payload.get_u8();
                let bits = payload.get_u8();
                Frame::State {
                    seq,
                    snapshot: WireSnapshot::new(mask, bits),
                }
            }
            other => {
                return Err(TallyError::protocol(format!(
                    "unknown frame kind 0x{:02x}",
                    other
                )))
            }
        };
        Ok(Some(frame))
    }
}

fn expect_empty(frame: Frame, len: usize) -> Result<Frame> {
    if len != 0 {
        return Err(TallyError::protocol(format!(
            "{} frame carries {} unexpected bytes",
            frame.name(),
            len
        )));
    }
    Ok(frame)
}

/// Read the next frame, buffering partial input in `buf`
///
/// Cancel safe: bytes already read stay in `buf` for the next call.
pub async fn read_frame<R>(reader: &mut R, buf: &mut BytesMut) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = Frame::decode(buf)? {
            return Ok(frame);
        }
        let n = reader.read_buf(buf).await?;
        if n == 0 {
            return Err(if buf.is_empty() {
                TallyError::network("connection closed by peer")
            } else {
                TallyError::protocol("connection closed mid-frame")
            });
        }
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = BytesMut::with_capacity(HEADER_LEN + MAX_PAYLOAD);
    frame.encode(&mut out)?;
    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}
