//! Wire format — the fixed-size text frames spoken on every socket.
//!
//! Every UDP and TCP message is exactly one [`FRAME_LEN`]-byte frame:
//! a short ASCII line of space-separated tokens, null-padded to the
//! frame size. Recipients trim trailing NULs and whitespace before
//! parsing. The token vocabulary here IS the protocol; changing a verb
//! or a token order is a breaking change for every node on the LAN.

use std::fmt;

use uuid::Uuid;

// ── Framing ──────────────────────────────────────────────────────────────────

/// Size of every datagram and every TCP message, in bytes.
pub const FRAME_LEN: usize = 128;

/// One null-padded wire frame.
pub type Frame = [u8; FRAME_LEN];

/// Pad a text payload into a full frame.
///
/// Fails with [`WireError::TooLong`] if the text does not fit; the
/// protocol has no continuation frames.
pub fn pad_frame(text: &str) -> Result<Frame, WireError> {
    let bytes = text.as_bytes();
    if bytes.len() > FRAME_LEN {
        return Err(WireError::TooLong(bytes.len()));
    }
    let mut frame = [0u8; FRAME_LEN];
    frame[..bytes.len()].copy_from_slice(bytes);
    Ok(frame)
}

/// Recover the text payload from a received frame.
///
/// Invalid UTF-8 is replaced rather than rejected — the payload still
/// has to survive tokenization, so a mangled frame fails in
/// [`Message::parse`] with a useful error instead of here.
pub fn frame_text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

// ── Messages ─────────────────────────────────────────────────────────────────

/// Everything a node can say, on either socket type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Presence announcement: node id plus the TCP port it accepts
    /// sessions on. Broadcast over UDP, also valid as a TCP greeting.
    Add { id: Uuid, tcp_port: u16 },
    /// Request for the peer's node id. Opens every inbound session.
    GetUuid,
    /// Reply carrying the sender's node id.
    Uuid(Uuid),
    /// Latency probe carrying the sender's send-time, in epoch millis.
    Ping(u64),
    /// Probe echo. The timestamp is returned verbatim.
    Pong(u64),
}

impl Message {
    /// Parse one trimmed frame payload.
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let mut tokens = text.split_whitespace();
        let verb = tokens.next().ok_or(WireError::EmptyFrame)?;

        match verb {
            "add" => {
                let id = tokens.next().ok_or(WireError::MissingToken {
                    verb: "add",
                    token: "id",
                })?;
                let port = tokens.next().ok_or(WireError::MissingToken {
                    verb: "add",
                    token: "tcp_port",
                })?;
                Ok(Message::Add {
                    id: parse_id(id)?,
                    tcp_port: port
                        .parse()
                        .map_err(|_| WireError::BadNumber(port.to_string()))?,
                })
            }
            "get" => match tokens.next() {
                Some("uuid") => Ok(Message::GetUuid),
                _ => Err(WireError::MissingToken {
                    verb: "get",
                    token: "uuid",
                }),
            },
            "uuid" => {
                let id = tokens.next().ok_or(WireError::MissingToken {
                    verb: "uuid",
                    token: "id",
                })?;
                Ok(Message::Uuid(parse_id(id)?))
            }
            "ping" => Ok(Message::Ping(parse_millis(tokens.next(), "ping")?)),
            "pong" => Ok(Message::Pong(parse_millis(tokens.next(), "pong")?)),
            other => Err(WireError::UnknownVerb(other.to_string())),
        }
    }

    /// Render into a padded frame, ready to send.
    pub fn to_frame(&self) -> Frame {
        let text = self.to_string();
        // Longest rendering is `add <36-char id> <5-digit port>`, 47 bytes.
        let mut frame = [0u8; FRAME_LEN];
        frame[..text.len()].copy_from_slice(text.as_bytes());
        frame
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Add { id, tcp_port } => write!(f, "add {id} {tcp_port}"),
            Message::GetUuid => write!(f, "get uuid"),
            Message::Uuid(id) => write!(f, "uuid {id}"),
            Message::Ping(ms) => write!(f, "ping {ms}"),
            Message::Pong(ms) => write!(f, "pong {ms}"),
        }
    }
}

fn parse_id(token: &str) -> Result<Uuid, WireError> {
    Uuid::parse_str(token).map_err(|_| WireError::BadNodeId(token.to_string()))
}

fn parse_millis(token: Option<&str>, verb: &'static str) -> Result<u64, WireError> {
    let token = token.ok_or(WireError::MissingToken {
        verb,
        token: "millis",
    })?;
    token
        .parse()
        .map_err(|_| WireError::BadNumber(token.to_string()))
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("unknown verb `{0}`")]
    UnknownVerb(String),

    #[error("`{verb}` frame is missing its {token} token")]
    MissingToken { verb: &'static str, token: &'static str },

    #[error("malformed node id `{0}`")]
    BadNodeId(String),

    #[error("malformed numeric token `{0}`")]
    BadNumber(String),

    #[error("payload is {0} bytes, a frame carries at most {FRAME_LEN}")]
    TooLong(usize),
}

// ── Tests ────────────────────────────────────────────────────────────────────
