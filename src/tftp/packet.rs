//! TFTP wire format (RFC 1350, with RFC 2347 option extension).

use crate::error::TftpError;

/// TFTP opcodes
const OPCODE_RRQ: u16 = 1; // Read request
const OPCODE_WRQ: u16 = 2; // Write request (not supported)
const OPCODE_DATA: u16 = 3; // Data packet
const OPCODE_ACK: u16 = 4; // Acknowledgment
const OPCODE_ERROR: u16 = 5; // Error
const OPCODE_OACK: u16 = 6; // Option acknowledgment (RFC 2347)

/// TFTP error codes used by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    NotDefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    IllegalOperation = 4,
    UnknownTransferId = 5,
}

/// A read or write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub filename: String,
    /// Transfer mode, lowercased.
    pub mode: String,
    /// Requested options in the order sent; names lowercased.
    pub options: Vec<(String, String)>,
}

impl Request {
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ReadRequest(Request),
    WriteRequest(Request),
    Data { block: u16, data: Vec<u8> },
    Ack(u16),
    Error { code: u16, message: String },
    OptionAck(Vec<(String, String)>),
}

impl Packet {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code: code as u16,
            message: message.into(),
        }
    }

    /// Decode a datagram.
    pub fn parse(data: &[u8]) -> Result<Self, TftpError> {
        if data.len() < 2 {
            return Err(TftpError::PacketTooShort(data.len()));
        }

        let opcode = u16::from_be_bytes([data[0], data[1]]);
        let body = &data[2..];

        match opcode {
            OPCODE_RRQ => Ok(Self::ReadRequest(parse_request(body)?)),
            OPCODE_WRQ => Ok(Self::WriteRequest(parse_request(body)?)),
            OPCODE_DATA => {
                let block = read_u16(data)?;
                Ok(Self::Data {
                    block,
                    data: data[4..].to_vec(),
                })
            }
            OPCODE_ACK => Ok(Self::Ack(read_u16(data)?)),
            OPCODE_ERROR => {
                let code = read_u16(data)?;
                let message = data[4..].split(|b| *b == 0).next().unwrap_or_default();
                Ok(Self::Error {
                    code,
                    message: String::from_utf8_lossy(message).into_owned(),
                })
            }
            OPCODE_OACK => {
                let fields = split_fields(body)?;
                Ok(Self::OptionAck(pairs(&fields)))
            }
            other => Err(TftpError::UnknownOpcode(other)),
        }
    }

    /// Encode for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();

        match self {
            Self::ReadRequest(request) | Self::WriteRequest(request) => {
                let opcode = if matches!(self, Self::ReadRequest(_)) {
                    OPCODE_RRQ
                } else {
                    OPCODE_WRQ
                };
                out.extend_from_slice(&opcode.to_be_bytes());
                push_str(&mut out, &request.filename);
                push_str(&mut out, &request.mode);
                for (name, value) in &request.options {
                    push_str(&mut out, name);
                    push_str(&mut out, value);
                }
            }
            Self::Data { block, data } => {
                out.extend_from_slice(&OPCODE_DATA.to_be_bytes());
                out.extend_from_slice(&block.to_be_bytes());
                out.extend_from_slice(data);
            }
            Self::Ack(block) => {
                out.extend_from_slice(&OPCODE_ACK.to_be_bytes());
                out.extend_from_slice(&block.to_be_bytes());
            }
            Self::Error { code, message } => {
                out.extend_from_slice(&OPCODE_ERROR.to_be_bytes());
                out.extend_from_slice(&code.to_be_bytes());
                push_str(&mut out, message);
            }
            Self::OptionAck(options) => {
                out.extend_from_slice(&OPCODE_OACK.to_be_bytes());
                for (name, value) in options {
                    push_str(&mut out, name);
                    push_str(&mut out, value);
                }
            }
        }

        out
    }
}

fn read_u16(data: &[u8]) -> Result<u16, TftpError> {
    match data.get(2..4) {
        Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
        None => Err(TftpError::PacketTooShort(data.len())),
    }
}

fn push_str(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(value.as_bytes());
    out.push(0);
}

/// Split a run of NUL-terminated strings.
fn split_fields(body: &[u8]) -> Result<Vec<&str>, TftpError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let body = body
        .strip_suffix(&[0u8])
        .ok_or(TftpError::MalformedRequest("missing NUL terminator"))?;

    body.split(|b| *b == 0)
        .map(|field| {
            std::str::from_utf8(field)
                .map_err(|_| TftpError::MalformedRequest("field is not valid UTF-8"))
        })
        .collect()
}

fn pairs(fields: &[&str]) -> Vec<(String, String)> {
    fields
        .chunks_exact(2)
        .filter(|pair| !pair[0].is_empty())
        .map(|pair| (pair[0].to_ascii_lowercase(), pair[1].to_string()))
        .collect()
}

fn parse_request(body: &[u8]) -> Result<Request, TftpError> {
    let fields = split_fields(body)?;

    let (filename, mode, options) = match fields.as_slice() {
        [filename, mode, options @ ..] => (*filename, *mode, options),
        _ => return Err(TftpError::MalformedRequest("missing filename or mode")),
    };

    if filename.is_empty() {
        return Err(TftpError::MalformedRequest("empty filename"));
    }

    Ok(Request {
        filename: filename.to_string(),
        mode: mode.to_ascii_lowercase(),
        options: pairs(options),
    })
}
