//! 원격 상태 프로토콜: 모듈 목록과 시작/정지 요청을 바이너리 envelope 로 주고받습니다.
//!
//! Envelope: `[version u8][type u8][payload_len u32][payload]` (빅 엔디언)
//!
//! | type | payload |
//! |---|---|
//! | 1 ModuleList | `[count u32]` 이후 `[name_len u16][name utf-8][status u8]` 반복 |
//! | 2 StartModule | `[name_len u16][name utf-8]` |
//! | 3 StopModule | `[name_len u16][name utf-8]` |
//!
//! 수신 측에서 해석할 수 없는 메시지는 "갱신 없음" (None) 으로 취급합니다.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::{is_valid_module_name, Module, ModuleStatus};
use crate::supervisor::ModuleRequest;

pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 6;
pub const MAX_PAYLOAD_LEN: usize = 1 << 20;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("Unknown module status {0}")]
    UnknownStatus(u8),

    #[error("Message truncated")]
    Truncated,

    #[error("Payload length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Payload too large: {0} bytes")]
    TooLarge(usize),

    #[error("Module name is not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid module name '{0}'")]
    InvalidModuleName(String),

    #[error("Expected {expected:?} message, got {actual:?}")]
    UnexpectedMessageType {
        expected: MessageType,
        actual: MessageType,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    ModuleList,
    StartModule,
    StopModule,
}

impl MessageType {
    pub fn code(self) -> u8 {
        match self {
            Self::ModuleList => 1,
            Self::StartModule => 2,
            Self::StopModule => 3,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::ModuleList),
            2 => Ok(Self::StartModule),
            3 => Ok(Self::StopModule),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

fn status_code(status: ModuleStatus) -> u8 {
    match status {
        ModuleStatus::Stopped => 0,
        ModuleStatus::Running => 1,
        ModuleStatus::Crashed => 2,
    }
}

fn status_from_code(code: u8) -> Result<ModuleStatus, ProtocolError> {
    match code {
        0 => Ok(ModuleStatus::Stopped),
        1 => Ok(ModuleStatus::Running),
        2 => Ok(ModuleStatus::Crashed),
        other => Err(ProtocolError::UnknownStatus(other)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub message_type: MessageType,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(message_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::TooLarge(self.payload.len()));
        }
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.write_u8(PROTOCOL_VERSION)?;
        buf.write_u8(self.message_type.code())?;
        buf.write_u32::<BigEndian>(self.payload.len() as u32)?;
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(bytes);
        let version = cursor.read_u8().map_err(|_| ProtocolError::Truncated)?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let message_type =
            MessageType::try_from(cursor.read_u8().map_err(|_| ProtocolError::Truncated)?)?;
        let declared = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| ProtocolError::Truncated)? as usize;
        if declared > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::TooLarge(declared));
        }

        let actual = bytes.len() - HEADER_LEN;
        if declared != actual {
            return Err(ProtocolError::LengthMismatch { declared, actual });
        }
        Ok(Self::new(message_type, bytes[HEADER_LEN..].to_vec()))
    }
}

fn write_name(buf: &mut Vec<u8>, name: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(name.len()).map_err(|_| ProtocolError::TooLarge(name.len()))?;
    buf.write_u16::<BigEndian>(len)?;
    buf.extend_from_slice(name.as_bytes());
    Ok(())
}

fn read_name(cursor: &mut Cursor<&[u8]>) -> Result<String, ProtocolError> {
    let len = cursor
        .read_u16::<BigEndian>()
        .map_err(|_| ProtocolError::Truncated)? as usize;
    let mut raw = vec![0u8; len];
    cursor
        .read_exact(&mut raw)
        .map_err(|_| ProtocolError::Truncated)?;
    String::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)
}

fn ensure_consumed(cursor: &Cursor<&[u8]>) -> Result<(), ProtocolError> {
    let total = cursor.get_ref().len();
    let read = cursor.position() as usize;
    if read != total {
        return Err(ProtocolError::LengthMismatch {
            declared: read,
            actual: total,
        });
    }
    Ok(())
}

/// 모듈 설명자 (이름 + 상태)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub status: ModuleStatus,
}

impl From<&Module> for ModuleInfo {
    fn from(module: &Module) -> Self {
        Self {
            name: module.name.clone(),
            status: module.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModuleList {
    pub modules: Vec<ModuleInfo>,
}

impl ModuleList {
    pub fn new(modules: Vec<ModuleInfo>) -> Self {
        Self { modules }
    }

    pub fn encode_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(self.modules.len() as u32)?;
        for info in &self.modules {
            write_name(&mut buf, &info.name)?;
            buf.write_u8(status_code(info.status))?;
        }
        Ok(buf)
    }

    pub fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(payload);
        let count = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| ProtocolError::Truncated)? as usize;
        // 설명자 하나는 최소 3 바이트: 터무니없는 count 로 미리 할당하지 않음
        let mut modules = Vec::with_capacity(count.min(payload.len() / 3));
        for _ in 0..count {
            let name = read_name(&mut cursor)?;
            let status =
                status_from_code(cursor.read_u8().map_err(|_| ProtocolError::Truncated)?)?;
            modules.push(ModuleInfo { name, status });
        }
        ensure_consumed(&cursor)?;
        Ok(Self { modules })
    }

    pub fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        Ok(Envelope::new(MessageType::ModuleList, self.encode_payload()?))
    }

    /// 해석 실패는 로그만 남기고 None: 빈 목록과 구분됩니다.
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        let result = match envelope.message_type {
            MessageType::ModuleList => Self::decode_payload(&envelope.payload),
            other => Err(ProtocolError::UnexpectedMessageType {
                expected: MessageType::ModuleList,
                actual: other,
            }),
        };
        match result {
            Ok(list) => Some(list),
            Err(e) => {
                tracing::error!("[Protocol] Can't parse module list payload: {}", e);
                None
            }
        }
    }
}

impl From<&[Module]> for ModuleList {
    fn from(modules: &[Module]) -> Self {
        Self::new(modules.iter().map(ModuleInfo::from).collect())
    }
}

pub fn encode_request(request: &ModuleRequest) -> Result<Envelope, ProtocolError> {
    let message_type = match request {
        ModuleRequest::Start { .. } => MessageType::StartModule,
        ModuleRequest::Stop { .. } => MessageType::StopModule,
    };
    let mut payload = Vec::new();
    write_name(&mut payload, request.module())?;
    Ok(Envelope::new(message_type, payload))
}

pub fn decode_request(envelope: &Envelope) -> Result<ModuleRequest, ProtocolError> {
    let mut cursor = Cursor::new(envelope.payload.as_slice());
    let module = read_name(&mut cursor)?;
    ensure_consumed(&cursor)?;
    if !is_valid_module_name(&module) {
        return Err(ProtocolError::InvalidModuleName(module));
    }
    match envelope.message_type {
        MessageType::StartModule => Ok(ModuleRequest::Start { module }),
        MessageType::StopModule => Ok(ModuleRequest::Stop { module }),
        other => Err(ProtocolError::UnexpectedMessageType {
            expected: MessageType::StartModule,
            actual: other,
        }),
    }
}
