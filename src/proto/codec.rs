use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use bytes::BufMut;
use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tokio_util::codec::Encoder;
use tracing::trace;

use super::Command;
use super::DataType;
use super::Message;
use crate::constants::SV_HEADER_PREFIX;
use crate::constants::SV_HEADER_SIZE;
use crate::constants::SV_MAX_HEADER_SIZE;
use crate::constants::SV_NAME_LEN;
use crate::constants::SV_PROTOCOL_VERSION;
use crate::constants::SV_SPEC_MAGIC;
use crate::Error;
use crate::ProtocolError;
use crate::Result;

// Field offsets inside the version 4 header.
const OFF_SIZE: usize = 8;
const OFF_SN: usize = 12;
const OFF_CMD: usize = 24;
const OFF_TYPE: usize = 28;
const OFF_ROWS: usize = 32;
const OFF_COLS: usize = 36;
const OFF_LEN: usize = 40;
const OFF_ERR: usize = 44;
const OFF_FLAGS: usize = 48;
const OFF_NAME: usize = 52;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn detect(prefix: &[u8]) -> Result<Self> {
        let raw = [prefix[0], prefix[1], prefix[2], prefix[3]];
        if u32::from_le_bytes(raw) == SV_SPEC_MAGIC {
            Ok(ByteOrder::Little)
        } else if u32::from_be_bytes(raw) == SV_SPEC_MAGIC {
            Ok(ByteOrder::Big)
        } else {
            Err(ProtocolError::BadMagic(u32::from_le_bytes(raw)).into())
        }
    }

    fn u32_at(
        self,
        buf: &[u8],
        offset: usize,
    ) -> u32 {
        let raw = [
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ];
        match self {
            ByteOrder::Little => u32::from_le_bytes(raw),
            ByteOrder::Big => u32::from_be_bytes(raw),
        }
    }

    fn i32_at(
        self,
        buf: &[u8],
        offset: usize,
    ) -> i32 {
        self.u32_at(buf, offset) as i32
    }
}

/// Fixed-header framing used by the server (protocol version 4).
///
/// Frames are decoded in either byte order; frames are always written
/// little endian, which the server detects from the magic.
#[derive(Debug, Clone)]
pub struct SvCodec {
    max_frame_size: usize,
}

impl SvCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for SvCodec {
    fn default() -> Self {
        Self::new(16 * 1024 * 1024)
    }
}

impl Decoder for SvCodec {
    type Item = Message;
    type Error = Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Message>> {
        if src.len() < SV_HEADER_PREFIX {
            return Ok(None);
        }

        let order = ByteOrder::detect(&src[..4])?;
        let header_size = order.u32_at(&src[..], OFF_SIZE) as usize;
        if !(SV_HEADER_SIZE..=SV_MAX_HEADER_SIZE).contains(&header_size) {
            return Err(ProtocolError::MalformedFrame(format!(
                "header size {header_size} outside {SV_HEADER_SIZE}..={SV_MAX_HEADER_SIZE}"
            ))
            .into());
        }

        if src.len() < header_size {
            src.reserve(header_size - src.len());
            return Ok(None);
        }

        let len = order.u32_at(&src[..], OFF_LEN) as usize;
        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_frame_size,
            }
            .into());
        }

        let total = header_size + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let header = src.split_to(header_size);
        let mut body = src.split_to(len).to_vec();

        let data_type = DataType::from(order.i32_at(&header, OFF_TYPE));
        if data_type.is_text() {
            while body.last() == Some(&0) {
                body.pop();
            }
        }

        let name_field = &header[OFF_NAME..OFF_NAME + SV_NAME_LEN];
        let name_len = name_field.iter().position(|b| *b == 0).unwrap_or(SV_NAME_LEN);

        let message = Message {
            command: Command::from(order.i32_at(&header, OFF_CMD)),
            sequence_number: order.u32_at(&header, OFF_SN),
            property_name: String::from_utf8_lossy(&name_field[..name_len]).into_owned(),
            data_type,
            body,
            is_error: order.i32_at(&header, OFF_ERR) != 0,
            rows: order.u32_at(&header, OFF_ROWS),
            cols: order.u32_at(&header, OFF_COLS),
            flags: order.u32_at(&header, OFF_FLAGS),
        };
        trace!(sn = message.sequence_number, "decoded {}", message);
        Ok(Some(message))
    }
}

impl Encoder<Message> for SvCodec {
    type Error = Error;

    fn encode(
        &mut self,
        msg: Message,
        dst: &mut BytesMut,
    ) -> Result<()> {
        let name = msg.property_name.as_bytes();
        if name.len() >= SV_NAME_LEN {
            return Err(ProtocolError::MalformedFrame(format!(
                "name {:?} exceeds {} bytes",
                msg.property_name,
                SV_NAME_LEN - 1
            ))
            .into());
        }

        let mut body = msg.body;
        if msg.data_type.is_text() && body.last().is_some_and(|b| *b != 0) {
            body.push(0);
        }
        if body.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                len: body.len(),
                max: self.max_frame_size,
            }
            .into());
        }

        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();

        dst.reserve(SV_HEADER_SIZE + body.len());
        dst.put_u32_le(SV_SPEC_MAGIC);
        dst.put_i32_le(SV_PROTOCOL_VERSION);
        dst.put_u32_le(SV_HEADER_SIZE as u32);
        dst.put_u32_le(msg.sequence_number);
        dst.put_u32_le(now.as_secs() as u32);
        dst.put_u32_le(now.subsec_micros());
        dst.put_i32_le(msg.command.code());
        dst.put_i32_le(msg.data_type.code());
        dst.put_u32_le(msg.rows);
        dst.put_u32_le(msg.cols);
        dst.put_u32_le(body.len() as u32);
        dst.put_i32_le(msg.is_error as i32);
        dst.put_u32_le(msg.flags);
        dst.put_slice(name);
        dst.put_bytes(0, SV_NAME_LEN - name.len());
        dst.put_slice(&body);
        Ok(())
    }
}
