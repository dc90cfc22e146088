//! Message framing.
//!
//! Every message starts with a `u8` message type:
//!
//! ```text
//! 0 = Packet: i32 type hash, packet payload
//! 1 = Rpc:    i32 method hash, u32 caller entity id, i32 caller component index,
//!             u16 argument count, arguments
//! ```
//!
//! Integers and floats are little-endian. Messages carry no length prefix;
//! each payload is self-delimiting, so a corrupt message leaves the reader
//! misaligned for whatever follows it in the same buffer.

use crate::buffer::{Reader, Writer};
use crate::error::{WireError, WireResult};

use super::hash::stable_hash;
use super::packet::Packet;
use super::rpc::RpcArgs;
use super::wire::Wire;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Packet = 0,
    Rpc = 1,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Packet),
            1 => Ok(MessageType::Rpc),
            _ => Err(WireError::CorruptHeader("unknown message type")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcTarget {
    pub method_hash: i32,
    pub caller_entity: u32,
    pub component_index: i32,
}

impl RpcTarget {
    pub fn new(method: &str, caller_entity: u32, component_index: i32) -> Self {
        Self {
            method_hash: stable_hash(method),
            caller_entity,
            component_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    Packet { hash: i32 },
    Rpc(RpcTarget),
}

impl Header {
    pub fn message_type(&self) -> MessageType {
        match self {
            Header::Packet { .. } => MessageType::Packet,
            Header::Rpc(_) => MessageType::Rpc,
        }
    }

    pub fn hash(&self) -> i32 {
        match self {
            Header::Packet { hash } => *hash,
            Header::Rpc(target) => target.method_hash,
        }
    }
}

pub fn pack<P: Packet>(packet: &P, writer: &mut Writer) -> WireResult<()> {
    writer.write_u8(MessageType::Packet as u8)?;
    writer.write_i32(P::hash())?;
    Wire::encode(packet, writer)
}

pub fn pack_rpc<A: RpcArgs>(target: RpcTarget, args: &A, writer: &mut Writer) -> WireResult<()> {
    writer.write_u8(MessageType::Rpc as u8)?;
    writer.write_i32(target.method_hash)?;
    writer.write_u32(target.caller_entity)?;
    writer.write_i32(target.component_index)?;
    args.encode_args(writer)
}

/// Reads the common header. Any failure is reported as `CorruptHeader`; the
/// caller must not trust the rest of the buffer's alignment afterwards.
pub fn unpack(reader: &mut Reader) -> WireResult<Header> {
    let kind = reader
        .read_u8()
        .map_err(|_| WireError::CorruptHeader("missing message type"))?;

    let header = match MessageType::try_from(kind)? {
        MessageType::Packet => Header::Packet {
            hash: reader.read_i32().map_err(truncated)?,
        },
        MessageType::Rpc => Header::Rpc(RpcTarget {
            method_hash: reader.read_i32().map_err(truncated)?,
            caller_entity: reader.read_u32().map_err(truncated)?,
            component_index: reader.read_i32().map_err(truncated)?,
        }),
    };

    Ok(header)
}

fn truncated(_: WireError) -> WireError {
    WireError::CorruptHeader("truncated header")
}
