use bitflags::bitflags;
use glam::{Quat, Vec3};

use crate::buffer::{Reader, Writer};
use crate::error::{WireError, WireResult};
use crate::packet;

use super::packet::Packet;
use super::wire::Wire;

pub const PROTOCOL_VERSION: u32 = 1;

packet! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HandshakeRequest as "hybridnet.HandshakeRequest" {
        pub protocol_version: u32,
    }
}

packet! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HandshakeResponse as "hybridnet.HandshakeResponse" {
        pub connection_id: u32,
    }
}

packet! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Ping as "hybridnet.Ping" {
        pub client_time_ms: f64,
        pub rtt_ms: f32,
    }
}

packet! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Pong as "hybridnet.Pong" {
        pub client_time_ms: f64,
        pub server_receive_ms: f64,
        pub server_send_ms: f64,
    }
}

packet! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Spawn as "hybridnet.Spawn" {
        pub entity_id: u32,
        pub prefab: String,
        pub owner: Option<u32>,
        pub position: Vec3,
        pub rotation: Quat,
    }
}

packet! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Despawn as "hybridnet.Despawn" {
        pub entity_id: u32,
    }
}

packet! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModifyEntity as "hybridnet.ModifyEntity" {
        pub entity_id: u32,
        pub owner: Option<u32>,
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeltaFields: u8 {
        const POSITION = 1 << 0;
        const ROTATION = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformDelta {
    pub entity_id: u32,
    pub timestamp_ms: f64,
    pub position: Option<Vec3>,
    pub rotation: Option<Quat>,
}

impl TransformDelta {
    pub fn fields(&self) -> DeltaFields {
        let mut fields = DeltaFields::empty();
        fields.set(DeltaFields::POSITION, self.position.is_some());
        fields.set(DeltaFields::ROTATION, self.rotation.is_some());
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }
}

impl Wire for TransformDelta {
    fn encode(&self, writer: &mut Writer) -> WireResult<()> {
        writer.write_u32(self.entity_id)?;
        writer.write_f64(self.timestamp_ms)?;
        writer.write_u8(self.fields().bits())?;
        if let Some(position) = &self.position {
            position.encode(writer)?;
        }
        if let Some(rotation) = &self.rotation {
            rotation.encode(writer)?;
        }
        Ok(())
    }

    fn decode(reader: &mut Reader) -> WireResult<Self> {
        let entity_id = reader.read_u32()?;
        let timestamp_ms = reader.read_f64()?;
        let bits = reader.read_u8()?;
        let fields = DeltaFields::from_bits(bits).ok_or(WireError::InvalidTag {
            what: "delta fields",
            tag: bits,
        })?;

        let position = if fields.contains(DeltaFields::POSITION) {
            Some(Vec3::decode(reader)?)
        } else {
            None
        };
        let rotation = if fields.contains(DeltaFields::ROTATION) {
            Some(Quat::decode(reader)?)
        } else {
            None
        };

        Ok(Self {
            entity_id,
            timestamp_ms,
            position,
            rotation,
        })
    }
}

impl Packet for TransformDelta {
    const NAME: &'static str = "hybridnet.TransformDelta";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header::{pack, unpack, Header};

    fn roundtrip<P: Packet>(packet: &P) -> P {
        let mut writer = Writer::new(1024);
        pack(packet, &mut writer).unwrap();

        let mut reader = Reader::new(1024);
        reader.load(writer.as_bytes()).unwrap();
        assert_eq!(unpack(&mut reader).unwrap(), Header::Packet { hash: P::hash() });
        let decoded = P::decode(&mut reader).unwrap();
        assert!(!reader.has_remaining());
        decoded
    }

    #[test]
    fn spawn_roundtrip() {
        let spawn = Spawn {
            entity_id: 3,
            prefab: String::from("player"),
            owner: Some(7),
            position: Vec3::new(1.0, -2.5, 3.25),
            rotation: Quat::from_rotation_y(0.5),
        };
        assert_eq!(roundtrip(&spawn), spawn);
    }

    #[test]
    fn pong_roundtrip() {
        let pong = Pong {
            client_time_ms: 10.5,
            server_receive_ms: 1000.25,
            server_send_ms: 1000.75,
        };
        assert_eq!(roundtrip(&pong), pong);
    }

    #[test]
    fn partial_delta_only_writes_changed_fields() {
        let delta = TransformDelta {
            entity_id: 4,
            timestamp_ms: 250.0,
            position: Some(Vec3::X),
            rotation: None,
        };

        let mut writer = Writer::new(1024);
        delta.encode(&mut writer).unwrap();
        assert_eq!(writer.len(), 4 + 8 + 1 + 12);
        assert_eq!(roundtrip(&delta), delta);
    }

    #[test]
    fn unknown_delta_bits_rejected() {
        let mut reader = Reader::new(64);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0f64.to_le_bytes());
        bytes.push(0b100);
        reader.load(&bytes).unwrap();

        assert_eq!(
            TransformDelta::decode(&mut reader).unwrap_err(),
            WireError::InvalidTag { what: "delta fields", tag: 0b100 }
        );
    }

    #[test]
    fn builtin_hashes_are_distinct() {
        let mut hashes = vec![
            HandshakeRequest::hash(),
            HandshakeResponse::hash(),
            Ping::hash(),
            Pong::hash(),
            Spawn::hash(),
            Despawn::hash(),
            ModifyEntity::hash(),
            TransformDelta::hash(),
        ];
        hashes.sort();
        hashes.dedup();
        assert_eq!(hashes.len(), 8);
    }
}
