use glam::{Quat, Vec3};

use crate::buffer::{Reader, Writer};
use crate::error::{WireError, WireResult};

pub trait Wire {
    fn encode(&self, writer: &mut Writer) -> WireResult<()>;

    fn decode(reader: &mut Reader) -> WireResult<Self>
    where
        Self: Sized;
}

impl Wire for u8 {
    fn encode(&self, writer: &mut Writer) -> WireResult<()> {
        writer.write_u8(*self)
    }

    fn decode(reader: &mut Reader) -> WireResult<Self> {
        reader.read_u8()
    }
}

impl Wire for bool {
    fn encode(&self, writer: &mut Writer) -> WireResult<()> {
        writer.write_bool(*self)
    }

    fn decode(reader: &mut Reader) -> WireResult<Self> {
        reader.read_bool()
    }
}

impl Wire for u16 {
    fn encode(&self, writer: &mut Writer) -> WireResult<()> {
        writer.write_u16(*self)
    }

    fn decode(reader: &mut Reader) -> WireResult<Self> {
        reader.read_u16()
    }
}

impl Wire for u32 {
    fn encode(&self, writer: &mut Writer) -> WireResult<()> {
        writer.write_u32(*self)
    }

    fn decode(reader: &mut Reader) -> WireResult<Self> {
        reader.read_u32()
    }
}

impl Wire for i32 {
    fn encode(&self, writer: &mut Writer) -> WireResult<()> {
        writer.write_i32(*self)
    }

    fn decode(reader: &mut Reader) -> WireResult<Self> {
        reader.read_i32()
    }
}

impl Wire for u64 {
    fn encode(&self, writer: &mut Writer) -> WireResult<()> {
        writer.write_u64(*self)
    }

    fn decode(reader: &mut Reader) -> WireResult<Self> {
        reader.read_u64()
    }
}

impl Wire for f32 {
    fn encode(&self, writer: &mut Writer) -> WireResult<()> {
        writer.write_f32(*self)
    }

    fn decode(reader: &mut Reader) -> WireResult<Self> {
        reader.read_f32()
    }
}

impl Wire for f64 {
    fn encode(&self, writer: &mut Writer) -> WireResult<()> {
        writer.write_f64(*self)
    }

    fn decode(reader: &mut Reader) -> WireResult<Self> {
        reader.read_f64()
    }
}

impl Wire for String {
    fn encode(&self, writer: &mut Writer) -> WireResult<()> {
        let len = u16::try_from(self.len()).map_err(|_| WireError::Capacity {
            required: self.len(),
            max: u16::MAX as usize,
        })?;
        writer.write_u16(len)?;
        writer.write_bytes(self.as_bytes())
    }

    fn decode(reader: &mut Reader) -> WireResult<Self> {
        let len = reader.read_u16()? as usize;
        let bytes = reader.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}

impl<T: Wire> Wire for Option<T> {
    fn encode(&self, writer: &mut Writer) -> WireResult<()> {
        match self {
            Some(value) => {
                writer.write_u8(1)?;
                value.encode(writer)
            }
            None => writer.write_u8(0),
        }
    }

    fn decode(reader: &mut Reader) -> WireResult<Self> {
        match reader.read_u8()? {
            0 => Ok(None),
            1 => T::decode(reader).map(Some),
            tag => Err(WireError::InvalidTag { what: "option", tag }),
        }
    }
}

impl Wire for Vec3 {
    fn encode(&self, writer: &mut Writer) -> WireResult<()> {
        writer.write_f32(self.x)?;
        writer.write_f32(self.y)?;
        writer.write_f32(self.z)
    }

    fn decode(reader: &mut Reader) -> WireResult<Self> {
        Ok(Vec3::new(
            reader.read_f32()?,
            reader.read_f32()?,
            reader.read_f32()?,
        ))
    }
}

impl Wire for Quat {
    fn encode(&self, writer: &mut Writer) -> WireResult<()> {
        writer.write_f32(self.x)?;
        writer.write_f32(self.y)?;
        writer.write_f32(self.z)?;
        writer.write_f32(self.w)
    }

    fn decode(reader: &mut Reader) -> WireResult<Self> {
        Ok(Quat::from_xyzw(
            reader.read_f32()?,
            reader.read_f32()?,
            reader.read_f32()?,
            reader.read_f32()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode<T: Wire>(value: &T) -> Vec<u8> {
        let mut writer = Writer::new(1024);
        value.encode(&mut writer).unwrap();
        writer.as_bytes().to_vec()
    }

    fn decode<T: Wire>(bytes: &[u8]) -> WireResult<T> {
        let mut reader = Reader::new(1024);
        reader.load(bytes).unwrap();
        T::decode(&mut reader)
    }

    #[test]
    fn string_is_length_prefixed() {
        let bytes = encode(&String::from("hi"));
        assert_eq!(bytes, vec![2, 0, b'h', b'i']);
        assert_eq!(decode::<String>(&bytes).unwrap(), "hi");
    }

    #[test]
    fn truncated_string_fails() {
        let err = decode::<String>(&[5, 0, b'h']).unwrap_err();
        assert_eq!(err, WireError::UnexpectedEof { needed: 5, remaining: 1 });
    }

    #[test]
    fn option_tags() {
        assert_eq!(encode(&None::<u32>), vec![0]);
        assert_eq!(encode(&Some(7u8)), vec![1, 7]);
        assert_eq!(
            decode::<Option<u8>>(&[3]).unwrap_err(),
            WireError::InvalidTag { what: "option", tag: 3 }
        );
    }

    #[test]
    fn quat_component_order() {
        let bytes = encode(&Quat::from_xyzw(0.0, 0.0, 0.0, 1.0));
        assert_eq!(&bytes[12..16], &1.0f32.to_le_bytes());
    }
}
