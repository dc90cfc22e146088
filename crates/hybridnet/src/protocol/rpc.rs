use crate::buffer::{Reader, Writer};
use crate::error::{WireError, WireResult};

use super::wire::Wire;

pub struct ArgReader<'a> {
    reader: &'a mut Reader,
    count: u16,
    taken: u16,
}

impl<'a> ArgReader<'a> {
    pub fn begin(reader: &'a mut Reader) -> WireResult<Self> {
        let count = reader.read_u16()?;
        Ok(Self {
            reader,
            count,
            taken: 0,
        })
    }

    pub fn len(&self) -> u16 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn expect(&self, count: u16) -> WireResult<()> {
        if self.count != count {
            return Err(WireError::ArgumentCount {
                expected: count,
                found: self.count,
            });
        }
        Ok(())
    }

    pub fn next<T: Wire>(&mut self) -> WireResult<T> {
        if self.taken >= self.count {
            return Err(WireError::ArgumentCount {
                expected: self.taken + 1,
                found: self.count,
            });
        }
        let value = T::decode(self.reader)?;
        self.taken += 1;
        Ok(value)
    }

    pub fn finish(self) -> WireResult<()> {
        if self.taken != self.count {
            return Err(WireError::ArgumentCount {
                expected: self.taken,
                found: self.count,
            });
        }
        Ok(())
    }
}

pub trait RpcArgs: Sized {
    const COUNT: u16;

    fn encode_args(&self, writer: &mut Writer) -> WireResult<()>;
    fn decode_args(reader: &mut Reader) -> WireResult<Self>;
}

macro_rules! impl_rpc_args {
    ($count:expr; $($arg:ident),*) => {
        impl<$($arg: Wire),*> RpcArgs for ($($arg,)*) {
            const COUNT: u16 = $count;

            #[allow(non_snake_case)]
            fn encode_args(&self, writer: &mut Writer) -> WireResult<()> {
                let ($($arg,)*) = self;
                writer.write_u16(Self::COUNT)?;
                $($arg.encode(writer)?;)*
                Ok(())
            }

            #[allow(unused_mut)]
            fn decode_args(reader: &mut Reader) -> WireResult<Self> {
                let mut args = ArgReader::begin(reader)?;
                args.expect(Self::COUNT)?;
                let values = ($(args.next::<$arg>()?,)*);
                args.finish()?;
                Ok(values)
            }
        }
    };
}

impl_rpc_args!(0;);
impl_rpc_args!(1; A);
impl_rpc_args!(2; A, B);
impl_rpc_args!(3; A, B, C);
impl_rpc_args!(4; A, B, C, D);
impl_rpc_args!(5; A, B, C, D, E);
impl_rpc_args!(6; A, B, C, D, E, F);

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_for(bytes: &[u8]) -> Reader {
        let mut reader = Reader::new(1024);
        reader.load(bytes).unwrap();
        reader
    }

    #[test]
    fn tuple_args_in_order() {
        let mut writer = Writer::new(1024);
        (7u32, String::from("go"), true).encode_args(&mut writer).unwrap();

        let mut reader = reader_for(writer.as_bytes());
        let (a, b, c) = <(u32, String, bool)>::decode_args(&mut reader).unwrap();
        assert_eq!((a, b.as_str(), c), (7, "go", true));
        assert!(!reader.has_remaining());
    }

    #[test]
    fn empty_args() {
        let mut writer = Writer::new(16);
        ().encode_args(&mut writer).unwrap();
        assert_eq!(writer.as_bytes(), &[0, 0]);

        let mut reader = reader_for(writer.as_bytes());
        <()>::decode_args(&mut reader).unwrap();
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let mut writer = Writer::new(64);
        (1u8, 2u8).encode_args(&mut writer).unwrap();

        let mut reader = reader_for(writer.as_bytes());
        assert_eq!(
            <(u8,)>::decode_args(&mut reader).unwrap_err(),
            WireError::ArgumentCount { expected: 1, found: 2 }
        );
    }

    #[test]
    fn unread_arguments_fail_finish() {
        let mut writer = Writer::new(64);
        (1u8, 2u8).encode_args(&mut writer).unwrap();

        let mut reader = reader_for(writer.as_bytes());
        let mut args = ArgReader::begin(&mut reader).unwrap();
        args.next::<u8>().unwrap();
        assert_eq!(
            args.finish().unwrap_err(),
            WireError::ArgumentCount { expected: 1, found: 2 }
        );
    }
}
