use super::hash::stable_hash;
use super::wire::Wire;

/// A registered packet variant. `NAME` is the stable, fully-qualified name
/// whose hash identifies the variant on the wire.
pub trait Packet: Wire + Sized + 'static {
    const NAME: &'static str;

    fn hash() -> i32 {
        stable_hash(Self::NAME)
    }
}

#[macro_export]
macro_rules! packet {
    (
        $(#[$meta:meta])*
        pub struct $name:ident as $wire_name:literal {
            $(pub $field:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        pub struct $name {
            $(pub $field: $ty),*
        }

        impl $crate::protocol::Wire for $name {
            #[allow(unused_variables)]
            fn encode(
                &self,
                writer: &mut $crate::buffer::Writer,
            ) -> $crate::error::WireResult<()> {
                $($crate::protocol::Wire::encode(&self.$field, writer)?;)*
                Ok(())
            }

            #[allow(unused_variables)]
            fn decode(
                reader: &mut $crate::buffer::Reader,
            ) -> $crate::error::WireResult<Self> {
                Ok(Self {
                    $($field: <$ty as $crate::protocol::Wire>::decode(reader)?,)*
                })
            }
        }

        impl $crate::protocol::Packet for $name {
            const NAME: &'static str = $wire_name;
        }
    };
}
