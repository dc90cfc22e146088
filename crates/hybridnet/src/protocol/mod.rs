mod hash;
mod header;
mod packet;
pub mod packets;
mod rpc;
mod wire;

pub use hash::stable_hash;
pub use header::{pack, pack_rpc, unpack, Header, MessageType, RpcTarget};
pub use packet::Packet;
pub use rpc::{ArgReader, RpcArgs};
pub use wire::Wire;
