use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::buffer::Reader;
use crate::entity::EntityDirectory;
use crate::error::{NetError, NetResult, WireResult};
use crate::protocol::{Packet, RpcArgs, RpcTarget, stable_hash};

use super::dispatcher::{MessageError, Outcome};
use super::transport::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcCall {
    pub sender: ConnectionId,
    pub target: RpcTarget,
}

type PacketHandler<C> = Box<dyn Fn(&mut C, ConnectionId, &mut Reader) -> Result<(), MessageError>>;
type RpcHandler<C> = Box<dyn Fn(&mut C, RpcCall, &mut Reader) -> Result<Outcome, MessageError>>;

struct PacketEntry<C> {
    name: &'static str,
    skip: fn(&mut Reader) -> WireResult<()>,
    handler: Option<PacketHandler<C>>,
}

struct RpcEntry<C> {
    name: &'static str,
    handler: RpcHandler<C>,
}

fn skip_packet<P: Packet>(reader: &mut Reader) -> WireResult<()> {
    P::decode(reader).map(drop)
}

pub struct DirectoryBuilder<C> {
    packets: HashMap<i32, PacketEntry<C>>,
    rpcs: HashMap<i32, RpcEntry<C>>,
}

impl<C: EntityDirectory + 'static> Default for DirectoryBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: EntityDirectory + 'static> DirectoryBuilder<C> {
    pub fn new() -> Self {
        Self {
            packets: HashMap::new(),
            rpcs: HashMap::new(),
        }
    }

    fn claim_packet<P: Packet>(&mut self) -> NetResult<&mut PacketEntry<C>> {
        let hash = P::hash();
        match self.packets.entry(hash) {
            Entry::Occupied(entry) if entry.get().name != P::NAME => Err(NetError::DuplicateHash {
                hash,
                existing: entry.get().name,
                name: P::NAME,
            }),
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(PacketEntry {
                name: P::NAME,
                skip: skip_packet::<P>,
                handler: None,
            })),
        }
    }

    pub fn register_packet<P: Packet>(&mut self) -> NetResult<i32> {
        self.claim_packet::<P>()?;
        Ok(P::hash())
    }

    pub fn on_packet<P, F>(&mut self, handler: F) -> NetResult<i32>
    where
        P: Packet,
        F: Fn(&mut C, ConnectionId, P) -> NetResult<()> + 'static,
    {
        let entry = self.claim_packet::<P>()?;
        if entry.handler.is_some() {
            log::warn!("replacing handler for {}", P::NAME);
        }
        entry.handler = Some(Box::new(move |ctx: &mut C, sender, reader: &mut Reader| {
            let packet = P::decode(reader).map_err(MessageError::Decode)?;
            handler(ctx, sender, packet).map_err(MessageError::Handler)
        }));
        Ok(P::hash())
    }

    pub fn on_rpc<A, F>(&mut self, method: &'static str, handler: F) -> NetResult<i32>
    where
        A: RpcArgs + 'static,
        F: Fn(&mut C, RpcCall, A) -> NetResult<()> + 'static,
    {
        let hash = stable_hash(method);
        let slot = match self.rpcs.entry(hash) {
            Entry::Occupied(entry) => {
                return Err(NetError::DuplicateHash {
                    hash,
                    existing: entry.get().name,
                    name: method,
                });
            }
            Entry::Vacant(slot) => slot,
        };

        slot.insert(RpcEntry {
            name: method,
            handler: Box::new(move |ctx: &mut C, call: RpcCall, reader: &mut Reader| {
                let args = A::decode_args(reader).map_err(MessageError::Decode)?;
                if !ctx.contains_entity(call.target.caller_entity) {
                    log::debug!(
                        "rpc {} for unknown entity {} ignored",
                        method,
                        call.target.caller_entity
                    );
                    return Ok(Outcome::Skipped);
                }
                handler(ctx, call, args).map_err(MessageError::Handler)?;
                Ok(Outcome::Dispatched)
            }),
        });
        Ok(hash)
    }

    pub fn build(self) -> RpcDirectory<C> {
        RpcDirectory {
            packets: self.packets,
            rpcs: self.rpcs,
        }
    }
}

pub struct RpcDirectory<C> {
    packets: HashMap<i32, PacketEntry<C>>,
    rpcs: HashMap<i32, RpcEntry<C>>,
}

impl<C> RpcDirectory<C> {
    pub fn resolve_packet(&self, hash: i32) -> Option<&'static str> {
        self.packets.get(&hash).map(|entry| entry.name)
    }

    pub fn resolve_rpc(&self, hash: i32) -> Option<&'static str> {
        self.rpcs.get(&hash).map(|entry| entry.name)
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    pub fn rpc_count(&self) -> usize {
        self.rpcs.len()
    }

    pub(crate) fn invoke_packet(
        &self,
        ctx: &mut C,
        sender: ConnectionId,
        hash: i32,
        reader: &mut Reader,
    ) -> Result<Outcome, MessageError> {
        let entry = self
            .packets
            .get(&hash)
            .ok_or(MessageError::UnknownPacket(hash))?;

        match &entry.handler {
            Some(handler) => handler(ctx, sender, reader).map(|_| Outcome::Dispatched),
            None => {
                (entry.skip)(reader).map_err(MessageError::Decode)?;
                log::debug!("no handler for {}, discarded", entry.name);
                Ok(Outcome::Skipped)
            }
        }
    }

    pub(crate) fn invoke_rpc(
        &self,
        ctx: &mut C,
        call: RpcCall,
        reader: &mut Reader,
    ) -> Result<Outcome, MessageError> {
        let hash = call.target.method_hash;
        let entry = self.rpcs.get(&hash).ok_or(MessageError::UnknownRpc(hash))?;
        (entry.handler)(ctx, call, reader)
    }
}
