use crate::buffer::Reader;
use crate::entity::EntityDirectory;
use crate::error::{NetError, WireError};
use crate::protocol::{Header, unpack};

use super::batcher::BatchFraming;
use super::directory::{RpcCall, RpcDirectory};
use super::transport::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    CountPrefixed,
    /// Read until empty. A message that cannot be decoded aborts the rest of
    /// the buffer, since nothing marks where the next one starts.
    Stream,
}

impl From<BatchFraming> for ReceiveMode {
    fn from(framing: BatchFraming) -> Self {
        match framing {
            BatchFraming::CountPrefixed => ReceiveMode::CountPrefixed,
            BatchFraming::Unframed => ReceiveMode::Stream,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Dispatched,
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("unreadable header: {0}")]
    Header(WireError),
    #[error("unknown packet hash {0}")]
    UnknownPacket(i32),
    #[error("unknown rpc hash {0}")]
    UnknownRpc(i32),
    #[error("payload decode failed: {0}")]
    Decode(WireError),
    #[error("handler failed: {0}")]
    Handler(NetError),
}

impl MessageError {
    pub fn keeps_alignment(&self) -> bool {
        matches!(self, MessageError::Handler(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched: usize,
    pub skipped: usize,
    pub dropped: usize,
    pub aborted: bool,
}

fn dispatch_one<C: EntityDirectory>(
    ctx: &mut C,
    directory: &RpcDirectory<C>,
    sender: ConnectionId,
    reader: &mut Reader,
) -> Result<Outcome, MessageError> {
    match unpack(reader).map_err(MessageError::Header)? {
        Header::Packet { hash } => directory.invoke_packet(ctx, sender, hash, reader),
        Header::Rpc(target) => directory.invoke_rpc(ctx, RpcCall { sender, target }, reader),
    }
}

fn record(report: &mut DispatchReport, sender: ConnectionId, result: &Result<Outcome, MessageError>) {
    match result {
        Ok(Outcome::Dispatched) => report.dispatched += 1,
        Ok(Outcome::Skipped) => report.skipped += 1,
        Err(e) => {
            log::warn!("dropping message from {}: {}", sender, e);
            report.dropped += 1;
        }
    }
}

pub fn dispatch<C: EntityDirectory>(
    ctx: &mut C,
    directory: &RpcDirectory<C>,
    sender: ConnectionId,
    reader: &mut Reader,
    mode: ReceiveMode,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    match mode {
        ReceiveMode::CountPrefixed => {
            let count = match reader.read_u8() {
                Ok(count) => count,
                Err(e) => {
                    log::warn!("empty batch from {}: {}", sender, e);
                    report.aborted = true;
                    return report;
                }
            };

            for index in 0..count {
                if !reader.has_remaining() {
                    log::warn!(
                        "batch from {} announced {} messages, ended after {}",
                        sender,
                        count,
                        index
                    );
                    report.dropped += (count - index) as usize;
                    report.aborted = true;
                    break;
                }
                let result = dispatch_one(ctx, directory, sender, reader);
                record(&mut report, sender, &result);
            }
        }
        ReceiveMode::Stream => {
            while reader.has_remaining() {
                let result = dispatch_one(ctx, directory, sender, reader);
                record(&mut report, sender, &result);
                if let Err(e) = result {
                    if !e.keeps_alignment() {
                        log::warn!(
                            "abandoning {} remaining bytes from {}",
                            reader.remaining(),
                            sender
                        );
                        report.aborted = true;
                        break;
                    }
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Writer;
    use crate::error::NetResult;
    use crate::net::directory::DirectoryBuilder;
    use crate::protocol::packets::{Despawn, ModifyEntity};
    use crate::protocol::{RpcTarget, pack, pack_rpc};

    #[derive(Default)]
    struct Recorder {
        despawned: Vec<u32>,
        rpcs: Vec<(u32, String)>,
    }

    impl EntityDirectory for Recorder {
        fn contains_entity(&self, id: u32) -> bool {
            id < 100
        }
    }

    fn directory() -> RpcDirectory<Recorder> {
        let mut builder = DirectoryBuilder::new();
        builder
            .on_packet(|ctx: &mut Recorder, _, packet: Despawn| {
                if packet.entity_id == 13 {
                    return Err(NetError::UnknownEntity(13));
                }
                ctx.despawned.push(packet.entity_id);
                Ok(())
            })
            .unwrap();
        builder
            .on_rpc("Chat.Say", |ctx: &mut Recorder, call, (text,): (String,)| {
                ctx.rpcs.push((call.target.caller_entity, text));
                Ok(())
            })
            .unwrap();
        builder.build()
    }

    fn reader_for(bytes: &[u8]) -> Reader {
        let mut reader = Reader::new(4096);
        reader.load(bytes).unwrap();
        reader
    }

    fn unknown_packet(writer: &mut Writer) {
        writer.write_u8(0).unwrap();
        writer.write_i32(0x1234_5678).unwrap();
    }

    #[test]
    fn stream_dispatches_in_order() {
        let mut writer = Writer::new(4096);
        for id in [1, 2, 3] {
            pack(&Despawn { entity_id: id }, &mut writer).unwrap();
        }

        let mut ctx = Recorder::default();
        let report = dispatch(
            &mut ctx,
            &directory(),
            0,
            &mut reader_for(writer.as_bytes()),
            ReceiveMode::Stream,
        );
        assert_eq!(ctx.despawned, vec![1, 2, 3]);
        assert_eq!(report.dispatched, 3);
        assert!(!report.aborted);
    }

    #[test]
    fn unknown_hash_isolated_in_count_mode() {
        let mut writer = Writer::new(4096);
        writer.write_u8(2).unwrap();
        unknown_packet(&mut writer);
        pack(&Despawn { entity_id: 4 }, &mut writer).unwrap();

        let mut ctx = Recorder::default();
        let report = dispatch(
            &mut ctx,
            &directory(),
            9,
            &mut reader_for(writer.as_bytes()),
            ReceiveMode::CountPrefixed,
        );
        assert_eq!(report.dropped, 1);
        assert_eq!(report.dispatched, 1);
        assert_eq!(ctx.despawned, vec![4]);
    }

    #[test]
    fn unknown_hash_aborts_stream() {
        let mut writer = Writer::new(4096);
        pack(&Despawn { entity_id: 1 }, &mut writer).unwrap();
        unknown_packet(&mut writer);
        pack(&Despawn { entity_id: 2 }, &mut writer).unwrap();

        let mut ctx = Recorder::default();
        let report = dispatch(
            &mut ctx,
            &directory(),
            0,
            &mut reader_for(writer.as_bytes()),
            ReceiveMode::Stream,
        );
        assert_eq!(ctx.despawned, vec![1]);
        assert_eq!(report.dropped, 1);
        assert!(report.aborted);
    }

    #[test]
    fn handler_error_does_not_abort_stream() {
        let mut writer = Writer::new(4096);
        pack(&Despawn { entity_id: 13 }, &mut writer).unwrap();
        pack(&Despawn { entity_id: 2 }, &mut writer).unwrap();

        let mut ctx = Recorder::default();
        let report = dispatch(
            &mut ctx,
            &directory(),
            0,
            &mut reader_for(writer.as_bytes()),
            ReceiveMode::Stream,
        );
        assert_eq!(ctx.despawned, vec![2]);
        assert_eq!(report.dropped, 1);
        assert!(!report.aborted);
    }

    #[test]
    fn rpc_to_unknown_entity_is_skipped_quietly() {
        let mut writer = Writer::new(4096);
        writer.write_u8(2).unwrap();
        pack_rpc(RpcTarget::new("Chat.Say", 500, 0), &(String::from("lost"),), &mut writer)
            .unwrap();
        pack_rpc(RpcTarget::new("Chat.Say", 5, 1), &(String::from("hi"),), &mut writer).unwrap();

        let mut ctx = Recorder::default();
        let report = dispatch(
            &mut ctx,
            &directory(),
            3,
            &mut reader_for(writer.as_bytes()),
            ReceiveMode::CountPrefixed,
        );
        assert_eq!(ctx.rpcs, vec![(5, String::from("hi"))]);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.dropped, 0);
    }

    #[test]
    fn registered_packet_without_handler_is_skipped() {
        let mut writer = Writer::new(4096);
        pack(&ModifyEntity { entity_id: 1, owner: Some(2) }, &mut writer).unwrap();
        pack(&Despawn { entity_id: 8 }, &mut writer).unwrap();

        let mut builder = DirectoryBuilder::<Recorder>::new();
        builder.register_packet::<ModifyEntity>().unwrap();
        builder
            .on_packet(|ctx: &mut Recorder, _, packet: Despawn| -> NetResult<()> {
                ctx.despawned.push(packet.entity_id);
                Ok(())
            })
            .unwrap();

        let mut ctx = Recorder::default();
        let report = dispatch(
            &mut ctx,
            &builder.build(),
            0,
            &mut reader_for(writer.as_bytes()),
            ReceiveMode::Stream,
        );
        assert_eq!(report.skipped, 1);
        assert_eq!(ctx.despawned, vec![8]);
    }

    #[test]
    fn short_batch_is_reported() {
        let mut writer = Writer::new(4096);
        writer.write_u8(3).unwrap();
        pack(&Despawn { entity_id: 1 }, &mut writer).unwrap();

        let mut ctx = Recorder::default();
        let report = dispatch(
            &mut ctx,
            &directory(),
            0,
            &mut reader_for(writer.as_bytes()),
            ReceiveMode::CountPrefixed,
        );
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.dropped, 2);
        assert!(report.aborted);
    }
}
