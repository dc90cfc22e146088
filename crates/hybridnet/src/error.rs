#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("buffer would grow to {required} bytes, ceiling is {max}")]
    Capacity { required: usize, max: usize },
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("corrupt message header: {0}")]
    CorruptHeader(&'static str),
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    #[error("invalid {what} tag {tag}")]
    InvalidTag { what: &'static str, tag: u8 },
    #[error("input of {len} bytes exceeds the {max} byte buffer ceiling")]
    InputTooLarge { len: usize, max: usize },
    #[error("message of {len} bytes can never fit a {max} byte batch")]
    MessageTooLarge { len: usize, max: usize },
    #[error("rpc expected {expected} arguments, found {found}")]
    ArgumentCount { expected: u16, found: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport not started")]
    NotStarted,
    #[error("unknown transport connection {0}")]
    UnknownConnection(u32),
    #[error("transport closed")]
    Closed,
    #[error("transport i/o error: {0}")]
    Io(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no packet registered for hash {0}")]
    UnknownPacket(i32),
    #[error("no rpc registered for hash {0}")]
    UnknownRpc(i32),
    #[error("hash {hash} of `{name}` collides with `{existing}`")]
    DuplicateHash {
        hash: i32,
        existing: &'static str,
        name: &'static str,
    },
    #[error("unknown connection {0}")]
    UnknownConnection(u32),
    #[error("unknown entity {0}")]
    UnknownEntity(u32),
    #[error("not the authority for entity {entity_id}")]
    AuthorityViolation { entity_id: u32 },
    #[error("connection is not authenticated")]
    NotAuthenticated,
    #[error("handler failed: {0}")]
    Handler(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type WireResult<T> = Result<T, WireError>;
pub type NetResult<T> = Result<T, NetError>;
