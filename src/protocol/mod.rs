pub mod handshake;
pub mod messages;

pub use handshake::{handshake, open_session, upgrade};
pub use messages::{
    AddData, AddDataResponse, AlignInfo, ConnectionRequest, ConnectionResponse, Recognition,
    Word, RESPONSE_OK,
};
