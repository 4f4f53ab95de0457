pub mod connector;
pub mod framed;

pub use connector::{BoxedStream, ByteStream, Connector, TcpConnector};
pub use framed::{FramedReader, FramedTransport, FramedWriter, IoOptions};
