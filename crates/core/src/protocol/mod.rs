/// Packet model and binary wire codec

pub mod codec;
pub mod packet;

pub use codec::{CodecError, PacketCodec};
pub use packet::{generate_packet_id, AuthInfo, Message, Packet, Process};
