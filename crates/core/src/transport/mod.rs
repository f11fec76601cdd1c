/// Transport to remote hidden services through the local SOCKS proxy
///
/// Outbound traffic opens one proxied TCP stream per packet: connect to
/// the proxy, run the tunnel handshake, write the encoded packet, close.
/// Inbound traffic arrives on a plain TCP listener the hidden service
/// forwards to, one packet per accepted connection.

mod handshake;
mod listener;
mod outbound;

pub use handshake::{open_tunnel, perform_handshake, TunnelError, REQUEST_GRANTED};
pub use listener::PacketListener;
pub use outbound::OutboundChannel;
