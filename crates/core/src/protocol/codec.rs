/// Binary packet codec
///
/// Every string is a big-endian `i32` byte length followed by raw UTF-8.
/// A packet is written field by field:
/// - source packet id, response packet id, source address
/// - target process (id, address, path)
/// - auth info (`i32` tag, then 0 or 2 strings)
/// - `i64` timestamp
/// - message (`i32` type, `i64` body length, body bytes)
///
/// There is no outer frame, so a reader consumes exactly one packet and
/// leaves whatever follows untouched.

use super::packet::{AuthInfo, Message, Packet, Process};
use hiddenlink_common::config::protocol::{MAX_BODY_LEN, MAX_STRING_LEN};
use std::io::ErrorKind;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Packet decode/encode failures
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("stream ended while reading {0}")]
    Truncated(&'static str),

    #[error("negative length {length} for {field}")]
    NegativeLength { field: &'static str, length: i64 },

    #[error("{field} too large: {length} bytes (max {max})")]
    TooLarge {
        field: &'static str,
        length: u64,
        max: usize,
    },

    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Codec for [`Packet`]s over byte streams
pub struct PacketCodec;

impl PacketCodec {
    /// Encode a packet into a fresh buffer
    ///
    /// Fails only when a string is too long for its `i32` length prefix.
    pub fn encode(packet: &Packet) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(128 + packet.message.body.len());
        put_string(&mut buf, &packet.source_packet_id)?;
        put_string(&mut buf, &packet.response_packet_id)?;
        put_string(&mut buf, &packet.source_address)?;
        put_process(&mut buf, &packet.target_process)?;
        put_auth_info(&mut buf, &packet.auth_info)?;
        buf.extend_from_slice(&packet.timestamp.to_be_bytes());
        put_message(&mut buf, &packet.message);
        Ok(buf)
    }

    /// Encode a packet and write it to `writer`
    pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), CodecError>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = Self::encode(packet)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;

        debug!(
            "Wrote packet {} ({} bytes)",
            packet.source_packet_id,
            encoded.len()
        );
        Ok(())
    }

    /// Read exactly one packet from `reader`
    pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        let source_packet_id = read_string(reader, "source packet id").await?;
        let response_packet_id = read_string(reader, "response packet id").await?;
        let source_address = read_string(reader, "source address").await?;
        let target_process = Self::read_process(reader).await?;
        let auth_info = read_auth_info(reader).await?;
        let timestamp = read_i64(reader, "timestamp").await?;
        let message = read_message(reader).await?;

        Ok(Packet {
            source_packet_id,
            response_packet_id,
            source_address,
            target_process,
            auth_info,
            timestamp,
            message,
        })
    }

    /// Decode a packet from an in-memory buffer
    pub async fn decode(mut bytes: &[u8]) -> Result<Packet, CodecError> {
        Self::read_packet(&mut bytes).await
    }

    pub fn encode_process(process: &Process) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        put_process(&mut buf, process)?;
        Ok(buf)
    }

    pub async fn read_process<R>(reader: &mut R) -> Result<Process, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        Ok(Process {
            id: read_string(reader, "process id").await?,
            address: read_string(reader, "process address").await?,
            path: read_string(reader, "process path").await?,
        })
    }

    pub fn encode_string(value: &str) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(4 + value.len());
        put_string(&mut buf, value)?;
        Ok(buf)
    }

    pub async fn read_string<R>(reader: &mut R) -> Result<String, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        read_string(reader, "string").await
    }
}

fn string_length(len: usize) -> Result<i32, CodecError> {
    i32::try_from(len).map_err(|_| CodecError::TooLarge {
        field: "string",
        length: len as u64,
        max: i32::MAX as usize,
    })
}

fn put_string(buf: &mut Vec<u8>, value: &str) -> Result<(), CodecError> {
    buf.extend_from_slice(&string_length(value.len())?.to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

fn put_process(buf: &mut Vec<u8>, process: &Process) -> Result<(), CodecError> {
    put_string(buf, &process.id)?;
    put_string(buf, &process.address)?;
    put_string(buf, &process.path)
}

fn put_auth_info(buf: &mut Vec<u8>, auth_info: &AuthInfo) -> Result<(), CodecError> {
    buf.extend_from_slice(&auth_info.type_tag().to_be_bytes());
    match auth_info {
        AuthInfo::NoAuth | AuthInfo::Unsupported => {}
        AuthInfo::Basic { username, password } => {
            put_string(buf, username)?;
            put_string(buf, password)?;
        }
        AuthInfo::Token {
            public_key,
            session_token,
        } => {
            put_string(buf, public_key)?;
            put_string(buf, session_token)?;
        }
    }
    Ok(())
}

fn put_message(buf: &mut Vec<u8>, message: &Message) {
    buf.extend_from_slice(&message.message_type.to_be_bytes());
    buf.extend_from_slice(&(message.body.len() as i64).to_be_bytes());
    buf.extend_from_slice(&message.body);
}

fn truncated(field: &'static str) -> impl FnOnce(std::io::Error) -> CodecError {
    move |e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            CodecError::Truncated(field)
        } else {
            CodecError::Io(e)
        }
    }
}

async fn read_i32<R>(reader: &mut R, field: &'static str) -> Result<i32, CodecError>
where
    R: AsyncRead + Unpin,
{
    reader.read_i32().await.map_err(truncated(field))
}

async fn read_i64<R>(reader: &mut R, field: &'static str) -> Result<i64, CodecError>
where
    R: AsyncRead + Unpin,
{
    reader.read_i64().await.map_err(truncated(field))
}

async fn read_bytes<R>(
    reader: &mut R,
    field: &'static str,
    length: i64,
    max: usize,
) -> Result<Vec<u8>, CodecError>
where
    R: AsyncRead + Unpin,
{
    if length < 0 {
        return Err(CodecError::NegativeLength { field, length });
    }
    if length as u64 > max as u64 {
        return Err(CodecError::TooLarge {
            field,
            length: length as u64,
            max,
        });
    }

    let mut data = vec![0u8; length as usize];
    reader.read_exact(&mut data).await.map_err(truncated(field))?;
    Ok(data)
}

async fn read_string<R>(reader: &mut R, field: &'static str) -> Result<String, CodecError>
where
    R: AsyncRead + Unpin,
{
    let length = read_i32(reader, field).await?;
    let data = read_bytes(reader, field, length as i64, MAX_STRING_LEN).await?;
    String::from_utf8(data).map_err(|_| CodecError::InvalidUtf8(field))
}

async fn read_auth_info<R>(reader: &mut R) -> Result<AuthInfo, CodecError>
where
    R: AsyncRead + Unpin,
{
    let auth_info = match read_i32(reader, "auth type").await? {
        AuthInfo::NO_AUTH_TAG => AuthInfo::NoAuth,
        AuthInfo::BASIC_TAG => AuthInfo::Basic {
            username: read_string(reader, "username").await?,
            password: read_string(reader, "password").await?,
        },
        AuthInfo::TOKEN_TAG => AuthInfo::Token {
            public_key: read_string(reader, "public key").await?,
            session_token: read_string(reader, "session token").await?,
        },
        other => {
            debug!("Unknown auth type {}, treating as unsupported", other);
            AuthInfo::Unsupported
        }
    };
    Ok(auth_info)
}

async fn read_message<R>(reader: &mut R) -> Result<Message, CodecError>
where
    R: AsyncRead + Unpin,
{
    let message_type = read_i32(reader, "message type").await?;
    let length = read_i64(reader, "message body").await?;
    let body = read_bytes(reader, "message body", length, MAX_BODY_LEN).await?;
    Ok(Message { message_type, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> Packet {
        Packet::new(
            "8080",
            Process::new("myId", "ikvh2uz76knum6dw", "path"),
            AuthInfo::NoAuth,
            Message::new(3, "Hello Onion"),
        )
        .with_source_packet_id("ABC")
        .with_response_packet_id("123")
        .with_timestamp(1000)
    }

    #[tokio::test]
    async fn test_packet_roundtrip() {
        let packet = sample_packet();
        let decoded = PacketCodec::decode(&PacketCodec::encode(&packet).unwrap()).await.unwrap();
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn test_roundtrip_with_credentials_and_unicode() {
        let packet = Packet::new(
            "sender.onion",
            Process::new("ünïcode", "addr", "a/b"),
            AuthInfo::basic("alice", "pässword"),
            Message::new(-7, vec![0u8, 255, 10, 13]),
        );
        let decoded = PacketCodec::decode(&PacketCodec::encode(&packet).unwrap()).await.unwrap();
        assert_eq!(decoded, packet);

        let token = packet.clone();
        let token = Packet {
            auth_info: AuthInfo::token("pk", "session"),
            ..token
        };
        let decoded = PacketCodec::decode(&PacketCodec::encode(&token).unwrap()).await.unwrap();
        assert_eq!(decoded, token);
    }

    #[tokio::test]
    async fn test_process_and_string_roundtrip() {
        let process = Process::new("id", "address", "path");
        let encoded = PacketCodec::encode_process(&process).unwrap();
        let decoded = PacketCodec::read_process(&mut &encoded[..]).await.unwrap();
        assert_eq!(decoded, process);

        let encoded = PacketCodec::encode_string("foo").unwrap();
        assert_eq!(encoded, vec![0, 0, 0, 3, b'f', b'o', b'o']);
        let decoded = PacketCodec::read_string(&mut &encoded[..]).await.unwrap();
        assert_eq!(decoded, "foo");
    }

    #[tokio::test]
    async fn test_field_layout() {
        let packet = sample_packet();
        let encoded = PacketCodec::encode(&packet).unwrap();

        // source id "ABC"
        assert_eq!(&encoded[0..4], &[0, 0, 0, 3]);
        assert_eq!(&encoded[4..7], b"ABC");

        // trailer: type 3, body length 11, body
        let tail = &encoded[encoded.len() - (4 + 8 + 11)..];
        assert_eq!(&tail[0..4], &3i32.to_be_bytes());
        assert_eq!(&tail[4..12], &11i64.to_be_bytes());
        assert_eq!(&tail[12..], b"Hello Onion");
    }

    #[tokio::test]
    async fn test_unknown_auth_tag_decodes_as_unsupported() {
        let mut packet = sample_packet();
        packet.auth_info = AuthInfo::Unsupported;
        let mut encoded = PacketCodec::encode(&packet).unwrap();

        // Unsupported writes only its tag, so patching the tag keeps the layout intact
        let strings = ["ABC", "123", "8080", "myId", "ikvh2uz76knum6dw", "path"];
        let tag_offset: usize = strings.iter().map(|s| 4 + s.len()).sum();
        assert_eq!(&encoded[tag_offset..tag_offset + 4], &(-1i32).to_be_bytes());
        encoded[tag_offset..tag_offset + 4].copy_from_slice(&42i32.to_be_bytes());

        let decoded = PacketCodec::decode(&encoded).await.unwrap();
        assert_eq!(decoded.auth_info, AuthInfo::Unsupported);
        assert_eq!(decoded.message, packet.message);
    }

    #[tokio::test]
    async fn test_truncated_input_is_an_error() {
        let encoded = PacketCodec::encode(&sample_packet()).unwrap();
        let err = PacketCodec::decode(&encoded[..encoded.len() - 1]).await.unwrap_err();
        assert!(matches!(err, CodecError::Truncated("message body")));

        let err = PacketCodec::decode(&[]).await.unwrap_err();
        assert!(matches!(err, CodecError::Truncated("source packet id")));
    }

    #[tokio::test]
    async fn test_negative_length_is_an_error() {
        let bytes = (-5i32).to_be_bytes();
        let err = PacketCodec::decode(&bytes).await.unwrap_err();
        assert!(matches!(err, CodecError::NegativeLength { length: -5, .. }));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_an_error() {
        let bytes = [0, 0, 0, 2, 0xff, 0xfe];
        let err = PacketCodec::decode(&bytes).await.unwrap_err();
        assert!(matches!(err, CodecError::InvalidUtf8("source packet id")));
    }

    #[tokio::test]
    async fn test_reader_stops_after_one_packet() {
        let first = sample_packet();
        let second = sample_packet().with_source_packet_id("DEF");
        let mut bytes = PacketCodec::encode(&first).unwrap();
        bytes.extend(PacketCodec::encode(&second).unwrap());

        let mut reader = &bytes[..];
        assert_eq!(PacketCodec::read_packet(&mut reader).await.unwrap(), first);
        assert_eq!(PacketCodec::read_packet(&mut reader).await.unwrap(), second);
    }

    #[test]
    fn test_string_length_must_fit_prefix() {
        assert_eq!(string_length(3).unwrap(), 3);
        assert_eq!(string_length(i32::MAX as usize).unwrap(), i32::MAX);

        let err = string_length(i32::MAX as usize + 1).unwrap_err();
        assert!(matches!(
            err,
            CodecError::TooLarge { field: "string", max, .. } if max == i32::MAX as usize
        ));
    }
}
