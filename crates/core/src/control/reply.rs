/// Control reply parsing
///
/// A reply is one or more lines `SSS<sep>text`:
/// - `-` the reply continues on the next line
/// - `+` a data block follows, terminated by a line holding a single `.`
/// - ` ` this is the last line of the reply

use super::ControlError;
use std::collections::BTreeMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One parsed reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub status: u16,
    pub message: String,
    /// Data block of a `+` line, each line terminated by `\n`
    pub body: Option<String>,
}

/// A complete reply, collapsed into a key/value body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub code: u16,
    pub message: String,
    pub body: BTreeMap<String, Option<String>>,
}

impl ControlResponse {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            body: BTreeMap::new(),
        }
    }

    /// Collapse the lines of one reply
    ///
    /// The last line gives the status and message. When that message is
    /// `OK` it carries no data and is left out of the body. Every other
    /// line contributes `key=value` (or a bare `key`); a data block, if
    /// present, becomes the value.
    pub fn from_lines(mut lines: Vec<ReplyLine>) -> Option<Self> {
        let last = lines.last()?.clone();
        if last.message == "OK" {
            lines.pop();
        }

        let mut body = BTreeMap::new();
        for line in lines {
            let (key, value) = match line.message.split_once('=') {
                Some((key, value)) => (key.to_string(), Some(value.to_string())),
                None => (line.message, None),
            };
            let value = match (line.body, value) {
                (Some(data), _) => Some(data),
                (None, Some(value)) if !value.is_empty() => Some(value),
                (None, _) => None,
            };
            body.insert(key, value);
        }

        Some(Self {
            code: last.status,
            message: last.message,
            body,
        })
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_event(&self) -> bool {
        self.code == hiddenlink_common::config::control::STATUS_EVENT
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(|v| v.as_deref())
    }
}

async fn read_line<R>(reader: &mut R) -> Result<Option<String>, ControlError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

fn parse_line(line: &str) -> Result<(u16, char, String), ControlError> {
    let malformed = || ControlError::MalformedReply(line.to_string());

    let status = line.get(0..3).ok_or_else(malformed)?;
    if !status.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let status: u16 = status.parse().map_err(|_| malformed())?;
    let separator = line[3..].chars().next().ok_or_else(malformed)?;
    if !matches!(separator, '-' | '+' | ' ') {
        return Err(malformed());
    }
    let message = line[3 + separator.len_utf8()..].to_string();
    Ok((status, separator, message))
}

/// Read the lines of one reply
///
/// Returns `None` when the stream ends cleanly before a new reply starts.
pub async fn read_reply<R>(reader: &mut R) -> Result<Option<Vec<ReplyLine>>, ControlError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();

    loop {
        let Some(line) = read_line(reader).await? else {
            if lines.is_empty() {
                return Ok(None);
            }
            return Err(ControlError::UnexpectedEof);
        };

        let (status, separator, message) = parse_line(&line)?;

        let body = if separator == '+' {
            let mut data = String::new();
            loop {
                let line = read_line(reader)
                    .await?
                    .ok_or(ControlError::UnexpectedEof)?;
                if line == "." {
                    break;
                }
                data.push_str(line.strip_prefix('.').unwrap_or(&line));
                data.push('\n');
            }
            Some(data)
        } else {
            None
        };

        lines.push(ReplyLine {
            status,
            message,
            body,
        });

        if separator == ' ' {
            return Ok(Some(lines));
        }
    }
}

/// Read and collapse one reply
pub async fn read_response<R>(reader: &mut R) -> Result<Option<ControlResponse>, ControlError>
where
    R: AsyncBufRead + Unpin,
{
    Ok(read_reply(reader).await?.and_then(ControlResponse::from_lines))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn parse(input: &str) -> ControlResponse {
        let mut reader = BufReader::new(input.as_bytes());
        read_response(&mut reader).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_single_ok_line() {
        let response = parse("250 OK\r\n").await;
        assert_eq!(response.code, 250);
        assert_eq!(response.message, "OK");
        assert!(response.body.is_empty());
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn test_key_value_lines() {
        let response = parse(
            "250-ServiceID=exampleonionaddress\r\n250-PrivateKey=ED25519-V3:abc=\r\n250-Flag\r\n250 OK\r\n",
        )
        .await;
        assert_eq!(response.code, 250);
        assert_eq!(response.get("ServiceID"), Some("exampleonionaddress"));
        // Only the first `=` separates key from value
        assert_eq!(response.get("PrivateKey"), Some("ED25519-V3:abc="));
        assert!(response.body.contains_key("Flag"));
        assert_eq!(response.get("Flag"), None);
    }

    #[tokio::test]
    async fn test_data_block() {
        let input = "250+config-text=\r\nSocksPort 9050\r\n..dotted\r\n.\r\n250 OK\r\n";
        let mut reader = BufReader::new(input.as_bytes());
        let lines = read_reply(&mut reader).await.unwrap().unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].body.as_deref(), Some("SocksPort 9050\n.dotted\n"));

        let response = ControlResponse::from_lines(lines).unwrap();
        assert_eq!(response.get("config-text"), Some("SocksPort 9050\n.dotted\n"));
    }

    #[tokio::test]
    async fn test_last_line_without_ok_is_kept() {
        let response = parse("250-version=0.4.8\r\n250 net/listeners/socks=\"127.0.0.1:9050\"\r\n").await;
        assert_eq!(response.message, "net/listeners/socks=\"127.0.0.1:9050\"");
        assert_eq!(response.get("version"), Some("0.4.8"));
        assert_eq!(
            response.get("net/listeners/socks"),
            Some("\"127.0.0.1:9050\"")
        );
    }

    #[tokio::test]
    async fn test_error_and_event_codes() {
        let response = parse("552 Unrecognized key \"foo\"\r\n").await;
        assert_eq!(response.code, 552);
        assert!(!response.is_ok());

        let response = parse("650 CIRC 5 BUILT\r\n").await;
        assert!(response.is_event());
    }

    #[tokio::test]
    async fn test_consecutive_replies() {
        let mut reader = BufReader::new("250 OK\r\n650 BW 1 2\r\n".as_bytes());
        assert_eq!(read_response(&mut reader).await.unwrap().unwrap().code, 250);
        assert_eq!(read_response(&mut reader).await.unwrap().unwrap().code, 650);
        assert!(read_response(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_and_malformed() {
        let mut reader = BufReader::new("250-partial\r\n".as_bytes());
        assert!(matches!(
            read_reply(&mut reader).await,
            Err(ControlError::UnexpectedEof)
        ));

        let mut reader = BufReader::new("25\r\n".as_bytes());
        assert!(matches!(
            read_reply(&mut reader).await,
            Err(ControlError::MalformedReply(_))
        ));

        let mut reader = BufReader::new("250+data=\r\nno terminator\r\n".as_bytes());
        assert!(matches!(
            read_reply(&mut reader).await,
            Err(ControlError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_unknown_separator_is_malformed() {
        let mut reader = BufReader::new("250*odd\r\n250 OK\r\n".as_bytes());
        assert!(matches!(
            read_reply(&mut reader).await,
            Err(ControlError::MalformedReply(line)) if line == "250*odd"
        ));
    }
}
