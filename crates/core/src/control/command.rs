use rand::RngCore;
use std::fmt;

/// `GETINFO` keys used by the node
pub mod info_keys {
    pub const ADDRESS_MAPPINGS_ALL: &str = "address-mappings/all";
    pub const ONIONS_CURRENT: &str = "onions/current";
    pub const ONIONS_DETACHED: &str = "onions/detached";
    pub const NETWORK_LIVENESS: &str = "network-liveness";
    pub const TRAFFIC_READ: &str = "traffic/read";
    pub const TRAFFIC_WRITTEN: &str = "traffic/written";
}

/// Key material for `ADD_ONION`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Let the daemon generate a key; the blob names the algorithm (`BEST`)
    New,
    Rsa1024,
    Ed25519V3,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Rsa1024 => "RSA1024",
            Self::Ed25519V3 => "ED25519-V3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnionFlag {
    DiscardPk,
    Detach,
    BasicAuth,
    NonAnonymous,
    MaxStreamsCloseCircuit,
}

impl OnionFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DiscardPk => "DiscardPK",
            Self::Detach => "Detach",
            Self::BasicAuth => "BasicAuth",
            Self::NonAnonymous => "NonAnonymous",
            Self::MaxStreamsCloseCircuit => "MaxStreamsCloseCircuit",
        }
    }
}

/// Hidden-service port mapping, `Port=virtual[,target]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionPort {
    pub virtual_port: u16,
    pub target: Option<String>,
}

impl OnionPort {
    pub fn new(virtual_port: u16) -> Self {
        Self {
            virtual_port,
            target: None,
        }
    }

    pub fn with_target(virtual_port: u16, target: impl Into<String>) -> Self {
        Self {
            virtual_port,
            target: Some(target.into()),
        }
    }
}

impl fmt::Display for OnionPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port={}", self.virtual_port)?;
        if let Some(target) = &self.target {
            write!(f, ",{}", target)?;
        }
        Ok(())
    }
}

/// Basic-auth client of a hidden service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionClient {
    pub name: String,
    pub blob: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPurpose {
    General,
    Controller,
}

impl CircuitPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Controller => "controller",
        }
    }
}

/// Events a controller can subscribe to with `SETEVENTS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Circ,
    Stream,
    OrConn,
    Bw,
    Debug,
    Info,
    Notice,
    Warn,
    Err,
    NewDesc,
    AddrMap,
    AuthDirNewDescs,
    HsDesc,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Circ => "CIRC",
            Self::Stream => "STREAM",
            Self::OrConn => "ORCONN",
            Self::Bw => "BW",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Notice => "NOTICE",
            Self::Warn => "WARN",
            Self::Err => "ERR",
            Self::NewDesc => "NEWDESC",
            Self::AddrMap => "ADDRMAP",
            Self::AuthDirNewDescs => "AUTHDIR_NEWDESCS",
            Self::HsDesc => "HS_DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Reload,
    Shutdown,
    Dump,
    Debug,
    Halt,
    Hup,
    Int,
    Usr1,
    Usr2,
    Term,
    NewNym,
    ClearDnsCache,
    Heartbeat,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reload => "RELOAD",
            Self::Shutdown => "SHUTDOWN",
            Self::Dump => "DUMP",
            Self::Debug => "DEBUG",
            Self::Halt => "HALT",
            Self::Hup => "HUP",
            Self::Int => "INT",
            Self::Usr1 => "USR1",
            Self::Usr2 => "USR2",
            Self::Term => "TERM",
            Self::NewNym => "NEWNYM",
            Self::ClearDnsCache => "CLEARDNSCACHE",
            Self::Heartbeat => "HEARTBEAT",
        }
    }
}

/// A command sent to the transport daemon's control port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    AddOnion {
        key_type: KeyType,
        key_blob: String,
        ports: Vec<OnionPort>,
        flags: Vec<OnionFlag>,
        max_streams: Option<u32>,
        client: Option<OnionClient>,
    },
    /// Optional secret, hex-encoded on the wire
    Authenticate(Option<Vec<u8>>),
    /// Carries the client nonce
    AuthChallenge([u8; 32]),
    DeleteOnion(String),
    DropGuards,
    ExtendCircuit {
        circuit_id: String,
        server_spec: Vec<String>,
        purpose: Option<CircuitPurpose>,
    },
    LoadConfiguration(String),
    ProtocolInfo,
    Quit,
    ResetConfiguration(Vec<(String, String)>),
    SaveConfiguration { force: bool },
    SetConfiguration(Vec<(String, String)>),
    SetEvents(Vec<EventKind>),
    Signal(SignalKind),
    TakeOwnership,
    GetConfiguration(Vec<String>),
    GetInfo(Vec<String>),
}

fn no_args(command: &str) -> Vec<u8> {
    format!("{}\r\n", command).into_bytes()
}

fn join_args<I, S>(command: &str, args: I) -> Vec<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = command.to_string();
    for arg in args {
        let arg = arg.as_ref();
        if arg.trim().is_empty() {
            continue;
        }
        line.push(' ');
        line.push_str(arg);
    }
    line.push_str("\r\n");
    line.into_bytes()
}

fn key_values(params: &[(String, String)]) -> impl Iterator<Item = String> + '_ {
    params.iter().map(|(k, v)| format!("{}={}", k, v))
}

impl ControlCommand {
    /// Create a hidden service with a fresh key from the daemon
    pub fn add_onion_new(ports: Vec<OnionPort>) -> Self {
        Self::AddOnion {
            key_type: KeyType::New,
            key_blob: "BEST".to_string(),
            ports,
            flags: Vec::new(),
            max_streams: None,
            client: None,
        }
    }

    /// `AUTHCHALLENGE SAFECOOKIE` with a random client nonce
    pub fn auth_challenge() -> Self {
        let mut nonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self::AuthChallenge(nonce)
    }

    /// Command keyword, used in logs
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::AddOnion { .. } => "ADD_ONION",
            Self::Authenticate(_) => "AUTHENTICATE",
            Self::AuthChallenge(_) => "AUTHCHALLENGE",
            Self::DeleteOnion(_) => "DEL_ONION",
            Self::DropGuards => "DROPGUARDS",
            Self::ExtendCircuit { .. } => "EXTENDCIRCUIT",
            Self::LoadConfiguration(_) => "LOADCONF",
            Self::ProtocolInfo => "PROTOCOLINFO",
            Self::Quit => "QUIT",
            Self::ResetConfiguration(_) => "RESETCONF",
            Self::SaveConfiguration { .. } => "SAVECONF",
            Self::SetConfiguration(_) => "SETCONF",
            Self::SetEvents(_) => "SETEVENTS",
            Self::Signal(_) => "SIGNAL",
            Self::TakeOwnership => "TAKEOWNERSHIP",
            Self::GetConfiguration(_) => "GETCONF",
            Self::GetInfo(_) => "GETINFO",
        }
    }

    /// Wire form, CRLF terminated
    pub fn encode(&self) -> Vec<u8> {
        let keyword = self.keyword();
        match self {
            Self::AddOnion {
                key_type,
                key_blob,
                ports,
                flags,
                max_streams,
                client,
            } => {
                let mut args = vec![format!("{}:{}", key_type.as_str(), key_blob)];
                if !flags.is_empty() {
                    let flags: Vec<_> = flags.iter().map(|f| f.as_str()).collect();
                    args.push(format!("Flags={}", flags.join(",")));
                }
                if let Some(n) = max_streams {
                    args.push(format!("MaxStreams={}", n));
                }
                args.extend(ports.iter().map(|p| p.to_string()));
                if let Some(client) = client {
                    let mut auth = format!("ClientAuth={}", client.name);
                    if let Some(blob) = &client.blob {
                        auth.push(':');
                        auth.push_str(blob);
                    }
                    args.push(auth);
                }
                join_args(keyword, args)
            }
            Self::Authenticate(None) => no_args(keyword),
            Self::Authenticate(Some(secret)) => join_args(keyword, [hex::encode_upper(secret)]),
            Self::AuthChallenge(nonce) => join_args(keyword, ["SAFECOOKIE".to_string(), hex::encode_upper(nonce)]),
            Self::DeleteOnion(service_id) => join_args(keyword, [service_id]),
            Self::ExtendCircuit {
                circuit_id,
                server_spec,
                purpose,
            } => join_args(
                keyword,
                [
                    circuit_id.clone(),
                    server_spec.join(","),
                    purpose
                        .map(|p| format!("purpose={}", p.as_str()))
                        .unwrap_or_default(),
                ],
            ),
            Self::LoadConfiguration(text) => format!("+{}\r\n{}\r\n.\r\n", keyword, text).into_bytes(),
            Self::ResetConfiguration(params) | Self::SetConfiguration(params) => {
                join_args(keyword, key_values(params))
            }
            Self::SaveConfiguration { force: true } => join_args(keyword, ["FORCE"]),
            Self::SetEvents(events) => join_args(keyword, events.iter().map(|e| e.as_str())),
            Self::Signal(signal) => join_args(keyword, [signal.as_str()]),
            Self::GetConfiguration(keys) | Self::GetInfo(keys) => join_args(keyword, keys),
            Self::DropGuards
            | Self::ProtocolInfo
            | Self::Quit
            | Self::SaveConfiguration { force: false }
            | Self::TakeOwnership => no_args(keyword),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(command: ControlCommand) -> String {
        String::from_utf8(command.encode()).unwrap()
    }

    #[test]
    fn test_signal() {
        assert_eq!(
            encoded(ControlCommand::Signal(SignalKind::Debug)),
            "SIGNAL DEBUG\r\n"
        );
    }

    #[test]
    fn test_get_configuration() {
        assert_eq!(
            encoded(ControlCommand::GetConfiguration(vec![
                "what".into(),
                "ever".into()
            ])),
            "GETCONF what ever\r\n"
        );
    }

    #[test]
    fn test_get_info() {
        assert_eq!(
            encoded(ControlCommand::GetInfo(vec![
                info_keys::ADDRESS_MAPPINGS_ALL.into(),
                info_keys::NETWORK_LIVENESS.into()
            ])),
            "GETINFO address-mappings/all network-liveness\r\n"
        );
    }

    #[test]
    fn test_no_argument_commands() {
        assert_eq!(encoded(ControlCommand::ProtocolInfo), "PROTOCOLINFO\r\n");
        assert_eq!(encoded(ControlCommand::Quit), "QUIT\r\n");
        assert_eq!(encoded(ControlCommand::DropGuards), "DROPGUARDS\r\n");
        assert_eq!(encoded(ControlCommand::TakeOwnership), "TAKEOWNERSHIP\r\n");
        assert_eq!(encoded(ControlCommand::Authenticate(None)), "AUTHENTICATE\r\n");
        assert_eq!(
            encoded(ControlCommand::SaveConfiguration { force: false }),
            "SAVECONF\r\n"
        );
        assert_eq!(
            encoded(ControlCommand::SaveConfiguration { force: true }),
            "SAVECONF FORCE\r\n"
        );
    }

    #[test]
    fn test_blank_arguments_are_skipped() {
        assert_eq!(
            encoded(ControlCommand::GetConfiguration(vec![
                "a".into(),
                "".into(),
                "  ".into(),
                "b".into()
            ])),
            "GETCONF a b\r\n"
        );
    }

    #[test]
    fn test_add_onion() {
        let command = ControlCommand::AddOnion {
            key_type: KeyType::New,
            key_blob: "BEST".into(),
            ports: vec![OnionPort::new(5012), OnionPort::with_target(80, "127.0.0.1:5000")],
            flags: vec![OnionFlag::DiscardPk, OnionFlag::BasicAuth],
            max_streams: Some(5),
            client: Some(OnionClient {
                name: "alice".into(),
                blob: Some("secret".into()),
            }),
        };
        assert_eq!(
            encoded(command),
            "ADD_ONION NEW:BEST Flags=DiscardPK,BasicAuth MaxStreams=5 Port=5012 \
             Port=80,127.0.0.1:5000 ClientAuth=alice:secret\r\n"
        );

        assert_eq!(
            encoded(ControlCommand::add_onion_new(vec![OnionPort::new(5012)])),
            "ADD_ONION NEW:BEST Port=5012\r\n"
        );
    }

    #[test]
    fn test_authenticate_hex() {
        assert_eq!(
            encoded(ControlCommand::Authenticate(Some(b"pw".to_vec()))),
            "AUTHENTICATE 7077\r\n"
        );
    }

    #[test]
    fn test_auth_challenge_nonce() {
        let line = encoded(ControlCommand::auth_challenge());
        let parts: Vec<&str> = line.trim_end().split(' ').collect();
        assert_eq!(parts[0], "AUTHCHALLENGE");
        assert_eq!(parts[1], "SAFECOOKIE");
        assert_eq!(parts[2].len(), 64);
    }

    #[test]
    fn test_extend_circuit() {
        let command = ControlCommand::ExtendCircuit {
            circuit_id: "0".into(),
            server_spec: vec!["relayA".into(), "relayB".into()],
            purpose: Some(CircuitPurpose::General),
        };
        assert_eq!(
            encoded(command),
            "EXTENDCIRCUIT 0 relayA,relayB purpose=general\r\n"
        );
    }

    #[test]
    fn test_load_configuration_block() {
        let command = ControlCommand::LoadConfiguration("SocksPort 9050\nControlPort 9051".into());
        assert_eq!(
            encoded(command),
            "+LOADCONF\r\nSocksPort 9050\nControlPort 9051\r\n.\r\n"
        );
    }

    #[test]
    fn test_set_configuration_and_events() {
        let command = ControlCommand::SetConfiguration(vec![
            ("HashedControlPassword".into(), "16:ABC".into()),
        ]);
        assert_eq!(encoded(command), "SETCONF HashedControlPassword=16:ABC\r\n");

        let command = ControlCommand::SetEvents(vec![EventKind::Circ, EventKind::Bw]);
        assert_eq!(encoded(command), "SETEVENTS CIRC BW\r\n");

        let command = ControlCommand::DeleteOnion("abcdef".into());
        assert_eq!(encoded(command), "DEL_ONION abcdef\r\n");
    }
}
