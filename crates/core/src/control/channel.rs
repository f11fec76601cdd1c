use super::command::{CircuitPurpose, EventKind, KeyType, OnionFlag, OnionPort, SignalKind};
use super::reply::read_response;
use super::{
    ControlCommand, ControlError, ControlEvent, ControlNotification, ControlResponse,
    ControlTransaction, PasswordDigest,
};
use crate::network::NetworkContext;
use hiddenlink_common::config::control::{EVENT_TOPIC, TRANSACTION_TOPIC};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// A command on its way to the daemon
struct Pending {
    command: ControlCommand,
    reply: Option<oneshot::Sender<ControlResponse>>,
}

/// Input of the correlator task
enum Correlation {
    Sent(Pending),
    Reply(ControlResponse),
    Closed,
}

/// Connection to the transport daemon's control port
///
/// Three tasks cooperate:
/// - the writer encodes commands and announces each to the correlator
///   before it hits the network, so a fast reply can't overtake it
/// - the reader parses complete replies off the stream
/// - the correlator keeps the FIFO of unanswered commands and pairs them
///   with replies; `650` replies are events and leave the FIFO alone
///
/// Paired transactions and events are published on the network context's
/// control topics.
pub struct ControlChannel {
    commands: UnboundedSender<Pending>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControlChannel {
    /// Connect to the control port at `addr`
    pub async fn connect(
        addr: &str,
        context: Arc<NetworkContext>,
        connect_timeout: Duration,
    ) -> Result<Self, ControlError> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ControlError::Timeout)??;
        info!("Connected to control port {}", addr);

        let (reader, writer) = stream.into_split();
        Ok(Self::from_stream(reader, writer, context))
    }

    /// Drive the control protocol over an existing stream pair
    pub fn from_stream<R, W>(reader: R, writer: W, context: Arc<NetworkContext>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (commands, outbound) = unbounded_channel();
        let (correlations, inbound) = unbounded_channel();

        let tasks = vec![
            tokio::spawn(write_commands(writer, outbound, correlations.clone())),
            tokio::spawn(read_replies(reader, correlations)),
            tokio::spawn(correlate(inbound, context)),
        ];

        Self { commands, tasks }
    }

    /// Queue `command` without waiting for its reply
    pub fn send(&self, command: ControlCommand) -> Result<(), ControlError> {
        self.commands
            .send(Pending {
                command,
                reply: None,
            })
            .map_err(|_| ControlError::Closed)
    }

    /// Send `command` and wait for the reply paired with it
    pub async fn request(&self, command: ControlCommand) -> Result<ControlResponse, ControlError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Pending {
                command,
                reply: Some(tx),
            })
            .map_err(|_| ControlError::Closed)?;
        rx.await.map_err(|_| ControlError::Closed)
    }

    /// Like [`request`](Self::request), but a non-2xx reply is an error
    pub async fn request_ok(&self, command: ControlCommand) -> Result<ControlResponse, ControlError> {
        let response = self.request(command).await?;
        if !response.is_ok() {
            return Err(ControlError::Rejected {
                code: response.code,
                message: response.message,
            });
        }
        Ok(response)
    }

    pub async fn add_onion(
        &self,
        key_type: KeyType,
        key_blob: impl Into<String>,
        ports: Vec<OnionPort>,
        flags: Vec<OnionFlag>,
    ) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::AddOnion {
            key_type,
            key_blob: key_blob.into(),
            ports,
            flags,
            max_streams: None,
            client: None,
        })
        .await
    }

    pub async fn authenticate(&self, secret: Option<&[u8]>) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::Authenticate(secret.map(|s| s.to_vec())))
            .await
    }

    pub async fn auth_challenge(&self) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::auth_challenge()).await
    }

    pub async fn delete_onion(&self, service_id: impl Into<String>) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::DeleteOnion(service_id.into()))
            .await
    }

    pub async fn drop_guards(&self) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::DropGuards).await
    }

    pub async fn extend_circuit(
        &self,
        circuit_id: impl Into<String>,
        server_spec: Vec<String>,
        purpose: Option<CircuitPurpose>,
    ) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::ExtendCircuit {
            circuit_id: circuit_id.into(),
            server_spec,
            purpose,
        })
        .await
    }

    pub async fn load_configuration(&self, text: impl Into<String>) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::LoadConfiguration(text.into()))
            .await
    }

    pub async fn protocol_info(&self) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::ProtocolInfo).await
    }

    pub async fn quit(&self) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::Quit).await
    }

    pub async fn reset_configuration(
        &self,
        params: Vec<(String, String)>,
    ) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::ResetConfiguration(params))
            .await
    }

    pub async fn save_configuration(&self, force: bool) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::SaveConfiguration { force })
            .await
    }

    pub async fn set_configuration(
        &self,
        params: Vec<(String, String)>,
    ) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::SetConfiguration(params))
            .await
    }

    /// Set `HashedControlPassword` to the salted digest of `password`
    pub async fn set_password(&self, password: &str) -> Result<ControlResponse, ControlError> {
        let hashed = PasswordDigest::new(password).hashed_password();
        self.set_configuration(vec![("HashedControlPassword".to_string(), hashed)])
            .await
    }

    pub async fn set_events(&self, events: Vec<EventKind>) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::SetEvents(events)).await
    }

    pub async fn signal(&self, signal: SignalKind) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::Signal(signal)).await
    }

    pub async fn take_ownership(&self) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::TakeOwnership).await
    }

    pub async fn get_configuration(&self, keys: Vec<String>) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::GetConfiguration(keys)).await
    }

    pub async fn get_info(&self, keys: Vec<String>) -> Result<ControlResponse, ControlError> {
        self.request_ok(ControlCommand::GetInfo(keys)).await
    }

    /// Stop all channel tasks
    pub fn close(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_commands<W>(
    mut writer: W,
    mut outbound: UnboundedReceiver<Pending>,
    correlations: UnboundedSender<Correlation>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(pending) = outbound.recv().await {
        let bytes = pending.command.encode();
        let keyword = pending.command.keyword();

        if correlations.send(Correlation::Sent(pending)).is_err() {
            break;
        }

        debug!("Control command {}", keyword);
        let written = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            warn!("Failed to write control command {}: {}", keyword, e);
            let _ = correlations.send(Correlation::Closed);
            break;
        }
    }
}

async fn read_replies<R>(reader: R, correlations: UnboundedSender<Correlation>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        match read_response(&mut reader).await {
            Ok(Some(response)) => {
                if correlations.send(Correlation::Reply(response)).is_err() {
                    return;
                }
            }
            Ok(None) => {
                info!("Control connection closed by daemon");
                break;
            }
            Err(e) => {
                warn!("Control reply error: {}", e);
                break;
            }
        }
    }
    let _ = correlations.send(Correlation::Closed);
}

async fn correlate(mut inbound: UnboundedReceiver<Correlation>, context: Arc<NetworkContext>) {
    let mut pending: VecDeque<Pending> = VecDeque::new();

    while let Some(item) = inbound.recv().await {
        match item {
            Correlation::Sent(command) => pending.push_back(command),
            Correlation::Reply(response) if response.is_event() => {
                debug!("Control event: {}", response.message);
                context.publish_control(
                    EVENT_TOPIC,
                    ControlNotification::Event(ControlEvent { response }),
                );
            }
            Correlation::Reply(response) => {
                let Some(request) = pending.pop_front() else {
                    warn!("Unsolicited control reply {} {}", response.code, response.message);
                    continue;
                };

                debug!("{} -> {} {}", request.command, response.code, response.message);
                if let Some(reply) = request.reply {
                    let _ = reply.send(response.clone());
                }
                context.publish_control(
                    TRANSACTION_TOPIC,
                    ControlNotification::Transaction(ControlTransaction {
                        request: request.command,
                        response,
                    }),
                );
            }
            Correlation::Closed => break,
        }
    }

    if !pending.is_empty() {
        debug!("Dropping {} unanswered control command(s)", pending.len());
    }
}
