//! The BDV client wire protocol: a length-prefixed `bincode` frame per
//! message in both directions. `bdv-session` only knows about typed
//! [`bdv_session::command::Command`]/[`bdv_session::notification::
//! Notification`] values; this module is the only place that turns them
//! into bytes on a socket.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use bdv_session::command::{Command, Reply};
use bdv_session::notification::{Notification, NotificationDispatcher};
use bdv_session::{BdvId, Error, Session};

use crate::error::Result;

const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

async fn read_frame(stream: &mut TcpStream) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    if let Err(error) = stream.read_exact(&mut len_buf).await {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(error.into());
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(crate::error::Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "client frame exceeded the maximum allowed length",
        )));
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    Ok(Some(body))
}

async fn write_frame(stream: &mut TcpStream, body: &[u8]) -> Result<()> {
    stream.write_all(&(body.len() as u32).to_le_bytes()).await?;
    stream.write_all(body).await?;
    Ok(())
}

/// Pushes notifications to a connected client by forwarding them onto the
/// per-connection outbound channel; the connection's writer half drains
/// that channel and frames each one onto the socket.
pub struct ChannelDeliver {
    senders: std::sync::Mutex<std::collections::HashMap<BdvId, mpsc::UnboundedSender<Notification>>>,
}

impl ChannelDeliver {
    pub fn new() -> ChannelDeliver {
        ChannelDeliver {
            senders: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn register(&self, bdv_id: BdvId, sender: mpsc::UnboundedSender<Notification>) {
        self.senders.lock().expect("sender map poisoned").insert(bdv_id, sender);
    }

    pub fn unregister(&self, bdv_id: &BdvId) {
        self.senders.lock().expect("sender map poisoned").remove(bdv_id);
    }
}

impl bdv_session::notification::Deliver for Arc<ChannelDeliver> {
    fn deliver(&self, bdv_id: &BdvId, notification: &Notification) {
        let sender = self.senders.lock().expect("sender map poisoned").get(bdv_id).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(notification.clone());
        }
    }
}

/// One connected client's read/dispatch/write loop. Every inbound frame is
/// `(u64 message id, Command)`; every outbound reply frame is
/// `(u64 message id, Result<Reply, String>)`, and every pushed notification
/// is sent as a bare `Notification` frame (tagged by having no leading id)
/// — replies and notifications share the connection but not the envelope,
/// since a client always knows which one it's looking at from the Rust type
/// it deserializes into on its own side.
pub async fn serve(
    mut stream: TcpStream,
    bdv_id: BdvId,
    session: Arc<Session>,
    registry: Arc<bdv_session::SessionRegistry>,
    dispatcher: Arc<NotificationDispatcher<Arc<ChannelDeliver>>>,
    deliver: Arc<ChannelDeliver>,
) {
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    deliver.register(bdv_id.clone(), notify_tx);
    dispatcher.register_session(bdv_id.clone());
    dispatcher.notify(bdv_id.clone(), Notification::Ready);

    loop {
        tokio::select! {
            inbound = read_frame(&mut stream) => {
                match inbound {
                    Ok(Some(body)) => {
                        let envelope: std::result::Result<(u64, Command), _> = bincode::deserialize(&body);
                        match envelope {
                            Ok((msg_id, command)) => {
                                if let Err(error) = handle_dispatch(&mut stream, &session, msg_id, command).await {
                                    tracing::warn!(%error, "failed writing a reply frame");
                                    break;
                                }
                            }
                            Err(error) => {
                                tracing::warn!(%error, "dropping an undecodable client frame");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        tracing::warn!(%error, "client connection read failed");
                        break;
                    }
                }
            }
            outbound = notify_rx.recv() => {
                match outbound {
                    Some(notification) => {
                        let body = match bincode::serialize(&notification) {
                            Ok(body) => body,
                            Err(error) => {
                                tracing::error!(%error, "failed to encode a notification");
                                continue;
                            }
                        };
                        if write_frame(&mut stream, &body).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    deliver.unregister(&bdv_id);
    dispatcher.unregister_session(&bdv_id);
    registry.close_session(&bdv_id);
}

async fn handle_dispatch(stream: &mut TcpStream, session: &Arc<Session>, msg_id: u64, command: Command) -> Result<()> {
    match session.dispatch(msg_id, command) {
        bdv_session::DispatchOutcome::Busy => Ok(()),
        bdv_session::DispatchOutcome::Processed(replies) => {
            for (id, result) in replies {
                let encoded: (u64, std::result::Result<Reply, String>) =
                    (id, result.map_err(|error: Error| error.to_string()));
                let body = bincode::serialize(&encoded)?;
                write_frame(stream, &body).await?;
            }
            Ok(())
        }
    }
}
