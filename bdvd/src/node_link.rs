//! The single outbound P2P connection `bdvd` keeps open to its one
//! operator-configured node: a `version`/`verack` handshake, followed by a
//! read loop that forwards `inv`/`tx`/`reject` traffic into the mempool
//! pipeline and a write half that sends `getdata`/`tx`/`inv` on request.
//!
//! `bdv-protocol` only owns the wire format; everything here — the
//! handshake, the reconnect loop, the split between a reader task and a
//! writer task sharing one `Framed<TcpStream, Codec>` — is `bdvd`'s own,
//! there being no peer-connection-management code anywhere upstream of it
//! to generalize.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use bdv_chain::{block, parameters::Network, transaction};
use bdv_protocol::constants::{CURRENT_VERSION, USER_AGENT};
use bdv_protocol::protocol::external::message::{RejectReason, Version};
use bdv_protocol::protocol::external::types::PeerServices;
use bdv_protocol::protocol::external::{Codec, InventoryHash, Message};

use bdv_mempool::broadcast::{PeerOutbound, RpcBroadcaster};

/// Either half of the connection failing: the socket itself, or the wire
/// codec rejecting what came off it.
#[derive(thiserror::Error, Debug)]
enum LinkError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] bdv_chain::serialization::SerializationError),
}

/// What the read half of the connection hands upstream.
pub enum PeerEvent {
    Tx(Arc<transaction::Transaction>),
    Reject {
        tx_hash: transaction::Hash,
        reason: RejectReason,
        message: String,
    },
}

/// Sends outbound wire messages by queuing them for the connection task;
/// never blocks the caller on the actual socket write.
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl PeerOutbound for OutboundHandle {
    fn send_inv(&self, hashes: &[transaction::Hash]) {
        let inv = hashes.iter().copied().map(InventoryHash::Tx).collect();
        let _ = self.tx.send(Message::Inv(inv));
    }
}

/// Broadcasts through the same connection rather than through a peer's
/// store-and-forward `inv`/`getdata` round trip, used once a broadcast
/// batch's timeout elapses. `bdvd` has no separate JSON-RPC credentials of
/// its own, so the fallback is an unsolicited `tx` on the same P2P link.
pub struct RpcFallback {
    tx: mpsc::UnboundedSender<Message>,
}

impl RpcFallback {
    pub fn new(outbound: &OutboundHandle) -> RpcFallback {
        RpcFallback { tx: outbound.tx.clone() }
    }
}

impl RpcBroadcaster for RpcFallback {
    fn broadcast(&self, tx: Arc<transaction::Transaction>) -> std::result::Result<(), String> {
        self.tx.send(Message::Tx(tx)).map_err(|_| "peer connection closed".to_string())
    }
}

/// Spawns the connection's reconnect loop and returns a handle callers use
/// to queue outbound messages. The loop never exits; a dropped connection
/// is retried after a short backoff so a node restart doesn't require
/// restarting `bdvd`.
pub fn spawn(
    addr: SocketAddr,
    network: Network,
    best_block: block::Height,
    events: mpsc::UnboundedSender<PeerEvent>,
) -> OutboundHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = OutboundHandle { tx };

    tokio::spawn(async move {
        loop {
            match connect_once(addr, network, best_block, &mut rx, &events).await {
                Ok(()) => tracing::info!(%addr, "peer connection closed cleanly"),
                Err(error) => tracing::warn!(%addr, %error, "peer connection failed"),
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });

    handle
}

async fn connect_once(
    addr: SocketAddr,
    network: Network,
    best_block: block::Height,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
    events: &mpsc::UnboundedSender<PeerEvent>,
) -> Result<(), LinkError> {
    let stream = TcpStream::connect(addr).await?;
    let local_addr = stream.local_addr()?;
    let codec = Codec::builder().for_network(network).finish();
    let mut framed = Framed::new(stream, codec);

    let nonce = rand::thread_rng().gen::<u64>().into();
    let version = Version::new(
        CURRENT_VERSION,
        addr,
        PeerServices::NODE_NETWORK,
        PeerServices::empty(),
        local_addr,
        nonce,
        USER_AGENT.to_string(),
        best_block,
        true,
    );
    framed.send(Message::Version(version)).await?;

    let mut verack_received = false;
    let mut version_received = false;
    while !verack_received || !version_received {
        match framed.next().await {
            Some(Ok(Message::Version(_))) => {
                version_received = true;
                framed.send(Message::Verack).await?;
            }
            Some(Ok(Message::Verack)) => verack_received = true,
            Some(Ok(_)) => continue,
            Some(Err(error)) => return Err(error.into()),
            None => return Ok(()),
        }
    }
    tracing::info!(%addr, "peer handshake complete");

    loop {
        tokio::select! {
            outbound_msg = outbound.recv() => {
                match outbound_msg {
                    Some(message) => framed.send(message).await?,
                    None => return Ok(()),
                }
            }
            inbound = framed.next() => {
                match inbound {
                    Some(Ok(Message::Inv(items))) => {
                        let hashes: Vec<transaction::Hash> = items
                            .into_iter()
                            .filter_map(|item| match item {
                                InventoryHash::Tx(hash) => Some(hash),
                                _ => None,
                            })
                            .collect();
                        if !hashes.is_empty() {
                            let getdata = hashes.into_iter().map(InventoryHash::Tx).collect();
                            framed.send(Message::GetData(getdata)).await?;
                        }
                    }
                    Some(Ok(Message::Tx(tx))) => {
                        let _ = events.send(PeerEvent::Tx(tx));
                    }
                    Some(Ok(Message::Reject { message, ccode, reason, data })) => {
                        if let Some(hash) = data.map(transaction::Hash) {
                            let _ = events.send(PeerEvent::Reject {
                                tx_hash: hash,
                                reason: ccode,
                                message: format!("{}: {:?} {}", message, ccode, reason),
                            });
                        }
                    }
                    Some(Ok(Message::Ping(nonce))) => framed.send(Message::Pong(nonce)).await?,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return Err(error.into()),
                    None => return Ok(()),
                }
            }
        }
    }
}
