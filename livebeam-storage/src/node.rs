// Minimal content-addressed peer node
//
// A local block store fronted by a libp2p swarm: tcp transport with noise +
// yamux, a Kademlia routing table over an in-memory store, and identify so
// dialed peers land in the routing table. Added blocks are announced as
// provider records; full DHT content routing is out of scope.
//
// The swarm is driven by a single task; callers talk to it over a command
// channel (local construction always works, the network side is best-effort).

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use libp2p::{
    identify, kad,
    kad::store::MemoryStore,
    multiaddr::Protocol,
    noise,
    swarm::SwarmEvent,
    tcp, yamux, Multiaddr, PeerId, Swarm, SwarmBuilder,
};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};

/// Content identifier of a block: hex-encoded sha256 of its bytes.
#[must_use]
pub fn content_id(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// The NetworkBehaviour derive expands code that names `Result` unqualified,
// which collides with the crate's single-parameter `Result<T>` alias imported
// above. Keep the derive in its own module so `std::result::Result` applies.
mod behaviour {
    use libp2p::{identify, kad, kad::store::MemoryStore, swarm::NetworkBehaviour};

    #[derive(NetworkBehaviour)]
    pub(super) struct NodeBehaviour {
        pub(super) kademlia: kad::Behaviour<MemoryStore>,
        pub(super) identify: identify::Behaviour,
    }
}

use behaviour::{NodeBehaviour, NodeBehaviourEvent};

enum NodeCommand {
    AddBlock {
        data: Bytes,
        reply: oneshot::Sender<Result<String>>,
    },
    GetBlock {
        id: String,
        reply: oneshot::Sender<Option<Bytes>>,
    },
    Connect {
        addr: Multiaddr,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle to the local content node.
///
/// Cloneable; dropping every handle stops the driver task.
#[derive(Clone, Debug)]
pub struct ContentNode {
    commands: mpsc::Sender<NodeCommand>,
    peer_id: PeerId,
}

impl ContentNode {
    /// Construct the local node and start its driver task.
    ///
    /// This is the local phase only: it fails when local resources (the
    /// listen address) are unavailable, never because the network is.
    pub fn spawn(listen_addr: &str) -> Result<Self> {
        let listen_addr: Multiaddr = listen_addr
            .parse()
            .map_err(|_| StorageError::InvalidAddress(listen_addr.to_string()))?;

        let mut swarm = SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| StorageError::Backend(format!("transport setup failed: {e}")))?
            .with_behaviour(|key| {
                let peer_id = key.public().to_peer_id();
                let mut kademlia = kad::Behaviour::new(peer_id, MemoryStore::new(peer_id));
                kademlia.set_mode(Some(kad::Mode::Server));
                let identify = identify::Behaviour::new(identify::Config::new(
                    "/livebeam/0.1.0".to_string(),
                    key.public(),
                ));
                NodeBehaviour { kademlia, identify }
            })
            .map_err(|e| StorageError::Backend(format!("behaviour setup failed: {e}")))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
            .build();

        swarm
            .listen_on(listen_addr)
            .map_err(|e| StorageError::Backend(format!("listen failed: {e}")))?;

        let peer_id = *swarm.local_peer_id();
        let (tx, rx) = mpsc::channel(64);

        let driver = NodeDriver {
            swarm,
            blocks: HashMap::new(),
            commands: rx,
        };
        tokio::spawn(driver.run());

        info!(%peer_id, "content node started");
        Ok(Self {
            commands: tx,
            peer_id,
        })
    }

    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Store a block locally and announce it to the peer network.
    pub async fn add_block(&self, data: Bytes) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(NodeCommand::AddBlock { data, reply })
            .await
            .map_err(|_| StorageError::NodeStopped)?;
        rx.await.map_err(|_| StorageError::NodeStopped)?
    }

    /// Fetch a locally held block by its content identifier.
    pub async fn get_block(&self, id: &str) -> Result<Bytes> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(NodeCommand::GetBlock {
                id: id.to_string(),
                reply,
            })
            .await
            .map_err(|_| StorageError::NodeStopped)?;
        rx.await
            .map_err(|_| StorageError::NodeStopped)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    /// Dial a peer so this node joins its network.
    ///
    /// Returns an error when the dial cannot even be started; a dial that
    /// fails later surfaces in the driver's logs only.
    pub async fn connect(&self, addr: Multiaddr) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(NodeCommand::Connect { addr, reply })
            .await
            .map_err(|_| StorageError::NodeStopped)?;
        rx.await.map_err(|_| StorageError::NodeStopped)?
    }
}

struct NodeDriver {
    swarm: Swarm<NodeBehaviour>,
    blocks: HashMap<String, Bytes>,
    commands: mpsc::Receiver<NodeCommand>,
}

impl NodeDriver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("content node handles dropped, stopping driver");
                        break;
                    }
                },
                event = self.swarm.select_next_some() => self.handle_event(event),
            }
        }
    }

    fn handle_command(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::AddBlock { data, reply } => {
                let id = content_id(&data);
                self.blocks.insert(id.clone(), data);
                let key = kad::RecordKey::new(&id.as_bytes().to_vec());
                if let Err(e) = self.swarm.behaviour_mut().kademlia.start_providing(key) {
                    // local add still succeeded; the announce is best-effort
                    debug!(id = %id, "provider announce failed: {e}");
                }
                let _ = reply.send(Ok(id));
            }
            NodeCommand::GetBlock { id, reply } => {
                let _ = reply.send(self.blocks.get(&id).cloned());
            }
            NodeCommand::Connect { addr, reply } => {
                let peer = addr.iter().find_map(|p| match p {
                    Protocol::P2p(peer_id) => Some(peer_id),
                    _ => None,
                });
                if let Some(peer_id) = peer {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr.clone());
                }
                let result = self
                    .swarm
                    .dial(addr)
                    .map_err(|e| StorageError::Backend(format!("dial failed: {e}")));
                let _ = reply.send(result);
            }
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<NodeBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                debug!(%address, "content node listening");
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                info!(%peer_id, "connected to peer");
                if let Err(e) = self.swarm.behaviour_mut().kademlia.bootstrap() {
                    debug!("routing table bootstrap not started: {e}");
                }
            }
            SwarmEvent::OutgoingConnectionError { error, .. } => {
                warn!("peer connection failed: {error}");
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                for addr in info.listen_addrs {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_is_deterministic() {
        let a = content_id(b"segment bytes");
        let b = content_id(b"segment bytes");
        let c = content_id(b"other bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn add_then_get_round_trips_bytes() {
        let node = ContentNode::spawn("/ip4/127.0.0.1/tcp/0").unwrap();
        let data = Bytes::from_static(b"hello segments");

        let id = node.add_block(data.clone()).await.unwrap();
        let fetched = node.get_block(&id).await.unwrap();

        assert_eq!(fetched, data);
        assert_eq!(id, content_id(b"hello segments"));
    }

    #[tokio::test]
    async fn missing_block_is_not_found() {
        let node = ContentNode::spawn("/ip4/127.0.0.1/tcp/0").unwrap();
        let err = node.get_block("deadbeef").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn unreachable_peer_does_not_stop_the_node() {
        let node = ContentNode::spawn("/ip4/127.0.0.1/tcp/0").unwrap();

        // dial a port nothing listens on; the node must keep serving
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
        let _ = node.connect(addr).await;

        let id = node.add_block(Bytes::from_static(b"still works")).await.unwrap();
        assert!(node.get_block(&id).await.is_ok());
    }
}
