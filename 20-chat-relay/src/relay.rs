//! Best-effort fan-out of one payload to every peer but its origin.

use std::io;

use tracing::{trace, warn};

use crate::registry::{ConnectionId, Registry};

/// A broadcast target.
pub trait Peer {
    /// Hands `payload` to the peer. An error means the peer is unusable.
    fn deliver(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Releases the peer after a failed delivery.
    fn close(&mut self);
}

/// Which members received a payload and which were dropped on the way.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<ConnectionId>,
    pub pruned: Vec<ConnectionId>,
}

/// Delivers `payload` to every member of `registry` except `origin`.
///
/// A member whose delivery fails is closed and removed on the spot; the
/// remaining members are still served. No failure reaches the caller.
/// `origin` is `None` for server-originated notices that go to everyone.
pub fn broadcast<P: Peer>(
    registry: &mut Registry<P>,
    origin: Option<ConnectionId>,
    payload: &[u8],
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for id in registry.ids() {
        if Some(id) == origin {
            continue;
        }
        let Some(peer) = registry.get_mut(id) else {
            continue;
        };

        match peer.deliver(payload) {
            Ok(()) => {
                trace!(%id, len = payload.len(), "delivered");
                report.delivered.push(id);
            }
            Err(error) => {
                warn!(%id, ?error, "dropping peer after failed write");
                peer.close();
                registry.deregister(id);
                report.pruned.push(id);
            }
        }
    }

    report
}
