//! Message router
//!
//! Single consumer of the endpoint receive channel. Discovery and secure
//! datagrams go to the discovery handlers; on the data port, requests are
//! spawned as handler tasks and every other frame is appended to the
//! pending-reply inbox.

use crate::node::node::Peer;
use sharefs_transport::{Datagram, PortKind};
use sharefs_wire::{Command, Frame};
use tokio::sync::mpsc;

/// Requests waiting to be reaped before the handler set is compacted
const REAP_THRESHOLD: usize = 256;

impl Peer {
    /// Dispatch inbound datagrams until the receivers stop
    pub(crate) async fn router_loop(self, mut rx: mpsc::Receiver<Datagram>) {
        tracing::debug!("Router started");
        while let Some(datagram) = rx.recv().await {
            match datagram.port {
                PortKind::Discovery => self.handle_discovery(datagram.from, &datagram.data).await,
                PortKind::Secure => self.handle_secure(datagram.from, &datagram.data).await,
                PortKind::Data => self.route_data(datagram),
            }
        }
        tracing::debug!("Router stopped");
    }

    fn route_data(&self, datagram: Datagram) {
        let frame = match Frame::parse(&datagram.data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::trace!("Dropping datagram from {}: {}", datagram.from, e);
                return;
            }
        };
        let (command, id) = (frame.command(), frame.id());

        if command.is_request() {
            if !self.is_running() {
                return;
            }
            let peer = self.clone();
            let mut requests = self.inner.requests.lock();
            if requests.len() >= REAP_THRESHOLD {
                while requests.try_join_next().is_some() {}
            }
            requests.spawn(async move {
                peer.handle_request(datagram.from, datagram.data).await;
            });
            return;
        }

        if command == Command::Updated {
            tracing::trace!("Update notification from {}", datagram.from);
            return;
        }

        if let Some(direction) = command.direction() {
            let key = (*datagram.from.ip(), id, direction);
            if !self.inner.inbox.deliver(key, datagram.data) {
                tracing::trace!(
                    "No waiter for {:?} {:#x} from {}",
                    command,
                    id,
                    datagram.from
                );
            }
        }
    }
}
