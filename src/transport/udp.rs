//! UDP side channel for critical alerts
//!
//! The alarm service sends each [`CriticalAlert`] as one JSON datagram; the gateway listens on a
//! fixed local port. Nothing is acknowledged or retried.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::TransportError;
use crate::actors::messages::CriticalAlert;

/// Bounds how long the listener can go without noticing a shutdown
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

const MAX_DATAGRAM: usize = 1024;

/// Destination for critical alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, alert: &CriticalAlert) -> Result<(), TransportError>;
}

pub struct UdpAlertSender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpAlertSender {
    /// Bind an ephemeral local socket for sending to `target`
    pub async fn bind(target: SocketAddr) -> Result<Self, TransportError> {
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

#[async_trait]
impl AlertSink for UdpAlertSender {
    async fn send_alert(&self, alert: &CriticalAlert) -> Result<(), TransportError> {
        let datagram = serde_json::to_vec(alert)?;
        self.socket.send_to(&datagram, self.target).await?;
        trace!("sent alert for {} to {}", alert.machine_id, self.target);
        Ok(())
    }
}

/// Bind the side-channel socket and forward every well-formed alert to `alerts`.
///
/// Binding errors are returned to the caller. Once running, malformed datagrams are logged and
/// dropped. The task exits when `shutdown` flips to `true` (or its sender is dropped) or when the
/// receiving side of `alerts` is closed.
pub async fn spawn_alert_listener(
    bind: SocketAddr,
    alerts: mpsc::Sender<CriticalAlert>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(SocketAddr, JoinHandle<()>), TransportError> {
    let socket = UdpSocket::bind(bind).await?;
    let local_addr = socket.local_addr()?;
    info!("alert listener bound to {local_addr}");

    let handle = tokio::spawn(async move {
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                received = tokio::time::timeout(RECV_TIMEOUT, socket.recv_from(&mut buf)) => {
                    let (len, peer) = match received {
                        Err(_) => continue,
                        Ok(Err(e)) => {
                            warn!("alert socket receive failed: {e}");
                            continue;
                        }
                        Ok(Ok(received)) => received,
                    };

                    match serde_json::from_slice::<CriticalAlert>(&buf[..len]) {
                        Ok(alert) => {
                            debug!("alert for {} from {peer}", alert.machine_id);
                            if alerts.send(alert).await.is_err() {
                                debug!("alert receiver dropped, stopping listener");
                                break;
                            }
                        }
                        Err(e) => warn!("dropping malformed alert datagram from {peer}: {e}"),
                    }
                }
            }
        }

        info!("alert listener stopped");
    });

    Ok((local_addr, handle))
}
