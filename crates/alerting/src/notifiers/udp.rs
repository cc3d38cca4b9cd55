//! UdpNotifier - one JSON datagram per alert, fire-and-forget

use std::collections::HashMap;
use std::net::SocketAddr;

use contracts::{AlertEvent, ContractError, NotifyError, Notifier};
use tokio::net::UdpSocket;
use tracing::{debug, instrument, warn};

use super::AlertMessage;

/// UDP payload limit for IPv4
const MAX_DATAGRAM: usize = 65_507;

/// Notifier that sends alerts as UDP datagrams
pub struct UdpNotifier {
    name: String,
    target: SocketAddr,
    socket: Option<UdpSocket>,
}

impl UdpNotifier {
    #[instrument(name = "udp_notifier_new", skip(name))]
    pub async fn new(name: impl Into<String>, target: SocketAddr) -> std::io::Result<Self> {
        let name = name.into();
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(target).await?;
        debug!(notifier = %name, %target, "UdpNotifier connected");
        Ok(Self {
            name,
            target,
            socket: Some(socket),
        })
    }

    /// Params: `addr` (required, `host:port`)
    pub async fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let addr = params
            .get("addr")
            .ok_or_else(|| ContractError::config_validation("addr", "missing 'addr' parameter"))?;
        let target: SocketAddr = addr
            .parse()
            .map_err(|e| ContractError::config_validation("addr", format!("invalid address '{addr}': {e}")))?;
        Ok(Self::new(name, target).await?)
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl Notifier for UdpNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "udp_notifier_send",
        skip(self, event),
        fields(notifier = %self.name, sequence = %event.sequence())
    )]
    async fn send(&mut self, event: &AlertEvent) -> Result<(), NotifyError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| NotifyError::permanent(&self.name, "socket closed"))?;
        let datagram = serde_json::to_vec(&AlertMessage::from_event(event))
            .map_err(|e| NotifyError::permanent(&self.name, e.to_string()))?;
        if datagram.len() > MAX_DATAGRAM {
            warn!(notifier = %self.name, size = datagram.len(), "alert too large for one datagram");
            return Err(NotifyError::permanent(&self.name, "alert exceeds datagram size"));
        }
        socket
            .send(&datagram)
            .await
            .map_err(|e| NotifyError::transient(&self.name, e.to_string()))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), NotifyError> {
        self.socket = None;
        Ok(())
    }
}
