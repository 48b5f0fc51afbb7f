//! Multicast side of the bridge.
//!
//! Gateways report on a fixed IPv4 multicast group and listen for commands
//! on the same group and port. One socket joins the group to receive; a
//! separate unbound socket sends.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use udp2mqtt_core::MulticastConfig;

use super::{DatagramSink, RetryPolicy, TransportError};

/// Bind a socket on the group port and join the multicast group.
pub fn bind_receiver(config: &MulticastConfig) -> Result<UdpSocket, TransportError> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    socket.set_reuse_address(true)?;
    #[cfg(not(target_os = "windows"))]
    socket.set_reuse_port(true)?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
    socket.bind(&bind_addr.into())?;
    socket.join_multicast_v4(&config.group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    let socket = UdpSocket::from_std(std_socket)?;
    info!(group = %config.group, port = config.port, "Joined multicast group");
    Ok(socket)
}

/// Read datagrams and push each one, as text, into the inbound queue.
///
/// Enqueueing waits when the queue is full. Receive errors are logged and
/// reading resumes after the `retry` backoff. Returns when the inbound queue
/// is closed.
pub async fn run_receiver(
    socket: UdpSocket,
    max_datagram_size: usize,
    reports: mpsc::Sender<String>,
    retry: RetryPolicy,
) {
    let mut buffer = vec![0u8; max_datagram_size];
    let mut consecutive_errors: u32 = 0;

    loop {
        let (len, from) = match socket.recv_from(&mut buffer).await {
            Ok(received) => {
                consecutive_errors = 0;
                received
            }
            Err(e) => {
                let delay = retry.delay_for_attempt(consecutive_errors);
                consecutive_errors = consecutive_errors.saturating_add(1);
                warn!(
                    error = %e,
                    consecutive_errors,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Multicast receive failed"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        let Ok(message) = std::str::from_utf8(&buffer[..len]) else {
            debug!(%from, len, "Dropping non UTF-8 datagram");
            continue;
        };

        if reports.send(message.to_string()).await.is_err() {
            info!("Inbound queue closed, stopping multicast receiver");
            return;
        }
    }
}

/// Sends command datagrams to the multicast group.
pub struct MulticastSender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl MulticastSender {
    /// Bind an ephemeral socket for sending to the configured group.
    ///
    /// Loopback is disabled so the bridge's own commands are not read back
    /// as reports.
    pub async fn bind(config: &MulticastConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_multicast_loop_v4(false)?;
        Ok(Self {
            socket,
            target: SocketAddr::V4(config.group_addr()),
        })
    }

    /// Send to an arbitrary address instead of the multicast group.
    pub const fn with_socket(socket: UdpSocket, target: SocketAddr) -> Self {
        Self { socket, target }
    }

    pub const fn target(&self) -> SocketAddr {
        self.target
    }
}

impl DatagramSink for MulticastSender {
    async fn send_datagram(&self, payload: &[u8]) -> Result<(), TransportError> {
        let sent = self
            .socket
            .send_to(payload, self.target)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        if sent != payload.len() {
            return Err(TransportError::Send(format!(
                "short send: {sent} of {} bytes",
                payload.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn loopback_socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    #[tokio::test]
    async fn sender_delivers_payload() {
        let receiver = loopback_socket().await;
        let target = receiver.local_addr().unwrap();
        let sender = MulticastSender::with_socket(loopback_socket().await, target);

        sender.send_datagram(br#"{"cmd":"read"}"#).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], br#"{"cmd":"read"}"#);
        assert_eq!(sender.target(), target);
    }

    #[tokio::test]
    async fn receiver_enqueues_text_and_skips_binary() {
        let socket = loopback_socket().await;
        let addr = socket.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(run_receiver(
            socket,
            1024,
            tx,
            RetryPolicy::socket_receive(),
        ));

        let peer = loopback_socket().await;
        peer.send_to(&[0xff, 0xfe, 0xfd], addr).await.unwrap();
        peer.send_to(br#"{"sid":"s1"}"#, addr).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, r#"{"sid":"s1"}"#);

        drop(rx);
        peer.send_to(b"{}", addr).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn oversized_datagram_is_truncated_to_buffer() {
        let socket = loopback_socket().await;
        let addr = socket.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(run_receiver(socket, 8, tx, RetryPolicy::socket_receive()));

        let peer = loopback_socket().await;
        peer.send_to(b"0123456789abcdef", addr).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, "01234567");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn receiver_backs_off_and_recovers_after_socket_error() {
        // A connected UDP socket reports ICMP port-unreachable as a receive
        // error on Linux.
        let closed = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let closed_addr = closed.local_addr().unwrap();
        drop(closed);

        let std_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        std_socket.connect(closed_addr).unwrap();
        std_socket.send(b"ping").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        std_socket.set_nonblocking(true).unwrap();
        let socket = UdpSocket::from_std(std_socket).unwrap();
        let addr = socket.local_addr().unwrap();

        let retry = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(100),
            multiplier: 1.0,
        };
        let (tx, mut rx) = mpsc::channel(4);
        let started = tokio::time::Instant::now();
        let task = tokio::spawn(run_receiver(socket, 1024, tx, retry));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let peer = std::net::UdpSocket::bind(closed_addr).unwrap();
        peer.send_to(br#"{"sid":"s1"}"#, addr).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, r#"{"sid":"s1"}"#);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(!task.is_finished());
    }
}
