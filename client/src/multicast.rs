//! Listener for the top-hotel multicast announcements.

use log::{debug, info};
use shared::parse_top_hotel_message;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

const MAX_DATAGRAM: usize = 1024;

pub struct MulticastListener {
    socket: UdpSocket,
    group: Ipv4Addr,
    joined: bool,
}

impl MulticastListener {
    /// Binds `port` on all interfaces and joins `group`.
    pub async fn join(group: Ipv4Addr, port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?;
        socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
        info!("Joined multicast group {} on port {}", group, port);
        Ok(Self {
            socket,
            group,
            joined: true,
        })
    }

    /// Waits for the next announcement line.
    pub async fn recv_line(&self) -> io::Result<String> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        let line = String::from_utf8_lossy(&buf[..len]).trim_end().to_string();
        debug!("Multicast from {}: {}", from, line);
        Ok(line)
    }

    /// Waits for the next announcement and splits it into `(city, hotel)`.
    /// Datagrams in any other format are skipped.
    pub async fn recv_announcement(&self) -> io::Result<(String, String)> {
        loop {
            let line = self.recv_line().await?;
            if let Some((city, hotel)) = parse_top_hotel_message(&line) {
                return Ok((city.to_string(), hotel.to_string()));
            }
        }
    }

    pub fn leave(&mut self) -> io::Result<()> {
        if self.joined {
            self.socket
                .leave_multicast_v4(self.group, Ipv4Addr::UNSPECIFIED)?;
            self.joined = false;
            info!("Left multicast group {}", self.group);
        }
        Ok(())
    }
}

impl Drop for MulticastListener {
    fn drop(&mut self) {
        let _ = self.leave();
    }
}
