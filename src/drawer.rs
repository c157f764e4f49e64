//! Cash drawer kick via ESC/POS over TCP.
//!
//! The drawer hangs off the receipt printer's DK port, so opening it means
//! sending the pulse command to the printer's raw port. Best-effort: failures
//! are logged and reported in the outcome, never returned as errors.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::sink::{send_raw, RAW_PRINT_PORT};

/// Standard ESC/POS pulse command: ESC p m t1 t2
///
/// - `0x1B` (ESC)
/// - `0x70` (p): generate pulse
/// - `0x00`: pin 2 (connector pin)
/// - `0x19`: on time  (25 × 2ms = 50ms)
/// - `0xFA`: off time (250 × 2ms = 500ms)
pub const ESCPOS_DRAWER_KICK: [u8; 5] = [0x1B, 0x70, 0x00, 0x19, 0xFA];

const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum DrawerOutcome {
    Opened,
    /// No receipt printer address is configured.
    NoPrinter,
    Failed(String),
}

/// Kick the drawer on the printer at `address`. `None` is a no-op.
pub async fn open_cash_drawer(address: Option<Ipv4Addr>) -> DrawerOutcome {
    let Some(ip) = address else {
        info!("drawer kick skipped: no receipt printer address");
        return DrawerOutcome::NoPrinter;
    };
    kick(SocketAddr::from((ip, RAW_PRINT_PORT))).await
}

/// Send the pulse to an explicit socket address.
pub async fn kick(addr: SocketAddr) -> DrawerOutcome {
    match send_raw(addr, &ESCPOS_DRAWER_KICK, TCP_CONNECT_TIMEOUT).await {
        Ok(()) => {
            info!(%addr, "ESC/POS drawer kick sent");
            DrawerOutcome::Opened
        }
        Err(e) => {
            warn!(%addr, error = %e, "drawer kick failed");
            DrawerOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn tcp_test_server() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_escpos_command_bytes() {
        assert_eq!(ESCPOS_DRAWER_KICK, [0x1B, 0x70, 0x00, 0x19, 0xFA]);
    }

    #[tokio::test]
    async fn test_tcp_pulse_receives_exact_bytes() {
        let (listener, port) = tcp_test_server().await;
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            sock.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let outcome = kick(SocketAddr::from(([127, 0, 0, 1], port))).await;
        assert_eq!(outcome, DrawerOutcome::Opened);
        assert_eq!(server.await.unwrap(), ESCPOS_DRAWER_KICK.to_vec());
    }

    #[tokio::test]
    async fn test_tcp_pulse_failure_is_swallowed() {
        let (listener, port) = tcp_test_server().await;
        drop(listener);
        let outcome = kick(SocketAddr::from(([127, 0, 0, 1], port))).await;
        assert!(matches!(outcome, DrawerOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_no_address_is_noop() {
        assert_eq!(open_cash_drawer(None).await, DrawerOutcome::NoPrinter);
    }
}
