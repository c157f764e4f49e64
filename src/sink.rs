//! Print sink: where compiled documents go.
//!
//! [`PrintSink`] is the seam between print orchestration and devices. The
//! shipped [`SpoolSink`] writes previews to disk for `"Preview Mode"` and
//! streams ESC/POS over raw TCP (port 9100) to everything else.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::document::Document;
use crate::error::{BridgeError, BridgeResult};
use crate::escpos::{self, PaperWidth};
use crate::preview;
use crate::printers::{derive_printer_address, PRINTER_PREVIEW};

/// Raw ("JetDirect") printing port.
pub const RAW_PRINT_PORT: u16 = 9100;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintOptions {
    pub destination: String,
    pub copies: u8,
    pub page_width: PaperWidth,
    pub preview: bool,
    pub dpi: u16,
}

impl PrintOptions {
    /// Defaults for a single 80 mm copy at 180 dpi.
    pub fn for_destination(destination: &str) -> Self {
        Self {
            destination: destination.to_string(),
            copies: 1,
            page_width: PaperWidth::Mm80,
            preview: destination == PRINTER_PREVIEW,
            dpi: 180,
        }
    }
}

#[async_trait]
pub trait PrintSink: Send + Sync {
    /// Device names available for selection.
    async fn printers(&self) -> Vec<String>;

    async fn print(&self, document: &Document, options: &PrintOptions) -> BridgeResult<()>;
}

/// Write `data` to `addr` with connect and write timeouts.
pub async fn send_raw(addr: SocketAddr, data: &[u8], connect_timeout: Duration) -> BridgeResult<()> {
    let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| BridgeError::Timeout(format!("connect to {addr}")))??;
    tokio::time::timeout(WRITE_TIMEOUT, async {
        stream.write_all(data).await?;
        stream.flush().await?;
        stream.shutdown().await
    })
    .await
    .map_err(|_| BridgeError::Timeout(format!("write to {addr}")))??;
    Ok(())
}

pub struct SpoolSink {
    devices: Vec<String>,
    data_dir: PathBuf,
    open_previews: bool,
    port: u16,
}

impl SpoolSink {
    pub fn new(devices: Vec<String>, data_dir: PathBuf, open_previews: bool) -> Self {
        Self {
            devices,
            data_dir,
            open_previews,
            port: RAW_PRINT_PORT,
        }
    }

    /// Override the device port (9100 by default).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn device_addr(&self, destination: &str) -> BridgeResult<SocketAddr> {
        if let Ok(ip) = destination.parse::<Ipv4Addr>() {
            return Ok(SocketAddr::from((ip, self.port)));
        }
        derive_printer_address(destination)
            .map(|ip| SocketAddr::from((ip, self.port)))
            .ok_or_else(|| BridgeError::UnknownDestination(destination.to_string()))
    }

    async fn preview(&self, document: &Document, options: &PrintOptions) -> BridgeResult<()> {
        let html = preview::render_html(document, &options.destination, options.page_width.mm());
        let data_dir = self.data_dir.clone();
        let path = tokio::task::spawn_blocking(move || {
            preview::write_preview_file(&data_dir, "preview", &html)
        })
        .await
        .map_err(|e| BridgeError::Backend(format!("preview task: {e}")))??;
        info!(path = %path.display(), "print preview written");
        if self.open_previews {
            if let Err(e) = webbrowser::open(&path.to_string_lossy()) {
                warn!(error = %e, "could not open print preview");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PrintSink for SpoolSink {
    async fn printers(&self) -> Vec<String> {
        self.devices.clone()
    }

    async fn print(&self, document: &Document, options: &PrintOptions) -> BridgeResult<()> {
        if options.preview {
            return self.preview(document, options).await;
        }
        let addr = self.device_addr(&options.destination)?;
        let job = escpos::render_document(document, options.page_width);
        for copy in 1..=options.copies.max(1) {
            send_raw(addr, &job, CONNECT_TIMEOUT)
                .await
                .map_err(|e| BridgeError::PrinterUnreachable {
                    destination: options.destination.clone(),
                    reason: e.to_string(),
                })?;
            info!(printer = %options.destination, %addr, copy, bytes = job.len(), "print job sent");
        }
        Ok(())
    }
}
