//! Local command channel for the POS frontend.
//!
//! The frontend talks to the bridge over a loopback TCP socket using one JSON
//! object per line:
//!
//! ```text
//! -> {"id": 1, "command": "print-order", "args": {...}}
//! <- {"id": 1, "success": true, "data": {...}}
//! <- {"id": 1, "success": false, "error": "..."}
//! ```
//!
//! Command names follow the frontend's existing channel names. Commands with
//! fields take an `args` object (possibly empty); the rest omit it. Print commands
//! always answer with a status object; only malformed requests and failed
//! settings or media operations come back as errors.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::media;
use crate::models::{ClockEntry, KdsOrder, ReceiptInput};
use crate::print::{JobKind, PrintOutcome, PrintService};
use crate::printers::{PrinterRole, PRINTER_NONE};
use crate::settings::{Settings, StartupView};
use crate::supervisor::Endpoint;

/// Requests the frontend can make.
#[derive(Debug, Deserialize)]
#[serde(
    tag = "command",
    content = "args",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    GetEndpoint,
    /// Blocks until the backend endpoint has been resolved.
    WaitEndpoint,
    GetClockinOnlyMode,
    SetClockinOnlyMode {
        enabled: bool,
    },
    SetStartupView {
        view: String,
    },
    FindPrinters {
        #[serde(default = "receipt_role")]
        role: PrinterRole,
    },
    SelectPrinter {
        #[serde(default = "receipt_role")]
        role: PrinterRole,
        #[serde(default)]
        name: Option<String>,
    },
    PrintOrder(ReceiptInput),
    PrintKdsTicket(KdsOrder),
    PrintTimeclockReceipt {
        name: String,
        clock_entries: Vec<ClockEntry>,
    },
    ReprintLastOrder,
    OpenDrawer,
    ReadDirectory {
        #[serde(default)]
        directory_path: Option<PathBuf>,
    },
    ReadFileAsDataUrl {
        file_path: PathBuf,
    },
    GetStoredDirectoryPath,
    SetStoredDirectoryPath {
        directory_path: PathBuf,
    },
    WriteFile {
        file_name: String,
        data: String,
        #[serde(default)]
        base64: bool,
    },
}

fn receipt_role() -> PrinterRole {
    PrinterRole::Receipt
}

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    command: String,
    #[serde(default)]
    args: Value,
}

impl Request {
    fn into_command(self) -> Result<(Value, Command), (Value, String)> {
        let mut envelope = json!({ "command": self.command });
        if !self.args.is_null() {
            envelope["args"] = self.args;
        }
        match serde_json::from_value(envelope) {
            Ok(command) => Ok((self.id, command)),
            Err(e) => Err((self.id, e.to_string())),
        }
    }
}

/// Everything a command needs, cheap to clone into connection tasks.
#[derive(Clone)]
pub struct Commands {
    settings: Arc<Settings>,
    print: Arc<PrintService>,
    endpoint: watch::Receiver<Option<Endpoint>>,
}

impl Commands {
    pub fn new(
        settings: Arc<Settings>,
        print: Arc<PrintService>,
        endpoint: watch::Receiver<Option<Endpoint>>,
    ) -> Self {
        Self {
            settings,
            print,
            endpoint,
        }
    }

    pub async fn dispatch(&self, command: Command) -> Result<Value, String> {
        match command {
            Command::GetEndpoint => {
                let endpoint = self.endpoint.borrow().clone();
                Ok(json!(endpoint))
            }
            Command::WaitEndpoint => {
                let mut rx = self.endpoint.clone();
                let endpoint = rx
                    .wait_for(Option::is_some)
                    .await
                    .map_err(|_| "bridge is shutting down".to_string())?
                    .clone();
                Ok(json!(endpoint))
            }
            Command::GetClockinOnlyMode => Ok(json!(self.settings.clockin_only_mode())),
            Command::SetClockinOnlyMode { enabled } => {
                self.settings.set_clockin_only_mode(enabled).map_err(|e| e.to_string())?;
                Ok(json!({ "success": true }))
            }
            Command::SetStartupView { view } => {
                let view = StartupView::ALL
                    .into_iter()
                    .find(|v| v.label().eq_ignore_ascii_case(&view) || v.path() == view)
                    .ok_or_else(|| format!("Unknown startup view: {view}"))?;
                self.settings.set_startup_view(view).map_err(|e| e.to_string())?;
                Ok(json!({ "success": true, "startupPath": self.settings.startup_path() }))
            }
            Command::FindPrinters { role } => Ok(json!(self.print.printer_options(role).await)),
            Command::SelectPrinter { role, name } => {
                let name = name.unwrap_or_else(|| PRINTER_NONE.to_string());
                self.print
                    .registry()
                    .select(role, &name)
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "success": true, "selectedPrinter": name }))
            }
            Command::PrintOrder(input) => {
                let outcome = self.print.print_order(input).await;
                Ok(print_status(&outcome, JobKind::Receipt))
            }
            Command::PrintKdsTicket(order) => {
                let outcome = self.print.print_kds_ticket(&order).await;
                Ok(print_status(&outcome, JobKind::KdsTicket))
            }
            Command::PrintTimeclockReceipt {
                name,
                clock_entries,
            } => {
                let outcome = self.print.print_timeclock_receipt(&name, &clock_entries).await;
                Ok(print_status(&outcome, JobKind::Timeclock))
            }
            Command::ReprintLastOrder => {
                let outcome = self.print.reprint_last().await;
                Ok(print_status(&outcome, JobKind::Receipt))
            }
            Command::OpenDrawer => Ok(json!(self.print.open_drawer().await)),
            Command::ReadDirectory { directory_path } => {
                let Some(dir) = directory_path.or_else(|| self.settings.photo_directory()) else {
                    return Err("Photo directory is not set".into());
                };
                let photos = media::list_photos(&dir).await.map_err(|e| e.to_string())?;
                Ok(json!(photos))
            }
            Command::ReadFileAsDataUrl { file_path } => {
                Ok(json!(media::read_file_as_data_url(&file_path).await))
            }
            Command::GetStoredDirectoryPath => Ok(json!(self.settings.directory_path())),
            Command::SetStoredDirectoryPath { directory_path } => {
                self.settings
                    .set_directory_path(&directory_path)
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "success": true }))
            }
            Command::WriteFile {
                file_name,
                data,
                base64: encoded,
            } => {
                let bytes = if encoded {
                    base64::engine::general_purpose::STANDARD
                        .decode(data.as_bytes())
                        .map_err(|e| format!("Invalid base64 data: {e}"))?
                } else {
                    data.into_bytes()
                };
                let path = media::write_export_file(&self.settings, &file_name, &bytes)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "success": true, "path": path }))
            }
        }
    }

    /// Parse one request line and produce the response line.
    pub async fn handle_line(&self, line: &str) -> Value {
        let parsed = serde_json::from_str::<Request>(line)
            .map_err(|e| (Value::Null, format!("Invalid request: {e}")))
            .and_then(Request::into_command);
        let (id, result) = match parsed {
            Ok((id, command)) => {
                debug!(?command, "command received");
                (id, self.dispatch(command).await)
            }
            Err((id, e)) => (id, Err(e)),
        };
        match result {
            Ok(data) => json!({ "id": id, "success": true, "data": data }),
            Err(error) => {
                warn!(error = %error, "command failed");
                json!({ "id": id, "success": false, "error": error })
            }
        }
    }
}

fn print_status(outcome: &PrintOutcome, kind: JobKind) -> Value {
    json!({
        "success": outcome.is_sent(),
        "message": outcome.message(kind),
        "outcome": outcome,
    })
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

pub struct CommandServer {
    listener: TcpListener,
}

impl CommandServer {
    /// Bind on loopback only.
    pub async fn bind(port: u16) -> BridgeResult<Self> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Config(format!("command port {port}: {e}")))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> BridgeResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires. Each connection is served
    /// on its own task.
    pub async fn serve(self, commands: Commands, shutdown: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "command channel listening");
        }
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "command connection opened");
                    tokio::spawn(serve_connection(stream, commands.clone(), shutdown.clone()));
                }
                Err(e) => warn!(error = %e, "command accept failed"),
            }
        }
        info!("command channel stopped");
    }
}

async fn serve_connection(stream: TcpStream, commands: Commands, shutdown: CancellationToken) {
    let (reader, writer) = stream.into_split();
    if let Err(e) = serve_lines(reader, writer, &commands, &shutdown).await {
        debug!(error = %e, "command connection closed");
    }
}

async fn serve_lines<R, W>(
    reader: R,
    mut writer: W,
    commands: &Commands,
    shutdown: &CancellationToken,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = commands.handle_line(&line).await;
        let mut out = response.to_string();
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Branding;
    use crate::printers::{PrinterRegistry, PRINTER_PREVIEW};
    use crate::sink::SpoolSink;
    use std::time::Duration;

    struct Fixture {
        commands: Commands,
        settings: Arc<Settings>,
        endpoint: watch::Sender<Option<Endpoint>>,
        dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(Settings::in_memory());
        let registry = Arc::new(PrinterRegistry::new(Arc::clone(&settings)));
        let sink = Arc::new(SpoolSink::new(
            vec!["Receipt Printer 12".into()],
            dir.path().to_path_buf(),
            false,
        ));
        let print = Arc::new(PrintService::new(registry, sink, Branding::default()));
        let (endpoint, rx) = watch::channel(None);
        Fixture {
            commands: Commands::new(Arc::clone(&settings), print, rx),
            settings,
            endpoint,
            dir,
        }
    }

    async fn call(commands: &Commands, request: Value) -> Value {
        commands.handle_line(&request.to_string()).await
    }

    #[tokio::test]
    async fn test_print_and_reprint_through_preview() {
        let fx = fixture();
        let resp = call(&fx.commands, json!({"id": 1, "command": "reprint-last-order"})).await;
        assert_eq!(resp["success"], true);
        assert_eq!(resp["data"]["success"], false);
        assert_eq!(resp["data"]["message"], "No order to reprint");

        let resp = call(
            &fx.commands,
            json!({"id": 2, "command": "print-order", "args": {"orderNumber": 1042, "order": []}}),
        )
        .await;
        assert_eq!(resp["id"], 2);
        assert_eq!(resp["data"]["outcome"]["status"], "no_printer");
        assert_eq!(resp["data"]["message"], "No printer is selected.");

        let resp = call(
            &fx.commands,
            json!({"command": "select-printer", "args": {"name": PRINTER_PREVIEW}}),
        )
        .await;
        assert_eq!(resp["success"], true);

        // the skipped receipt was cached and now prints
        let resp = call(&fx.commands, json!({"command": "reprint-last-order"})).await;
        assert_eq!(resp["data"]["success"], true);
        assert_eq!(resp["data"]["message"], "Print command sent");
        assert!(fx.dir.path().join(crate::preview::PREVIEWS_DIR).is_dir());
    }

    #[tokio::test]
    async fn test_find_and_select_printers_per_role() {
        let fx = fixture();
        let resp = call(
            &fx.commands,
            json!({"command": "select-printer", "args": {"role": "timeclock", "name": "Receipt Printer 12"}}),
        )
        .await;
        assert_eq!(resp["success"], true);

        let resp = call(
            &fx.commands,
            json!({"command": "find-printers", "args": {"role": "timeclock"}}),
        )
        .await;
        let names: Vec<_> = resp["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Receipt Printer 12", "None", "Preview Mode"]);
        assert_eq!(resp["data"][0]["selected"], true);

        let receipt = call(&fx.commands, json!({"command": "find-printers", "args": {}})).await;
        assert_eq!(receipt["data"][1]["selected"], true);
    }

    #[tokio::test]
    async fn test_settings_commands() {
        let fx = fixture();
        let resp = call(&fx.commands, json!({"command": "get-clockin-only-mode"})).await;
        assert_eq!(resp["data"], false);

        call(
            &fx.commands,
            json!({"command": "set-clockin-only-mode", "args": {"enabled": true}}),
        )
        .await;
        assert!(fx.settings.clockin_only_mode());

        let resp = call(
            &fx.commands,
            json!({"command": "set-startup-view", "args": {"view": "KDS Pickup"}}),
        )
        .await;
        assert_eq!(resp["data"]["startupPath"], "#kds-pickup");

        let resp = call(
            &fx.commands,
            json!({"command": "set-startup-view", "args": {"view": "Lobby"}}),
        )
        .await;
        assert_eq!(resp["success"], false);
        assert_eq!(resp["error"], "Unknown startup view: Lobby");
    }

    #[tokio::test]
    async fn test_write_file_requires_contained_path() {
        let fx = fixture();
        let write = |name: &str| json!({"command": "write-file", "args": {"fileName": name, "data": "a,b\n"}});

        let resp = call(&fx.commands, write("report.csv")).await;
        assert_eq!(resp["error"], "Directory path is not set");

        call(
            &fx.commands,
            json!({"command": "set-stored-directory-path", "args": {"directoryPath": fx.dir.path()}}),
        )
        .await;
        let resp = call(&fx.commands, write("../escape.csv")).await;
        assert_eq!(resp["error"], "Unauthorized file path");

        let resp = call(&fx.commands, write("report.csv")).await;
        assert_eq!(resp["success"], true);
        assert_eq!(
            std::fs::read_to_string(fx.dir.path().join("report.csv")).unwrap(),
            "a,b\n"
        );

        let resp = call(
            &fx.commands,
            json!({"command": "write-file", "args": {"fileName": "raw.bin", "data": "AQID", "base64": true}}),
        )
        .await;
        assert_eq!(resp["success"], true);
        assert_eq!(std::fs::read(fx.dir.path().join("raw.bin")).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_malformed_requests_are_errors() {
        let fx = fixture();
        let resp = fx.commands.handle_line("not json").await;
        assert_eq!(resp["success"], false);
        assert!(resp["error"].as_str().unwrap().starts_with("Invalid request"));

        let resp = call(&fx.commands, json!({"id": "x", "command": "launch-rockets"})).await;
        assert_eq!(resp["id"], "x");
        assert_eq!(resp["success"], false);

        let resp = call(&fx.commands, json!({"command": "select-printer", "args": {"role": "kitchen"}})).await;
        assert_eq!(resp["success"], false);
    }

    #[tokio::test]
    async fn test_wait_endpoint_returns_once_published() {
        let fx = fixture();
        let resp = call(&fx.commands, json!({"command": "get-endpoint"})).await;
        assert_eq!(resp["data"], Value::Null);

        let commands = fx.commands.clone();
        let waiter = tokio::spawn(async move { call(&commands, json!({"command": "wait-endpoint"})).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        fx.endpoint
            .send_replace(Some(Endpoint::Hosted("https://pos.example.com/".into())));
        let resp = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp["data"]["kind"], "hosted");
        assert_eq!(resp["data"]["url"], "https://pos.example.com/");
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let fx = fixture();
        let server = CommandServer::bind(0).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.serve(fx.commands.clone(), shutdown.clone()));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(b"{\"id\":7,\"command\":\"get-clockin-only-mode\"}\n\n")
            .await
            .unwrap();
        let mut lines = BufReader::new(reader).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let resp: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(resp, json!({"id": 7, "success": true, "data": false}));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
