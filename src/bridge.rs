//! The supervising object that owns every long-lived piece of state.
//!
//! Settings, printer selections, the last-print cache and the backend state
//! all hang off one [`Bridge`], and collaborators get handles from it instead
//! of reaching for globals.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::commands::{CommandServer, Commands};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::logging;
use crate::print::PrintService;
use crate::printers::PrinterRegistry;
use crate::settings::Settings;
use crate::sink::{PrintSink, SpoolSink};
use crate::subscriber::{self, PgSourceFactory, ReconnectPolicy};
use crate::supervisor::{Endpoint, ServiceSupervisor};

pub struct Bridge {
    config: BridgeConfig,
    settings: Arc<Settings>,
    supervisor: ServiceSupervisor,
    print: Arc<PrintService>,
    endpoint: watch::Sender<Option<Endpoint>>,
    shutdown: CancellationToken,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        let supervisor = ServiceSupervisor::new(config.backend.clone(), config.hosted_url.clone())?;
        let sink = Arc::new(SpoolSink::new(
            config.printers.clone(),
            config.data_dir.clone(),
            config.open_previews,
        ));
        Self::assemble(config, supervisor, sink)
    }

    /// Wire a bridge from an explicit supervisor and sink.
    pub fn assemble(
        config: BridgeConfig,
        supervisor: ServiceSupervisor,
        sink: Arc<dyn PrintSink>,
    ) -> BridgeResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let settings = Arc::new(Settings::open(config.settings_path())?);
        let registry = Arc::new(PrinterRegistry::new(Arc::clone(&settings)));
        let print = Arc::new(PrintService::new(registry, sink, config.branding.clone()));
        let (endpoint, _) = watch::channel(None);
        Ok(Self {
            config,
            settings,
            supervisor,
            print,
            endpoint,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn print_service(&self) -> &Arc<PrintService> {
        &self.print
    }

    pub fn supervisor(&self) -> &ServiceSupervisor {
        &self.supervisor
    }

    pub fn local_url(&self) -> String {
        self.supervisor.local_url()
    }

    pub fn hosted_url(&self) -> &str {
        self.supervisor.hosted_url()
    }

    /// The endpoint the frontend should load, once resolved.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint.borrow().clone()
    }

    pub fn subscribe_endpoint(&self) -> watch::Receiver<Option<Endpoint>> {
        self.endpoint.subscribe()
    }

    /// Start the backend, wait for it, and publish the endpoint to load.
    pub async fn resolve_endpoint(&self) -> Endpoint {
        let endpoint = self
            .supervisor
            .start_and_resolve(&self.settings.startup_path())
            .await;
        info!(url = endpoint.url(), local = endpoint.is_local(), "frontend endpoint resolved");
        self.endpoint.send_replace(Some(endpoint.clone()));
        endpoint
    }

    /// Explicit "start and load local server": the local base URL, or an
    /// error when the backend never becomes ready.
    pub async fn start_local_server(&self) -> BridgeResult<String> {
        if let Err(e) = self.supervisor.start().await {
            warn!(error = %e, "local server spawn failed");
        }
        if self.supervisor.wait_until_ready().await {
            let url = self.local_url();
            self.endpoint.send_replace(Some(Endpoint::Local(url.clone())));
            Ok(url)
        } else {
            Err(BridgeError::Backend("Failed to start local server.".into()))
        }
    }

    /// Run the timeclock subscriber in the background, if a database is configured.
    pub fn spawn_subscriber(&self) -> Option<JoinHandle<()>> {
        let Some(database) = self.config.database.clone() else {
            info!("DB_HOST not set; timeclock subscriber disabled");
            return None;
        };
        let handler = Arc::clone(&self.print);
        let shutdown = self.shutdown.child_token();
        Some(tokio::spawn(subscriber::run(
            PgSourceFactory::new(database),
            handler,
            ReconnectPolicy::default(),
            shutdown,
        )))
    }

    /// Handle the command channel dispatches through.
    pub fn commands(&self) -> Commands {
        Commands::new(
            Arc::clone(&self.settings),
            Arc::clone(&self.print),
            self.endpoint.subscribe(),
        )
    }

    /// Bind the loopback command channel and serve it in the background.
    pub async fn spawn_command_server(&self) -> BridgeResult<JoinHandle<()>> {
        let server = CommandServer::bind(self.config.command_port).await?;
        Ok(tokio::spawn(server.serve(self.commands(), self.shutdown.child_token())))
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop background work and the backend process.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.supervisor.stop().await;
    }

    /// Main loop. The command channel and the timeclock subscriber come up
    /// first, then the endpoint is resolved while Ctrl-C or
    /// [`Bridge::shutdown_token`] cancellation can still interrupt it.
    pub async fn run(&self) -> BridgeResult<()> {
        info!(about = %logging::about(), data_dir = %self.config.data_dir.display(), "pos bridge starting");

        let commands = self.spawn_command_server().await?;
        let subscriber = self.spawn_subscriber();

        let stop = self.wait_for_shutdown();
        tokio::pin!(stop);
        let resolved = tokio::select! {
            endpoint = self.resolve_endpoint() => Some(endpoint),
            _ = &mut stop => None,
        };
        match resolved {
            Some(_) => stop.await,
            None => info!("shutdown before the endpoint was resolved"),
        }

        self.shutdown().await;
        for (name, handle) in [("command channel", Some(commands)), ("timeclock subscriber", subscriber)] {
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    warn!(error = %e, task = name, "background task failed");
                }
            }
        }
        info!("pos bridge stopped");
        Ok(())
    }

    async fn wait_for_shutdown(&self) {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "failed to listen for shutdown signal");
                }
                info!("shutdown requested");
            }
            _ = self.shutdown.cancelled() => {}
        }
    }
}
