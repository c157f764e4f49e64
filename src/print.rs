//! Print orchestration.
//!
//! Resolves the destination for a job from the printer registry, compiles the
//! document and hands it to the sink. Every entry point returns a
//! [`PrintOutcome`] instead of an error: a missing printer or an empty reprint
//! cache is a status for the caller, and sink failures are logged and
//! reported without disturbing the rest of the process.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::cache::{CachedReceipt, PrintJobCache};
use crate::compiler::{self, Branding};
use crate::document::Document;
use crate::drawer::{self, DrawerOutcome};
use crate::models::{ClockEntry, KdsOrder, ReceiptInput};
use crate::printers::{PrinterOption, PrinterRegistry, PrinterRole};
use crate::sink::{PrintOptions, PrintSink};
use crate::subscriber::{TimeclockEvent, TimeclockHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Receipt,
    KdsTicket,
    Timeclock,
}

impl JobKind {
    fn role(self) -> PrinterRole {
        match self {
            JobKind::Receipt | JobKind::KdsTicket => PrinterRole::Receipt,
            JobKind::Timeclock => PrinterRole::Timeclock,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum PrintOutcome {
    Sent,
    /// No printer selected for the job's role.
    NoPrinter,
    NothingToReprint,
    Failed(String),
}

impl PrintOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, PrintOutcome::Sent)
    }

    /// Status line shown to the cashier.
    pub fn message(&self, kind: JobKind) -> &'static str {
        match (self, kind) {
            (PrintOutcome::NoPrinter, _) => "No printer is selected.",
            (PrintOutcome::NothingToReprint, _) => "No order to reprint",
            (PrintOutcome::Sent, JobKind::Receipt) => "Print command sent",
            (PrintOutcome::Failed(_), JobKind::Receipt) => "Print command failed",
            (PrintOutcome::Sent, JobKind::KdsTicket) => "KDS Ticket print command sent",
            (PrintOutcome::Failed(_), JobKind::KdsTicket) => "KDS Ticket print command failed",
            (PrintOutcome::Sent, JobKind::Timeclock) => "Clock-in receipt print command sent",
            (PrintOutcome::Failed(_), JobKind::Timeclock) => {
                "Clock-in receipt print command failed"
            }
        }
    }
}

pub struct PrintService {
    registry: Arc<PrinterRegistry>,
    sink: Arc<dyn PrintSink>,
    cache: PrintJobCache,
    branding: Branding,
}

impl PrintService {
    pub fn new(registry: Arc<PrinterRegistry>, sink: Arc<dyn PrintSink>, branding: Branding) -> Self {
        Self {
            registry,
            sink,
            cache: PrintJobCache::new(),
            branding,
        }
    }

    pub fn registry(&self) -> &PrinterRegistry {
        &self.registry
    }

    /// Selectable destinations for `role`, sink devices plus virtual entries.
    pub async fn printer_options(&self, role: PrinterRole) -> Vec<PrinterOption> {
        let devices = self.sink.printers().await;
        self.registry.options(role, &devices)
    }

    /// Print a customer receipt and remember it for reprint.
    ///
    /// The inputs are cached before the printer check, so "reprint" after
    /// picking a printer prints the receipt that was just skipped.
    pub async fn print_order(&self, input: ReceiptInput) -> PrintOutcome {
        let receipt = CachedReceipt {
            input,
            printed_at: Local::now().fixed_offset(),
        };
        self.cache.record(receipt.clone());
        self.print_receipt(&receipt).await
    }

    /// Print the last receipt again, byte-for-byte the same document.
    pub async fn reprint_last(&self) -> PrintOutcome {
        match self.cache.last() {
            Some(receipt) => self.print_receipt(&receipt).await,
            None => {
                info!("reprint requested with nothing cached");
                PrintOutcome::NothingToReprint
            }
        }
    }

    async fn print_receipt(&self, receipt: &CachedReceipt) -> PrintOutcome {
        self.dispatch(JobKind::Receipt, || {
            compiler::compile_receipt(&receipt.input, &self.branding, receipt.printed_at)
        })
        .await
    }

    pub async fn print_kds_ticket(&self, order: &KdsOrder) -> PrintOutcome {
        let printed_at = Local::now().fixed_offset();
        self.dispatch(JobKind::KdsTicket, || compiler::compile_kds_ticket(order, printed_at))
            .await
    }

    pub async fn print_timeclock_receipt(&self, name: &str, entries: &[ClockEntry]) -> PrintOutcome {
        let document = match compiler::compile_timeclock_receipt(
            name,
            entries,
            &self.branding,
            Utc::now(),
        ) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(employee = name, error = %e, "timeclock receipt not printed");
                return PrintOutcome::Failed(e.to_string());
            }
        };
        self.dispatch(JobKind::Timeclock, || document).await
    }

    /// Kick the drawer on the receipt printer. Never fails the caller.
    pub async fn open_drawer(&self) -> DrawerOutcome {
        drawer::open_cash_drawer(self.registry.receipt_printer_address()).await
    }

    async fn dispatch(&self, kind: JobKind, compile: impl FnOnce() -> Document) -> PrintOutcome {
        let selection = self.registry.selection(kind.role());
        let Some(destination) = selection.destination() else {
            info!(?kind, "no printer selected, skipping");
            return PrintOutcome::NoPrinter;
        };
        let document = compile();
        let options = PrintOptions::for_destination(destination);
        match self.sink.print(&document, &options).await {
            Ok(()) => {
                info!(?kind, printer = destination, "print dispatched");
                PrintOutcome::Sent
            }
            Err(e) => {
                error!(?kind, printer = destination, error = %e, "print dispatch failed");
                PrintOutcome::Failed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl TimeclockHandler for PrintService {
    async fn on_timeclock(&self, event: TimeclockEvent) {
        let outcome = self
            .print_timeclock_receipt(&event.employee_name, &event.entries())
            .await;
        info!(
            employee = %event.employee_name,
            entry = event.id,
            status = outcome.message(JobKind::Timeclock),
            "timeclock event handled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BridgeError, BridgeResult};
    use crate::printers::{PRINTER_NONE, PRINTER_PREVIEW};
    use crate::settings::Settings;
    use std::sync::Mutex;

    /// Sink that records every job it is handed.
    #[derive(Default)]
    struct RecordingSink {
        jobs: Mutex<Vec<(Document, PrintOptions)>>,
        fail: bool,
    }

    #[async_trait]
    impl PrintSink for RecordingSink {
        async fn printers(&self) -> Vec<String> {
            vec!["Receipt Printer 12".into()]
        }

        async fn print(&self, document: &Document, options: &PrintOptions) -> BridgeResult<()> {
            if self.fail {
                return Err(BridgeError::UnknownDestination(options.destination.clone()));
            }
            self.jobs
                .lock()
                .unwrap()
                .push((document.clone(), options.clone()));
            Ok(())
        }
    }

    fn service(sink: Arc<RecordingSink>) -> PrintService {
        let registry = Arc::new(PrinterRegistry::new(Arc::new(Settings::in_memory())));
        PrintService::new(registry, sink, Branding::default())
    }

    fn order(order_id: u64) -> ReceiptInput {
        serde_json::from_value(serde_json::json!({
            "order": [{ "quantity": 1, "title": "Go-Kart", "price": "9.00" }],
            "transactions": [{ "gateway": "Cash", "amount": 10 }],
            "orderNumber": "20931",
            "orderId": order_id,
            "totalTax": "0.74",
            "subtotalPrice": "9.00",
            "totalPrice": "9.74"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_no_printer_selected_skips_silently() {
        let sink = Arc::new(RecordingSink::default());
        let svc = service(sink.clone());
        let outcome = svc.print_order(order(1)).await;
        assert_eq!(outcome, PrintOutcome::NoPrinter);
        assert!(sink.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reprint_matches_original_document() {
        let sink = Arc::new(RecordingSink::default());
        let svc = service(sink.clone());
        svc.registry().select(PrinterRole::Receipt, "Receipt Printer 12").unwrap();

        assert!(svc.print_order(order(55)).await.is_sent());
        assert!(svc.reprint_last().await.is_sent());

        let jobs = sink.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].0, jobs[1].0);
        assert_eq!(jobs[0].1.destination, "Receipt Printer 12");
        assert!(!jobs[0].1.preview);
    }

    #[tokio::test]
    async fn test_reprint_with_empty_cache() {
        let svc = service(Arc::new(RecordingSink::default()));
        let outcome = svc.reprint_last().await;
        assert_eq!(outcome, PrintOutcome::NothingToReprint);
        assert_eq!(outcome.message(JobKind::Receipt), "No order to reprint");
    }

    #[tokio::test]
    async fn test_skipped_print_is_still_cached() {
        let sink = Arc::new(RecordingSink::default());
        let svc = service(sink.clone());
        svc.print_order(order(77)).await;
        svc.registry().select(PrinterRole::Receipt, PRINTER_PREVIEW).unwrap();
        assert!(svc.reprint_last().await.is_sent());
        let jobs = sink.jobs.lock().unwrap();
        assert!(jobs[0].1.preview);
        assert!(jobs[0].0.texts().contains(&"REF#20931"));
    }

    #[tokio::test]
    async fn test_sink_failure_reports_failed() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let svc = service(sink);
        svc.registry().select(PrinterRole::Receipt, "Front Desk").unwrap();
        let outcome = svc.print_kds_ticket(&KdsOrder::default()).await;
        assert!(matches!(outcome, PrintOutcome::Failed(_)));
        assert_eq!(outcome.message(JobKind::KdsTicket), "KDS Ticket print command failed");
    }

    #[tokio::test]
    async fn test_timeclock_uses_its_own_printer() {
        let sink = Arc::new(RecordingSink::default());
        let svc = service(sink.clone());
        svc.registry().select(PrinterRole::Receipt, "Receipt Printer 12").unwrap();
        svc.registry().select(PrinterRole::Timeclock, PRINTER_NONE).unwrap();

        let entries: Vec<ClockEntry> = serde_json::from_str(
            r#"[{"id":1,"clock_in":"2026-10-19T14:00:00Z","clock_out":null}]"#,
        )
        .unwrap();
        assert_eq!(
            svc.print_timeclock_receipt("Ana", &entries).await,
            PrintOutcome::NoPrinter
        );

        svc.registry().select(PrinterRole::Timeclock, "Office 3").unwrap();
        let outcome = svc.print_timeclock_receipt("Ana", &entries).await;
        assert_eq!(outcome.message(JobKind::Timeclock), "Clock-in receipt print command sent");
        assert_eq!(sink.jobs.lock().unwrap()[0].1.destination, "Office 3");
    }

    #[tokio::test]
    async fn test_timeclock_without_entries_fails_without_dispatch() {
        let sink = Arc::new(RecordingSink::default());
        let svc = service(sink.clone());
        svc.registry().select(PrinterRole::Timeclock, PRINTER_PREVIEW).unwrap();
        let outcome = svc.print_timeclock_receipt("Ana", &[]).await;
        assert!(matches!(outcome, PrintOutcome::Failed(_)));
        assert!(sink.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_drawer_without_printer() {
        let svc = service(Arc::new(RecordingSink::default()));
        assert_eq!(svc.open_drawer().await, DrawerOutcome::NoPrinter);
    }

    #[tokio::test]
    async fn test_printer_options_include_virtual_entries() {
        let svc = service(Arc::new(RecordingSink::default()));
        let names: Vec<String> = svc
            .printer_options(PrinterRole::Receipt)
            .await
            .into_iter()
            .map(|o| o.name)
            .collect();
        assert_eq!(names, vec!["Receipt Printer 12", PRINTER_NONE, PRINTER_PREVIEW]);
    }
}
