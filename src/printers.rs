//! Printer registry.
//!
//! Tracks which destination is selected for each printing role and persists
//! the choice in the settings store. The destination list is whatever the
//! print sink enumerates, plus two virtual entries:
//!
//! - `"None"`: printing for the role is switched off.
//! - `"Preview Mode"`: documents render to a preview instead of a device.
//!
//! Receipt printers get a derived network address (stored as `printerIP`)
//! which the cash drawer kick uses. See [`derive_printer_address`].

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::error::BridgeResult;
use crate::settings::{
    Settings, KEY_PRINTER_IP, KEY_SELECTED_PRINTER, KEY_SELECTED_TIMECLOCK_PRINTER,
};

pub const PRINTER_NONE: &str = "None";
pub const PRINTER_PREVIEW: &str = "Preview Mode";

/// First three octets of the printer subnet.
const PRINTER_SUBNET: [u8; 3] = [10, 10, 10];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterRole {
    Receipt,
    Timeclock,
}

impl PrinterRole {
    fn selection_key(self) -> &'static str {
        match self {
            PrinterRole::Receipt => KEY_SELECTED_PRINTER,
            PrinterRole::Timeclock => KEY_SELECTED_TIMECLOCK_PRINTER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterOption {
    pub name: String,
    pub is_virtual: bool,
    pub selected: bool,
}

/// Resolved selection for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    None,
    Preview,
    Device {
        name: String,
        address: Option<Ipv4Addr>,
    },
}

impl Selection {
    /// Destination name to hand the print sink, `None` when printing is off.
    pub fn destination(&self) -> Option<&str> {
        match self {
            Selection::None => None,
            Selection::Preview => Some(PRINTER_PREVIEW),
            Selection::Device { name, .. } => Some(name),
        }
    }
}

/// Derive a printer's LAN address from the number in its display name:
/// `"Receipt Printer 12"` → `10.10.10.12`.
///
/// Only digits and dots are kept, then the leading run of digits is read as
/// the host octet. Names without one, or with a value past 255, have no
/// address.
pub fn derive_printer_address(name: &str) -> Option<Ipv4Addr> {
    let kept: String = name
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let digits: String = kept.chars().take_while(char::is_ascii_digit).collect();
    let host: u8 = digits.parse().ok()?;
    let [a, b, c] = PRINTER_SUBNET;
    Some(Ipv4Addr::new(a, b, c, host))
}

pub struct PrinterRegistry {
    settings: Arc<Settings>,
    changes: watch::Sender<u64>,
}

impl PrinterRegistry {
    pub fn new(settings: Arc<Settings>) -> Self {
        let (changes, _) = watch::channel(0);
        Self { settings, changes }
    }

    /// Destinations for `role`: the enumerated devices followed by the two
    /// virtual entries, with the current selection flagged.
    pub fn options(&self, role: PrinterRole, devices: &[String]) -> Vec<PrinterOption> {
        let current = self.settings.get_str(role.selection_key());
        let current = current.as_deref().unwrap_or(PRINTER_NONE);
        devices
            .iter()
            .filter(|d| d.as_str() != PRINTER_NONE && d.as_str() != PRINTER_PREVIEW)
            .map(|d| (d.as_str(), false))
            .chain([(PRINTER_NONE, true), (PRINTER_PREVIEW, true)])
            .map(|(name, is_virtual)| PrinterOption {
                name: name.to_string(),
                is_virtual,
                selected: name == current,
            })
            .collect()
    }

    pub fn selection(&self, role: PrinterRole) -> Selection {
        match self.settings.get_str(role.selection_key()).as_deref() {
            None | Some(PRINTER_NONE) => Selection::None,
            Some(PRINTER_PREVIEW) => Selection::Preview,
            Some(name) => Selection::Device {
                name: name.to_string(),
                address: match role {
                    PrinterRole::Receipt => self
                        .settings
                        .get_str(KEY_PRINTER_IP)
                        .and_then(|ip| ip.parse().ok()),
                    PrinterRole::Timeclock => derive_printer_address(name),
                },
            },
        }
    }

    /// Persist the selection for `role` and notify subscribers. The name and
    /// the derived address are committed together.
    pub fn select(&self, role: PrinterRole, name: &str) -> BridgeResult<Selection> {
        let key = role.selection_key();
        let selection = match name {
            PRINTER_NONE | "" => Selection::None,
            PRINTER_PREVIEW => Selection::Preview,
            device => Selection::Device {
                name: device.to_string(),
                address: derive_printer_address(device),
            },
        };
        if let Selection::Device { name, address: None } = &selection {
            if role == PrinterRole::Receipt {
                info!(printer = %name, "no address derivable from printer name");
            }
        }

        self.settings.update(|map| {
            match selection.destination() {
                Some(dest) => map.insert(key.to_string(), dest.into()),
                None => map.remove(key),
            };
            if role == PrinterRole::Receipt {
                match &selection {
                    Selection::Device { address: Some(ip), .. } => {
                        map.insert(KEY_PRINTER_IP.to_string(), ip.to_string().into());
                    }
                    _ => {
                        map.remove(KEY_PRINTER_IP);
                    }
                }
            }
        })?;
        info!(?role, printer = name, "printer selection changed");
        self.changes.send_modify(|generation| *generation += 1);
        Ok(selection)
    }

    /// Address stored for the receipt printer (drawer kick target).
    pub fn receipt_printer_address(&self) -> Option<Ipv4Addr> {
        self.settings
            .get_str(KEY_PRINTER_IP)
            .and_then(|ip| ip.parse().ok())
    }

    /// Ticks on every selection change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}
