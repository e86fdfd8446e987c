//! Serial port enumeration for descriptor discovery.
//!
//! Lists the ports the system reports and suggests a connection descriptor
//! for each, ready to be passed to `learn`.

use serde::Serialize;
use tracing::debug;

/// One serial port as reported by the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub name: String,
    pub port_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Descriptor for `learn`, e.g. `com,3`.
    pub descriptor: String,
}

/// `COM3` style names map to `com,3`; anything else is used as the port path.
pub fn suggest_descriptor(port_name: &str) -> String {
    let number = port_name
        .get(..3)
        .filter(|p| p.eq_ignore_ascii_case("com"))
        .map(|_| &port_name[3..])
        .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
    match number {
        Some(n) => format!("com,{n}"),
        None => format!("com,{port_name}"),
    }
}

impl PortInfo {
    fn from_serialport(port: serialport::SerialPortInfo) -> Self {
        let descriptor = suggest_descriptor(&port.port_name);
        let mut info = Self {
            name: port.port_name,
            port_type: "unknown",
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            descriptor,
        };
        match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                info.port_type = "usb";
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
                info.manufacturer = usb.manufacturer;
                info.product = usb.product;
            }
            serialport::SerialPortType::BluetoothPort => info.port_type = "bluetooth",
            serialport::SerialPortType::PciPort => info.port_type = "pci",
            serialport::SerialPortType::Unknown => {}
        }
        info
    }
}

/// List available serial ports on this system.
pub fn list_ports() -> Result<Vec<PortInfo>, String> {
    let ports =
        serialport::available_ports().map_err(|e| format!("Failed to list ports: {e}"))?;
    debug!(count = ports.len(), "Serial ports enumerated");
    Ok(ports.into_iter().map(PortInfo::from_serialport).collect())
}
