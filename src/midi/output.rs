//! MIDI output port handling
//!
//! The pipeline only needs somewhere to push encoded bytes, expressed as the
//! [`MidiSink`] trait. [`MidiPort`] is the midir-backed implementation that
//! opens a system output port by name or by index.

use midir::{MidiOutput, MidiOutputConnection, MidiOutputPort};
use tracing::{debug, info, warn};

use super::format_hex;

/// Errors raised while opening ports or sending messages
#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("MIDI subsystem unavailable: {0}")]
    Init(String),
    #[error("MIDI output port '{0}' not found")]
    PortNotFound(String),
    #[error("invalid MIDI port index {index} ({available} ports available)")]
    InvalidPortIndex { index: usize, available: usize },
    #[error("failed to open MIDI port '{port}': {reason}")]
    PortOpen { port: String, reason: String },
    #[error("cannot send MIDI: no port open")]
    PortNotOpen,
    #[error("failed to send MIDI message: {0}")]
    Send(String),
}

/// Destination for encoded MIDI messages
pub trait MidiSink {
    /// Send one encoded message
    fn send(&mut self, data: &[u8]) -> Result<(), MidiError>;

    /// Name of the connected port, if any
    fn port_name(&self) -> Option<&str> {
        None
    }
}

/// midir output port wrapper
pub struct MidiPort {
    client_name: String,
    connection: Option<MidiOutputConnection>,
    port_name: Option<String>,
    port_index: Option<usize>,
}

impl MidiPort {
    /// Create a closed port handle; nothing touches the MIDI subsystem yet
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            connection: None,
            port_name: None,
            port_index: None,
        }
    }

    fn output(&self) -> Result<MidiOutput, MidiError> {
        MidiOutput::new(&self.client_name).map_err(|e| MidiError::Init(e.to_string()))
    }

    /// List available output port names
    pub fn list_ports(client_name: &str) -> Result<Vec<String>, MidiError> {
        let midi_out = MidiOutput::new(client_name).map_err(|e| MidiError::Init(e.to_string()))?;

        let mut names = Vec::new();
        for (index, port) in midi_out.ports().iter().enumerate() {
            match midi_out.port_name(port) {
                Ok(name) => names.push(name),
                Err(e) => warn!("Error getting port name for index {}: {}", index, e),
            }
        }

        Ok(names)
    }

    /// Find a port by exact name, falling back to case-insensitive substring match
    fn find_port(midi_out: &MidiOutput, pattern: &str) -> Option<(usize, MidiOutputPort, String)> {
        let named: Vec<(usize, MidiOutputPort, String)> = midi_out
            .ports()
            .into_iter()
            .enumerate()
            .filter_map(|(i, port)| midi_out.port_name(&port).ok().map(|name| (i, port, name)))
            .collect();

        if let Some(pos) = named.iter().position(|(_, _, name)| name == pattern) {
            return named.into_iter().nth(pos);
        }

        let pattern = pattern.to_lowercase();
        named.into_iter().find(|(_, _, name)| {
            let matched = name.to_lowercase().contains(&pattern);
            if matched {
                debug!("Found port '{}' matching pattern '{}'", name, pattern);
            }
            matched
        })
    }

    /// Open an output port by name
    pub fn open_by_name(&mut self, name: &str) -> Result<(), MidiError> {
        self.close();

        let midi_out = self.output()?;
        let (index, port, port_name) =
            Self::find_port(&midi_out, name).ok_or_else(|| MidiError::PortNotFound(name.to_string()))?;

        self.connect(midi_out, &port, index, port_name)
    }

    /// Open an output port by index
    pub fn open_by_index(&mut self, index: usize) -> Result<(), MidiError> {
        self.close();

        let midi_out = self.output()?;
        let ports = midi_out.ports();
        let port = ports.get(index).ok_or(MidiError::InvalidPortIndex {
            index,
            available: ports.len(),
        })?;
        let port_name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| format!("Port {}", index));

        self.connect(midi_out, port, index, port_name)
    }

    fn connect(
        &mut self,
        midi_out: MidiOutput,
        port: &MidiOutputPort,
        index: usize,
        port_name: String,
    ) -> Result<(), MidiError> {
        let connection = midi_out
            .connect(port, &self.client_name)
            .map_err(|e| MidiError::PortOpen {
                port: port_name.clone(),
                reason: e.to_string(),
            })?;

        info!("MIDI output opened: '{}' (index {})", port_name, index);
        self.connection = Some(connection);
        self.port_name = Some(port_name);
        self.port_index = Some(index);
        Ok(())
    }

    /// Close the current port; safe to call when nothing is open
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            info!("MIDI output closed: '{}'", self.port_name.as_deref().unwrap_or("?"));
        }
        self.port_name = None;
        self.port_index = None;
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    pub fn port_index(&self) -> Option<usize> {
        self.port_index
    }
}

impl MidiSink for MidiPort {
    fn send(&mut self, data: &[u8]) -> Result<(), MidiError> {
        let connection = self.connection.as_mut().ok_or(MidiError::PortNotOpen)?;
        connection
            .send(data)
            .map_err(|e| MidiError::Send(e.to_string()))?;

        debug!("Sent: {}", format_hex(data));
        Ok(())
    }

    fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }
}

impl Drop for MidiPort {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_port_rejects_send() {
        let mut port = MidiPort::new("keymidi-test");
        assert!(!port.is_open());
        assert!(matches!(port.send(&[0x90, 60, 127]), Err(MidiError::PortNotOpen)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut port = MidiPort::new("keymidi-test");
        port.close();
        port.close();
        assert!(port.port_name().is_none());
        assert!(port.port_index().is_none());
    }

    #[test]
    fn test_error_messages() {
        let err = MidiError::InvalidPortIndex { index: 4, available: 2 };
        assert_eq!(err.to_string(), "invalid MIDI port index 4 (2 ports available)");
        assert_eq!(
            MidiError::PortNotFound("loopMIDI".into()).to_string(),
            "MIDI output port 'loopMIDI' not found"
        );
    }
}
