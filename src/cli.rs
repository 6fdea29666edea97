//! Console commands: port/device listings and the live monitor

use colored::*;
use crossbeam::channel::Receiver;
use std::thread::JoinHandle;

use crate::input::hid::list_devices;
use crate::midi::MidiPort;
use crate::monitor::{MonitorView, Notification};

/// Print available MIDI output ports
pub fn list_ports_formatted(client_name: &str) {
    println!("\n{}", "=== Available MIDI Output Ports ===".bold().cyan());

    match MidiPort::list_ports(client_name) {
        Ok(ports) if ports.is_empty() => {
            println!("  {}", "No output ports found".dimmed());
        }
        Ok(ports) => {
            for (index, name) in ports.iter().enumerate() {
                println!("  {} {}", format!("[{}]", index).yellow(), name);
            }
        }
        Err(e) => println!("  {} {}", "Error:".red(), e),
    }
    println!();
}

/// Print attached HID devices with the paths used in `hid_mappings.json`
pub fn list_devices_formatted() {
    println!("\n{}", "=== Available HID Devices ===".bold().cyan());

    match list_devices() {
        Ok(devices) if devices.is_empty() => {
            println!("  {}", "No HID devices found".dimmed());
        }
        Ok(devices) => {
            for device in devices {
                println!(
                    "  {} {}",
                    format!("[{:04x}:{:04x}]", device.vendor_id, device.product_id).green(),
                    device.name.bright_white()
                );
                println!(
                    "      usage {:04x}:{:04x}  {}",
                    device.usage_page,
                    device.usage,
                    device.path.dimmed()
                );
            }
        }
        Err(e) => println!("  {} {}", "Error:".red(), e),
    }
    println!();
}

/// Print notifications on a dedicated thread until every sender is gone
pub fn spawn_monitor(rx: Receiver<Notification>, mut view: MonitorView) -> std::io::Result<JoinHandle<u64>> {
    std::thread::Builder::new()
        .name("keymidi-monitor".to_string())
        .spawn(move || {
            println!("{}", "=== KeyMidi Monitor (Ctrl+C to stop) ===".bold().cyan());
            for notification in rx.iter() {
                let Some(line) = view.render(&notification) else {
                    continue;
                };
                match notification {
                    Notification::MidiSent { .. } => println!("{}", line.green()),
                    Notification::DeviceDisconnected { .. } | Notification::HookUnavailable { .. } => {
                        println!("{}", line.yellow())
                    }
                    Notification::Error { .. } => println!("{}", line.red()),
                    _ => println!("{}", line),
                }
            }
            view.event_count()
        })
}
