//! Linux SocketCAN transport (`socketcan` feature).

use super::CanBus;
use odrive_common::error::TransportError;
use odrive_common::protocol::CanFrame;
use parking_lot::RwLock;
use socketcan::{CanSocket, EmbeddedFrame, Id, Socket, StandardId};
use std::io::ErrorKind;
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

/// A bus on a SocketCAN interface such as `can0` or `vcan0`.
pub struct SocketCanBus {
    interface: String,
    socket: RwLock<CanSocket>,
}

impl SocketCanBus {
    /// Open `interface`; the link must already be up.
    pub fn open(interface: &str) -> Result<Self, TransportError> {
        let socket = open_socket(interface)?;
        info!("Opened SocketCAN interface: {}", interface);
        Ok(Self { interface: interface.to_string(), socket: RwLock::new(socket) })
    }
}

fn open_socket(interface: &str) -> Result<CanSocket, TransportError> {
    CanSocket::open(interface)
        .map_err(|e| TransportError::InitFailed(format!("{interface}: {e}")))
}

fn ip_link(args: &[&str]) -> Result<(), TransportError> {
    let status = Command::new("ip")
        .arg("link")
        .args(args)
        .status()
        .map_err(|e| TransportError::InitFailed(format!("ip link {}: {e}", args.join(" "))))?;
    if status.success() {
        Ok(())
    } else {
        Err(TransportError::InitFailed(format!("ip link {} exited with {status}", args.join(" "))))
    }
}

fn to_socket_frame(frame: &CanFrame) -> Result<socketcan::CanFrame, TransportError> {
    let id = StandardId::new(frame.id())
        .ok_or_else(|| TransportError::SendFailed(format!("invalid id 0x{:X}", frame.id())))?;
    let built = if frame.is_remote() {
        socketcan::CanFrame::new_remote(id, 0)
    } else {
        socketcan::CanFrame::new(id, frame.data())
    };
    built.ok_or_else(|| TransportError::SendFailed(format!("cannot build frame 0x{:03X}", frame.id())))
}

fn from_socket_frame(frame: &socketcan::CanFrame) -> Option<CanFrame> {
    let id = match frame.id() {
        Id::Standard(id) => id.as_raw(),
        Id::Extended(_) => return None,
    };
    if frame.is_remote_frame() {
        Some(CanFrame::remote(id))
    } else {
        CanFrame::new(id, frame.data())
    }
}

impl CanBus for SocketCanBus {
    fn name(&self) -> &str {
        &self.interface
    }

    fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        let out = to_socket_frame(frame)?;
        self.socket
            .read()
            .write_frame(&out)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn recv(&self, timeout: Duration) -> Result<Option<CanFrame>, TransportError> {
        let socket = self.socket.read();
        socket
            .set_read_timeout(timeout)
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        match socket.read_frame() {
            // Extended-id frames belong to other protocols on the bus.
            Ok(frame) => Ok(from_socket_frame(&frame)),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(TransportError::ReceiveFailed(e.to_string())),
        }
    }

    fn set_bitrate(&self, bitrate: u32) -> Result<(), TransportError> {
        let mut socket = self.socket.write();
        ip_link(&["set", &self.interface, "down"])?;
        let rate = bitrate.to_string();
        if let Err(e) = ip_link(&["set", &self.interface, "up", "type", "can", "bitrate", &rate]) {
            warn!("Bringing '{}' back up failed: {}", self.interface, e);
            return Err(e);
        }
        *socket = open_socket(&self.interface)?;
        Ok(())
    }
}
