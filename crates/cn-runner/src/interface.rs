//! Transport boundary.
//!
//! The runtime only ever talks to the bus through these two traits. Impls:
//! - `SocketCanTransport`: Linux-only, wraps `socketcan::CanSocket`
//! - `MockTransport`: all platforms, scripted frames (in `mock.rs`)

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::types::CanFrame;

/// Sends frames on the bus.
#[async_trait]
pub trait FrameTransmitter: Send + Sync {
    /// Send one frame. Any error is reported; only `Fatal`/`Closed` end the
    /// calling loop.
    async fn transmit(&self, frame: &CanFrame) -> TransportResult<()>;

    /// Largest payload this transport can send, in bytes.
    fn max_frame_length(&self) -> usize {
        cn_dbc::MAX_FRAME_LENGTH
    }
}

/// Receives frames from the bus.
#[async_trait]
pub trait FrameReceiver: Send + Sync {
    /// Wait for the next frame.
    async fn receive(&self) -> TransportResult<CanFrame>;
}

// ── SocketCAN (Linux-only) ──────────────────────────────────────

#[cfg(target_os = "linux")]
pub use self::socketcan_impl::SocketCanTransport;

#[cfg(target_os = "linux")]
mod socketcan_impl {
    use std::io;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use socketcan::{
        CanFrame as SocketCanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket,
        SocketOptions, StandardId,
    };

    use super::{FrameReceiver, FrameTransmitter};
    use crate::error::{TransportError, TransportResult};
    use crate::types::CanFrame;

    /// Read timeout of the blocking socket; bounds how long a cancelled
    /// receive keeps a blocking thread busy.
    const RECV_POLL: Duration = Duration::from_millis(100);

    /// Classic CAN payload limit.
    const MAX_CLASSIC_DATA: usize = 8;

    // Linux errno values that mean the interface is gone.
    const ENODEV: i32 = 19;
    const ENETDOWN: i32 = 100;

    /// SocketCAN transport for Linux hosts.
    pub struct SocketCanTransport {
        interface: String,
        socket: Arc<CanSocket>,
    }

    impl SocketCanTransport {
        /// Open a raw CAN socket bound to `interface` (e.g. "can0", "vcan0").
        pub fn open(interface: &str) -> TransportResult<Self> {
            let socket = CanSocket::open(interface)
                .map_err(|e| TransportError::Fatal(format!("failed to open {interface}: {e}")))?;
            socket
                .set_read_timeout(RECV_POLL)
                .map_err(|e| TransportError::Fatal(format!("failed to set read timeout: {e}")))?;
            tracing::info!(interface, "SocketCAN interface opened");
            Ok(Self {
                interface: interface.to_string(),
                socket: Arc::new(socket),
            })
        }

        pub fn interface(&self) -> &str {
            &self.interface
        }
    }

    #[async_trait]
    impl FrameTransmitter for SocketCanTransport {
        async fn transmit(&self, frame: &CanFrame) -> TransportResult<()> {
            let socket_frame = to_socket_frame(frame)?;
            let socket = Arc::clone(&self.socket);
            tokio::task::spawn_blocking(move || socket.write_frame(&socket_frame))
                .await
                .map_err(|e| TransportError::Fatal(format!("transmit task failed: {e}")))?
                .map_err(classify_io)
        }

        fn max_frame_length(&self) -> usize {
            MAX_CLASSIC_DATA
        }
    }

    #[async_trait]
    impl FrameReceiver for SocketCanTransport {
        async fn receive(&self) -> TransportResult<CanFrame> {
            loop {
                let socket = Arc::clone(&self.socket);
                let result = tokio::task::spawn_blocking(move || socket.read_frame())
                    .await
                    .map_err(|e| TransportError::Fatal(format!("receive task failed: {e}")))?;

                match result {
                    Ok(frame) => {
                        if let Some(frame) = from_socket_frame(&frame) {
                            return Ok(frame);
                        }
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                        ) => {}
                    Err(e) => return Err(classify_io(e)),
                }
            }
        }
    }

    fn classify_io(e: io::Error) -> TransportError {
        match e.raw_os_error() {
            Some(ENODEV) | Some(ENETDOWN) => TransportError::Fatal(e.to_string()),
            _ => TransportError::Transient(e.to_string()),
        }
    }

    /// Data frames only; remote and error frames are skipped.
    fn from_socket_frame(frame: &SocketCanFrame) -> Option<CanFrame> {
        if frame.is_remote_frame() || frame.is_error_frame() {
            return None;
        }
        Some(CanFrame::new(frame.raw_id(), frame.data().to_vec()))
    }

    fn to_socket_frame(frame: &CanFrame) -> TransportResult<SocketCanFrame> {
        if frame.data.len() > MAX_CLASSIC_DATA {
            return Err(TransportError::Fatal(format!(
                "frame 0x{:X} has {} bytes; CAN FD is not supported on this socket",
                frame.id,
                frame.data.len()
            )));
        }
        let built = if frame.is_extended() {
            ExtendedId::new(frame.id).and_then(|id| SocketCanFrame::new(id, &frame.data))
        } else {
            StandardId::new(frame.id as u16).and_then(|id| SocketCanFrame::new(id, &frame.data))
        };
        built.ok_or_else(|| TransportError::Fatal(format!("invalid CAN id 0x{:X}", frame.id)))
    }
}
