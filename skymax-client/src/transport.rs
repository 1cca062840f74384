//! Device transport sessions.
//!
//! A session is opened for one command/reply exchange and dropped right
//! after it, on every exit path. Nothing keeps a handle between queries, so
//! two exchanges can never interleave on the same device.

use crate::config::{DeviceConfig, TransportKind};
use crate::error::ClientError;
use pin_project_lite::pin_project;
use std::fmt;
use std::fs::File;
use std::future::Future;
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_serial::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream,
    StopBits,
};

pin_project! {
    /// An open device: RS232 serial port or HID raw character device.
    ///
    /// The HID raw file is non-blocking and driven by the reactor, so a
    /// read abandoned at its deadline holds no thread and dropping the
    /// stream closes the descriptor.
    #[project = DeviceStreamProj]
    pub enum DeviceStream {
        Serial { #[pin] stream: SerialStream },
        Hidraw { file: AsyncFd<File> },
    }
}

impl DeviceStream {
    pub fn transport(&self) -> TransportKind {
        match self {
            DeviceStream::Serial { .. } => TransportKind::Serial,
            DeviceStream::Hidraw { .. } => TransportKind::Hidraw,
        }
    }
}

impl fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceStream")
            .field("transport", &self.transport())
            .finish_non_exhaustive()
    }
}

fn poll_read_fd(
    file: &AsyncFd<File>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
) -> Poll<io::Result<()>> {
    loop {
        let mut guard = ready!(file.poll_read_ready(cx))?;
        let unfilled = buf.initialize_unfilled();
        match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
            Ok(Ok(n)) => {
                buf.advance(n);
                return Poll::Ready(Ok(()));
            }
            Ok(Err(e)) => return Poll::Ready(Err(e)),
            Err(_would_block) => continue,
        }
    }
}

fn poll_write_fd(
    file: &AsyncFd<File>,
    cx: &mut Context<'_>,
    buf: &[u8],
) -> Poll<io::Result<usize>> {
    loop {
        let mut guard = ready!(file.poll_write_ready(cx))?;
        match guard.try_io(|inner| inner.get_ref().write(buf)) {
            Ok(result) => return Poll::Ready(result),
            Err(_would_block) => continue,
        }
    }
}

impl AsyncRead for DeviceStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            DeviceStreamProj::Serial { stream } => stream.poll_read(cx, buf),
            DeviceStreamProj::Hidraw { file } => poll_read_fd(file, cx, buf),
        }
    }
}

impl AsyncWrite for DeviceStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            DeviceStreamProj::Serial { stream } => stream.poll_write(cx, buf),
            DeviceStreamProj::Hidraw { file } => poll_write_fd(file, cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            DeviceStreamProj::Serial { stream } => stream.poll_flush(cx),
            // Writes go straight to the descriptor
            DeviceStreamProj::Hidraw { .. } => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            DeviceStreamProj::Serial { stream } => stream.poll_shutdown(cx),
            DeviceStreamProj::Hidraw { .. } => Poll::Ready(Ok(())),
        }
    }
}

/// Opens a fresh device session for each exchange.
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn connect(&self) -> impl Future<Output = Result<Self::Stream, ClientError>> + Send;
}

impl DeviceConfig {
    /// Opens the device for reading and writing.
    ///
    /// Serial ports are configured for 2400 8N1 (or the configured baud
    /// rate), no flow control, raw mode, with pending output discarded.
    pub async fn open(&self) -> Result<DeviceStream, ClientError> {
        let stream = match self.transport {
            TransportKind::Serial => self.open_serial()?,
            TransportKind::Hidraw => self.open_hidraw()?,
        };
        tracing::trace!(path = %self.path.display(), transport = ?self.transport, "Device opened");
        Ok(stream)
    }

    fn open_hidraw(&self) -> Result<DeviceStream, ClientError> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
            .map_err(|e| self.unavailable(e.to_string()))?;
        let file = AsyncFd::new(file).map_err(|e| self.unavailable(e.to_string()))?;
        Ok(DeviceStream::Hidraw { file })
    }

    fn open_serial(&self) -> Result<DeviceStream, ClientError> {
        let path = self.path.to_string_lossy();
        let stream = tokio_serial::new(path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| self.unavailable(e.to_string()))?;
        stream
            .clear(ClearBuffer::Output)
            .map_err(|e| self.unavailable(format!("failed to flush output: {}", e)))?;
        Ok(DeviceStream::Serial { stream })
    }

    fn unavailable(&self, reason: String) -> ClientError {
        ClientError::DeviceUnavailable {
            path: self.path.clone(),
            reason,
        }
    }
}

impl Connector for DeviceConfig {
    type Stream = DeviceStream;

    fn connect(&self) -> impl Future<Output = Result<DeviceStream, ClientError>> + Send {
        self.open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::exchange::{read_frame, FramingOptions};
    use skymax_protocol::{Command, FrameBoundary};
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_missing_hidraw_device() {
        let config = DeviceConfig::new("/nonexistent/hidraw9", TransportKind::Hidraw);
        let err = config.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
        assert!(err.to_string().contains("/nonexistent/hidraw9"));
    }

    #[tokio::test]
    async fn test_missing_serial_device() {
        let config = DeviceConfig::new("/nonexistent/ttyUSB9", TransportKind::Serial);
        let err = config.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
    }

    fn make_fifo(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("hidraw0");
        let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
        assert_eq!(rc, 0, "mkfifo failed: {}", io::Error::last_os_error());
        path
    }

    /// Open descriptors of this process that refer to `path`.
    fn open_fds_for(path: &Path) -> usize {
        let target = std::fs::canonicalize(path).unwrap();
        std::fs::read_dir("/proc/self/fd")
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| std::fs::read_link(entry.path()).ok())
            .filter(|link| *link == target)
            .count()
    }

    #[tokio::test]
    async fn test_hidraw_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = make_fifo(&dir);
        let config = DeviceConfig::new(&fifo, TransportKind::Hidraw);

        let mut stream = config.connect().await.unwrap();
        assert_eq!(stream.transport(), TransportKind::Hidraw);
        stream.write_all(b"QMOD\x49\xC1\r").await.unwrap();
        stream.flush().await.unwrap();

        let mut echoed = [0u8; 7];
        stream.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"QMOD\x49\xC1\r");
    }

    #[tokio::test]
    async fn test_hidraw_reply_from_device() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = make_fifo(&dir);
        let config = DeviceConfig::new(&fifo, TransportKind::Hidraw);

        let mut stream = config.connect().await.unwrap();
        let mut device = std::fs::OpenOptions::new().write(true).open(&fifo).unwrap();
        device.write_all(b"(B\xE7\xC9\r").unwrap();

        let reply = read_frame(
            &mut stream,
            &Command::new("QMOD").unwrap(),
            FrameBoundary::Terminator,
            &FramingOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(reply.payload, "B");
    }

    #[tokio::test]
    async fn test_silent_hidraw_sessions_release_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = make_fifo(&dir);
        let config = DeviceConfig::new(&fifo, TransportKind::Hidraw);
        let options = FramingOptions {
            read_timeout: Duration::from_millis(50),
            ..Default::default()
        };

        let started = std::time::Instant::now();
        for _ in 0..3 {
            let mut stream = config.connect().await.unwrap();
            let err = read_frame(
                &mut stream,
                &Command::new("QPIGS").unwrap(),
                FrameBoundary::Terminator,
                &options,
            )
            .await
            .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ReadTimeout);
            drop(stream);
        }

        assert_eq!(open_fds_for(&fifo), 0);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_open_error_is_debuggable() {
        let config = DeviceConfig::new("/nonexistent/hidraw9", TransportKind::Hidraw);
        let result = config.connect().await;
        assert!(format!("{:?}", result).contains("DeviceUnavailable"));
    }
}
