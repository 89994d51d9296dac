use std::fmt::Write;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{Duration, Instant};

use crate::decode::PhysDecodeLevel;

/// A byte stream a session reads requests from and writes replies to.
///
/// The stream is closed when the layer is dropped.
pub(crate) struct PhysLayer {
    stream: Stream,
    silence: Option<LineSilence>,
}

enum Stream {
    Tcp(tokio::net::TcpStream),
    #[cfg(feature = "serial")]
    Serial(tokio_serial::SerialStream),
    // boxed, the TLS state is large
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::server::TlsStream<tokio::net::TcpStream>>),
    #[cfg(test)]
    Mock(tokio_test::io::Mock),
    #[cfg(test)]
    Duplex(tokio::io::DuplexStream),
}

impl Stream {
    fn kind(&self) -> &'static str {
        match self {
            Stream::Tcp(_) => "Tcp",
            #[cfg(feature = "serial")]
            Stream::Serial(_) => "Serial",
            #[cfg(feature = "tls")]
            Stream::Tls(_) => "Tls",
            #[cfg(test)]
            Stream::Mock(_) => "Mock",
            #[cfg(test)]
            Stream::Duplex(_) => "Duplex",
        }
    }

    async fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(x) => x.read(buffer).await,
            #[cfg(feature = "serial")]
            Stream::Serial(x) => x.read(buffer).await,
            #[cfg(feature = "tls")]
            Stream::Tls(x) => x.read(buffer).await,
            #[cfg(test)]
            Stream::Mock(x) => x.read(buffer).await,
            #[cfg(test)]
            Stream::Duplex(x) => x.read(buffer).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(x) => x.write_all(data).await,
            #[cfg(feature = "serial")]
            Stream::Serial(x) => x.write_all(data).await,
            #[cfg(feature = "tls")]
            Stream::Tls(x) => x.write_all(data).await,
            #[cfg(test)]
            Stream::Mock(x) => x.write_all(data).await,
            #[cfg(test)]
            Stream::Duplex(x) => x.write_all(data).await,
        }
    }
}

/// Silent interval an RTU line must keep between two frames
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct LineSilence {
    interval: Duration,
    last_activity: Option<Instant>,
}

impl LineSilence {
    // 11-bit characters: start, 8 data, parity or stop, stop
    const BITS_PER_CHAR: u64 = 11;
    // above this rate the interval is fixed
    const MAX_TIMED_BAUD_RATE: u32 = 19200;
    const FIXED_INTERVAL: Duration = Duration::from_micros(1750);

    fn new(baud_rate: Option<u32>) -> Self {
        let interval = match baud_rate {
            Some(rate) if rate > 0 && rate <= Self::MAX_TIMED_BAUD_RATE => {
                // 3.5 character times
                35 * (Duration::from_secs(Self::BITS_PER_CHAR) / rate) / 10
            }
            Some(_) => Self::FIXED_INTERVAL,
            None => {
                tracing::warn!(
                    "unable to determine the baud rate, using a silent interval of {} us",
                    Self::FIXED_INTERVAL.as_micros()
                );
                Self::FIXED_INTERVAL
            }
        };

        Self {
            interval,
            last_activity: None,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Some(Instant::now());
    }

    async fn wait(&self) {
        if let Some(last) = self.last_activity {
            tokio::time::sleep_until(last + self.interval).await;
        }
    }
}

impl std::fmt::Debug for PhysLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.stream.kind())
    }
}

impl PhysLayer {
    fn from_stream(stream: Stream) -> Self {
        Self {
            stream,
            silence: None,
        }
    }

    pub(crate) fn new_tcp(socket: tokio::net::TcpStream) -> Self {
        Self::from_stream(Stream::Tcp(socket))
    }

    #[cfg(feature = "serial")]
    pub(crate) fn new_serial(port: tokio_serial::SerialStream) -> Self {
        use tokio_serial::SerialPort;

        let silence = LineSilence::new(port.baud_rate().ok());
        Self {
            stream: Stream::Serial(port),
            silence: Some(silence),
        }
    }

    #[cfg(feature = "tls")]
    pub(crate) fn new_tls(stream: tokio_rustls::server::TlsStream<tokio::net::TcpStream>) -> Self {
        Self::from_stream(Stream::Tls(Box::new(stream)))
    }

    #[cfg(test)]
    pub(crate) fn new_mock(mock: tokio_test::io::Mock) -> Self {
        Self::from_stream(Stream::Mock(mock))
    }

    #[cfg(test)]
    pub(crate) fn new_duplex(stream: tokio::io::DuplexStream) -> Self {
        Self::from_stream(Stream::Duplex(stream))
    }

    pub(crate) async fn read(
        &mut self,
        buffer: &mut [u8],
        level: PhysDecodeLevel,
    ) -> Result<usize, std::io::Error> {
        let count = self.stream.read(buffer).await?;
        if let Some(silence) = &mut self.silence {
            silence.touch();
        }

        if level.enabled() {
            if let Some(data) = buffer.get(..count) {
                tracing::info!("PHYS RX - {}", PhysDisplay::new(level, data));
            }
        }

        Ok(count)
    }

    pub(crate) async fn write(
        &mut self,
        data: &[u8],
        level: PhysDecodeLevel,
    ) -> Result<(), std::io::Error> {
        if let Some(silence) = &self.silence {
            silence.wait().await;
        }

        if level.enabled() {
            tracing::info!("PHYS TX - {}", PhysDisplay::new(level, data));
        }

        self.stream.write_all(data).await?;
        if let Some(silence) = &mut self.silence {
            silence.touch();
        }
        Ok(())
    }
}

struct PhysDisplay<'a> {
    level: PhysDecodeLevel,
    data: &'a [u8],
}

impl<'a> PhysDisplay<'a> {
    fn new(level: PhysDecodeLevel, data: &'a [u8]) -> Self {
        Self { level, data }
    }
}

impl std::fmt::Display for PhysDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} bytes", self.data.len())?;
        if self.level.data_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}

const BYTES_PER_LINE: usize = 18;

/// Hex dump, one line per 18 bytes, each line preceded by a newline
pub(crate) fn format_bytes(f: &mut std::fmt::Formatter, bytes: &[u8]) -> std::fmt::Result {
    for line in bytes.chunks(BYTES_PER_LINE) {
        f.write_char('\n')?;
        for (pos, byte) in line.iter().enumerate() {
            if pos > 0 {
                f.write_char(' ')?;
            }
            write!(f, "{byte:02X}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hex<'a>(&'a [u8]);

    impl std::fmt::Display for Hex<'_> {
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            format_bytes(f, self.0)
        }
    }

    #[test]
    fn silent_interval_scales_with_baud_rate() {
        // 11 bits at 9600 baud is 1145.8 us, times 3.5
        let silence = LineSilence::new(Some(9600));
        assert_eq!(silence.interval, Duration::from_nanos(4_010_415));
    }

    #[test]
    fn silent_interval_is_fixed_at_high_baud_rates() {
        assert_eq!(
            LineSilence::new(Some(115200)).interval,
            Duration::from_micros(1750)
        );
        assert_eq!(LineSilence::new(None).interval, Duration::from_micros(1750));
        assert_eq!(LineSilence::new(Some(0)).interval, Duration::from_micros(1750));
    }

    #[test]
    fn hex_dump_wraps_lines() {
        let bytes: Vec<u8> = (0..20).collect();
        assert_eq!(
            Hex(&bytes).to_string(),
            "\n00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F 10 11\n12 13"
        );
    }

    #[tokio::test]
    async fn non_serial_layers_keep_no_silent_interval() {
        let (_client, server) = tokio::io::duplex(64);
        let phys = PhysLayer::new_duplex(server);
        assert!(phys.silence.is_none());
        assert_eq!(format!("{phys:?}"), "Duplex");
    }
}
