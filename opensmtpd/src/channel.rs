use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::FilterError;

const CONFIG_READY: &str = "config|ready";

/// Newline framed text channel to the MTA.
///
/// Lines are decoded as Latin-1 so every octet maps to exactly one `char`
/// and back; message bodies pass through byte for byte whatever their
/// actual charset is.
pub struct LineChannel<R, W> {
    reader: R,
    writer: W,
    buffer: Vec<u8>,
}

impl<R, W> LineChannel<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Consumes the MTA's configuration lines up to and including
    /// `config|ready`.
    pub async fn handshake(reader: R, writer: W) -> Result<Self, FilterError> {
        let mut channel = LineChannel {
            reader,
            writer,
            buffer: Vec::with_capacity(1024),
        };

        loop {
            match channel.read_line().await? {
                Some(line) if line == CONFIG_READY => return Ok(channel),
                Some(line) => trace!(%line, "skipping configuration line"),
                None => return Err(FilterError::Handshake),
            }
        }
    }

    /// Reads the next line without its line terminator. Returns `None` at
    /// end of stream.
    pub async fn read_line(&mut self) -> Result<Option<String>, FilterError> {
        self.buffer.clear();
        let n = self.reader.read_until(b'\n', &mut self.buffer).await?;
        if n == 0 {
            return Ok(None);
        }

        while let Some(b'\n' | b'\r') = self.buffer.last() {
            self.buffer.pop();
        }
        Ok(Some(decode_latin1(&self.buffer)))
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), FilterError> {
        let mut bytes = encode_latin1(line);
        bytes.push(b'\n');
        self.writer.write_all(&bytes).await?;
        // smtpd waits on every answer, nothing may linger in a buffer.
        self.writer.flush().await?;
        Ok(())
    }
}

pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Inverse of [`decode_latin1`]. Characters outside of Latin-1 cannot come
/// from the MTA and are written as `?`.
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}
