use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];
const MIN_READ_CAPACITY: usize = 8 * 1024;
const MAX_READ_CAPACITY: usize = 1024 * 1024;

/// One unit of text read from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Line(String),
    /// The line exceeded the configured limit and was discarded.
    TooLong,
}

/// Buffer size for a reader feeding [`read_line`], large enough that a line
/// at the limit fits in one buffered read.
pub fn read_capacity(max_bytes: usize) -> usize {
    max_bytes
        .saturating_add(2)
        .clamp(MIN_READ_CAPACITY, MAX_READ_CAPACITY)
}

/// Reads the next client line from `reader`.
///
/// Buffered bytes are split on `\n` when they contain one. When a read
/// yields bytes with no `\n`, that chunk is the line, so clients that never
/// terminate their input are served as soon as each write arrives. A trailing
/// `\r` is stripped and invalid UTF-8 is replaced rather than rejected.
///
/// Returns `Ok(None)` at end of input.
pub async fn read_line<R>(reader: &mut R, max_bytes: usize) -> io::Result<Option<Inbound>>
where
    R: AsyncBufRead + Unpin,
{
    let (line, consumed) = {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(None);
        }
        match available.iter().position(|byte| *byte == b'\n') {
            Some(index) => (decode(&available[..index]), index + 1),
            None => (decode(available), available.len()),
        }
    };
    reader.consume(consumed);

    if line.len() > max_bytes {
        return Ok(Some(Inbound::TooLong));
    }
    Ok(Some(Inbound::Line(line)))
}

/// Reads the next `\n`-terminated line, reassembling it across however many
/// socket reads it took to arrive. Used for server output, which is always
/// terminated.
///
/// Returns `Ok(None)` at end of input. A trailing line without a terminator is
/// still returned before end of input is reported.
pub async fn read_terminated_line<R>(
    reader: &mut R,
    max_bytes: usize,
) -> io::Result<Option<Inbound>>
where
    R: AsyncBufRead + Unpin,
{
    // Room for the content plus a "\r\n" terminator.
    let limit = (max_bytes as u64).saturating_add(2);
    let mut buf = Vec::new();
    let bytes = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if bytes == 0 {
        return Ok(None);
    }

    if !buf.ends_with(b"\n") && buf.len() as u64 == limit {
        discard_line(reader).await?;
        return Ok(Some(Inbound::TooLong));
    }

    let line = decode(&buf);
    if line.len() > max_bytes {
        return Ok(Some(Inbound::TooLong));
    }
    Ok(Some(Inbound::Line(line)))
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(LINE_ENDINGS)
        .to_string()
}

async fn discard_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (consumed, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|byte| *byte == b'\n') {
                Some(index) => (index + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(consumed);
        if done {
            return Ok(());
        }
    }
}

/// Writes `line` followed by a newline and flushes so peers see it promptly.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
