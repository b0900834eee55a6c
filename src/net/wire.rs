use std::io::{self, ErrorKind, Read, Write};

/// Result of a full-buffer receive. `Closed` is an orderly peer shutdown
/// observed before the first byte of the requested transfer; it is not an
/// error and must not be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    Complete,
    Closed,
}

/// Reads exactly `buf.len()` bytes, issuing as many underlying reads as the
/// transport needs. Interrupted reads are retried and never surfaced. A peer
/// close mid-transfer is a hard failure; a short transfer is never exposed.
pub fn recv_all<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<RecvOutcome> {
    let mut received = 0;
    while received < buf.len() {
        match reader.read(&mut buf[received..]) {
            Ok(0) => {
                if received == 0 {
                    return Ok(RecvOutcome::Closed);
                }
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "peer closed mid-transfer",
                ));
            }
            Ok(n) => received += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(RecvOutcome::Complete)
}

/// Writes all of `buf`, retrying interrupted and short writes. A transport
/// that accepts zero bytes is reported as `WriteZero`.
pub fn send_all<W: Write>(writer: &mut W, buf: &[u8]) -> io::Result<()> {
    let mut sent = 0;
    while sent < buf.len() {
        match writer.write(&buf[sent..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "transport accepted no bytes",
                ));
            }
            Ok(n) => sent += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
