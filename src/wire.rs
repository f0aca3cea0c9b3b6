//! Line-oriented wire helpers shared by both servers.
//!
//! Two framings are used:
//! - **Command lines**: one request per `\n`-terminated line, split on ASCII
//!   whitespace.
//! - **Response frames**: `<code>:<message>` where the message may span several
//!   lines; the frame is closed by a line containing a single `.`. Message lines
//!   that begin with `.` get one extra `.` on the wire (dot-stuffing).
//!
//! The NM answers clients with response frames, and the SS answers NM control
//! commands with the same frames.

use crate::error::{CODE_SUCCESS, DfsError, DfsResult};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for a single request or response line.
pub const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Line that terminates a response frame.
pub const FRAME_END: &str = ".";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub message: String,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            code: CODE_SUCCESS,
            message: message.into(),
        }
    }

    pub fn from_error(err: &DfsError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }

    pub fn from_result(result: DfsResult<String>) -> Self {
        match result {
            Ok(message) => Self::ok(message),
            Err(err) => Self::from_error(&err),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }

    /// Turns a peer's response back into a result, relaying its error code.
    pub fn into_result(self) -> DfsResult<String> {
        if self.is_success() {
            Ok(self.message)
        } else {
            Err(DfsError::Remote {
                code: self.code,
                message: self.message,
            })
        }
    }

    /// Renders the frame exactly as it is written to the socket.
    pub fn encode(&self) -> String {
        let mut out = format!("{}:", self.code);
        let mut lines = self.message.trim_end_matches('\n').split('\n');

        // The first line shares the code prefix, so it is never mistaken for the terminator.
        if let Some(first) = lines.next() {
            out.push_str(first);
        }
        out.push('\n');

        for line in lines {
            if line.starts_with('.') {
                out.push('.');
            }
            out.push_str(line);
            out.push('\n');
        }

        out.push_str(FRAME_END);
        out.push('\n');
        out
    }
}

pub async fn write_frame<W>(writer: &mut W, response: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(response.encode().as_bytes()).await?;
    writer.flush().await
}

/// Writes a single `\n`-terminated line.
pub async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// A complete line that was not valid UTF-8. The line has been consumed, so the
/// stream is still aligned on the next one.
#[derive(Debug, thiserror::Error)]
#[error("line is not valid UTF-8")]
pub struct MalformedLine;

/// Whether `err` came from a [`MalformedLine`] and the session can continue.
pub fn is_malformed_line(err: &std::io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<MalformedLine>())
}

/// Reads one line without its terminator. `Ok(None)` means the peer closed the stream.
pub async fn read_line<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES)
        .read_until(b'\n', &mut buf)
        .await?;

    if read == 0 {
        return Ok(None);
    }

    if buf.last() != Some(&b'\n') && read as u64 >= MAX_LINE_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "line exceeds maximum length",
        ));
    }

    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, MalformedLine))
}

/// Error reported to a client whose request line was not valid UTF-8.
pub fn malformed_request() -> DfsError {
    DfsError::InvalidArgs("request is not valid UTF-8".to_string())
}

/// Reads a full response frame. `Ok(None)` means the peer closed before sending one.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Response>>
where
    R: AsyncBufRead + Unpin,
{
    let first = match read_line(reader).await? {
        Some(line) => line,
        None => return Ok(None),
    };

    let (code, head) = first.split_once(':').ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("malformed response line: {}", first),
        )
    })?;
    let code: u16 = code.trim().parse().map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("malformed response code: {}", code),
        )
    })?;

    let mut message = head.to_string();
    loop {
        let line = read_line(reader).await?.ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "response frame was not terminated",
            )
        })?;

        if line == FRAME_END {
            break;
        }

        message.push('\n');
        match line.strip_prefix('.') {
            Some(unstuffed) => message.push_str(unstuffed),
            None => message.push_str(&line),
        }
    }

    Ok(Some(Response { code, message }))
}

/// Splits a command line into its upper-cased verb and remaining arguments.
pub fn split_command(line: &str) -> Option<(String, Vec<&str>)> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?.to_ascii_uppercase();
    Some((verb, parts.collect()))
}

/// Returns the text after the first `skip` whitespace-separated tokens, untrimmed on the right.
pub fn rest_after(line: &str, skip: usize) -> &str {
    let mut rest = line.trim_start();
    for _ in 0..skip {
        match rest.find(char::is_whitespace) {
            Some(idx) => rest = rest[idx..].trim_start(),
            None => return "",
        }
    }
    rest
}

/// Filenames travel as single tokens and double as on-disk names.
pub fn validate_filename(name: &str) -> DfsResult<()> {
    let invalid = |reason: &str| Err(DfsError::InvalidArgs(format!("invalid filename '{}': {}", name, reason)));

    if name.is_empty() {
        return invalid("empty");
    }
    if name.starts_with('.') {
        return invalid("must not start with '.'");
    }
    if name.contains(['/', '\\']) {
        return invalid("must not contain path separators");
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return invalid("must not contain whitespace");
    }
    // Reserved for storage-side metadata sidecars.
    if name.ends_with(".meta.json") || name.ends_with(".tmp") {
        return invalid("reserved suffix");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("notes.txt").is_ok());
        assert!(validate_filename("report-2024_final").is_ok());

        for bad in ["", ".hidden", "../etc/passwd", "a/b", "a\\b", "two words", "x.meta.json"] {
            let err = validate_filename(bad).unwrap_err();
            assert_eq!(err.code(), 7, "'{}' should be rejected", bad);
        }
    }

    #[test]
    fn test_encode_single_line() {
        let response = Response::ok("File 'a.txt' created successfully");
        assert_eq!(
            response.encode(),
            "0:File 'a.txt' created successfully\n.\n"
        );
    }

    #[test]
    fn test_encode_dot_stuffs_message_lines() {
        let response = Response::ok("listing\n.hidden\nplain");
        assert_eq!(response.encode(), "0:listing\n..hidden\nplain\n.\n");
    }

    #[tokio::test]
    async fn test_read_frame_multiline_with_stuffing() {
        let original = Response {
            code: 0,
            message: "header\n.\n..two\nend".to_string(),
        };
        let encoded = original.encode();
        let mut reader = BufReader::new(encoded.as_bytes());

        let decoded = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(decoded, original);

        // Stream is exhausted afterwards
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_error_code() {
        let mut reader = BufReader::new("9:permission denied: only the owner may delete\n.\n".as_bytes());
        let response = read_frame(&mut reader).await.unwrap().unwrap();

        assert_eq!(response.code, 9);
        let err = response.into_result().unwrap_err();
        assert_eq!(err.code(), 9);
    }

    #[tokio::test]
    async fn test_read_frame_rejects_garbage() {
        let mut reader = BufReader::new("hello there\n".as_bytes());
        assert!(read_frame(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_read_line_strips_crlf() {
        let mut reader = BufReader::new("VIEW -a\r\nQUIT\n".as_bytes());
        assert_eq!(read_line(&mut reader).await.unwrap().unwrap(), "VIEW -a");
        assert_eq!(read_line(&mut reader).await.unwrap().unwrap(), "QUIT");
        assert!(read_line(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_line_skips_past_invalid_utf8() {
        let mut reader = BufReader::new(&b"\xff\xfe junk\nQUIT\n"[..]);

        let err = read_line(&mut reader).await.unwrap_err();
        assert!(is_malformed_line(&err));
        assert_eq!(read_line(&mut reader).await.unwrap().unwrap(), "QUIT");
    }

    #[tokio::test]
    async fn test_overlong_line_is_fatal() {
        let long = "x".repeat(MAX_LINE_BYTES as usize + 10);
        let mut reader = BufReader::new(long.as_bytes());

        let err = read_line(&mut reader).await.unwrap_err();
        assert!(!is_malformed_line(&err));
    }

    #[test]
    fn test_split_command_uppercases_verb() {
        let (verb, args) = split_command("  create notes.txt ").unwrap();
        assert_eq!(verb, "CREATE");
        assert_eq!(args, vec!["notes.txt"]);
        assert!(split_command("   ").is_none());
    }

    #[test]
    fn test_rest_after_keeps_inner_spacing() {
        assert_eq!(rest_after("3 hello  big world", 1), "hello  big world");
        assert_eq!(rest_after("ETIRW", 1), "");
    }
}
