//! `Content-Length` framing for the script engine's stdio.
//!
//! Each message is `Content-Length: N\r\n\r\n` followed by N bytes of JSON.
//! Bodies are handed over as raw bytes; parsing is left to [`crate::wire`]
//! so completion payloads can stay unparsed.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Reads framed message bodies from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame body.
    ///
    /// Returns `Ok(None)` on a clean EOF between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        if content_length > MAX_FRAME_BYTES {
            bail!("Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}");
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;
        Ok(Some(body))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header line")?;

            if bytes_read == 0 {
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                bail!("unexpected EOF while reading headers");
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let len: usize = value
                    .trim()
                    .parse()
                    .context("invalid Content-Length value")?;
                content_length = Some(len);
            }
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => bail!("missing Content-Length header"),
        }
    }
}

/// Writes framed message bodies to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, body: &[u8]) -> Result<()> {
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(body)
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_read_back_in_order() {
        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_frame(br#"{"handle":1}"#).await.unwrap();
        writer.write_frame(br#"{"handle":2}"#).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), br#"{"handle":1}"#);
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), br#"{"handle":2}"#);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_before_headers_is_clean() {
        let mut reader = FrameReader::new(&b""[..]);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_headers_is_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 10\r\n"[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn eof_mid_body_is_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 100\r\n\r\nhello"[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn missing_content_length_is_error() {
        let mut reader = FrameReader::new(&b"Content-Type: application/json\r\n\r\n{}"[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = FrameReader::new(header.as_bytes());
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn header_name_is_case_insensitive() {
        let body = r#"{"type":"complete"}"#;
        let frame = format!("content-length: {}\r\n\r\n{body}", body.len());
        let mut reader = FrameReader::new(frame.as_bytes());
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), body.as_bytes());
    }

    #[tokio::test]
    async fn content_length_counts_bytes() {
        let body = "\"é\"";
        let mut buf = Vec::new();
        FrameWriter::new(&mut buf)
            .write_frame(body.as_bytes())
            .await
            .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("Content-Length: 4\r\n\r\n"));
    }
}
