//! Wire metadata codec
//!
//! Each connection carries exactly one file:
//!
//! ```text
//! {"name":"report.pdf","size":1048576}\n
//! <1048576 raw payload bytes>
//! ```
//!
//! The metadata block is a single newline-terminated JSON line, so the
//! receiver can delimit it from the payload without relying on
//! connection close. The line is capped at [`MAX_METADATA_LEN`] bytes;
//! anything longer is treated as a malformed handshake.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};

/// Maximum length of the metadata line, including the newline.
pub const MAX_METADATA_LEN: usize = 4096;

/// Transfer metadata exchanged before the payload: file name and
/// declared byte length. The declared size is the authoritative
/// completion threshold for the reception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub name: String,
    pub size: u64,
}

impl TransferMetadata {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// The file name reduced to its final path component.
    ///
    /// Senders may legitimately put a bare name here, but a malicious
    /// or buggy peer could send `../../etc/passwd`; only the last
    /// component is ever used to build the destination path.
    pub fn safe_name(&self) -> Result<&str> {
        Path::new(&self.name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty() && *n != "." && *n != "..")
            .ok_or_else(|| {
                ProtocolError::InvalidMetadata(format!("unusable file name: {:?}", self.name))
            })
    }

    /// Encode and write the metadata line.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        if line.len() > MAX_METADATA_LEN {
            return Err(ProtocolError::InvalidMetadata(format!(
                "metadata line exceeds {} bytes",
                MAX_METADATA_LEN
            )));
        }
        writer.write_all(&line).await?;
        Ok(())
    }

    /// Read and decode one metadata line from the stream.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMetadata` if the stream closes before the line
    /// is complete, the line exceeds [`MAX_METADATA_LEN`], the JSON is
    /// malformed, or the file name is empty.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + AsyncBufRead + Unpin,
    {
        let mut line = Vec::new();
        let mut limited = tokio::io::AsyncReadExt::take(reader, MAX_METADATA_LEN as u64);
        let read = limited.read_until(b'\n', &mut line).await?;

        if read == 0 {
            return Err(ProtocolError::InvalidMetadata(
                "connection closed before metadata".to_string(),
            ));
        }
        if line.last() != Some(&b'\n') {
            return Err(ProtocolError::InvalidMetadata(format!(
                "metadata line truncated or longer than {} bytes",
                MAX_METADATA_LEN
            )));
        }

        let metadata: TransferMetadata = serde_json::from_slice(&line)
            .map_err(|e| ProtocolError::InvalidMetadata(format!("malformed metadata: {e}")))?;

        if metadata.name.is_empty() {
            return Err(ProtocolError::InvalidMetadata(
                "empty file name".to_string(),
            ));
        }

        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn decode(bytes: &[u8]) -> Result<TransferMetadata> {
        let mut reader = BufReader::new(bytes);
        TransferMetadata::read_from(&mut reader).await
    }

    #[tokio::test]
    async fn test_round_trip() {
        let metadata = TransferMetadata::new("report.pdf", 1048576);
        let mut encoded = Vec::new();
        metadata.write_to(&mut encoded).await.unwrap();
        assert_eq!(encoded.last(), Some(&b'\n'));

        let decoded = decode(&encoded).await.unwrap();
        assert_eq!(decoded, metadata);
    }

    #[tokio::test]
    async fn test_payload_left_in_stream() {
        let metadata = TransferMetadata::new("a.bin", 4);
        let mut encoded = Vec::new();
        metadata.write_to(&mut encoded).await.unwrap();
        encoded.extend_from_slice(b"BODY");

        let mut reader = BufReader::new(encoded.as_slice());
        let decoded = TransferMetadata::read_from(&mut reader).await.unwrap();
        assert_eq!(decoded.size, 4);

        let mut rest = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut rest)
            .await
            .unwrap();
        assert_eq!(rest, b"BODY");
    }

    #[tokio::test]
    async fn test_closed_stream_is_invalid() {
        let error = decode(b"").await.unwrap_err();
        assert!(matches!(error, ProtocolError::InvalidMetadata(_)));
    }

    #[tokio::test]
    async fn test_truncated_line_is_invalid() {
        let error = decode(b"{\"name\":\"a\",\"size\":1").await.unwrap_err();
        assert!(matches!(error, ProtocolError::InvalidMetadata(_)));
    }

    #[tokio::test]
    async fn test_oversized_line_is_invalid() {
        let name = "x".repeat(MAX_METADATA_LEN);
        let line = format!("{{\"name\":\"{name}\",\"size\":1}}\n");
        let error = decode(line.as_bytes()).await.unwrap_err();
        assert!(matches!(error, ProtocolError::InvalidMetadata(_)));
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid() {
        let error = decode(b"not json at all\n").await.unwrap_err();
        assert!(matches!(error, ProtocolError::InvalidMetadata(_)));
    }

    #[test]
    fn test_safe_name_strips_directories() {
        let metadata = TransferMetadata::new("../../etc/passwd", 10);
        assert_eq!(metadata.safe_name().unwrap(), "passwd");

        let metadata = TransferMetadata::new("plain.txt", 10);
        assert_eq!(metadata.safe_name().unwrap(), "plain.txt");
    }

    #[test]
    fn test_safe_name_rejects_unusable_names() {
        assert!(TransferMetadata::new("..", 1).safe_name().is_err());
        assert!(TransferMetadata::new("/", 1).safe_name().is_err());
    }
}
