//! Cloud-init `write_files` payload decoding (spec.md §6 "kubeadm bootstrap
//! secret format").
//!
//! A kubeadm-mode bootstrap secret carries one or more files, each encoded
//! as plain text, base64, or gzip+base64. This module turns one such entry
//! into bytes ready to write to disk.

use std::io::Read;

use flate2::read::GzDecoder;

use crate::error::{Error, Result};

/// The `encoding` field of a cloud-init `write_files` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Plain,
    Base64,
    GzipBase64,
}

impl Encoding {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "" | "text/plain" => Ok(Encoding::Plain),
            "base64" | "b64" => Ok(Encoding::Base64),
            "gzip+base64" | "gz+base64" | "gz+b64" | "gzip+b64" => Ok(Encoding::GzipBase64),
            other => Err(Error::Validation(format!(
                "unsupported cloud-init encoding {:?}",
                other
            ))),
        }
    }
}

/// Decodes one `write_files` entry's `content` field according to its
/// declared `encoding`.
pub fn decode(content: &str, encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Plain => Ok(content.as_bytes().to_vec()),
        Encoding::Base64 => base64::decode(content.trim())
            .map_err(|e| Error::Validation(format!("invalid base64 content: {e}"))),
        Encoding::GzipBase64 => {
            let compressed = base64::decode(content.trim())
                .map_err(|e| Error::Validation(format!("invalid base64 content: {e}")))?;
            let mut decoder = GzDecoder::new(&compressed[..]);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| Error::Validation(format!("invalid gzip content: {e}")))?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn decodes_plain_text() {
        let out = decode("hello world", Encoding::Plain).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn decodes_base64() {
        let encoded = base64::encode("hello world");
        let out = decode(&encoded, Encoding::Base64).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn decodes_gzip_base64() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello world").unwrap();
        let compressed = encoder.finish().unwrap();
        let encoded = base64::encode(compressed);
        let out = decode(&encoded, Encoding::GzipBase64).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn accepts_all_gzip_base64_aliases() {
        for alias in ["gzip+base64", "gz+base64", "gz+b64", "gzip+b64"] {
            assert_eq!(Encoding::parse(alias).unwrap(), Encoding::GzipBase64);
        }
    }

    #[test]
    fn rejects_unknown_encoding() {
        assert!(Encoding::parse("rot13").is_err());
    }

    #[test]
    fn rejects_malformed_base64() {
        assert!(decode("not valid base64!!", Encoding::Base64).is_err());
    }
}
