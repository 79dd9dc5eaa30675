//! `multipart/form-data` envelopes for file uploads.

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

/// One file to upload plus extra text fields sent in the same envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct File {
    /// Path of the file on disk
    pub path: PathBuf,
    /// Form field name of the file part
    pub name: String,
    /// Additional text fields, emitted after the file part in key order
    pub extras: BTreeMap<String, String>,
}

impl File {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            extras: BTreeMap::new(),
        }
    }

    /// Add a text field to the envelope.
    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}

/// In-memory `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct Envelope {
    boundary: String,
    body: BytesMut,
}

impl Envelope {
    /// Start an envelope with a random boundary.
    #[must_use]
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let boundary: String = (0..30)
            .map(|_| char::from(b"0123456789abcdef"[rng.random_range(0..16)]))
            .collect();
        Self::with_boundary(boundary)
    }

    #[must_use]
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body: BytesMut::new(),
        }
    }

    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `Content-Type` header value for this envelope.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Append a binary part carrying a file.
    pub fn file_part(&mut self, field: &str, file_name: &str, contents: &[u8]) {
        self.open_part();
        self.body.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                escape_quotes(field),
                escape_quotes(file_name)
            )
            .as_bytes(),
        );
        self.body.put_slice(contents);
        self.body.put_slice(b"\r\n");
    }

    /// Append a text field.
    pub fn text_part(&mut self, field: &str, value: &str) {
        self.open_part();
        self.body.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                escape_quotes(field)
            )
            .as_bytes(),
        );
        self.body.put_slice(value.as_bytes());
        self.body.put_slice(b"\r\n");
    }

    /// Write the closing boundary and return the body.
    #[must_use]
    pub fn finish(mut self) -> Bytes {
        self.body
            .put_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.body.freeze()
    }

    fn open_part(&mut self) {
        self.body
            .put_slice(format!("--{}\r\n", self.boundary).as_bytes());
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

/// Read `file` from disk and build its envelope.
///
/// The file handle is closed before this function returns.
///
/// # Errors
/// Returns the I/O error if the file cannot be opened or read.
pub fn file_envelope(file: &File) -> std::io::Result<Envelope> {
    let contents = {
        let mut handle = std::fs::File::open(&file.path)?;
        let mut contents = Vec::new();
        handle.read_to_end(&mut contents)?;
        contents
    };

    let mut envelope = Envelope::new();
    envelope.file_part(&file.name, &base_name(&file.path), &contents);
    for (key, value) in &file.extras {
        envelope.text_part(key, value);
    }
    Ok(envelope)
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_envelope_layout() {
        let mut envelope = Envelope::with_boundary("XYZ");
        envelope.file_part("license", "LICENSE", b"MIT");
        envelope.text_part("author", "test");
        assert_eq!(envelope.content_type(), "multipart/form-data; boundary=XYZ");

        let body = envelope.finish();
        assert_eq!(
            body,
            Bytes::from_static(
                b"--XYZ\r\n\
              Content-Disposition: form-data; name=\"license\"; filename=\"LICENSE\"\r\n\
              Content-Type: application/octet-stream\r\n\r\n\
              MIT\r\n\
              --XYZ\r\n\
              Content-Disposition: form-data; name=\"author\"\r\n\r\n\
              test\r\n\
              --XYZ--\r\n"
            )
        );
    }

    #[test]
    fn test_random_boundaries_differ() {
        let a = Envelope::new();
        let b = Envelope::new();
        assert_eq!(a.boundary().len(), 30);
        assert_ne!(a.boundary(), b.boundary());
    }

    #[test]
    fn test_quotes_escaped_in_field_names() {
        let mut envelope = Envelope::with_boundary("B");
        envelope.text_part("we\"ird", "v");
        let body = envelope.finish();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("name=\"we\\\"ird\""));
    }

    #[test]
    fn test_file_envelope_uses_base_name_and_extras() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"hello")
            .unwrap();

        let file = File::new(&path, "upload")
            .extra("title", "My Document")
            .extra("author", "test");
        let envelope = file_envelope(&file).unwrap();
        let boundary = envelope.boundary().to_owned();
        let text = String::from_utf8(envelope.finish().to_vec()).unwrap();

        assert!(text.contains("name=\"upload\"; filename=\"report.txt\""));
        assert!(text.contains("\r\n\r\nhello\r\n"));
        let author = text.find("name=\"author\"").unwrap();
        let title = text.find("name=\"title\"").unwrap();
        assert!(author < title, "extras are emitted in key order");
        assert!(text.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[test]
    fn test_file_envelope_missing_file() {
        let file = File::new("/definitely/not/here.bin", "upload");
        let err = file_envelope(&file).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
