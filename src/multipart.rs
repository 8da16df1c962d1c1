//! `multipart/form-data` bodies.
//!
//! A body is a boundary token plus an ordered list of parts. Encoding emits an
//! initial boundary, each part's header and payload (parts separated by an
//! encapsulation boundary) and a closing boundary. Bodies whose payload is at
//! least [`MULTIPART_FILE_THRESHOLD`] bytes are written to a temporary file
//! instead of memory; see [`MultipartBody::encode_to_temp_file`].

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use rand::Rng;
use tempfile::TempPath;

/// Payload size at which a multipart body is streamed to a temporary file.
pub const MULTIPART_FILE_THRESHOLD: u64 = 10_000_000;

const BOUNDARY_PREFIX: &str = "netclient";
const BOUNDARY_CHARSET: &[u8] =
    b"-_1234567890abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MimeType {
    PlainText,
    Utf8Text,
    Binary,
    Video,
    Other(String),
}

impl MimeType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PlainText => "text/plain",
            Self::Utf8Text => "text/plain; charset=utf-8",
            Self::Binary => "application/octet-stream",
            Self::Video => "video/mp4",
            Self::Other(value) => value,
        }
    }

    pub fn from_extension(extension: &str) -> Self {
        let known = match extension.to_ascii_lowercase().as_str() {
            "txt" => return Self::PlainText,
            "mp4" | "m4v" => return Self::Video,
            "json" => "application/json",
            "xml" => "application/xml",
            "html" | "htm" => "text/html",
            "css" => "text/css",
            "csv" => "text/csv",
            "js" => "text/javascript",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "heic" => "image/heic",
            "webp" => "image/webp",
            "svg" => "image/svg+xml",
            "pdf" => "application/pdf",
            "zip" => "application/zip",
            "gz" => "application/gzip",
            "mov" => "video/quicktime",
            "mp3" => "audio/mpeg",
            "m4a" => "audio/mp4",
            "wav" => "audio/wav",
            _ => return Self::Binary,
        };
        Self::Other(known.to_owned())
    }
}

#[derive(Clone, Debug)]
pub enum PartSource {
    Bytes(Bytes),
    File(PathBuf),
}

#[derive(Clone, Debug)]
pub struct MultipartPart {
    name: String,
    filename: Option<String>,
    mime_type: Option<MimeType>,
    source: PartSource,
    length: u64,
}

impl MultipartPart {
    pub fn data(data: impl Into<Bytes>, name: impl Into<String>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            filename: None,
            mime_type: None,
            length: data.len() as u64,
            source: PartSource::Bytes(data),
        }
    }

    pub fn string(value: &str, name: impl Into<String>) -> Self {
        Self::data(Bytes::copy_from_slice(value.as_bytes()), name).mime_type(MimeType::Utf8Text)
    }

    pub fn text(text: impl Into<Bytes>, name: impl Into<String>) -> Self {
        Self::data(text, name).mime_type(MimeType::PlainText)
    }

    pub fn video(
        video: impl Into<Bytes>,
        name: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self::data(video, name)
            .filename(filename)
            .mime_type(MimeType::Video)
    }

    /// File-backed part. The length is taken from the file's metadata now and
    /// exactly that many bytes are read when the body is encoded.
    pub fn file(path: impl AsRef<Path>, name: impl Into<String>) -> io::Result<Self> {
        let path = path.as_ref();
        let length = std::fs::metadata(path)?.len();
        let filename = path
            .file_name()
            .map(|item| item.to_string_lossy().into_owned());
        let mime_type = path
            .extension()
            .map(|item| MimeType::from_extension(&item.to_string_lossy()))
            .unwrap_or(MimeType::Binary);
        Ok(Self {
            name: name.into(),
            filename,
            mime_type: Some(mime_type),
            source: PartSource::File(path.to_path_buf()),
            length,
        })
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn mime_type(mut self, mime_type: MimeType) -> Self {
        self.mime_type = Some(mime_type);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_name(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn content_type(&self) -> Option<&MimeType> {
        self.mime_type.as_ref()
    }

    pub fn source(&self) -> &PartSource {
        &self.source
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn header_bytes(&self) -> Vec<u8> {
        let mut header = format!("Content-Disposition: form-data; name=\"{}\"", self.name);
        if let Some(filename) = &self.filename {
            header.push_str(&format!("; filename=\"{filename}\""));
        }
        header.push_str("\r\n");
        match &self.mime_type {
            Some(mime_type) => header.push_str(&format!("Content-Type: {}\r\n\r\n", mime_type.as_str())),
            None => header.push_str("\r\n"),
        }
        header.into_bytes()
    }

    fn encoded_len(&self) -> u64 {
        self.header_bytes().len() as u64 + self.length
    }

    fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.header_bytes())?;
        match &self.source {
            PartSource::Bytes(data) => out.write_all(data),
            PartSource::File(path) => {
                let mut reader = File::open(path)?.take(self.length);
                let copied = io::copy(&mut reader, out)?;
                if copied != self.length {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!(
                            "multipart part {} expected {} bytes from {} but read {copied}",
                            self.name,
                            self.length,
                            path.display()
                        ),
                    ));
                }
                Ok(())
            }
        }
    }
}

enum BoundaryKind {
    Initial,
    Encapsulated,
    Final,
}

#[derive(Clone, Debug)]
pub struct MultipartBody {
    boundary: String,
    parts: Vec<MultipartPart>,
}

impl Default for MultipartBody {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::with_boundary(generate_boundary())
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn add(&mut self, part: MultipartPart) {
        self.parts.push(part);
    }

    pub fn part(mut self, part: MultipartPart) -> Self {
        self.add(part);
        self
    }

    pub fn parts(&self) -> &[MultipartPart] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Sum of the part payload lengths; compared against
    /// [`MULTIPART_FILE_THRESHOLD`].
    pub fn payload_len(&self) -> u64 {
        self.parts.iter().map(MultipartPart::len).sum()
    }

    pub fn streams_to_file(&self) -> bool {
        self.payload_len() >= MULTIPART_FILE_THRESHOLD
    }

    /// Exact byte length of the encoded body, boundaries and part headers included.
    pub fn encoded_len(&self) -> u64 {
        let mut total = self.boundary_bytes(BoundaryKind::Initial).len() as u64;
        for (index, part) in self.parts.iter().enumerate() {
            if index > 0 {
                total += self.boundary_bytes(BoundaryKind::Encapsulated).len() as u64;
            }
            total += part.encoded_len();
        }
        total + self.boundary_bytes(BoundaryKind::Final).len() as u64
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.boundary_bytes(BoundaryKind::Initial))?;
        for (index, part) in self.parts.iter().enumerate() {
            if index > 0 {
                out.write_all(&self.boundary_bytes(BoundaryKind::Encapsulated))?;
            }
            part.write_to(out)?;
        }
        out.write_all(&self.boundary_bytes(BoundaryKind::Final))
    }

    pub fn encode_to_bytes(&self) -> io::Result<Bytes> {
        let mut encoded = Vec::with_capacity(self.encoded_len() as usize);
        self.write_to(&mut encoded)?;
        Ok(Bytes::from(encoded))
    }

    /// Writes the encoded body to a file under the process-scoped temporary
    /// directory. The file is removed when the returned path is dropped or
    /// closed.
    pub fn encode_to_temp_file(&self) -> io::Result<EncodedFile> {
        let directory = process_temp_dir()?;
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}-", self.boundary))
            .suffix(".multipart")
            .tempfile_in(directory)?;
        {
            let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file.as_file_mut());
            self.write_to(&mut writer)?;
            writer.flush()?;
        }
        let len = file.as_file().metadata()?.len();
        Ok(EncodedFile {
            path: file.into_temp_path(),
            len,
        })
    }

    fn boundary_bytes(&self, kind: BoundaryKind) -> Vec<u8> {
        let text = match kind {
            BoundaryKind::Initial => format!("--{}\r\n", self.boundary),
            BoundaryKind::Encapsulated => format!("\r\n--{}\r\n", self.boundary),
            BoundaryKind::Final => format!("\r\n--{}--\r\n", self.boundary),
        };
        text.into_bytes()
    }
}

#[derive(Debug)]
pub struct EncodedFile {
    pub path: TempPath,
    pub len: u64,
}

pub(crate) fn process_temp_dir() -> io::Result<PathBuf> {
    let directory = std::env::temp_dir().join(format!("netclient-{}", std::process::id()));
    std::fs::create_dir_all(&directory)?;
    Ok(directory)
}

pub(crate) fn generate_boundary() -> String {
    let mut rng = rand::rng();
    let length = rng.random_range(15..=25);
    let mut boundary = String::with_capacity(BOUNDARY_PREFIX.len() + 1 + length);
    boundary.push_str(BOUNDARY_PREFIX);
    boundary.push('.');
    for _ in 0..length {
        let index = rng.random_range(0..BOUNDARY_CHARSET.len());
        boundary.push(BOUNDARY_CHARSET[index] as char);
    }
    boundary
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{MimeType, MultipartBody, MultipartPart, generate_boundary};

    #[test]
    fn encodes_parts_with_boundaries_and_headers() {
        let body = MultipartBody::with_boundary("B")
            .part(MultipartPart::string("hello", "greeting"))
            .part(MultipartPart::data(&b"\x00\x01"[..], "blob").filename("blob.bin"));

        let encoded = body.encode_to_bytes().expect("encode in memory");
        let expected = b"--B\r\n\
Content-Disposition: form-data; name=\"greeting\"\r\n\
Content-Type: text/plain; charset=utf-8\r\n\r\n\
hello\
\r\n--B\r\n\
Content-Disposition: form-data; name=\"blob\"; filename=\"blob.bin\"\r\n\r\n\
\x00\x01\
\r\n--B--\r\n";
        assert_eq!(&encoded[..], &expected[..]);
        assert_eq!(encoded.len() as u64, body.encoded_len());
    }

    #[test]
    fn file_part_reads_declared_length() {
        let mut source = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("create source file");
        source.write_all(b"{\"a\":1}").expect("write source file");

        let part = MultipartPart::file(source.path(), "doc").expect("file part");
        assert_eq!(part.len(), 7);
        assert_eq!(
            part.content_type(),
            Some(&MimeType::Other("application/json".to_owned()))
        );

        let body = MultipartBody::new().part(part);
        let encoded = body.encode_to_bytes().expect("encode file part");
        assert_eq!(encoded.len() as u64, body.encoded_len());
    }

    #[test]
    fn temp_file_matches_encoded_len_and_is_removed_on_close() {
        let body = MultipartBody::new().part(MultipartPart::text(vec![b'x'; 4096], "text"));
        let encoded = body.encode_to_temp_file().expect("encode to temp file");
        assert_eq!(encoded.len, body.encoded_len());

        let path = encoded.path.to_path_buf();
        assert!(path.exists());
        assert!(
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with(body.boundary()))
        );
        encoded.path.close().expect("remove temp file");
        assert!(!path.exists());
    }

    #[test]
    fn boundary_has_prefix_and_bounded_length() {
        for _ in 0..64 {
            let boundary = generate_boundary();
            let suffix = boundary
                .strip_prefix("netclient.")
                .expect("boundary prefix");
            assert!((15..=25).contains(&suffix.len()));
        }
    }

    #[test]
    fn threshold_uses_payload_length() {
        let small = MultipartBody::new().part(MultipartPart::data(vec![0_u8; 16], "a"));
        assert!(!small.streams_to_file());
        assert_eq!(small.payload_len(), 16);
    }
}
