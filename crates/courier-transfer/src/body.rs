//! Request body encoding: charsets, url-encoded forms and streamed multipart

use crate::request::{FormField, RequestBody, TransferRequest};
use bytes::Bytes;
use courier_types::{Error, Result};
use encoding_rs::Encoding;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::io;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

const OCTET_STREAM: &str = "application/octet-stream";

/// Look up an encoding by its WHATWG label
pub fn encoding_for(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| Error::argument(format!("Unknown charset '{}'", label)))
}

/// Encode text with the named charset
pub fn encode_text(text: &str, charset: &str) -> Result<Vec<u8>> {
    let (encoded, _, _) = encoding_for(charset)?.encode(text);
    Ok(encoded.into_owned())
}

/// Decode bytes with the named charset, replacing malformed sequences
pub fn decode_text(bytes: &[u8], charset: &str) -> Result<String> {
    let (decoded, _, _) = encoding_for(charset)?.decode(bytes);
    Ok(decoded.into_owned())
}

/// `charset` parameter of a `Content-Type` value
pub fn charset_from_content_type(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Percent-encode `name=value` pairs, one pair per line
pub fn encode_url_fields(fields: &[FormField], charset: &str) -> Result<Vec<u8>> {
    let mut lines = Vec::with_capacity(fields.len());
    for field in fields {
        let name = encode_text(&field.name, charset)?;
        let value = encode_text(&field.value, charset)?;
        lines.push(format!(
            "{}={}",
            urlencoding::encode_binary(&name),
            urlencoding::encode_binary(&value)
        ));
    }
    Ok(lines.join("\n").into_bytes())
}

/// Fresh multipart boundary
pub fn new_boundary() -> String {
    format!("++++{}", chrono::Utc::now().timestamp_millis())
}

#[derive(Debug, Clone)]
enum Segment {
    Bytes(Bytes),
    File { path: PathBuf, len: u64 },
}

impl Segment {
    fn len(&self) -> u64 {
        match self {
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::File { len, .. } => *len,
        }
    }
}

/// A request body laid out as in-memory segments and file references
///
/// Files are opened only while streaming, so building a body never holds a
/// descriptor open.
#[derive(Debug, Clone)]
pub struct UploadBody {
    segments: Vec<Segment>,
    content_length: u64,
    content_type: Option<String>,
}

impl UploadBody {
    /// Lay out the body of `request`; `boundary` is used for multipart forms
    ///
    /// Missing or unreadable source files yield [`Error::FileReason`].
    pub async fn prepare(request: &TransferRequest, boundary: &str) -> Result<Self> {
        let charset = request.settings.upload_charset.as_str();
        let mut segments = Vec::new();
        let default_type = match &request.body {
            RequestBody::Empty => None,
            RequestBody::Raw { data } => {
                segments.push(Segment::Bytes(Bytes::from(data.clone())));
                Some(OCTET_STREAM.to_string())
            }
            RequestBody::Text { text } => {
                segments.push(Segment::Bytes(encode_text(text, charset)?.into()));
                Some(format!("text/plain; charset={}", charset))
            }
            RequestBody::File { path } => {
                let len = source_len(path).await?;
                segments.push(Segment::File {
                    path: path.clone(),
                    len,
                });
                Some(OCTET_STREAM.to_string())
            }
            RequestBody::UrlEncoded { fields } => {
                segments.push(Segment::Bytes(encode_url_fields(fields, charset)?.into()));
                Some("application/x-www-form-urlencoded".to_string())
            }
            RequestBody::Multipart { fields, files } => {
                for field in fields {
                    let mut part = format!(
                        "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\
                         Content-Type: text/plain; charset={}\r\n\r\n",
                        boundary,
                        quote(&field.name),
                        charset
                    )
                    .into_bytes();
                    part.extend_from_slice(&encode_text(&field.value, charset)?);
                    part.extend_from_slice(b"\r\n");
                    segments.push(Segment::Bytes(part.into()));
                }
                for file in files {
                    let len = source_len(&file.path).await?;
                    let header = format!(
                        "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: {}\r\n\r\n",
                        boundary,
                        quote(&file.field),
                        quote(&file.announced_name()),
                        file.content_type.as_deref().unwrap_or(OCTET_STREAM)
                    );
                    segments.push(Segment::Bytes(header.into_bytes().into()));
                    segments.push(Segment::File {
                        path: file.path.clone(),
                        len,
                    });
                    segments.push(Segment::Bytes(Bytes::from_static(b"\r\n")));
                }
                segments.push(Segment::Bytes(format!("--{}--\r\n", boundary).into_bytes().into()));
                // The boundary must always reach the server, whatever the caller set
                return Ok(Self::new(
                    segments,
                    Some(format!("multipart/form-data; boundary={}", boundary)),
                ));
            }
        };

        let content_type = request.content_type.clone().or(default_type);
        Ok(Self::new(segments, content_type))
    }

    fn new(segments: Vec<Segment>, content_type: Option<String>) -> Self {
        let content_length = segments.iter().map(Segment::len).sum();
        Self {
            segments,
            content_length,
            content_type,
        }
    }

    /// Exact number of bytes the stream yields
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// `Content-Type` header to send
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Whether there is nothing to send
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Stream the body in chunks of at most `chunk_size` bytes
    ///
    /// The running byte count is published on `progress` after every chunk and
    /// the stream fails with [`io::ErrorKind::Interrupted`] once `cancel` fires.
    pub fn into_stream(
        self,
        chunk_size: usize,
        cancel: CancellationToken,
        progress: watch::Sender<u64>,
    ) -> BoxStream<'static, io::Result<Bytes>> {
        let chunk_size = chunk_size.max(1);
        let mut sent = 0u64;
        stream::iter(self.segments)
            .flat_map(move |segment| segment_stream(segment, chunk_size))
            .map(move |chunk| {
                let chunk = chunk?;
                if cancel.is_cancelled() {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "transfer cancelled"));
                }
                sent += chunk.len() as u64;
                let _ = progress.send(sent);
                Ok(chunk)
            })
            .boxed()
    }
}

fn segment_stream(segment: Segment, chunk_size: usize) -> BoxStream<'static, io::Result<Bytes>> {
    match segment {
        Segment::Bytes(bytes) => {
            let mut chunks = Vec::with_capacity(bytes.len() / chunk_size + 1);
            let mut rest = bytes;
            while rest.len() > chunk_size {
                chunks.push(Ok(rest.split_to(chunk_size)));
            }
            if !rest.is_empty() {
                chunks.push(Ok(rest));
            }
            stream::iter(chunks).boxed()
        }
        Segment::File { path, len } => stream::once(tokio::fs::File::open(path))
            .map_ok(move |file| ReaderStream::with_capacity(file.take(len), chunk_size))
            .try_flatten()
            .boxed(),
    }
}

async fn source_len(path: &std::path::Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| Error::file_reason(path, format!("Cannot read source file: {}", e)))?;
    if !metadata.is_file() {
        return Err(Error::file_reason(path, "Source is not a regular file"));
    }
    Ok(metadata.len())
}

fn quote(value: &str) -> String {
    value.replace('"', "%22").replace(['\r', '\n'], " ")
}
