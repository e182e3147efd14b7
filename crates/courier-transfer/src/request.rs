//! Transfer descriptors: what to send, where to store the answer

use crate::settings::{ReadBodyMode, TransferSettings};
use courier_types::{Error, Result, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// HEAD
    Head,
}

impl Method {
    /// Equivalent reqwest method
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
            Self::Head => reqwest::Method::HEAD,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_reqwest().as_str())
    }
}

/// One text field of a form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    /// Field name
    pub name: String,
    /// Field value
    pub value: String,
}

/// One file part of a multipart form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartFile {
    /// Form field name
    pub field: String,
    /// Local file to stream
    pub path: PathBuf,
    /// File name announced to the server; defaults to the local file name
    pub file_name: Option<String>,
    /// Part content type; defaults to `application/octet-stream`
    pub content_type: Option<String>,
}

impl MultipartFile {
    /// File name sent in the part's `Content-Disposition`
    pub fn announced_name(&self) -> String {
        self.file_name.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string())
        })
    }
}

/// Request body variants
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBody {
    /// No body
    #[default]
    Empty,
    /// Raw bytes written as-is
    Raw {
        /// Body bytes
        data: Vec<u8>,
    },
    /// Text encoded with the upload charset
    Text {
        /// Body text
        text: String,
    },
    /// Contents of a local file
    File {
        /// Source file
        path: PathBuf,
    },
    /// `name=value` pairs, percent-encoded
    UrlEncoded {
        /// Form fields in order
        fields: Vec<FormField>,
    },
    /// `multipart/form-data` with text fields then files
    Multipart {
        /// Text fields in order
        fields: Vec<FormField>,
        /// File parts in order
        files: Vec<MultipartFile>,
    },
}

impl RequestBody {
    /// Local files read while sending this body
    pub fn source_files(&self) -> Vec<&Path> {
        match self {
            Self::File { path } => vec![path.as_path()],
            Self::Multipart { files, .. } => files.iter().map(|f| f.path.as_path()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Where a downloaded body is written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadTarget {
    /// Exactly this file
    File(PathBuf),
    /// A file in this directory named after the response or the URL
    Directory(PathBuf),
}

/// Everything needed to run one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Task identifier
    pub id: TaskId,
    /// Target URL
    pub url: String,
    /// HTTP method
    pub method: Method,
    /// Explicit content type for the request body
    pub content_type: Option<String>,
    /// Extra request headers in order
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: RequestBody,
    /// Accepted response codes; empty means any 2xx
    pub accepted_codes: BTreeSet<u16>,
    /// Download destination, used when the body is read into a file
    pub download: Option<DownloadTarget>,
    /// Transfer settings
    pub settings: TransferSettings,
}

impl TransferRequest {
    /// Create a GET request with default settings
    pub fn new<S: Into<String>>(id: TaskId, url: S) -> Self {
        Self {
            id,
            url: url.into(),
            method: Method::Get,
            content_type: None,
            headers: Vec::new(),
            body: RequestBody::Empty,
            accepted_codes: BTreeSet::new(),
            download: None,
            settings: TransferSettings::default(),
        }
    }

    /// Create a download of `url` into `target` using the download preset
    pub fn download<S: Into<String>>(id: TaskId, url: S, target: DownloadTarget) -> Self {
        Self {
            download: Some(target),
            settings: TransferSettings::download_preset(),
            ..Self::new(id, url)
        }
    }

    /// Create a multipart POST upload to `url` using the upload preset
    pub fn upload<S: Into<String>>(id: TaskId, url: S) -> Self {
        Self {
            method: Method::Post,
            body: RequestBody::Multipart {
                fields: Vec::new(),
                files: Vec::new(),
            },
            settings: TransferSettings::upload_preset(),
            ..Self::new(id, url)
        }
    }

    /// Set the method
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Append a header
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the content type
    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Replace the body
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Add a form field, turning an empty body into a multipart form
    pub fn with_field<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        let field = FormField {
            name: name.into(),
            value: value.into(),
        };
        match &mut self.body {
            RequestBody::Multipart { fields, .. } | RequestBody::UrlEncoded { fields } => {
                fields.push(field);
            }
            body => {
                *body = RequestBody::Multipart {
                    fields: vec![field],
                    files: Vec::new(),
                };
            }
        }
        self
    }

    /// Add a file part, turning the body into a multipart form if needed
    pub fn with_file<K: Into<String>, P: Into<PathBuf>>(mut self, field: K, path: P) -> Self {
        let file = MultipartFile {
            field: field.into(),
            path: path.into(),
            file_name: None,
            content_type: None,
        };
        if let RequestBody::Multipart { files, .. } = &mut self.body {
            files.push(file);
        } else {
            self.body = RequestBody::Multipart {
                fields: Vec::new(),
                files: vec![file],
            };
        }
        self
    }

    /// Accept only these response codes
    pub fn with_accepted_codes<I: IntoIterator<Item = u16>>(mut self, codes: I) -> Self {
        self.accepted_codes = codes.into_iter().collect();
        self
    }

    /// Set the download destination
    pub fn with_download_target(mut self, target: DownloadTarget) -> Self {
        self.download = Some(target);
        self
    }

    /// Replace the settings
    pub fn with_settings(mut self, settings: TransferSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Whether a response code counts as accepted
    pub fn accepts(&self, code: u16) -> bool {
        if self.accepted_codes.is_empty() {
            (200..300).contains(&code)
        } else {
            self.accepted_codes.contains(&code)
        }
    }

    /// Parsed URL
    pub fn parsed_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url)
            .map_err(|e| Error::argument(format!("Invalid URL '{}': {}", self.url, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(Error::argument(format!("Unsupported URL scheme '{}'", scheme))),
        }
    }

    /// Reject malformed descriptors before they are admitted
    pub fn validate(&self) -> Result<()> {
        self.parsed_url()?;
        self.settings.validate()?;

        if let Some(code) = self.accepted_codes.iter().find(|c| !(100..=599).contains(*c)) {
            return Err(Error::argument(format!("Invalid response code {}", code)));
        }

        for (name, value) in &self.headers {
            reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::argument(format!("Invalid header name '{}'", name)))?;
            reqwest::header::HeaderValue::from_str(value)
                .map_err(|_| Error::argument(format!("Invalid value for header '{}'", name)))?;
        }

        if self.settings.read_body_mode == ReadBodyMode::File && self.download.is_none() {
            return Err(Error::argument(
                "Reading the body into a file requires a download target",
            ));
        }

        if let RequestBody::Multipart { fields, files } = &self.body {
            if fields.iter().any(|f| f.name.is_empty()) || files.iter().any(|f| f.field.is_empty())
            {
                return Err(Error::argument("Multipart parts require a field name"));
            }
        }

        Ok(())
    }

    /// Short label used in logs and task names
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}
