use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::time::Duration;

const MAX_HEAD_BYTES: usize = 8192;
/// Read timeout applied while a request is being received.
pub(crate) const READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Largest accepted upload.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Request body exceeded `MAX_BODY_BYTES`.
#[derive(Debug)]
pub struct PayloadTooLarge {
    pub declared: usize,
}

impl fmt::Display for PayloadTooLarge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "request body of {} bytes exceeds limit of {} bytes",
            self.declared, MAX_BODY_BYTES
        )
    }
}

impl std::error::Error for PayloadTooLarge {}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Media type without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type")
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_lowercase())
    }

    /// The image carried by the request: the `image` field of a multipart form, or
    /// the raw body for any other content type.
    pub fn image_payload(&self) -> Result<&[u8]> {
        if self.content_type().as_deref() == Some("multipart/form-data") {
            let boundary = self
                .header("content-type")
                .and_then(multipart_boundary)
                .ok_or_else(|| anyhow!("multipart request without boundary"))?;
            return multipart_field(&self.body, &boundary, "image")
                .ok_or_else(|| anyhow!("multipart request has no 'image' field"));
        }
        if self.body.is_empty() {
            return Err(anyhow!("request body is empty"));
        }
        Ok(&self.body)
    }
}

pub fn read_request<R: Read>(stream: &mut R) -> Result<HttpRequest> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let head_end = loop {
        if let Some(pos) = find(&data, b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEAD_BYTES {
            return Err(anyhow!("request head too large"));
        }
        let n = stream.read(&mut buf).context("read request")?;
        if n == 0 {
            return Err(anyhow!("connection closed before request head completed"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..head_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| anyhow!("missing method"))?
        .to_string();
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();

    let declared = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if declared > MAX_BODY_BYTES {
        return Err(PayloadTooLarge { declared }.into());
    }

    let mut body = data.split_off(head_end + 4);
    body.truncate(declared);
    if body.len() < declared {
        let start = body.len();
        body.resize(declared, 0);
        stream
            .read_exact(&mut body[start..])
            .context("read request body")?;
    }

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn multipart_boundary(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn multipart_field<'a>(body: &'a [u8], boundary: &str, name: &str) -> Option<&'a [u8]> {
    let first = format!("--{boundary}");
    // Every delimiter after the first starts on its own line.
    let delimiter = format!("\r\n--{boundary}");
    let delimiter = delimiter.as_bytes();
    let wanted = format!("name=\"{name}\"");

    let mut rest = &body[find(body, first.as_bytes())? + first.len()..];
    loop {
        // "--" after a delimiter closes the body.
        if rest.starts_with(b"--") {
            return None;
        }
        let rest_after_crlf = rest.strip_prefix(b"\r\n").unwrap_or(rest);
        let headers_end = find(rest_after_crlf, b"\r\n\r\n")?;
        let part_headers = String::from_utf8_lossy(&rest_after_crlf[..headers_end]);
        let content = &rest_after_crlf[headers_end + 4..];
        let next = find(content, delimiter)?;
        let data = &content[..next];

        let is_wanted = part_headers.lines().any(|line| {
            line.to_lowercase().starts_with("content-disposition") && line.contains(&wanted)
        });
        if is_wanted {
            return Some(data);
        }
        rest = &content[next + delimiter.len()..];
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
