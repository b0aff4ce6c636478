//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Minimal HTTP/1.1 request parser and response builder
//!
//! Only enough HTTP to answer a browser that wandered onto the game port, serve simple
//! routes from the interpreter, and carry the WebSocket upgrade. Every response closes the
//! connection.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Longest accepted request path, query included
pub const MAX_PATH_LEN: usize = 256;

/// Longest accepted header block
pub const MAX_HEADER_BYTES: usize = 8192;

/// Most body bytes a request may declare, and most kept when no `Content-Length` bounds it
pub const MAX_BODY_BYTES: usize = 65536;

/// Request methods the parser accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl HttpMethod {
    const ALL: [HttpMethod; 5] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
    ];

    /// The method token
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// The method a request line starts with, if it starts with `"<METHOD> "`
    pub fn from_line(line: &[u8]) -> Option<HttpMethod> {
        Self::ALL.into_iter().find(|method| {
            let token = method.as_str().as_bytes();
            line.len() > token.len() && line.starts_with(token) && line[token.len()] == b' '
        })
    }

    /// True while `head` could still grow into a request line, or already starts like one
    pub fn could_start_line(head: &[u8]) -> bool {
        Self::ALL.into_iter().any(|method| {
            let token = method.as_str().as_bytes();
            if head.len() <= token.len() {
                token.starts_with(head)
            } else {
                head.starts_with(token) && head[token.len()] == b' '
            }
        })
    }

    /// True for methods that carry no body unless a `Content-Length` says otherwise
    pub fn is_bodyless(self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request was answered with `400 Bad Request`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    /// The line does not start with a supported method
    #[error("unsupported method")]
    UnsupportedMethod,
    /// No path or no version
    #[error("malformed request line")]
    Malformed,
    /// The path is `MAX_PATH_LEN` bytes or longer
    #[error("path too long")]
    PathTooLong,
    /// The version is not `HTTP/1.1`
    #[error("unsupported version")]
    Version,
    /// The path is nothing but slashes
    #[error("empty route")]
    EmptyRoute,
    /// The header block exceeds `MAX_HEADER_BYTES`
    #[error("header block too large")]
    HeaderTooLarge,
    /// `Content-Length` exceeds `MAX_BODY_BYTES`
    #[error("body too large")]
    BodyTooLarge,
}

impl HttpError {
    /// The canned response for this error
    pub fn response(&self) -> HttpResponse {
        match self {
            HttpError::HeaderTooLarge => HttpResponse::page("400 Bad Request", "Request header too large."),
            HttpError::BodyTooLarge => HttpResponse::page("413 Payload Too Large", "Request body too large."),
            _ => HttpResponse::page("400 Bad Request", "Invalid request method."),
        }
    }
}

/// Where a request is in its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpPhase {
    /// Reading header lines
    Header,
    /// Reading the body
    Body,
    /// Complete; waiting for or past execution
    Done,
}

/// Response buffers filled by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: String,
    content_type: String,
    headers: Vec<String>,
    body: Vec<u8>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self {
            status: "200 OK".to_string(),
            content_type: "text/plain".to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }
}

impl HttpResponse {
    /// A `200 OK` plain text response with an empty body
    pub fn new() -> Self {
        Self::default()
    }

    /// A small HTML page carrying `message`
    pub fn page(status: &str, message: &str) -> Self {
        let mut response = Self::new();
        response.set_status(status);
        response.set_content_type("text/html; charset=iso-8859-1");
        response.add_header("Pragma", "no-cache");
        response.write(
            format!(
                "<!DOCTYPE html>\r\n<HTML><HEAD><TITLE>{status}</TITLE></HEAD><BODY><p>{message}</p></BODY></HTML>\r\n"
            )
            .as_bytes(),
        );
        response
    }

    /// Set the status, e.g. `"404 Not Found"`
    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    /// The status
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Set the content type
    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = content_type.into();
    }

    /// The content type
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Add a header line
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push(format!("{name}: {value}"));
    }

    /// Append to the body
    pub fn write(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    /// The body so far
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serialize status line, headers and body
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(128 + self.body.len());
        out.put_slice(format!("HTTP/1.1 {}\r\n", self.status).as_bytes());
        out.put_slice(format!("Content-Type: {}\r\n", self.content_type).as_bytes());
        for header in &self.headers {
            out.put_slice(header.as_bytes());
            out.put_slice(b"\r\n");
        }
        out.put_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        out.put_slice(b"Connection: Close\r\n\r\n");
        out.put_slice(&self.body);
        out.freeze()
    }
}

/// An HTTP request being read, plus the response the interpreter builds for it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: HttpMethod,
    path: String,
    query: String,
    route: String,
    headers: Vec<(String, String)>,
    raw_headers: String,
    content_length: Option<usize>,
    content_type: Option<String>,
    body: Vec<u8>,
    phase: HttpPhase,
    line: Vec<u8>,
    header_bytes: usize,
    excess: Vec<u8>,
    response: HttpResponse,
}

impl HttpRequest {
    /// True when `line` starts like a supported request line
    pub fn looks_like_request(line: &[u8]) -> bool {
        HttpMethod::from_line(line).is_some()
    }

    /// Parse `METHOD /path?query HTTP/1.1`
    pub fn parse_request_line(line: &str) -> Result<HttpRequest, HttpError> {
        let method = HttpMethod::from_line(line.as_bytes()).ok_or(HttpError::UnsupportedMethod)?;
        let rest = line[method.as_str().len()..].trim_start();
        let (target, version) = rest.split_once(' ').ok_or(HttpError::Malformed)?;
        if target.len() >= MAX_PATH_LEN {
            return Err(HttpError::PathTooLong);
        }
        if !version.starts_with("HTTP/1.1") {
            return Err(HttpError::Version);
        }
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let route = route_for(path).ok_or(HttpError::EmptyRoute)?;
        Ok(HttpRequest {
            method,
            path: path.to_string(),
            query: query.to_string(),
            route,
            headers: Vec::new(),
            raw_headers: String::new(),
            content_length: None,
            content_type: None,
            body: Vec::new(),
            phase: HttpPhase::Header,
            line: Vec::new(),
            header_bytes: 0,
            excess: Vec::new(),
            response: HttpResponse::new(),
        })
    }

    /// Feed bytes that follow the request line. Bytes arriving after the request is done
    /// are kept aside for [`HttpRequest::take_excess`].
    pub fn feed(&mut self, mut data: &[u8]) -> Result<HttpPhase, HttpError> {
        while !data.is_empty() {
            match self.phase {
                HttpPhase::Header => {
                    let Some(&byte) = data.first() else {
                        break;
                    };
                    data = &data[1..];
                    self.header_bytes += 1;
                    if self.header_bytes > MAX_HEADER_BYTES {
                        return Err(HttpError::HeaderTooLarge);
                    }
                    if byte == b'\n' {
                        let mut line = std::mem::take(&mut self.line);
                        if line.last() == Some(&b'\r') {
                            line.pop();
                        }
                        if line.is_empty() {
                            if self.content_length.is_some_and(|length| length > MAX_BODY_BYTES) {
                                return Err(HttpError::BodyTooLarge);
                            }
                            self.end_headers();
                        } else {
                            self.header(&line);
                        }
                    } else {
                        self.line.push(byte);
                    }
                }
                HttpPhase::Body => {
                    let wanted = match self.content_length {
                        Some(length) => length.saturating_sub(self.body.len()),
                        None => MAX_BODY_BYTES.saturating_sub(self.body.len()),
                    };
                    let take = wanted.min(data.len());
                    self.body.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if self.content_length.is_some_and(|length| self.body.len() >= length) {
                        self.phase = HttpPhase::Done;
                    } else if take == 0 {
                        // unbounded body is full; the fallback timer will finish it
                        break;
                    }
                }
                HttpPhase::Done => {
                    self.excess.extend_from_slice(data);
                    break;
                }
            }
        }
        Ok(self.phase)
    }

    fn header(&mut self, line: &[u8]) {
        let text: String = line.iter().copied().map(char::from).collect();
        self.raw_headers.push_str(&text);
        self.raw_headers.push('\n');
        let Some((name, value)) = text.split_once(':') else {
            return;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("Content-Length") {
            self.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("Content-Type") {
            self.content_type = Some(value.to_string());
        }
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn end_headers(&mut self) {
        self.phase = match self.content_length {
            Some(0) => HttpPhase::Done,
            None if self.method.is_bodyless() => HttpPhase::Done,
            _ => HttpPhase::Body,
        };
    }

    /// Mark the request complete with whatever body arrived
    pub fn finish(&mut self) {
        self.phase = HttpPhase::Done;
    }

    /// The current phase
    pub fn phase(&self) -> HttpPhase {
        self.phase
    }

    /// True once the request is complete
    pub fn is_done(&self) -> bool {
        self.phase == HttpPhase::Done
    }

    /// The method
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// The path without its query
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The query string, empty when absent
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The interpreter route, `HTTP` followed by the upper-cased path segments
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Parsed headers in arrival order
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The header block as received, one header per line
    pub fn raw_headers(&self) -> &str {
        &self.raw_headers
    }

    /// The first header named `name`, ignoring case
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The declared body length
    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// The declared content type
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The body received so far
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The response being built
    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    /// The response being built, for the interpreter to fill
    pub fn response_mut(&mut self) -> &mut HttpResponse {
        &mut self.response
    }

    /// Bytes received after the request completed
    pub fn take_excess(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.excess)
    }
}

/// `/foo/bar/` becomes ``HTTP`FOO`BAR``; a path of only slashes has no route
fn route_for(path: &str) -> Option<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let mut route = String::from("HTTP`");
    route.extend(trimmed.chars().map(|c| if c == '/' { '`' } else { c.to_ascii_uppercase() }));
    Some(route)
}
