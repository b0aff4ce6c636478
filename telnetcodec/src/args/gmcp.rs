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

use bytes::BytesMut;
use std::fmt;

///
/// GMCP (Generic Mud Communication Protocol) Message
///
/// Each message is a package name optionally followed by a single space and a JSON
/// document. The JSON is carried as text and never interpreted here.
///
/// ```text
/// Core.Hello {"client": "Mudlet", "version": "4.17"}
/// Core.Ping
/// ```
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GmcpMessage {
    package: String,
    data: Option<String>,
}

impl GmcpMessage {
    /// Creates a message with a package name and optional JSON text.
    ///
    /// ```
    /// use netmush_telnetcodec::gmcp::GmcpMessage;
    ///
    /// let msg = GmcpMessage::new("Core.Hello", Some(r#"{"client":"MyClient"}"#));
    /// assert_eq!(msg.package(), "Core.Hello");
    /// ```
    pub fn new<S: Into<String>, D: Into<String>>(package: S, data: Option<D>) -> Self {
        Self {
            package: package.into(),
            data: data.map(Into::into),
        }
    }

    /// Parses a subnegotiation payload. Returns `None` for non UTF-8 input or an empty
    /// package name.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?;
        let (package, data) = match text.split_once(' ') {
            Some((package, data)) => (package, Some(data.to_string())),
            None => (text, None),
        };
        if package.is_empty() {
            return None;
        }
        Some(Self {
            package: package.to_string(),
            data,
        })
    }

    /// The package name.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// The JSON text, if any.
    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// Encodes the message as a subnegotiation payload.
    pub fn encode(&self) -> BytesMut {
        let mut bytes = BytesMut::with_capacity(self.len());
        bytes.extend_from_slice(self.package.as_bytes());
        if let Some(ref data) = self.data {
            bytes.extend_from_slice(b" ");
            bytes.extend_from_slice(data.as_bytes());
        }
        bytes
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.package.len() + self.data.as_ref().map_or(0, |data| 1 + data.len())
    }

    /// True when the package name is empty.
    pub fn is_empty(&self) -> bool {
        self.package.is_empty()
    }
}

impl fmt::Display for GmcpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.package)?;
        if let Some(ref data) = self.data {
            write!(f, " {data}")?;
        }
        Ok(())
    }
}
