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

//! Charset option [RFC2066](http://www.iana.org/go/rfc2066)

use crate::{SubnegotiationErrorKind, TelnetCodecError, TelnetCodecResult, consts};

/// Characters tried, in order, as the separator of a `REQUEST` list.
const SEPARATORS: &[u8] = b"; +=/!";

/// Client answer to a charset request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CharsetReply {
    /// `ACCEPTED <name>`
    Accepted(String),
    /// `REJECTED`
    Rejected,
    /// `REQUEST` or anything else the server does not act on.
    Other(u8),
}

impl CharsetReply {
    /// Decodes a CHARSET payload.
    pub fn decode(payload: &[u8]) -> TelnetCodecResult<CharsetReply> {
        match payload.split_first() {
            Some((&consts::option::charset::ACCEPTED, name)) => Ok(CharsetReply::Accepted(
                String::from_utf8_lossy(name).trim().to_string(),
            )),
            Some((&consts::option::charset::REJECTED, _)) => Ok(CharsetReply::Rejected),
            Some((&command, _)) => Ok(CharsetReply::Other(command)),
            None => Err(TelnetCodecError::SubnegotiationError {
                option: Some(consts::option::CHARSET),
                reason: SubnegotiationErrorKind::InsufficientData {
                    required: 1,
                    available: 0,
                },
            }),
        }
    }
}

/// What an accepted charset means for the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CharsetChoice {
    /// `UTF-8`: transcode in both directions.
    Utf8,
    /// `US-ASCII` or `ASCII`: strip accents from output.
    Ascii,
    /// Anything else: the server's native encoding is kept.
    Other(String),
}

impl CharsetChoice {
    /// Classifies an accepted charset name, ignoring case.
    pub fn from_name(name: &str) -> CharsetChoice {
        if name.eq_ignore_ascii_case("UTF-8") {
            CharsetChoice::Utf8
        } else if name.eq_ignore_ascii_case("US-ASCII") || name.eq_ignore_ascii_case("ASCII") {
            CharsetChoice::Ascii
        } else {
            CharsetChoice::Other(name.to_string())
        }
    }
}

/// Builds the `REQUEST` payload for `names`, picking a separator that appears in none of them.
pub fn request_payload(names: &[String]) -> Vec<u8> {
    let separator = SEPARATORS
        .iter()
        .copied()
        .find(|sep| names.iter().all(|name| !name.as_bytes().contains(sep)))
        .unwrap_or(b';');
    let mut payload = vec![consts::option::charset::REQUEST];
    for name in names {
        payload.push(separator);
        payload.extend_from_slice(name.as_bytes());
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_payload() {
        let names = vec!["UTF-8".to_string(), "US-ASCII".to_string()];
        assert_eq!(request_payload(&names), b"\x01;UTF-8;US-ASCII".to_vec());
    }

    #[test]
    fn test_request_payload_avoids_separator_in_names() {
        let names = vec!["odd;name".to_string(), "ASCII".to_string()];
        assert_eq!(request_payload(&names), b"\x01 odd;name ASCII".to_vec());
    }

    #[test]
    fn test_choice_from_name() {
        assert_eq!(CharsetChoice::from_name("utf-8"), CharsetChoice::Utf8);
        assert_eq!(CharsetChoice::from_name("ASCII"), CharsetChoice::Ascii);
        assert_eq!(
            CharsetChoice::from_name("ISO-8859-1"),
            CharsetChoice::Other("ISO-8859-1".to_string())
        );
    }

    #[test]
    fn test_decode_accepted() {
        assert_eq!(
            CharsetReply::decode(b"\x02UTF-8").unwrap(),
            CharsetReply::Accepted("UTF-8".to_string())
        );
        assert_eq!(CharsetReply::decode(b"\x03").unwrap(), CharsetReply::Rejected);
    }
}
