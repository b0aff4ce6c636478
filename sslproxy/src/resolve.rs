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
//! Reverse DNS for the preamble's host field

use nix::sys::socket::{SockaddrLike, SockaddrStorage};
use std::ffi::CStr;
use std::net::{IpAddr, SocketAddr};
use tracing::trace;

const MAX_HOST: usize = 1025;

/// Resolve `ip` to a name with `getnameinfo(3)`. `None` when no name is registered.
pub fn lookup(ip: IpAddr) -> Option<String> {
    let addr = SockaddrStorage::from(SocketAddr::new(ip, 0));
    let mut host = [0 as libc::c_char; MAX_HOST];
    // SAFETY: `addr` is a valid sockaddr of `addr.len()` bytes and `host` is writable for
    // its whole length; getnameinfo NUL-terminates on success.
    let rc = unsafe {
        libc::getnameinfo(
            addr.as_ptr(),
            addr.len(),
            host.as_mut_ptr(),
            MAX_HOST as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        )
    };
    if rc != 0 {
        trace!(%ip, rc, "No reverse name");
        return None;
    }
    // SAFETY: see above
    let name = unsafe { CStr::from_ptr(host.as_ptr()) };
    Some(name.to_string_lossy().into_owned()).filter(|name| !name.is_empty())
}

/// The host name for `ip`, falling back to the address itself
pub async fn hostname(ip: IpAddr) -> String {
    tokio::task::spawn_blocking(move || lookup(ip))
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hostname_never_empty() {
        let name = hostname(IpAddr::from([127, 0, 0, 1])).await;
        assert!(!name.is_empty());
        assert!(!name.contains('\0'));
    }
}
