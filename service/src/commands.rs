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
//! Commands the network layer answers before the interpreter sees a line.

use crate::interpreter::{CommandResult, ServerStatus};
use crate::session::{Session, unix_time};
use crate::types::ConnFlags;
use netmush_telnetcodec::mssp::MudServerStatus;
use std::collections::BTreeMap;
use tracing::info;

/// Echoed back without counting as activity
pub const IDLE_COMMAND: &str = "IDLE";
/// Close the connection
pub const QUIT_COMMAND: &str = "QUIT";
/// Return to the connect screen
pub const LOGOUT_COMMAND: &str = "LOGOUT";
/// Server facts in a fixed format
pub const INFO_COMMAND: &str = "INFO";
/// MSSP variables as text
pub const MSSP_REQUEST_COMMAND: &str = "MSSP-REQUEST";
/// Set the output prefix
pub const PREFIX_COMMAND: &str = "OUTPUTPREFIX";
/// Set the output suffix
pub const SUFFIX_COMMAND: &str = "OUTPUTSUFFIX";
/// Pueblo clients announce themselves with this
pub const PUEBLO_COMMAND: &str = "PUEBLOCLIENT ";

/// Format version of the INFO block
pub const INFO_VERSION: &str = "1.1";

/// Advertises Pueblo support in the welcome
pub const PUEBLO_HELLO: &str = "This world is Pueblo 1.10 Enhanced.\r\n";
/// Switches a Pueblo client to HTML and clears its screen
pub const PUEBLO_SEND: &str = "</xch_mudtext><img xch_mode=purehtml><xch_page clear=text>\n";
/// Switches a Pueblo client to HTML without clearing
pub const PUEBLO_SEND_SHORT: &str = "</xch_mudtext><img xch_mode=purehtml>\n";

const PUEBLO_CHECKSUM_LEN: usize = 40;

/// What became of a line offered to the built-ins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    /// Handled here
    Done(CommandResult),
    /// Handled, and the connect screen should be shown again
    Welcome,
    /// Not a built-in; the caller hands it to the interpreter
    Forward,
}

/// Bump activity counters and run `command` if it is a built-in
pub(crate) fn dispatch(
    session: &mut Session,
    command: &str,
    status: &ServerStatus,
    mssp: &BTreeMap<String, String>,
    info_lines: impl FnOnce() -> Vec<String>,
) -> Builtin {
    if let Some(rest) = command.strip_prefix(IDLE_COMMAND) {
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        if !rest.is_empty() {
            session.send_line(rest);
        }
        return Builtin::Done(CommandResult::Ok);
    }
    session.touch();

    if status.pueblo && command.starts_with(PUEBLO_COMMAND) {
        return pueblo_client(session, command);
    }

    match command {
        QUIT_COMMAND => return Builtin::Done(CommandResult::Quit),
        LOGOUT_COMMAND => return Builtin::Done(CommandResult::Logout),
        INFO_COMMAND => {
            wrapped(session, |session| {
                for line in info_block(status, info_lines()) {
                    session.send_line(&line);
                }
            });
            return Builtin::Done(CommandResult::Ok);
        }
        MSSP_REQUEST_COMMAND => {
            wrapped(session, |session| {
                session.send_line("\r\nMSSP-REPLY-START");
                for (name, value) in mssp_variables(status, mssp) {
                    session.send_line(&format!("{name}\t{value}"));
                }
                session.send_line("MSSP-REPLY-END");
            });
            return Builtin::Done(CommandResult::Ok);
        }
        _ => {}
    }

    if let Some(rest) = command.strip_prefix(PREFIX_COMMAND) {
        session.set_prefix(rest.trim_start());
    } else if let Some(rest) = command.strip_prefix(SUFFIX_COMMAND) {
        session.set_suffix(rest.trim_start());
    } else if let Some(rest) = command.strip_prefix("SCREENWIDTH") {
        if let Ok(width @ 1..) = rest.trim().parse::<u16>() {
            session.set_width(width);
        }
    } else if let Some(rest) = command.strip_prefix("SCREENHEIGHT") {
        if let Ok(height @ 1..) = rest.trim().parse::<u16>() {
            session.set_height(height);
        }
    } else if let Some(rest) = command.strip_prefix("PROMPT_NEWLINES") {
        let enabled = rest.trim().parse::<i64>().is_ok_and(|value| value != 0);
        session.set_flag(ConnFlags::PROMPT_NEWLINES, enabled);
    } else {
        return Builtin::Forward;
    }
    Builtin::Done(CommandResult::Ok)
}

/// Run `f` between the session's prefix and suffix lines
pub(crate) fn wrapped(session: &mut Session, f: impl FnOnce(&mut Session)) {
    if let Some(prefix) = session.prefix().map(str::to_string) {
        session.send_line(&prefix);
    }
    f(session);
    if let Some(suffix) = session.suffix().map(str::to_string) {
        session.send_line(&suffix);
    }
}

fn pueblo_client(session: &mut Session, command: &str) -> Builtin {
    if let Some(checksum) = pueblo_checksum(command) {
        session.set_checksum(checksum.to_string());
    }
    if session.flags().contains(ConnFlags::HTML) {
        session.send(PUEBLO_SEND_SHORT);
        return Builtin::Done(CommandResult::Ok);
    }
    session.send(PUEBLO_SEND);
    info!(session = %session.id(), "{} Switching to Pueblo mode.", session.tag());
    session.set_flag(ConnFlags::HTML, true);
    if session.is_connected() {
        Builtin::Done(CommandResult::Ok)
    } else {
        Builtin::Welcome
    }
}

/// The `md5="..."` value of a `PUEBLOCLIENT` line
fn pueblo_checksum(command: &str) -> Option<&str> {
    let start = command.find("md5=\"")? + 5;
    let rest = &command[start..];
    let end = rest.find('"')?;
    Some(&rest[..end]).filter(|checksum| !checksum.is_empty() && checksum.len() <= PUEBLO_CHECKSUM_LEN)
}

/// `1d 02:03:04`
pub(crate) fn format_uptime(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3600;
    let minutes = seconds % 3600 / 60;
    let secs = seconds % 60;
    if days > 0 {
        format!("{days}d {hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    }
}

/// The lines of the INFO reply
pub(crate) fn info_block(status: &ServerStatus, extra: Vec<String>) -> Vec<String> {
    let mut lines = vec![
        format!("### Begin INFO {INFO_VERSION}"),
        format!("Name: {}", status.name),
        format!("Address: {}", status.url),
        format!("Uptime: {}", format_uptime(unix_time() - status.first_start)),
        format!("Connected: {}", status.players),
        format!("Sessions: {}", status.sessions),
        format!("Version: netmush {}", status.version),
    ];
    lines.extend(extra);
    lines.push("### End INFO".to_string());
    lines
}

/// MSSP variables in reporting order
pub(crate) fn mssp_variables(status: &ServerStatus, extra: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut vars = vec![
        ("NAME".to_string(), status.name.clone()),
        ("PLAYERS".to_string(), status.players.to_string()),
        ("UPTIME".to_string(), status.first_start.to_string()),
    ];
    if let Some(port) = status.port {
        vars.push(("PORT".to_string(), port.to_string()));
    }
    if let Some(port) = status.tls_port {
        vars.push(("SSL".to_string(), port.to_string()));
    }
    vars.push(("PUEBLO".to_string(), u8::from(status.pueblo).to_string()));
    vars.push(("CODEBASE".to_string(), format!("netmush {}", status.version)));
    vars.push(("FAMILY".to_string(), "TinyMUD".to_string()));
    if !status.url.is_empty() {
        vars.push(("WEBSITE".to_string(), status.url.clone()));
    }
    vars.extend(extra.iter().map(|(name, value)| (name.clone(), value.clone())));
    vars
}

/// The same variables for the telnet MSSP option
pub(crate) fn mud_server_status(status: &ServerStatus, extra: &BTreeMap<String, String>) -> MudServerStatus {
    let mut mssp = MudServerStatus::new();
    for (name, value) in mssp_variables(status, extra) {
        mssp.add(name, value);
    }
    mssp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{drain, pair};
    use crate::types::PlayerRef;

    fn status() -> ServerStatus {
        ServerStatus {
            name: "Testville".to_string(),
            url: "https://example.com".to_string(),
            version: "0.1.0",
            first_start: unix_time() - 90_061,
            reboot_count: 0,
            sessions: 3,
            players: 2,
            port: Some(4201),
            tls_port: None,
            pueblo: true,
        }
    }

    fn run(session: &mut Session, command: &str) -> Builtin {
        dispatch(session, command, &status(), &BTreeMap::new(), Vec::new)
    }

    fn sent(session: &mut Session) -> String {
        String::from_utf8(drain(session)).unwrap()
    }

    #[test]
    fn test_idle_echo_without_activity() {
        let (mut session, _peer) = pair();
        assert_eq!(run(&mut session, "IDLE still here"), Builtin::Done(CommandResult::Ok));
        assert_eq!(session.cmds(), 0);
        assert_eq!(sent(&mut session), "still here\r\n");
        run(&mut session, "IDLE");
        assert!(sent(&mut session).is_empty());
    }

    #[test]
    fn test_results() {
        let (mut session, _peer) = pair();
        assert_eq!(run(&mut session, "QUIT"), Builtin::Done(CommandResult::Quit));
        assert_eq!(run(&mut session, "LOGOUT"), Builtin::Done(CommandResult::Logout));
        assert_eq!(run(&mut session, "quit"), Builtin::Forward);
        assert_eq!(run(&mut session, "say hi"), Builtin::Forward);
        assert_eq!(session.cmds(), 4);
    }

    #[test]
    fn test_prefix_and_suffix() {
        let (mut session, _peer) = pair();
        run(&mut session, "OUTPUTPREFIX   <<begin>>");
        run(&mut session, "OUTPUTSUFFIX <<end>>");
        assert_eq!(session.prefix(), Some("<<begin>>"));
        run(&mut session, "INFO");
        let out = sent(&mut session);
        assert!(out.starts_with("<<begin>>\r\n### Begin INFO 1.1\r\nName: Testville\r\n"));
        assert!(out.contains("Uptime: 1d 01:01:0"));
        assert!(out.ends_with("### End INFO\r\n<<end>>\r\n"));
        run(&mut session, "OUTPUTPREFIX");
        assert_eq!(session.prefix(), None);
    }

    #[test]
    fn test_screen_and_prompt_settings() {
        let (mut session, _peer) = pair();
        run(&mut session, "SCREENWIDTH 132");
        run(&mut session, "SCREENHEIGHT 50");
        run(&mut session, "SCREENHEIGHT lots");
        run(&mut session, "SCREENWIDTH 0");
        assert_eq!((session.width(), session.height()), (132, 50));
        run(&mut session, "PROMPT_NEWLINES 0");
        assert!(!session.flags().contains(ConnFlags::PROMPT_NEWLINES));
        run(&mut session, "PROMPT_NEWLINES 1");
        assert!(session.flags().contains(ConnFlags::PROMPT_NEWLINES));
    }

    #[test]
    fn test_mssp_request() {
        let (mut session, _peer) = pair();
        let mut extra = BTreeMap::new();
        extra.insert("GENRE".to_string(), "Fantasy".to_string());
        dispatch(&mut session, "MSSP-REQUEST", &status(), &extra, Vec::new);
        let out = sent(&mut session);
        assert!(out.starts_with("\r\nMSSP-REPLY-START\r\nNAME\tTestville\r\nPLAYERS\t2\r\n"));
        assert!(out.contains("PORT\t4201\r\n"));
        assert!(!out.contains("SSL\t"));
        assert!(out.contains("WEBSITE\thttps://example.com\r\nGENRE\tFantasy\r\n"));
        assert!(out.ends_with("MSSP-REPLY-END\r\n"));
    }

    #[test]
    fn test_pueblo_client() {
        let (mut session, _peer) = pair();
        let result = run(&mut session, "PUEBLOCLIENT 2.50 md5=\"0123456789abcdef\"");
        assert_eq!(result, Builtin::Welcome);
        assert_eq!(session.checksum(), "0123456789abcdef");
        assert!(session.flags().contains(ConnFlags::HTML));
        assert_eq!(sent(&mut session), PUEBLO_SEND);

        session.set_player(Some(PlayerRef::new(3)));
        assert_eq!(
            run(&mut session, "PUEBLOCLIENT 2.50"),
            Builtin::Done(CommandResult::Ok)
        );
        assert_eq!(sent(&mut session), PUEBLO_SEND_SHORT);
    }

    #[test]
    fn test_uptime_format() {
        assert_eq!(format_uptime(59), "00:00:59");
        assert_eq!(format_uptime(3_723), "01:02:03");
        assert_eq!(format_uptime(172_800), "2d 00:00:00");
        assert_eq!(format_uptime(-5), "00:00:00");
    }
}
