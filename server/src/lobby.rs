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
//! A small stand-in interpreter: a chat lobby.
//!
//! Players `connect <name>`, talk with `say` and `pose`, list each other with `WHO`, and
//! wizards-by-courtesy can `@boot`, `@shutdown` or `@reboot`. Names live in memory only, so
//! after a reboot reattached players show as `#<id>` until they reconnect.

use metrics::counter;
use netmush_service::{
    CommandResult, Context, DisconnectNotice, Interpreter, PlayerRef, ServerHandle, Session, SessionTable,
    ShutdownReason,
};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

const HUH: &str = "Huh?  (Type \"help\" for help.)";

/// The lobby interpreter
#[derive(Debug, Default)]
pub struct Lobby {
    names: HashMap<PlayerRef, String>,
    next_player: i64,
    blocked: HashSet<String>,
    handle: Option<ServerHandle>,
}

impl Lobby {
    /// An empty lobby
    pub fn new() -> Self {
        Self { next_player: 1, ..Self::default() }
    }

    /// Refuse `connect` from this address
    pub fn with_blocked_site(mut self, ip: impl Into<String>) -> Self {
        self.blocked.insert(ip.into());
        self
    }

    /// Let `@shutdown` and `@reboot` reach the running server
    pub fn attach(&mut self, handle: ServerHandle) {
        self.handle = Some(handle);
    }

    /// Known player names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.values().map(String::as_str)
    }

    fn name_of(&self, player: PlayerRef) -> String {
        self.names
            .get(&player)
            .cloned()
            .unwrap_or_else(|| format!("#{}", player.as_i64()))
    }

    fn find(&self, name: &str) -> Option<PlayerRef> {
        self.names
            .iter()
            .find(|(_, known)| known.eq_ignore_ascii_case(name))
            .map(|(player, _)| *player)
    }

    fn connect(&mut self, cx: &mut Context<'_>, name: &str) -> CommandResult {
        if self.blocked.contains(cx.session.ip()) {
            cx.session.send_line("Connections from your site are not allowed.");
            return CommandResult::RejectSite;
        }
        if name.is_empty() || name.contains(char::is_whitespace) {
            cx.session.send_line("Usage: connect <name>");
            return CommandResult::Ok;
        }
        let player = match self.find(name) {
            Some(player) => player,
            None => {
                let player = PlayerRef::new(self.next_player);
                self.next_player += 1;
                self.names.insert(player, name.to_string());
                player
            }
        };
        cx.session.set_player(Some(player));
        counter!("netmush.lobby.connects").increment(1);
        info!(session = %cx.session.id(), player = player.as_i64(), name, "Player connected");
        let name = self.name_of(player);
        cx.session.send_line(&format!("Connected as {name}."));
        broadcast(cx.others, &format!("{name} has connected."));
        CommandResult::Ok
    }

    fn who(&self, cx: &mut Context<'_>) {
        let mut names: Vec<String> = std::iter::once(&*cx.session)
            .chain(cx.others.iter())
            .filter(|session| !session.is_hidden())
            .filter_map(Session::player)
            .map(|player| self.name_of(player))
            .collect();
        names.sort();
        names.dedup();
        cx.session.send_line("Players online:");
        for name in &names {
            cx.session.send_line(&format!("  {name}"));
        }
        cx.session.send_line(&format!("{} players connected.", names.len()));
    }

    fn boot(&self, cx: &mut Context<'_>, target: &str) -> CommandResult {
        let Some(player) = self.find(target) else {
            cx.session.send_line("No such player.");
            return CommandResult::Ok;
        };
        if cx.session.player() == Some(player) {
            cx.session.send_line("You boot yourself.");
            return CommandResult::ForceDisconnect;
        }
        let mut booted = 0;
        for session in cx.others.for_player(player) {
            session.send_line("You have been booted.");
            session.mark_for_shutdown(ShutdownReason::Booted);
            booted += 1;
        }
        cx.session.send_line(&format!("You booted {} ({booted} sessions).", self.name_of(player)));
        CommandResult::Ok
    }

    fn signal(&self, cx: &mut Context<'_>, reboot: bool) {
        let Some(handle) = &self.handle else {
            cx.session.send_line("The server cannot be reached from here.");
            return;
        };
        let sent = if reboot { handle.reboot() } else { handle.shutdown() };
        match sent {
            Ok(()) => cx.session.send_line(if reboot { "Reboot requested." } else { "Shutdown requested." }),
            Err(err) => {
                warn!(%err, "Unable to signal the server");
                cx.session.send_line("The request could not be delivered.");
            }
        }
    }
}

fn broadcast(others: &mut SessionTable, text: &str) {
    for session in others.iter_mut().filter(|session| session.is_connected()) {
        session.send_line(text);
    }
}

fn split_command(command: &str) -> (String, &str) {
    if let Some(rest) = command.strip_prefix('"') {
        return ("SAY".to_string(), rest);
    }
    if let Some(rest) = command.strip_prefix(':') {
        return ("POSE".to_string(), rest);
    }
    match command.split_once(' ') {
        Some((verb, rest)) => (verb.to_ascii_uppercase(), rest.trim()),
        None => (command.to_ascii_uppercase(), ""),
    }
}

impl Interpreter for Lobby {
    fn welcome(&mut self, cx: &mut Context<'_>) {
        let name = if cx.status.name.is_empty() { "netmush" } else { cx.status.name.as_str() };
        cx.session.send_line(&format!("Welcome to {name}."));
        cx.session.send_line("Type 'connect <name>' to enter, 'WHO' to see who is here, 'QUIT' to leave.");
    }

    fn execute(&mut self, cx: &mut Context<'_>, command: &str) -> CommandResult {
        let (verb, rest) = split_command(command.trim());
        let Some(player) = cx.session.player() else {
            return match verb.as_str() {
                "CONNECT" => self.connect(cx, rest),
                "WHO" => {
                    self.who(cx);
                    CommandResult::Ok
                }
                "" => CommandResult::Ok,
                _ => {
                    cx.session.send_line("Please connect first: connect <name>");
                    CommandResult::Ok
                }
            };
        };
        let name = self.name_of(player);
        match verb.as_str() {
            "SAY" => {
                cx.session.send_line(&format!("You say, \"{rest}\""));
                broadcast(cx.others, &format!("{name} says, \"{rest}\""));
            }
            "POSE" => {
                let line = format!("{name} {rest}");
                cx.session.send_line(&line);
                broadcast(cx.others, &line);
            }
            "WHO" => self.who(cx),
            "HELP" => {
                cx.session.send_line("say <text>, pose <text>, WHO, @boot <name>, @shutdown, @reboot,");
                cx.session.send_line("LOGOUT, QUIT, INFO, OUTPUTPREFIX, OUTPUTSUFFIX.");
            }
            "@BOOT" => return self.boot(cx, rest),
            "@SHUTDOWN" => self.signal(cx, false),
            "@REBOOT" => self.signal(cx, true),
            "" => {}
            _ => cx.session.send_line(HUH),
        }
        CommandResult::Ok
    }

    fn logout(&mut self, cx: &mut Context<'_>) {
        if let Some(player) = cx.session.player() {
            let name = self.name_of(player);
            cx.session.send_line(&format!("Goodbye, {name}."));
            broadcast(cx.others, &format!("{name} has disconnected."));
        }
    }

    fn disconnected(&mut self, notice: &DisconnectNotice) {
        if let Some(player) = notice.player {
            info!(
                session = %notice.session,
                name = %self.name_of(player),
                reason = %notice.reason,
                cmds = notice.cmds,
                "Player left"
            );
        }
    }

    fn reattached(&mut self, cx: &mut Context<'_>) {
        cx.session.send_line("The lobby has been rebooted.");
    }

    fn serves_http(&self) -> bool {
        true
    }

    fn http_request(&mut self, cx: &mut Context<'_>) -> bool {
        let Some(route) = cx.session.http_request().map(|request| request.route().to_string()) else {
            return false;
        };
        if route != "HTTP`WHO" {
            return false;
        }
        let mut body = String::new();
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        for name in names {
            body.push_str(name);
            body.push('\n');
        }
        let Some(response) = cx.session.http_response_mut() else {
            return false;
        };
        response.set_content_type("text/plain; charset=utf-8");
        response.write(body.as_bytes());
        true
    }

    fn info(&self) -> Vec<String> {
        vec![format!("Lobby-Names: {}", self.names.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("\"hello there"), ("SAY".to_string(), "hello there"));
        assert_eq!(split_command(":waves"), ("POSE".to_string(), "waves"));
        assert_eq!(split_command("connect  Alice "), ("CONNECT".to_string(), "Alice"));
        assert_eq!(split_command("who"), ("WHO".to_string(), ""));
    }

    #[test]
    fn test_find_is_case_insensitive() {
        let mut lobby = Lobby::new();
        lobby.names.insert(PlayerRef::new(4), "Alice".into());
        assert_eq!(lobby.find("alice"), Some(PlayerRef::new(4)));
        assert_eq!(lobby.find("bob"), None);
        assert_eq!(lobby.name_of(PlayerRef::new(9)), "#9");
    }
}
