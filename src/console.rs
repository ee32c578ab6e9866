//! Operator console: administrative commands read from stdin

use chrono::Utc;
use log::{error, info};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::blacklist::spawn_refresh;
use crate::core::server::SharedServerManager;
use crate::error::{Result, RustyRelayError};

/// Name, parameters and description of every command
const COMMANDS: &[(&str, &str, &str)] = &[
    ("help", "", "Display the command list."),
    ("list", "", "Displays all current rooms."),
    ("limit", "[amount]", "Sets spam packet limit."),
    ("ban", "<IP>", "Adds the IP to blacklist."),
    ("unban", "<IP>", "Removes the IP from blacklist."),
    ("refresh", "", "Unbans all IPs and refresh GitHub Actions IPs."),
    ("exit", "", "Stop hosting the relay and exit the application."),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Limit(Option<i64>),
    Ban(String),
    Unban(String),
    Refresh,
    Exit,
}

impl Command {
    /// Parse one console line. `Ok(None)` for blank input.
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let Some((_, params, _)) = COMMANDS.iter().find(|(n, _, _)| *n == name) else {
            return Err(RustyRelayError::CommandError(format!(
                "Command not found. Did you mean {}?",
                closest_command(name)
            )));
        };

        let required = params.matches('<').count();
        let optional = params.matches('[').count();
        if args.len() < required {
            return Err(RustyRelayError::CommandError(
                "Too few command arguments.".to_string(),
            ));
        }
        if args.len() > required + optional {
            return Err(RustyRelayError::CommandError(
                "Too many command arguments.".to_string(),
            ));
        }

        let command = match name {
            "help" => Command::Help,
            "list" => Command::List,
            "limit" => match args.first() {
                None => Command::Limit(None),
                Some(amount) => match amount.parse::<i64>() {
                    Ok(limit) if limit > 0 => Command::Limit(Some(limit)),
                    _ => {
                        return Err(RustyRelayError::CommandError(format!(
                            "Invalid limit: {}",
                            amount
                        )))
                    }
                },
            },
            "ban" => Command::Ban(args[0].to_string()),
            "unban" => Command::Unban(args[0].to_string()),
            "refresh" => Command::Refresh,
            _ => Command::Exit,
        };

        Ok(Some(command))
    }
}

fn closest_command(input: &str) -> &'static str {
    COMMANDS
        .iter()
        .map(|(name, _, _)| *name)
        .min_by_key(|name| levenshtein(name, input))
        .unwrap_or("help")
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut row = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            row[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1);
        }
        prev = row;
    }

    prev[b.len()]
}

/// Executes administrative commands against a running server
pub struct Console {
    manager: SharedServerManager,
}

impl Console {
    pub fn new(manager: SharedServerManager) -> Self {
        Self { manager }
    }

    /// Run a command and return its output
    pub async fn execute(&self, command: Command) -> Result<String> {
        let mut out = String::new();

        match command {
            Command::Help => {
                out.push_str("Commands:");
                for (name, params, description) in COMMANDS {
                    if params.is_empty() {
                        let _ = write!(out, "\n  {} - {}", name, description);
                    } else {
                        let _ = write!(out, "\n  {} {} - {}", name, params, description);
                    }
                }
            }
            Command::List => {
                out.push_str("Rooms:");
                let now = Utc::now();
                for room in self.manager.list_rooms().await {
                    let age = (now - room.created_at).num_minutes();
                    let _ = write!(out, "\n  Room {} (open {} min)", room.link, age);
                    for redirector in &room.redirectors {
                        let _ = write!(
                            out,
                            "\n    [H] Connection {} - {}",
                            redirector.host.id,
                            redirector.host.addr.ip()
                        );
                        if let Some(client) = &redirector.client {
                            let _ = write!(
                                out,
                                "\n    [C] Connection {} - {}",
                                client.id,
                                client.addr.ip()
                            );
                        }
                    }
                }
            }
            Command::Limit(None) => {
                let _ = write!(
                    out,
                    "Current limit - {} packets per {} ms.",
                    self.manager.spam_limit(),
                    self.manager.spam_window().as_millis()
                );
            }
            Command::Limit(Some(limit)) => {
                self.manager.set_spam_limit(limit);
                let _ = write!(
                    out,
                    "Packet spam limit set to {} packets per {} ms.",
                    limit,
                    self.manager.spam_window().as_millis()
                );
            }
            Command::Ban(ip) => {
                self.manager.blacklist().add(&ip).await?;
                let _ = write!(out, "IP {} has been blacklisted.", ip);
            }
            Command::Unban(ip) => {
                if self.manager.blacklist().remove(&ip).await {
                    let _ = write!(out, "IP {} has been removed from blacklist.", ip);
                } else {
                    let _ = write!(out, "IP {} is not blacklisted.", ip);
                }
            }
            Command::Refresh => {
                let blacklist = Arc::clone(self.manager.blacklist());
                blacklist.clear().await;
                spawn_refresh(blacklist);
                out.push_str("Blacklist cleared, refreshing GitHub Actions IPs.");
            }
            Command::Exit => {
                self.manager.shutdown().await;
                out.push_str("Shutting down the application.");
            }
        }

        Ok(out)
    }

    /// Parse and run one line, logging the outcome
    pub async fn handle_line(&self, line: &str) {
        match Command::parse(line) {
            Ok(Some(command)) => match self.execute(command).await {
                Ok(output) => {
                    for line in output.lines() {
                        info!("{}", line);
                    }
                }
                Err(e) => error!("{}", e),
            },
            Ok(None) => {}
            Err(e) => error!("{}", e),
        }
    }

    /// Read commands from stdin until it closes or the server shuts down
    pub fn spawn_stdin(self) {
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => self.handle_line(&line).await,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read console input: {}", e);
                        break;
                    }
                }
                if self.manager.is_shutting_down() {
                    break;
                }
            }
        });
    }
}
