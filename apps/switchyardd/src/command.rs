//! Line-oriented control commands read from stdin.

use std::str::FromStr;
use switchyard_mode::Mode;

const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Switch(Mode),
    Toggle,
    Status,
    Health,
    Validate,
    History(usize),
    /// Simulate the virtual driver appearing or vanishing.
    Driver(bool),
    /// Simulate the physical device being plugged or unplugged.
    Device(bool),
    Help,
    Quit,
}

pub const HELP: &str = "commands: switch <mode> | toggle | status | health | validate | \
history [n] | driver on|off | device on|off | help | quit";

fn parse_switch(arg: Option<&str>) -> Result<bool, String> {
    match arg {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        other => Err(format!("expected on|off, got {:?}", other.unwrap_or(""))),
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".to_string());
        };
        let rest: Vec<&str> = words.collect();

        match verb.to_ascii_lowercase().as_str() {
            "switch" => {
                if rest.is_empty() {
                    return Err("switch needs a mode".to_string());
                }
                let name = rest.join(" ");
                name.parse::<Mode>()
                    .ok()
                    .or_else(|| Mode::from_legacy(&name))
                    .map(Command::Switch)
                    .ok_or_else(|| format!("unknown mode: {name}"))
            }
            "toggle" => Ok(Command::Toggle),
            "status" => Ok(Command::Status),
            "health" => Ok(Command::Health),
            "validate" => Ok(Command::Validate),
            "history" => match rest.first() {
                None => Ok(Command::History(DEFAULT_HISTORY_LIMIT)),
                Some(n) => n
                    .parse()
                    .map(Command::History)
                    .map_err(|_| format!("invalid history limit: {n}")),
            },
            "driver" => parse_switch(rest.first().copied()).map(Command::Driver),
            "device" => parse_switch(rest.first().copied()).map(Command::Device),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command: {other}")),
        }
    }
}
