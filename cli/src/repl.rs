//! Interactive command loop.
//!
//! A `DefaultEditor`, one `readline` call per iteration, plain whitespace
//! splitting rather than a full shell grammar since the command set is
//! small and fixed.

use std::str::FromStr;

use pnet::util::MacAddr;
use qbolapp_engine::{Engine, PeerState};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

const HELP: &str = "\
commands:
  peers                         list known peers
  msg <MAC> <text>              send a reliable direct message
  send <MAC> <text>             alias for msg
  bc <text>                     send an unreliable broadcast message
  file <path> <MAC> [reliable]  send a file (reliable defaults to true)
  hello                         send an immediate HELLO broadcast
  help                          show this message
  exit                          shut down and quit";

/// Runs the command loop until `exit`, Ctrl-D, or a readline error.
/// Returns once the engine has been told to shut down.
pub fn run(engine: Engine) {
    let mut editor = DefaultEditor::new().expect("failed to initialize line editor");

    loop {
        match editor.readline("qbolapp> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                if dispatch(&engine, line) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("exit");
                engine.shutdown();
                break;
            }
            Err(err) => {
                log::error!("readline error: {err}");
                engine.shutdown();
                break;
            }
        }
    }
}

/// Dispatches one command line. Returns `true` when the loop should stop.
fn dispatch(engine: &Engine, line: &str) -> bool {
    let mut parts = line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match command {
        "peers" => {
            print_peers(engine);
        }
        "msg" | "send" => match split_mac_and_text(rest) {
            Some((mac, text)) => {
                let seq = engine.send_message(mac, text.as_bytes().to_vec(), true);
                println!("sent (seq {seq})");
            }
            None => println!("usage: {command} <MAC> <text>"),
        },
        "bc" => {
            if rest.is_empty() {
                println!("usage: bc <text>");
            } else {
                engine.send_broadcast(rest.as_bytes().to_vec());
            }
        }
        "file" => dispatch_file(engine, rest),
        "hello" => engine.announce_hello(),
        "help" => println!("{HELP}"),
        "exit" => {
            engine.shutdown();
            return true;
        }
        other => println!("unknown command: {other} (try `help`)"),
    }
    false
}

fn dispatch_file(engine: &Engine, rest: &str) {
    let mut fields = rest.split_whitespace();
    let (Some(path), Some(mac_str)) = (fields.next(), fields.next()) else {
        println!("usage: file <path> <MAC> [reliable]");
        return;
    };
    let reliable = fields.next().map(|flag| parse_bool(flag)).unwrap_or(true);

    let Some(dest) = parse_mac(mac_str) else {
        println!("not a MAC address: {mac_str}");
        return;
    };

    match std::fs::read(path) {
        Ok(bytes) => {
            let transfer_id = engine.send_file(dest, bytes, reliable);
            println!("transfer {transfer_id:08x} started");
        }
        Err(err) => println!("failed to read {path}: {err}"),
    }
}

fn print_peers(engine: &Engine) {
    let peers = engine.list_peers();
    if peers.is_empty() {
        println!("(no known peers)");
        return;
    }
    for peer in peers {
        let state = match peer.state {
            PeerState::Online => "online",
            PeerState::Offline => "offline",
        };
        println!("{}\t{}\t{}\tlast seen {:?} ago", peer.mac, peer.name, state, peer.last_seen);
    }
}

/// Splits `"<MAC> <text>"` into a parsed MAC and the remaining text.
fn split_mac_and_text(rest: &str) -> Option<(MacAddr, &str)> {
    let mut parts = rest.splitn(2, char::is_whitespace);
    let mac = parse_mac(parts.next()?)?;
    let text = parts.next().unwrap_or("").trim();
    Some((mac, text))
}

fn parse_mac(s: &str) -> Option<MacAddr> {
    MacAddr::from_str(s).ok()
}

fn parse_bool(s: &str) -> bool {
    !matches!(s.to_ascii_lowercase().as_str(), "false" | "0" | "no" | "unreliable")
}
