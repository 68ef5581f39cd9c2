//! The tandem client executable.
//!
//! The full-screen editor lives elsewhere; this frontend is a minimal
//! line console that drives the session interface directly: edits go in
//! as commands, content and status lines come back as events.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use tandem_collab::client::{self, SessionConfig, SessionEvent, SessionHandle};
use tandem_collab::names;

#[derive(Parser, Debug)]
#[command(
    name = "tandem",
    version,
    about = "Collaborative plain-text editing over a relay"
)]
struct Args {
    /// Network address of the relay server.
    #[arg(long, default_value = "localhost:8080")]
    server: String,

    /// Connect with wss:// instead of ws://.
    #[arg(long)]
    secure: bool,

    /// Prompt for a username instead of generating one.
    #[arg(long)]
    login: bool,

    /// Pre-load the document from this file before connecting.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Verbose logging, including full document dumps.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(if args.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .parse_default_env()
        .init();

    let username = if args.login {
        match prompt_username() {
            Ok(name) if !name.is_empty() => name,
            _ => names::silly_name(),
        }
    } else {
        names::silly_name()
    };
    println!("joining as {username}");

    let config = SessionConfig {
        server_addr: args.server,
        secure: args.secure,
        username,
        file: args.file,
        debug: args.debug,
    };
    let (handle, mut events) = match client::connect(config).await {
        Ok(session) => session,
        Err(err) => {
            eprintln!("Connection error, exiting: {err}");
            return;
        }
    };

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::ContentChanged(content) => {
                    println!("────────");
                    println!("{content}");
                }
                SessionEvent::Status(notice) => println!("* {notice}"),
                SessionEvent::Closed => break,
            }
        }
    });

    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !dispatch(&handle, line.trim()).await {
            break;
        }
    }
    let _ = handle.shutdown().await;
    println!("exiting session.");
}

fn prompt_username() -> io::Result<String> {
    print!("Enter your name: ");
    io::stdout().flush()?;
    let mut name = String::new();
    io::stdin().read_line(&mut name)?;
    Ok(name.trim().to_string())
}

fn print_help() {
    println!("commands:");
    println!("  i <pos> <text>   insert text at visible position <pos>");
    println!("  d <pos>          delete the character at <pos>");
    println!("  save [path]      write the document to disk");
    println!("  load <path>      replace the document from disk");
    println!("  quit             leave the session");
}

/// Returns false when the session should end.
async fn dispatch(handle: &SessionHandle, line: &str) -> bool {
    let mut parts = line.splitn(3, ' ');
    match parts.next() {
        Some("i") => {
            let position = parts.next().and_then(|p| p.parse::<usize>().ok());
            let text = parts.next().unwrap_or_default();
            match position {
                Some(position) if !text.is_empty() => {
                    let expanded = text.replace('\t', "    ");
                    for (offset, ch) in expanded.chars().enumerate() {
                        if handle.insert(position + offset, ch.to_string()).await.is_err() {
                            return false;
                        }
                    }
                }
                _ => println!("usage: i <pos> <text>"),
            }
        }
        Some("d") => match parts.next().and_then(|p| p.parse::<usize>().ok()) {
            Some(position) => {
                if handle.delete(position).await.is_err() {
                    return false;
                }
            }
            None => println!("usage: d <pos>"),
        },
        Some("save") => {
            let path = parts.next().map(PathBuf::from);
            if handle.save(path).await.is_err() {
                return false;
            }
        }
        Some("load") => match parts.next() {
            Some(path) => {
                if handle.load(PathBuf::from(path)).await.is_err() {
                    return false;
                }
            }
            None => println!("usage: load <path>"),
        },
        Some("quit") | Some("q") => return false,
        Some("") | None => {}
        Some(other) => println!("unknown command {other:?}"),
    }
    true
}
