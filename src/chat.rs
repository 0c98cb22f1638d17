//! `hrag ask`, `hrag chat`, and `hrag history`.
//!
//! `chat` is a line-oriented REPL on stdin. Besides questions it accepts:
//!
//! | Input | Effect |
//! |-------|--------|
//! | `/reset` | clear this session's history |
//! | `/archive <user>` | move the conversation into the chat-log archive |
//! | `/quit` | exit |

use anyhow::{bail, Context, Result};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Config;
use crate::context::AppContext;
use crate::orchestrator::TurnRequest;
use crate::search::print_results;
use crate::sessions::{archive_session, SessionStore, SqliteSessionStore};

pub async fn run_ask(config: Config, query: &str, session: Option<String>, show_context: bool) -> Result<()> {
    let ctx = AppContext::build(config).await?;
    let limit = ctx.config.generation.turn_timeout();
    let out = ctx
        .orchestrator
        .respond_within(&TurnRequest::new(session, query), limit)
        .await?;

    println!("{}", out.response);
    if show_context {
        println!();
        println!("Context:");
        print_results(&out.context);
    }
    Ok(())
}

/// Outcome of one REPL line.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Quit,
    Reset,
    Archive(&'a str),
    Ask(&'a str),
    Empty,
    Unknown(&'a str),
}

fn parse_line(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if !line.starts_with('/') {
        return Command::Ask(line);
    }
    let (cmd, arg) = match line.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (line, ""),
    };
    match cmd {
        "/quit" | "/exit" => Command::Quit,
        "/reset" => Command::Reset,
        "/archive" if !arg.is_empty() => Command::Archive(arg),
        _ => Command::Unknown(line),
    }
}

pub async fn run_chat(config: Config, session: Option<String>) -> Result<()> {
    let ctx = AppContext::build(config).await?;
    let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let limit = ctx.config.generation.turn_timeout();

    println!("Session {}  (/reset, /archive <user>, /quit)", session);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_line(&line) {
            Command::Quit => break,
            Command::Empty => continue,
            Command::Reset => {
                ctx.memory().reset(&session);
                println!("History cleared.");
            }
            Command::Archive(user) => {
                match archive_session(ctx.store.as_ref(), ctx.memory(), user, &session).await {
                    Ok(Some(id)) => println!("Archived as session {} for {}.", id, user),
                    Ok(None) => println!("Nothing to archive."),
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            Command::Unknown(cmd) => println!("Unknown command: {}", cmd),
            Command::Ask(query) => {
                match ctx
                    .orchestrator
                    .respond_within(&TurnRequest::new(Some(session.clone()), query), limit)
                    .await
                {
                    Ok(out) => println!("{}\n", out.response),
                    // A failed turn is not fatal to the REPL; memory is unchanged.
                    Err(e) => eprintln!("error: {}", e),
                }
            }
        }
    }
    Ok(())
}

/// List archived chats for a user, or print one archived chat.
pub async fn run_history(config: &Config, user: &str, session_id: Option<i64>) -> Result<()> {
    if user.trim().is_empty() {
        bail!("--user must not be empty");
    }
    let path = config.sessions_db_path();
    let store = SqliteSessionStore::open(&path)
        .await
        .with_context(|| format!("failed to open session archive {}", path.display()))?;

    match session_id {
        None => {
            let titles = store.get_chat_titles(user).await?;
            if titles.is_empty() {
                println!("No archived chats for {}.", user);
            }
            for t in titles {
                println!("{:>6}  {}", t.session_id, t.title);
            }
        }
        Some(id) => {
            let entries = store.get_session_chat(user, id).await?;
            if entries.is_empty() {
                println!("No messages in session {}.", id);
            }
            for e in entries {
                println!("[{}] {}", e.sender, e.message);
            }
        }
    }
    store.close().await;
    Ok(())
}
