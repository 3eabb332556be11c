//! halo-chat: terminal front end for the Halo assistant.
//! `chat` keeps a live connection and reads lines from stdin; `ask` sends one
//! question, prints the first reply, and exits.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use halo_chat_client::config;
use halo_chat_client::{
    spawn_client, ClientHandle, Command, Config, ConnectionState, Sender, Snapshot, Status,
};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "halo-chat")]
#[command(about = "Chat with the Halo assistant over WebSocket", long_about = None)]
struct Cli {
    /// Config file path (default: HALO_CHAT_CONFIG or ~/.halo-chat/config.yaml)
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Connect to this address instead of the configured endpoints.
    #[arg(long, global = true, value_name = "URL")]
    url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default). Type /help for commands.
    Chat,

    /// Send one question and print the reply. Reads stdin when no question is given.
    Ask {
        question: Option<String>,

        /// Seconds to wait for the connection and the reply.
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let result = match load_config(cli.config.as_deref(), cli.url) {
        Ok(cfg) => match cli.command.unwrap_or(Commands::Chat) {
            Commands::Chat => run_chat(&cfg).await,
            Commands::Ask { question, timeout } => {
                run_ask(&cfg, question, Duration::from_secs(timeout)).await
            }
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&std::path::Path>, url: Option<String>) -> anyhow::Result<Config> {
    let path = config::resolve_config_path(path)
        .ok_or_else(|| anyhow!("unable to determine config path (set --config or HALO_CHAT_CONFIG)"))?;
    let mut cfg = config::load_or_default(&path)?;
    if let Some(url) = url {
        cfg.server.endpoints = vec![url];
        cfg.server.selected = 0;
    }
    Ok(cfg)
}

async fn run_ask(cfg: &Config, question: Option<String>, limit: Duration) -> anyhow::Result<()> {
    let question = match question {
        Some(q) => q.trim().to_string(),
        None => {
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .context("reading question from stdin")?;
            line.trim().to_string()
        }
    };
    if question.is_empty() {
        bail!("no question provided");
    }

    let mut handle = spawn_client(cfg, true);
    let reply = tokio::time::timeout(limit, ask_once(&mut handle, question)).await;
    handle.shutdown().await;

    let reply = reply.map_err(|_| anyhow!("timed out after {:?}", limit))??;
    println!("{}", reply);
    Ok(())
}

async fn ask_once(handle: &mut ClientHandle, question: String) -> anyhow::Result<String> {
    let snap = handle
        .wait_for(|s| s.connection_state == ConnectionState::Connected || s.last_error.is_some())
        .await
        .ok_or_else(|| anyhow!("client stopped"))?;
    if snap.connection_state != ConnectionState::Connected {
        bail!(
            "connection failed: {}",
            snap.last_error.unwrap_or_else(|| "unknown error".into())
        );
    }

    // Anything already in the view (a greeting, say) is not the answer.
    let before = snap.current_messages.len();
    handle.command(Command::Send(question));
    let snap = handle
        .wait_for(|s| {
            s.connection_state != ConnectionState::Connected || reply_after(s, before).is_some()
        })
        .await
        .ok_or_else(|| anyhow!("client stopped"))?;

    reply_after(&snap, before)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("disconnected before a reply arrived ({})", snap.connection_state))
}

/// First assistant message past the first `before` messages of the view.
fn reply_after(snap: &Snapshot, before: usize) -> Option<&str> {
    snap.current_messages
        .iter()
        .skip(before)
        .find(|m| m.sender == Sender::Assistant)
        .map(|m| m.content.as_str())
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Command(Command),
    Sessions,
    Status,
    Help,
    Quit,
    Empty,
}

fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Input::Command(Command::Send(line.to_string())));
    };
    let (word, arg) = match rest.split_once(char::is_whitespace) {
        Some((w, a)) => (w, a.trim()),
        None => (rest, ""),
    };
    let input = match word {
        "quit" | "exit" => Input::Quit,
        "help" => Input::Help,
        "status" => Input::Status,
        "sessions" => Input::Sessions,
        "new" => Input::Command(Command::CreateSession),
        "connect" => Input::Command(Command::Connect),
        "disconnect" => Input::Command(Command::Disconnect),
        "select" if arg.is_empty() => return Err("usage: /select <id>".to_string()),
        "select" => Input::Command(Command::SelectSession(arg.to_string())),
        "endpoint" => {
            let index = arg
                .parse()
                .map_err(|_| format!("usage: /endpoint <index>, got {:?}", arg))?;
            Input::Command(Command::SelectEndpoint(index))
        }
        "set" => {
            let (name, value) = arg
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: /set <field> <value>".to_string())?;
            Input::Command(Command::UpdateConfigField {
                name: name.to_string(),
                value: value.trim().to_string(),
            })
        }
        other => return Err(format!("unknown command /{} (try /help)", other)),
    };
    Ok(input)
}

const HELP: &str = "\
/new                 start a new session
/sessions            list sessions
/select <id>         switch to a session
/connect             connect (or reconnect)
/disconnect          close the connection
/set <field> <value> change a request field (type, tenant_name, stage, stage_type, meeting_id, text, page_name)
/endpoint <index>    use another configured address on the next connect
/status              connection state and last ping
/quit                exit";

/// Tracks what has already been printed so only changes are shown.
#[derive(Default)]
struct Printer {
    state: Option<ConnectionState>,
    session: Option<String>,
    shown: usize,
}

impl Printer {
    fn update(&mut self, snap: &Snapshot, out: &mut impl Write) -> io::Result<()> {
        if self.state != Some(snap.connection_state) {
            self.state = Some(snap.connection_state);
            match (&snap.connection_state, &snap.last_error) {
                (ConnectionState::Error, Some(e)) => writeln!(out, "* connection error: {}", e)?,
                (state, _) => writeln!(out, "* {}", state)?,
            }
        }
        if self.session != snap.current_session_id {
            self.session = snap.current_session_id.clone();
            self.shown = 0;
        }
        for m in snap.current_messages.iter().skip(self.shown) {
            let marker = match m.sender {
                Sender::User => ">",
                Sender::Assistant => "<",
            };
            let tag = match m.status {
                Some(Status::Success) => " [success]",
                None => "",
            };
            writeln!(out, "{}{} {}", marker, tag, m.content)?;
        }
        self.shown = snap.current_messages.len();
        out.flush()
    }
}

fn print_sessions(snap: &Snapshot, out: &mut impl Write) -> io::Result<()> {
    if snap.sessions.is_empty() {
        return writeln!(out, "no sessions yet");
    }
    for s in &snap.sessions {
        let current = if Some(&s.id) == snap.current_session_id.as_ref() {
            "*"
        } else {
            " "
        };
        writeln!(
            out,
            "{} {}  {}  {}",
            current,
            s.id,
            s.created_at.format("%Y-%m-%d"),
            s.title
        )?;
    }
    Ok(())
}

fn print_status(snap: &Snapshot, out: &mut impl Write) -> io::Result<()> {
    writeln!(
        out,
        "state: {}  endpoint: {}",
        snap.connection_state,
        snap.endpoint.as_deref().unwrap_or("-")
    )?;
    if let Some(l) = &snap.liveness {
        writeln!(out, "last ping: {}", l.display)?;
    }
    if snap.awaiting_response {
        writeln!(out, "waiting for a reply...")?;
    }
    Ok(())
}

async fn run_chat(cfg: &Config) -> anyhow::Result<()> {
    let handle = spawn_client(cfg, true);
    let mut snapshots = handle.subscribe();

    let (line_tx, mut lines) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let stdout = io::stdout();
    let mut printer = Printer::default();
    printer.update(&handle.snapshot(), &mut stdout.lock())?;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = snapshots.borrow_and_update().clone();
                printer.update(&snap, &mut stdout.lock())?;
            }
            line = lines.recv() => {
                let Some(line) = line else { break };
                match parse_input(&line) {
                    Ok(Input::Command(command)) => handle.command(command),
                    Ok(Input::Sessions) => print_sessions(&handle.snapshot(), &mut stdout.lock())?,
                    Ok(Input::Status) => print_status(&handle.snapshot(), &mut stdout.lock())?,
                    Ok(Input::Help) => println!("{}", HELP),
                    Ok(Input::Quit) => break,
                    Ok(Input::Empty) => {}
                    Err(msg) => eprintln!("{}", msg),
                }
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
