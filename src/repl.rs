use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::watch;

use crate::controller::{ConversationController, Outcome, Skip};
use crate::session::{ConversationState, Message, MessageId, Role};

const INDENT: &str = "             ";

/// Tracks what has already been written so each snapshot only prints its
/// delta.
#[derive(Debug, Default)]
pub struct RenderCursor {
    shown: Vec<(MessageId, usize)>,
    open_line: bool,
    connected: Option<bool>,
    loading: bool,
    error: Option<String>,
}

impl RenderCursor {
    fn close_line(&mut self, out: &mut String) {
        if self.open_line {
            out.push('\n');
            self.open_line = false;
        }
    }

    fn banner(&mut self, out: &mut String, line: &str) {
        self.close_line(out);
        out.push_str(line);
        out.push('\n');
    }

    pub fn render(&mut self, state: &ConversationState) -> String {
        let mut out = String::new();

        if self.connected != Some(state.is_connected) && (state.is_connected || !state.is_loading) {
            self.connected = Some(state.is_connected);
            let status = if state.is_connected { "● Connected" } else { "○ Offline" };
            self.banner(&mut out, status);
        }

        if state.is_loading && !self.loading {
            self.banner(&mut out, &format!("{INDENT}Thinking..."));
        }
        self.loading = state.is_loading;

        let visible: Vec<&Message> = state.messages.iter().filter(|m| !m.is_pending()).collect();
        let replaced = self
            .shown
            .first()
            .is_some_and(|(id, _)| !visible.iter().any(|m| m.id() == id));
        if replaced {
            self.shown.clear();
            self.banner(&mut out, "────────");
        }

        for (i, message) in visible.iter().enumerate() {
            let chars: Vec<char> = message.text().chars().collect();
            match self.shown.get_mut(i) {
                Some((_, printed)) if *printed < chars.len() => {
                    let from = *printed;
                    *printed = chars.len();
                    push_indented(&mut out, &chars[from..]);
                    self.open_line = true;
                }
                Some(_) => {}
                None => {
                    self.close_line(&mut out);
                    out.push_str(&header(message));
                    push_indented(&mut out, &chars);
                    self.open_line = true;
                    self.shown.push((message.id().clone(), chars.len()));
                }
            }
        }

        if state.last_error != self.error {
            self.error = state.last_error.clone();
            if let Some(err) = &self.error {
                self.banner(&mut out, &format!("! {err}"));
            }
        }

        if !state.is_loading {
            self.close_line(&mut out);
        }
        out
    }
}

fn header(message: &Message) -> String {
    let who = match message.role() {
        Role::User => "you",
        Role::Bot => "bot",
    };
    let at = message.created_at().with_timezone(&Local).format("%H:%M");
    format!("[{at}] {who:<4} ")
}

fn push_indented(out: &mut String, chars: &[char]) {
    for ch in chars {
        out.push(*ch);
        if *ch == '\n' {
            out.push_str(INDENT);
        }
    }
}

/// Prints snapshots until the controller goes away.
pub async fn render_loop(mut rx: watch::Receiver<ConversationState>) {
    let mut cursor = RenderCursor::default();
    loop {
        let delta = cursor.render(&rx.borrow_and_update());
        if !delta.is_empty() {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = stdout.write_all(delta.as_bytes()).and_then(|_| stdout.flush()) {
                tracing::warn!(error = %e, "failed to write to stdout");
            }
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Ask(String),
    Clear,
    Reset,
    History,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Command {
    match line.trim() {
        "/clear" => Command::Clear,
        "/reset" => Command::Reset,
        "/history" => Command::History,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => Command::Ask(other.to_string()),
    }
}

const HELP: &str = "commands: /clear  /reset  /history  /help  /quit  (Ctrl-C abandons the current operation)";

/// Runs `op` unless `interrupt` fires first, in which case `op` is dropped
/// and with it any operation lock it held. A failed interrupt source is
/// ignored.
async fn interruptible<T>(
    op: impl Future<Output = T>,
    interrupt: impl Future<Output = std::io::Result<()>>,
) -> Option<T> {
    tokio::select! {
        value = op => Some(value),
        Ok(()) = interrupt => None,
    }
}

pub struct Repl {
    ctrl: Arc<ConversationController>,
    lines: Lines<BufReader<Stdin>>,
}

impl Repl {
    pub fn new(ctrl: Arc<ConversationController>) -> Self {
        Self {
            ctrl,
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    async fn confirm(&mut self, question: &str) -> anyhow::Result<bool> {
        println!("{question} [y/N]");
        let answer = tokio::select! {
            line = self.lines.next_line() => line?.unwrap_or_default(),
            Ok(()) = tokio::signal::ctrl_c() => return Ok(false),
        };
        Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
    }

    /// Resets to a fresh session. Ctrl-C abandons the reset itself and
    /// returns to the prompt.
    async fn restart(&self) {
        tracing::info!("starting a new session");
        if interruptible(self.ctrl.reset_session(), tokio::signal::ctrl_c()).await.is_none() {
            println!("reset abandoned; try /reset");
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let renderer = tokio::spawn(render_loop(self.ctrl.subscribe()));
        println!("{HELP}");
        if interruptible(self.ctrl.initialize_session(), tokio::signal::ctrl_c()).await.is_none() {
            self.restart().await;
        }

        loop {
            let line = tokio::select! {
                line = self.lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else { break };
            match parse_command(&line) {
                Command::Quit => break,
                Command::Help => println!("{HELP}"),
                Command::Clear => {
                    if self.ctrl.snapshot().messages.is_empty() {
                        continue;
                    }
                    if self.confirm("Clear chat history?").await?
                        && interruptible(self.ctrl.clear_session(), tokio::signal::ctrl_c()).await.is_none()
                    {
                        self.restart().await;
                    }
                }
                Command::Reset => {
                    if self.confirm("Reset session? This will clear all messages.").await? {
                        self.restart().await;
                    }
                }
                Command::History => match self.ctrl.history().await {
                    Ok(Some(history)) => println!("{}", serde_json::to_string_pretty(&history)?),
                    Ok(None) => println!("no active session"),
                    Err(e) => println!("! {e}"),
                },
                Command::Ask(query) => {
                    if !self.ctrl.snapshot().is_connected {
                        println!("not connected; try /reset");
                        continue;
                    }
                    match interruptible(self.ctrl.send_message(&query), tokio::signal::ctrl_c()).await {
                        Some(Outcome::Skipped(Skip::NoSession)) => println!("no active session; try /reset"),
                        Some(_) => {}
                        None => self.restart().await,
                    }
                }
            }
        }

        renderer.abort();
        Ok(())
    }
}
