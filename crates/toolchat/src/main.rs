//! A terminal chat that demonstrates how to use `toolchat` as a library.

#[macro_use]
extern crate tracing;

use std::collections::HashSet;
use std::env;
use std::io::Write as _;
use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;
use toolchat::SessionBuilder;
use toolchat::core::tool::ToolApproval;
use toolchat::core::{
    Author, Chat, DisplayMessage, MessageKind, Redaction, Snapshot, TurnState,
};
use toolchat_model::EngineSession;
use toolchat_openai_engine::{OpenAIConfigBuilder, OpenAIEngine};

enum SessionEvent {
    Idle,
    Error(String),
    ToolCallRequest(ToolApproval),
}

const BAR_CHAR: &str = "▎";

const HELP: &str = "\
Commands:
  /reset            start over
  /export           print the conversation as JSON, media omitted
  /export-full      print the conversation as JSON
  /import <path>    load a conversation from a JSON file
  /system [prompt]  show or change the system prompt
  /prompt           show the prompt the model would see
  /tools            list the tools and whether they are enabled
  /enable <tool>    offer a tool to the model again
  /disable <tool>   stop offering a tool to the model
  /save <file>      save the llama.cpp server's KV cache as <file>
  /load <file>      restore the KV cache saved as <file>
  /quit             exit (or Ctrl-D)
Ctrl-C stops the answer in progress.";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Ok(api_key) = env::var("OPENAI_API_KEY") else {
        eprintln!("OPENAI_API_KEY environment variable is not set");
        return;
    };
    let mut config = OpenAIConfigBuilder::with_api_key(api_key);
    if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
        config = config.with_base_url(base_url);
    }
    if let Ok(model) = env::var("OPENAI_MODEL") {
        config = config.with_model(model);
    }
    let engine = OpenAIEngine::new(config.build());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut builder = SessionBuilder::with_engine(engine.clone())
        .on_idle({
            let event_tx = event_tx.clone();
            move || {
                event_tx.send(SessionEvent::Idle).ok();
            }
        })
        .on_error({
            let event_tx = event_tx.clone();
            move |err| {
                event_tx.send(SessionEvent::Error(err.to_string())).ok();
            }
        })
        .on_tool_call_request({
            let event_tx = event_tx.clone();
            move |approval| {
                event_tx.send(SessionEvent::ToolCallRequest(approval)).ok();
            }
        });
    if let Ok(prompt) = env::var("TOOLCHAT_SYSTEM_PROMPT") {
        builder = builder.with_system_prompt(prompt);
    }
    if let Ok(rounds) = env::var("TOOLCHAT_MAX_TOOL_ROUNDS") {
        // Zero lifts the limit.
        match rounds.trim().parse::<usize>() {
            Ok(0) => builder = builder.with_max_tool_rounds(None),
            Ok(rounds) => builder = builder.with_max_tool_rounds(Some(rounds)),
            Err(err) => {
                eprintln!("TOOLCHAT_MAX_TOOL_ROUNDS is invalid: {err}");
                return;
            }
        }
    }
    let session = builder.build();
    let chat = session.chat();

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    let mut transcript = Transcript::default();
    transcript.flush(&chat.messages(), true);
    println!("{}", "Type /help for commands.".bright_black());

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(command) = line.strip_prefix('/') else {
            if session.send_message(line).is_err() {
                break;
            }
            if !wait_idle(chat, &mut event_rx, &mut transcript, &progress_style)
                .await
            {
                break;
            }
            continue;
        };

        let (name, arg) = command
            .split_once(' ')
            .map(|(name, arg)| (name, arg.trim()))
            .unwrap_or((command, ""));
        match name {
            "quit" | "exit" => break,
            "reset" => {
                if chat.reset().is_err()
                    || !wait_idle(
                        chat,
                        &mut event_rx,
                        &mut transcript,
                        &progress_style,
                    )
                    .await
                {
                    break;
                }
            }
            "export" | "export-full" => {
                let redaction = if name == "export" {
                    Redaction::Redacted
                } else {
                    Redaction::Full
                };
                match chat.export(redaction) {
                    Ok(json) => println!("{json}"),
                    Err(err) => eprintln!("{}", format!("Export failed: {err}").red()),
                }
            }
            "import" if !arg.is_empty() => {
                let result = match tokio::fs::read_to_string(arg).await {
                    Ok(json) => chat.import(&json).await.map_err(|err| err.to_string()),
                    Err(err) => Err(err.to_string()),
                };
                match result {
                    Ok(()) => transcript.flush(&chat.messages(), true),
                    Err(err) => eprintln!("{}", format!("Import failed: {err}").red()),
                }
            }
            "system" if arg.is_empty() => println!("{}", chat.system_prompt()),
            "system" => chat.set_system_prompt(arg),
            "prompt" => match chat.format_chat().await {
                Ok(formatted) => println!("{}", formatted.prompt.bright_black()),
                Err(err) => eprintln!("{}", format!("Preview failed: {err}").red()),
            },
            "tools" => {
                let tools = chat.tools();
                for name in tools.names() {
                    if tools.is_enabled(name) {
                        println!("  {name}");
                    } else {
                        println!("  {}", format!("{name} (disabled)").bright_black());
                    }
                }
            }
            "enable" | "disable" if !arg.is_empty() => {
                if !chat.tools().set_enabled(arg, name == "enable") {
                    eprintln!("{}", format!("No such tool: {arg}").red());
                }
            }
            "save" if !arg.is_empty() => {
                match engine.save_session(Path::new(arg)).await {
                    Ok(tokens) => println!("Saved {tokens} tokens."),
                    Err(err) => eprintln!("{}", format!("Save failed: {err}").red()),
                }
            }
            "load" if !arg.is_empty() => {
                match engine.load_session(Path::new(arg)).await {
                    Ok(loaded) => println!("Loaded {} tokens.", loaded.tokens_loaded),
                    Err(err) => eprintln!("{}", format!("Load failed: {err}").red()),
                }
            }
            _ => println!("{HELP}"),
        }
    }
}

/// Streams the answer until the chat goes idle, asking for tool
/// confirmations on the way. A spinner runs while nothing is streaming.
/// Returns `false` if the session is gone.
async fn wait_idle(
    chat: &Chat,
    event_rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    transcript: &mut Transcript,
    progress_style: &ProgressStyle,
) -> bool {
    let mut progress_bar: Option<ProgressBar> = None;
    let mut snapshots = chat.subscribe_messages();

    loop {
        let state = chat.state();
        if transcript.is_live() {
            if state == TurnState::Streaming {
                // The answer is being printed in place of the spinner.
                let sleep = sleep(Duration::from_millis(100));
                select! {
                    Ok(()) = snapshots.changed() => {
                        let snapshot = snapshots.borrow_and_update().clone();
                        transcript.stream(&snapshot);
                    },
                    _ = tokio::signal::ctrl_c() => {
                        debug!("interrupted by user");
                        chat.stop();
                    },
                    _ = sleep => {}
                }
                continue;
            }
            transcript.end_live();
        }

        let message = match state {
            TurnState::AwaitingConfirmation | TurnState::ExecutingTool => {
                "🔧 Running tool..."
            }
            _ => "🤔 Thinking...",
        };
        // Create a new progress bar if it has been finished.
        let bar = progress_bar.get_or_insert_with(|| {
            let progress_bar = ProgressBar::new_spinner();
            progress_bar.set_style(progress_style.clone());
            progress_bar
        });
        bar.set_message(message);
        bar.inc(1);

        let sleep = sleep(Duration::from_millis(100));
        let event = select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    return false;
                };
                event
            },
            Ok(()) = snapshots.changed() => {
                let snapshot = snapshots.borrow_and_update().clone();
                if transcript.live_message(&snapshot).is_some() {
                    if let Some(progress_bar) = progress_bar.take() {
                        progress_bar.finish_and_clear();
                    }
                    transcript.stream(&snapshot);
                }
                continue;
            },
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted by user");
                chat.stop();
                continue;
            },
            _ = sleep => {
                continue;
            }
        };

        // Finish the progress bar before printing anything else.
        if let Some(progress_bar) = progress_bar.take() {
            progress_bar.finish_and_clear();
        }

        match event {
            SessionEvent::ToolCallRequest(approval) => {
                transcript.flush(&chat.messages(), false);

                let bar = BAR_CHAR.bright_yellow();
                println!("{bar}⚠️  Assistant wants to call a tool:");
                println!("{bar}{}", approval.to_string().bright_white().bold());
                print!("Proceed? [Y/n]: ");
                std::io::stdout().flush().ok();

                let Some(line) = read_line().await else {
                    return false;
                };
                let line = line.trim();
                if line.is_empty() || line.eq_ignore_ascii_case("y") {
                    approval.approve();
                } else {
                    approval.decline();
                }
            }
            SessionEvent::Error(err) => {
                eprintln!("{}", format!("Error: {err}").red());
            }
            SessionEvent::Idle => {
                transcript.flush(&chat.messages(), false);
                return true;
            }
        }
    }
}

/// Tracks which messages have been printed.
#[derive(Default)]
struct Transcript {
    printed: HashSet<String>,
    /// The answer being streamed and how many bytes of it are on screen.
    live: Option<(String, usize)>,
}

impl Transcript {
    /// Prints the messages that are new since the last flush, oldest first.
    /// User messages are skipped unless `include_user` is set, since the
    /// user typed them.
    fn flush(&mut self, snapshot: &Snapshot, include_user: bool) {
        if let Some((id, shown)) = self.live.take() {
            if let Some(msg) = snapshot.get(&id) {
                print_rest(msg.text_or_empty(), shown);
            }
            println!();
        }
        for msg in snapshot.messages().iter().rev() {
            if !self.printed.insert(msg.id.clone()) {
                continue;
            }
            if msg.author == Author::User && !include_user {
                continue;
            }
            print_message(msg);
        }
    }

    #[inline]
    fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Prints what the streaming answer has grown by since the last call,
    /// after any earlier messages that have not been printed yet.
    fn stream(&mut self, snapshot: &Snapshot) {
        let Some(msg) = self.live_message(snapshot) else {
            return;
        };
        let shown = match &self.live {
            Some((id, shown)) if *id == msg.id => *shown,
            _ => {
                self.end_live();
                for earlier in snapshot.messages()[1..].iter().rev() {
                    if self.printed.insert(earlier.id.clone())
                        && earlier.author != Author::User
                    {
                        print_message(earlier);
                    }
                }
                self.printed.insert(msg.id.clone());
                print!("{}🤖 ", BAR_CHAR.bright_cyan());
                0
            }
        };
        let text = msg.text_or_empty();
        print_rest(text, shown);
        self.live = Some((msg.id.clone(), text.len().max(shown)));
    }

    /// Ends the line of the streamed answer.
    fn end_live(&mut self) {
        if self.live.take().is_some() {
            println!();
        }
    }

    /// Returns the newest message if it is an answer with some text that
    /// is being streamed or has not been printed yet.
    fn live_message<'a>(
        &self,
        snapshot: &'a Snapshot,
    ) -> Option<&'a DisplayMessage> {
        let msg = snapshot.messages().first()?;
        let is_live = self.live.as_ref().is_some_and(|(id, _)| *id == msg.id);
        let is_answer = msg.author == Author::Assistant
            && msg.kind == MessageKind::Text
            && !msg.metadata.system
            && !msg.metadata.tool_result
            && msg.metadata.tool_message.is_none()
            && !msg.text_or_empty().is_empty();
        (is_answer && (is_live || !self.printed.contains(&msg.id))).then_some(msg)
    }
}

fn print_rest(text: &str, shown: usize) {
    // The settled text may differ from the streamed prefix; nothing to add.
    if let Some(rest) = text.get(shown..) {
        print!("{}", rest.bright_white());
        std::io::stdout().flush().ok();
    }
}

fn print_message(msg: &DisplayMessage) {
    let text = match msg.kind {
        MessageKind::Text => msg.text_or_empty(),
        MessageKind::Image => "[image]",
        MessageKind::Other => "[attachment]",
    };
    if text.is_empty() {
        return;
    }

    if msg.metadata.system {
        for line in text.lines() {
            println!("{}{}", BAR_CHAR.bright_black(), line.bright_black());
        }
    } else if msg.metadata.tool_message.is_some() || msg.metadata.tool_result {
        println!("{}🔧 {}", BAR_CHAR.bright_yellow(), text);
    } else if msg.author == Author::User {
        println!("{}🧑 {}", BAR_CHAR.bright_green(), text);
    } else {
        println!("{}🤖 {}", BAR_CHAR.bright_cyan(), text.bright_white());
    }
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
