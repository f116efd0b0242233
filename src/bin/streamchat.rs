//! Interactive streaming chat against an OpenAI-compatible endpoint.
//!
//! # Usage
//!
//! ```bash
//! # Default endpoint, key from the environment
//! STREAMCHAT_API_KEY=sk-... streamchat
//!
//! # A local server
//! streamchat --base-url http://localhost:11434/v1 --model llama3 --api-key unused
//!
//! # Named endpoints, sessions saved between runs
//! streamchat --endpoints endpoints.yaml --endpoint deepseek --store-dir ~/.streamchat
//! ```
//!
//! With `--store-dir`, saved prompts (`/prompt-add`, `/prompts`, `/prompt <n>`) are kept there too.
//!
//! Press Ctrl+C while a reply is streaming to stop it.  Type `/help` for commands.

use std::sync::{Arc, Mutex};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use streamchat::chat::{
    API_KEY_ENV, ChatArgs, ChatCommand, ChatConfig, ChatSession, PlainTextRenderer, Renderer,
    help_text, parse_command,
};
use streamchat::{
    ConversationStore, FilePersistence, MemoryPersistence, Persistence, PromptLibrary,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("streamchat [OPTIONS]");
    let config = ChatConfig::from_args(args, std::env::var(API_KEY_ENV).ok())?;

    let open = || -> Result<Box<dyn Persistence>, streamchat::Error> {
        let persistence: Box<dyn Persistence> = match &config.store_dir {
            Some(dir) => Box::new(FilePersistence::new(dir)?),
            None => Box::new(MemoryPersistence::new()),
        };
        Ok(persistence)
    };
    let mut store = ConversationStore::new(open()?);
    let restored = store.restore()?;
    tracing::debug!(restored, "sessions restored");
    let mut prompts = PromptLibrary::new(open()?);
    let restored = prompts.restore()?;
    tracing::debug!(restored, "prompts restored");

    let use_color = config.use_color;
    let mut session = ChatSession::new(config, store)?.with_prompts(prompts);
    let mut renderer = PlainTextRenderer::with_color(use_color);
    let mut rl = DefaultEditor::new()?;

    // Token for the reply in flight; replaced before every send.
    let current = Arc::new(Mutex::new(CancellationToken::new()));
    let handler_current = Arc::clone(&current);
    ctrlc::set_handler(move || {
        if let Ok(token) = handler_current.lock() {
            token.cancel();
        }
    })?;

    println!(
        "streamchat ({} via {})",
        session.endpoint().model,
        session.endpoint().display_name()
    );
    if let Some(active) = session.active_session() {
        println!("Session: {}", active.title);
    }
    println!("Type /help for commands, /quit to exit\n");

    loop {
        match rl.readline("You: ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                let prompt = match parse_command(line) {
                    Some(ChatCommand::Prompt { number, input }) => Some((number, input)),
                    Some(cmd) => {
                        if !run_command(cmd, &mut session, &mut renderer) {
                            println!("Goodbye!");
                            break;
                        }
                        continue;
                    }
                    None => None,
                };

                let cancel = CancellationToken::new();
                match current.lock() {
                    Ok(mut slot) => *slot = cancel.clone(),
                    Err(_) => {
                        renderer.print_error("interrupt handler is unavailable");
                        break;
                    }
                }
                println!("Assistant:");
                let sent = match prompt {
                    Some((number, input)) => {
                        session
                            .send_with_prompt(number, &input, &mut renderer, &cancel)
                            .await
                    }
                    None => session.send_streaming(line, &mut renderer, &cancel).await,
                };
                if let Err(e) = sent {
                    renderer.print_error(&e.to_string());
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        }
    }

    Ok(())
}

/// Apply a slash command.  Returns false when the REPL should exit.
fn run_command<P: Persistence>(
    cmd: ChatCommand,
    session: &mut ChatSession<P>,
    renderer: &mut dyn Renderer,
) -> bool {
    match cmd {
        ChatCommand::Quit => return false,
        ChatCommand::Help => {
            for line in help_text().lines() {
                println!("    {line}");
            }
        }
        ChatCommand::New => {
            session.new_session();
            renderer.print_info("Started a new session.");
        }
        ChatCommand::Sessions => print_sessions(session),
        ChatCommand::Switch(n) => match session.switch_session(n) {
            Ok(active) => {
                let title = active.title.clone();
                renderer.print_info(&format!("Switched to: {title}"));
            }
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ChatCommand::Delete(n) => match session.delete_session(n) {
            Ok(removed) => renderer.print_info(&format!("Deleted: {}", removed.title)),
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ChatCommand::Title(title) => match session.rename_active(&title) {
            Ok(()) => renderer.print_info(&format!("Session renamed to: {title}")),
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ChatCommand::System(prompt) => {
            session.set_system_prompt(prompt.clone());
            match prompt {
                Some(p) => renderer.print_info(&format!("System prompt set to: {p}")),
                None => renderer.print_info("System prompt cleared."),
            }
        }
        ChatCommand::Endpoints => print_endpoints(session),
        ChatCommand::Endpoint(name) => match session.set_endpoint(&name) {
            Ok(()) => renderer.print_info(&format!(
                "Endpoint changed to: {} ({})",
                name,
                session.endpoint().model
            )),
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ChatCommand::Prompts(query) => print_prompts(session, query.as_deref().unwrap_or("")),
        ChatCommand::AddPrompt { title, content } => match session.add_prompt(&title, &content) {
            Ok(_) => renderer.print_info(&format!("Saved prompt 1: {title}")),
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ChatCommand::RemovePrompt(n) => match session.remove_prompt(n) {
            Ok(removed) => renderer.print_info(&format!("Deleted prompt: {}", removed.title)),
            Err(err) => renderer.print_error(&err.to_string()),
        },
        // Sent from the main loop.
        ChatCommand::Prompt { .. } => {}
        ChatCommand::Invalid(message) => renderer.print_error(&message),
    }
    true
}

fn print_sessions<P: Persistence>(session: &ChatSession<P>) {
    let active = session.active_session().map(|s| s.id.as_str());
    println!("    Sessions:");
    for (idx, s) in session.store().sessions().iter().enumerate() {
        let marker = if Some(s.id.as_str()) == active { "*" } else { " " };
        println!(
            "    {marker} {:>2}. {} ({} messages)",
            idx + 1,
            s.title,
            s.messages.len()
        );
    }
}

fn print_prompts<P: Persistence>(session: &ChatSession<P>, query: &str) {
    let hits = session.find_prompts(query);
    if hits.is_empty() {
        println!("    No saved prompts.");
        return;
    }
    println!("    Prompts:");
    for (n, prompt) in hits {
        let star = if prompt.is_favorite { "*" } else { " " };
        println!(
            "    {star} {n:>2}. {} [{}] (used {} times)",
            prompt.title, prompt.category, prompt.use_count
        );
    }
}

fn print_endpoints<P: Persistence>(session: &ChatSession<P>) {
    let current = session.endpoint().display_name();
    println!("    Endpoints:");
    for endpoint in &session.config().endpoints {
        let name = endpoint.display_name();
        let marker = if name == current { "*" } else { " " };
        println!(
            "    {marker} {name}: {} at {}",
            endpoint.model, endpoint.base_url
        );
    }
}
