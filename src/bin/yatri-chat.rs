//! Interactive terminal client for the Yatri chat service.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a local backend, keeping the session in memory
//! yatri-chat
//!
//! # Talk to another backend and remember the session between runs
//! yatri-chat --api-url http://10.0.0.2:5000 --session-file ~/.yatri-session.json
//!
//! # Read settings from YAML and disable colors
//! yatri-chat --config yatri.yaml --no-color
//! ```
//!
//! Set `RUST_LOG=yatri=debug` to see what the sync engine is doing.
//!
//! # Commands
//!
//! - `/login <email> <password>` - Sign in
//! - `/connect <email>` - Connect with a user and open the conversation
//! - `/open <email|id>` - Open a conversation
//! - `/attach <path>` - Attach a file to the next message
//! - `/status` - Show session status
//! - `/quit` - Exit the application
//!
//! Any other line is sent to the open conversation.

use std::sync::Arc;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::{Notify, broadcast};
use tracing_subscriber::EnvFilter;

use yatri::chat::{
    ChatArgs, ChatConfig, ChatSession, Flow, PlainTextRenderer, Renderer, parse_command,
};
use yatri::{SessionController, SessionState};

/// Main entry point for the yatri-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("yatri-chat [OPTIONS]");
    let config = ChatConfig::from_args(args)?;
    let use_color = config.use_color;

    let controller = Arc::new(SessionController::connect(config.client)?);
    let mut session = ChatSession::new(controller.clone());
    let mut renderer = PlainTextRenderer::with_color(use_color);
    let mut rl = DefaultEditor::new()?;

    // Wakes whatever command is in flight when Ctrl+C arrives outside the prompt.
    let interrupt = Arc::new(Notify::new());
    let interrupt_clone = interrupt.clone();
    ctrlc::set_handler(move || {
        interrupt_clone.notify_waiters();
    })?;

    println!("Yatri Chat ({})", controller.config().api_url);
    match controller.restore().await {
        Ok(SessionState::Authenticated) => {
            if let Some(user) = controller.user() {
                renderer.print_info(&format!("Welcome back, {}", user.email));
            }
        }
        Ok(_) => renderer.print_info("Use /login <email> <password> to sign in"),
        Err(err) => renderer.print_error(&format!("Could not restore session: {err}")),
    }
    println!("Type /help for commands, /quit to exit\n");

    tokio::spawn(print_background(
        controller.clone(),
        PlainTextRenderer::with_color(use_color),
    ));

    loop {
        let prompt = match controller.user() {
            Some(user) => format!("{}> ", user.email),
            None => "> ".to_string(),
        };
        let readline = rl.readline(&prompt);

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() && session.attachment().is_none() {
                    continue;
                }
                if !line.is_empty() {
                    let _ = rl.add_history_entry(line);
                }

                let outcome = match parse_command(line) {
                    Some(cmd) => {
                        tokio::select! {
                            flow = session.execute(cmd, &mut renderer) => Some(flow),
                            _ = interrupt.notified() => None,
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = session.send_text(line, &mut renderer) => Some(Flow::Continue),
                            _ = interrupt.notified() => None,
                        }
                    }
                };
                let Some(flow) = outcome else {
                    renderer.print_interrupted();
                    continue;
                };
                if flow == Flow::Quit {
                    println!("Goodbye!");
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    Ok(())
}

/// Prints realtime pushes and session loss as they happen.
async fn print_background(controller: Arc<SessionController>, mut renderer: PlainTextRenderer) {
    let mut changes = controller.subscribe();
    let mut state = controller.watch_state();
    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) => {
                    let me = controller.user().map(|user| user.id);
                    renderer.print_change(&change, me.as_ref());
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    renderer.print_notice(&format!("missed {skipped} updates; use /history"));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                if *state.borrow_and_update() == SessionState::Unauthenticated {
                    renderer.print_notice("Signed out. Use /login to sign in again.");
                }
            }
        }
    }
}
