use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

use crate::ai::chat::{Chat, ChatBuilder, GenerationSettings};
use crate::core::{AppConfig, logging};
use crate::gemini::{GeminiClient, Model};

const HELP: &str = "Commands: /clear forgets the conversation, /history shows it, /exit quits";

/// Stream the answer to stdout while it's being generated. Returns
/// whether any text was printed.
async fn ask_and_print(
    chat: &mut Chat,
    rx: &mut mpsc::UnboundedReceiver<String>,
    question: &str,
) -> Result<bool> {
    let mut printed = false;
    let mut print_fragment = |fragment: String| {
        print!("{}", fragment);
        let _ = std::io::stdout().flush();
        printed = true;
    };

    let ask = chat.ask(question);
    tokio::pin!(ask);

    let result = loop {
        tokio::select! {
            biased;
            Some(fragment) = rx.recv() => print_fragment(fragment),
            result = &mut ask => break result,
        }
    };

    // Anything sent right before the answer completed
    while let Ok(fragment) = rx.try_recv() {
        print_fragment(fragment);
    }

    result?;
    Ok(printed)
}

/// Add the line to the editor history so it can be recalled with the
/// arrow keys. History is a convenience so a failure is only logged.
fn remember(rl: &mut DefaultEditor, line: &str) {
    if let Err(e) = rl.add_history_entry(line) {
        tracing::debug!("Failed to add REPL history entry: {}", e);
    }
}

pub async fn run(
    config: AppConfig,
    model: Model,
    max_tokens: u32,
    temperature: f64,
) -> Result<()> {
    logging::init(logging::repl_filter());

    let settings = GenerationSettings::new(model, max_tokens, temperature);
    settings.validate()?;

    let client = GeminiClient::from_config(&config)?;
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut chat = ChatBuilder::new(Arc::new(client))
        .settings(settings)
        .history_window(config.history_window)
        .streaming(tx)
        .build();

    let mut rl = DefaultEditor::new()?;
    println!("Chatting with {}. {}", model, HELP);

    loop {
        let readline = rl.readline(">>> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                remember(&mut rl, line);

                match line {
                    "/exit" => break,
                    "/help" => println!("{}", HELP),
                    "/clear" => {
                        chat.clear();
                        println!("Conversation history cleared.");
                    }
                    "/history" => {
                        if chat.transcript().is_empty() {
                            println!("No conversation yet.");
                        }
                        for turn in chat.transcript().iter() {
                            println!("User: {}\nAssistant: {}\n", turn.question, turn.answer);
                        }
                    }
                    question => match ask_and_print(&mut chat, &mut rx, question).await {
                        Ok(true) => println!(),
                        Ok(false) => println!("(no answer)"),
                        Err(e) => {
                            println!();
                            tracing::error!("Chat error: {}. Root cause: {}", e, e.root_cause());
                            eprintln!("An error occurred while calling the Gemini API: {}", e);
                        }
                    },
                }
            }
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
