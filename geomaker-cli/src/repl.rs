//! Interactive session REPL.

use crate::commands::{export_all, read_file, render_log, render_summary, upload};
use geomaker_core::{AppConfig, ChatRole};
use geomaker_ml::{AssistantConversation, SessionController};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

const HELP: &str = "\
Commands:
  /upload <archive.zip>   load a dataset archive (one folder per class)
  /train                  start a training run in the background
  /wait                   block until the current run finishes
  /status                 show run status and latest metrics
  /log                    show the training log
  /cancel                 stop the current run
  /export [dir]           write config, metrics, results and session exports
  /context                print the context handed to the assistant
  /config [key value]     show the run configuration or change one field
  /inspect <image>        simulated prediction for one image
  /quit                   exit
Anything else is sent to the assistant.";

pub async fn run_interactive(config: AppConfig, workspace: PathBuf) -> anyhow::Result<()> {
    println!("Geomaker interactive session");
    println!(
        "  Model: {} | Assistant: {} ({}) | Workspace: {}",
        config.run.model_name,
        config.llm.provider,
        config.llm.model,
        workspace.display()
    );
    println!("  Type /help for commands, /quit to exit\n");

    let controller = SessionController::new(&config);
    let mut assistant = AssistantConversation::new(config.llm.clone());
    let mut refreshed_run = 0u64;

    let stdin = io::stdin();
    loop {
        refresh_after_run(&controller, &mut assistant, &mut refreshed_run).await;

        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input).is_err() || input.is_empty() {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if !input.starts_with('/') {
            chat(&controller, &mut assistant, input).await;
            continue;
        }

        let parts: Vec<&str> = input.splitn(3, ' ').collect();
        let cmd = parts[0];
        let arg1 = parts.get(1).copied().unwrap_or("");
        let arg2 = parts.get(2).copied().unwrap_or("");

        match cmd {
            "/quit" | "/exit" | "/q" => {
                println!("Goodbye!");
                break;
            }
            "/help" | "/?" => println!("{}", HELP),
            "/upload" => {
                if arg1.is_empty() {
                    println!("Usage: /upload <archive.zip>");
                    continue;
                }
                let path = resolve(&workspace, arg1);
                assistant.reset();
                refreshed_run = 0;
                if let Err(e) = upload(&controller, &path).await {
                    tracing::debug!(error = %e, "Upload command failed");
                }
            }
            "/train" => start_training(&controller, &mut assistant).await,
            "/wait" => match controller.wait_for_completion().await {
                Ok(status) => println!("Run finished: {}", status),
                Err(e) => println!("Error: {}", e),
            },
            "/status" => {
                let summary = controller.read(render_summary).await;
                print!("{}", summary);
            }
            "/log" => println!("{}", controller.read(render_log).await),
            "/cancel" => {
                if controller.cancel().await {
                    println!("Training cancelled.");
                } else {
                    println!("No training run is active.");
                }
            }
            "/export" => {
                let dir = if arg1.is_empty() {
                    workspace.clone()
                } else {
                    resolve(&workspace, arg1)
                };
                let session = controller.snapshot().await;
                match export_all(&session, &dir, assistant.domain_hint()) {
                    Ok(paths) => {
                        for path in paths {
                            println!("Wrote {}", path.display());
                        }
                    }
                    Err(e) => println!("Export failed: {}", e),
                }
            }
            "/context" => match controller.context(assistant.domain_hint()).await {
                Ok(context) => println!("{}", context.text),
                Err(e) => println!("Error: {}", e),
            },
            "/config" => {
                if arg1.is_empty() {
                    let config = controller.read(|s| s.config().clone()).await;
                    match serde_json::to_string_pretty(&config) {
                        Ok(text) => println!("{}", text),
                        Err(e) => println!("Error: {}", e),
                    }
                } else {
                    set_config_field(&controller, arg1, arg2).await;
                }
            }
            "/inspect" => {
                if arg1.is_empty() {
                    println!("Usage: /inspect <image>");
                    continue;
                }
                let path = resolve(&workspace, arg1);
                match read_file(&path) {
                    Ok((name, bytes)) => match controller.inspect(&name, &bytes).await {
                        Ok(result) => {
                            println!(
                                "{}: {} ({:.2}%)",
                                result.image_name,
                                result.predicted_class,
                                result.confidence * 100.0
                            );
                            if let Some(u) = result.uncertainty_score {
                                println!("  uncertainty {:.3}", u);
                            }
                        }
                        Err(e) => println!("Error: {}", e),
                    },
                    Err(e) => println!("Error: {}", e),
                }
            }
            _ => println!("Unknown command: {}. Type /help for commands.", cmd),
        }
    }

    Ok(())
}

fn resolve(workspace: &Path, arg: &str) -> PathBuf {
    let path = PathBuf::from(arg);
    if path.is_absolute() {
        path
    } else {
        workspace.join(path)
    }
}

/// Start a run. A new run starts a new conversation.
async fn start_training(controller: &SessionController, assistant: &mut AssistantConversation) {
    match controller.start().await {
        Ok(start) => {
            assistant.reset();
            for warning in &start.warnings {
                println!("Warning: {}", warning);
            }
            println!(
                "Training run {} started ({} classes). Use /status, /wait or /cancel.",
                start.run_id, start.classes.count
            );
        }
        Err(e) => println!("Cannot start training: {}", e),
    }
}

/// Reopen the assistant with fresh context once per finished run.
async fn refresh_after_run(
    controller: &SessionController,
    assistant: &mut AssistantConversation,
    refreshed_run: &mut u64,
) {
    let (status, run_id) = controller.read(|s| (s.status(), s.run_id())).await;
    if !status.is_terminal() || run_id == *refreshed_run {
        return;
    }
    *refreshed_run = run_id;
    println!("Training finished ({}). Results are available.", status);
    if assistant.is_open() {
        if let Err(e) = assistant.refresh(controller).await {
            tracing::warn!(error = %e, "Assistant context refresh failed");
        } else if let Some(message) = assistant.transcript().last() {
            println!("{}", message.text);
        }
    }
}

async fn chat(controller: &SessionController, assistant: &mut AssistantConversation, text: &str) {
    let seen = assistant.transcript().len() + 1;
    let result = assistant.send(controller, text).await;
    for line in assistant.agent_log() {
        println!("{}", line);
    }
    for message in assistant.transcript().iter().skip(seen) {
        match message.role {
            ChatRole::System => println!("[system] {}", message.text),
            _ => println!("{}", message.text),
        }
    }
    if let Err(e) = result {
        tracing::debug!(error = %e, "Assistant message failed");
    }
}

/// `/config <key> <value>`: JSON-typed update of one run-configuration field.
async fn set_config_field(controller: &SessionController, key: &str, value: &str) {
    let current = controller.read(|s| s.config().clone()).await;
    let mut json = match serde_json::to_value(&current) {
        Ok(json) => json,
        Err(e) => {
            println!("Error: {}", e);
            return;
        }
    };
    let Some(slot) = json.get_mut(key) else {
        println!("Unknown configuration field: {}", key);
        return;
    };
    *slot = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));

    match serde_json::from_value(json) {
        Ok(config) => {
            for warning in controller.update_config(config).await {
                println!("Warning: {}", warning);
            }
            println!("{} updated.", key);
        }
        Err(e) => println!("Invalid value for {}: {}", key, e),
    }
}
