//! `mentor chat` — Interactive or single-message chat mode.

use std::io::Write;

use mentor_config::AppConfig;
use mentor_core::message::SessionId;
use mentor_core::tool::ToolResult;
use mentor_orchestrator::{ChatOrchestrator, ChatRequest, ChatStreamEvent};
use uuid::Uuid;

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Check for API key early, with a clear error
    if config.provider.kind != "mock" && !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    MENTOR_API_KEY=sk-...      (generic)");
        eprintln!("    DEEPSEEK_API_KEY=sk-...    (for DeepSeek)");
        eprintln!("    OPENAI_API_KEY=sk-...      (for OpenAI)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!(
            "    {}",
            AppConfig::config_dir().join("config.toml").display()
        );
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let orchestrator = super::build_orchestrator(&config).await?;
    let user_id = super::cli_user_id();

    if let Some(msg) = message {
        let session = SessionId::new();
        run_turn(&orchestrator, user_id, session, &msg).await?;
        return Ok(());
    }

    println!();
    println!("  Mentor — Interactive Mode");
    println!("  =========================");
    println!();
    println!("  Provider:  {}", config.provider.kind);
    println!("  Model:     {}", config.provider.model);
    println!("  Storage:   {}", config.storage.backend);
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let session = SessionId::new();
    let stdin = std::io::stdin();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" {
            break;
        }

        if let Err(e) = run_turn(&orchestrator, user_id, session, line).await {
            eprintln!("  [Error] {e}");
        }
        println!();
    }

    println!();
    println!("  再见！好好学习。");
    Ok(())
}

/// Run one streaming turn, printing events as they arrive. Gated tool calls
/// are surfaced as confirmation prompts after the stream ends.
async fn run_turn(
    orchestrator: &ChatOrchestrator,
    user_id: Uuid,
    session: SessionId,
    message: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rx = orchestrator
        .chat_stream(ChatRequest {
            user_id,
            session_id: Some(session),
            message: message.to_string(),
        })
        .await;

    let mut pending: Vec<ToolResult> = Vec::new();

    while let Some(event) = rx.recv().await {
        match event {
            ChatStreamEvent::Text { content } => {
                print!("{content}");
                std::io::stdout().flush()?;
            }
            ChatStreamEvent::ToolStart { name, .. } => {
                println!();
                println!("  [tool] {name} ...");
            }
            ChatStreamEvent::ToolResult { result, .. } => {
                if result.requires_confirmation {
                    pending.push(result);
                } else if result.success {
                    println!("  [tool] {} ok", result.tool_name);
                } else {
                    println!(
                        "  [tool] {} failed: {}",
                        result.tool_name,
                        result.error_message.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            ChatStreamEvent::Widget { widget_type, data } => {
                println!("  [{widget_type}] {data}");
            }
            ChatStreamEvent::Error { message } => {
                println!();
                eprintln!("  [Error] {message}");
            }
            ChatStreamEvent::Done { .. } => {
                println!();
            }
        }
    }

    for deferred in pending {
        resolve_confirmation(orchestrator, user_id, &deferred).await?;
    }

    Ok(())
}

async fn resolve_confirmation(
    orchestrator: &ChatOrchestrator,
    user_id: Uuid,
    deferred: &ToolResult,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(action_id) = deferred.confirmation_id.as_deref() else {
        return Ok(());
    };

    print!(
        "  {} needs confirmation. Run it? [y/N] ",
        deferred.tool_name
    );
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    let confirmed = matches!(answer.trim(), "y" | "Y" | "yes");

    let resolution = orchestrator.confirm(user_id, action_id, confirmed).await;
    match resolution.status {
        "executed" => {
            let ok = resolution.result.map(|r| r.success).unwrap_or(false);
            println!(
                "  [tool] {} {}",
                deferred.tool_name,
                if ok { "ok" } else { "failed" }
            );
        }
        "cancelled" => println!("  [tool] {} cancelled", deferred.tool_name),
        other => println!("  [tool] {} {other}", deferred.tool_name),
    }
    Ok(())
}
