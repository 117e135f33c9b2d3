use std::sync::Arc;
use std::time::Duration;

use promptgate_core::cache::MemoryStore;
use promptgate_core::config::{GuardCfg, ValidationConfig};
use promptgate_core::{
    Action, ChallengeContext, PromptGuard, RiskClass, ValidationRequest,
};
use promptgate_core::types::Difficulty;
use promptgate_llm::http::HttpProvider;
use promptgate_llm::provider::LlmProvider;
use rustyline::error::ReadlineError;

const DB_CONNECT_TIMEOUT_SECS: u64 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promptgate=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut startup_notice: Option<String> = None;
    let pool = if let Ok(url) = std::env::var("DATABASE_URL") {
        let mut fallback = |reason: String| {
            startup_notice = Some(format!(
                "note: {reason}; running with in-memory config, nothing persists this session."
            ));
        };
        match tokio::time::timeout(
            Duration::from_secs(DB_CONNECT_TIMEOUT_SECS),
            sqlx::postgres::PgPoolOptions::new()
                .max_connections(8)
                .connect(&url),
        )
        .await
        {
            Ok(Ok(pool)) => match sqlx::migrate!("../../migrations").run(&pool).await {
                Ok(()) => Some(pool),
                Err(_) => {
                    fallback("database migration failed".into());
                    None
                }
            },
            Ok(Err(_)) => {
                fallback("could not connect to DATABASE_URL".into());
                None
            }
            Err(_) => {
                fallback(format!("database connect timed out ({DB_CONNECT_TIMEOUT_SECS}s)"));
                None
            }
        }
    } else {
        None
    };

    let cfg = if let Some(ref pool) = pool {
        GuardCfg::load(pool).await?
    } else {
        GuardCfg::default()
    };

    let defaults = ValidationConfig::default();
    let provider: Option<Arc<dyn LlmProvider>> = provider_from_env(&defaults);
    let semantic_notice = if provider.is_none() {
        Some("note: no provider configured (PROMPTGATE_LLM_API_KEY); heuristic-only mode.")
    } else {
        None
    };

    let guard = PromptGuard::new(provider, Arc::new(MemoryStore::new()), cfg);
    let challenge = demo_challenge();
    guard.prewarm(&challenge).await;

    println!("promptgate — type a prompt to validate it against the demo challenge.");
    println!("challenge: {} [{}]", challenge.title, challenge.category);
    println!("commands: /health /metrics /q");
    if let Some(notice) = startup_notice {
        println!("{notice}");
    }
    if let Some(notice) = semantic_notice {
        println!("{notice}");
    }

    let mut editor = rustyline::DefaultEditor::new()?;
    loop {
        match editor.readline("prompt> ") {
            Ok(line) => {
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                if matches!(text, "/q" | "/exit" | "/quit") {
                    break;
                }
                let _ = editor.add_history_entry(text);
                match text {
                    "/health" => {
                        let health = guard.get_health();
                        println!(
                            "semantic available: {} | circuit open: {} | recent failures: {}",
                            health.semantic_available, health.circuit_open, health.recent_failures
                        );
                    }
                    "/metrics" => {
                        let metrics = guard.get_metrics(None, Some(7)).await;
                        println!(
                            "total: {} | safe: {} | warning: {} | blocked: {} | avg risk: {:.1}",
                            metrics.total,
                            metrics.safe,
                            metrics.warning,
                            metrics.blocked,
                            metrics.avg_risk
                        );
                    }
                    prompt => {
                        let result = guard
                            .validate(ValidationRequest {
                                prompt: prompt.to_owned(),
                                challenge: challenge.clone(),
                                user_level: 3,
                                config: None,
                            })
                            .await;
                        print_verdict(&result);
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("input error: {e}");
                break;
            }
        }
    }
    Ok(())
}

/// Provider from env. `PROMPTGATE_LLM_MODEL`/`..._EMBED_MODEL` override
/// the configured defaults; no API key means heuristic-only mode.
fn provider_from_env(defaults: &ValidationConfig) -> Option<Arc<dyn LlmProvider>> {
    let api_key = std::env::var("PROMPTGATE_LLM_API_KEY").ok()?;
    let chat_model =
        std::env::var("PROMPTGATE_LLM_MODEL").unwrap_or_else(|_| defaults.chat_model.clone());
    let embed_model = std::env::var("PROMPTGATE_LLM_EMBED_MODEL")
        .unwrap_or_else(|_| defaults.embedding_model.clone());
    let base_url = std::env::var("PROMPTGATE_LLM_BASE_URL").ok();
    Some(Arc::new(HttpProvider::new(chat_model, embed_model, api_key, base_url)))
}

fn print_verdict(result: &promptgate_core::EnhancedValidationResult) {
    let badge = match result.classification {
        RiskClass::Safe => "SAFE",
        RiskClass::Warning => "WARNING",
        RiskClass::Blocked => "BLOCKED",
    };
    let action = match result.action {
        Action::Allow => "allow",
        Action::Throttle => "throttle",
        Action::Block => "block",
        Action::Review => "review",
    };
    println!(
        "{badge} ({action}) — hybrid {:.0}, heuristic {:.0}, confidence {:.0}, {}ms",
        result.hybrid_score, result.heuristic.risk_score, result.heuristic.confidence,
        result.elapsed_ms
    );
    if !result.detected_patterns.is_empty() {
        println!("  patterns: {}", result.detected_patterns.join(", "));
    }
    if let Some(sem) = &result.semantic {
        println!(
            "  semantic: intent {} ({:.0}), alignment {:.2}, manipulation {:.0}{}",
            sem.intent.as_str(),
            sem.intent_confidence,
            sem.context_alignment,
            sem.manipulation_score,
            if sem.from_cache { " (cached)" } else { "" }
        );
    }
    for reason in &result.heuristic.reasons {
        println!("  - {reason}");
    }
}

fn demo_challenge() -> ChallengeContext {
    ChallengeContext {
        id: "demo-api-validation".into(),
        title: "Validação de entrada em API REST".into(),
        category: "backend".into(),
        difficulty: Difficulty::Intermediate,
        keywords: vec![
            "validação".into(),
            "api".into(),
            "endpoint".into(),
            "entrada".into(),
            "rest".into(),
        ],
        allowed_topics: vec!["entrada de dados".into(), "tratamento de erros".into()],
        forbidden_patterns: vec![],
        tech_stack: vec!["rust".into(), "axum".into()],
        learning_objectives: vec![
            "validar dados de entrada".into(),
            "retornar erros consistentes".into(),
        ],
    }
}
