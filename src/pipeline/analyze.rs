//! Stage 2 — Analyze
//!
//! Fans pending FileAnalyses out to the worker pool. Each worker retrieves
//! similar chunks from the vector index, asks the LLM for a structured
//! analysis, and writes the terminal row plus its items. The stage makes no
//! ordering claim; counters are bumped atomically with each row transition.

use super::PipelineDriver;
use crate::adapters::{ChatMessage, CompletionRequest, ScoredChunk};
use crate::error::{Error, Result};
use crate::pool::{with_retries, WorkerPool};
use crate::store::{FileAnalysis, FileOutcome, NewAnalysisItem, Repository, Task};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const CONTEXT_TOP_K: usize = 5;
const CONTEXT_SNIPPET_CHARS: usize = 300;
const ANALYSIS_MAX_TOKENS: u32 = 2048;

pub(crate) async fn run(driver: &PipelineDriver, task: &Task, _repo: &Repository) -> Result<()> {
    let pending = driver.store.pending_files(task.id).await?;
    if pending.is_empty() {
        info!(task = task.id, "analyze stage: nothing pending");
        return Ok(());
    }

    let index_name = task
        .vector_index_name
        .clone()
        .ok_or_else(|| Error::Fatal("analyze stage: vector index name missing".to_string()))?;

    info!(
        task = task.id,
        files = pending.len(),
        index = %index_name,
        "analyze stage: fanning out"
    );

    let pool = WorkerPool::new(
        driver.config.concurrency.worker_count,
        driver.config.concurrency.prefetch,
    );

    let ctx = Arc::new(WorkerContext {
        driver: driver.clone(),
        task_id: task.id,
        index_name,
    });

    let ctx_for_pool = Arc::clone(&ctx);
    pool.drain(pending, driver.cancel.clone(), move |file| {
        let ctx = Arc::clone(&ctx_for_pool);
        async move { analyze_one(&ctx, file).await }
    })
    .await;

    // A cancel during the fan-out leaves rows pending; surface it so the
    // driver records the task as cancelled rather than completing.
    driver.check_cancel(task.id).await?;

    let counts = driver.store.file_counts(task.id).await?;
    info!(
        task = task.id,
        success = counts.success,
        failed = counts.failed,
        "analyze stage complete"
    );
    Ok(())
}

struct WorkerContext {
    driver: PipelineDriver,
    task_id: i64,
    index_name: String,
}

async fn analyze_one(ctx: &WorkerContext, file: FileAnalysis) {
    let driver = &ctx.driver;
    let worker = format!("analyze-{}", ctx.task_id);
    driver.registry.beat(&worker);

    let file_path = file.file_path.clone();
    if let Err(e) = driver.store.set_current_file(ctx.task_id, Some(&file_path)).await {
        warn!(file = %file_path, "failed to record current file: {}", e);
    }

    match analyze_file(ctx, &file).await {
        Ok(output) => {
            let outcome = FileOutcome::Success {
                analysis: output.summary,
                dependencies: if output.dependencies.is_empty() {
                    None
                } else {
                    Some(output.dependencies.join("|"))
                },
            };
            match driver.store.finish_file(ctx.task_id, &file_path, &outcome).await {
                Ok(true) => {
                    if let Err(e) = append_items(ctx, &file_path, &output.items).await {
                        warn!(file = %file_path, "failed to append items: {}", e);
                    }
                }
                Ok(false) => debug!(file = %file_path, "already succeeded, counters untouched"),
                Err(e) => warn!(file = %file_path, "failed to persist success: {}", e),
            }
        }
        Err(Error::Cancelled) => {
            // Leave the row pending; a resumed run picks it back up.
            debug!(file = %file_path, "analysis cancelled, row stays pending");
        }
        Err(e) => {
            let outcome = FileOutcome::Failed {
                error: e.to_string(),
            };
            if let Err(store_err) = driver
                .store
                .finish_file(ctx.task_id, &file_path, &outcome)
                .await
            {
                warn!(file = %file_path, "failed to persist failure: {}", store_err);
            }
        }
    }

    driver.registry.beat(&worker);
}

async fn append_items(ctx: &WorkerContext, file_path: &str, items: &[NewAnalysisItem]) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    let Some(row) = ctx.driver.store.get_file(ctx.task_id, file_path).await? else {
        return Ok(());
    };
    ctx.driver.store.append_analysis_items(row.id, items).await
}

struct AnalysisOutput {
    summary: String,
    dependencies: Vec<String>,
    items: Vec<NewAnalysisItem>,
}

async fn analyze_file(ctx: &WorkerContext, file: &FileAnalysis) -> Result<AnalysisOutput> {
    let driver = &ctx.driver;
    let max_bytes = driver.config.limits.max_file_bytes;

    if file.size_bytes as usize > max_bytes {
        return Err(Error::Input(format!(
            "file exceeds input budget ({} > {} bytes)",
            file.size_bytes, max_bytes
        )));
    }

    let content = file.code_content.as_deref().unwrap_or("");
    if content.trim().is_empty() {
        // Empty files get a trivial analysis instead of an LLM round-trip.
        return Ok(AnalysisOutput {
            summary: "Empty file with no code content.".to_string(),
            dependencies: Vec::new(),
            items: Vec::new(),
        });
    }

    let context = retrieve_context(ctx, file).await;

    let output = with_retries(&driver.config.retry, &driver.cancel, |attempt| {
        let context = context.clone();
        async move {
            driver.rate_gate.acquire().await;

            // Soft-timeout recovery: later attempts ship a reduced prompt.
            let budget = if attempt == 0 {
                content.len()
            } else {
                content.len() / 2usize.pow(attempt.min(4))
            };
            let body = truncate_utf8(content, budget.max(256));

            let request = CompletionRequest {
                messages: vec![
                    ChatMessage::system(
                        "You are a code analyst. Reply with a JSON object: \
                         {\"summary\": string, \"dependencies\": [string], \
                         \"items\": [{\"title\": string, \"description\": string, \
                         \"start_line\": number, \"end_line\": number}]}.",
                    ),
                    ChatMessage::user(build_prompt(file, body, &context)),
                ],
                max_tokens: Some(ANALYSIS_MAX_TOKENS),
            };

            let completion = driver.llm.complete(request).await?;
            Ok(parse_analysis(&completion.text, &file.language))
        }
    })
    .await?;

    Ok(output)
}

/// Query the vector index for chunks similar to this file. Context is best
/// effort: retrieval failures degrade to an empty context instead of
/// failing the file.
async fn retrieve_context(ctx: &WorkerContext, file: &FileAnalysis) -> String {
    let query = format!("{} {}", file.file_path, file.language);
    let results = match ctx
        .driver
        .vector
        .search(&ctx.index_name, &query, CONTEXT_TOP_K)
        .await
    {
        Ok(results) => results,
        Err(e) => {
            debug!(file = %file.file_path, "context retrieval failed: {}", e);
            return String::new();
        }
    };

    format_context(&results, &file.file_path)
}

fn format_context(results: &[ScoredChunk], exclude_file: &str) -> String {
    let mut parts = Vec::new();
    for hit in results {
        if hit.document.file == exclude_file {
            continue;
        }
        let snippet: String = hit.document.content.chars().take(CONTEXT_SNIPPET_CHARS).collect();
        parts.push(format!(
            "--- {} ({} lines {}-{}) ---\n{}",
            hit.document.file,
            hit.document.language,
            hit.document.start_line,
            hit.document.end_line,
            snippet
        ));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("Related chunks from this repository:\n{}", parts.join("\n"))
    }
}

fn build_prompt(file: &FileAnalysis, body: &str, context: &str) -> String {
    let mut prompt = format!(
        "Analyze this {} file and describe what it does.\n\nPath: {}\n\n```{}\n{}\n```\n",
        file.language, file.file_path, file.language, body
    );
    if !context.is_empty() {
        prompt.push('\n');
        prompt.push_str(context);
    }
    prompt
}

fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[derive(Debug, Deserialize)]
struct AnalysisWire {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    items: Vec<ItemWire>,
}

#[derive(Debug, Deserialize)]
struct ItemWire {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    start_line: Option<i64>,
    #[serde(default)]
    end_line: Option<i64>,
}

/// Parse the model's reply. A reply that is not valid JSON is kept verbatim
/// as the summary; malformed item spans are dropped rather than poisoning
/// the whole file.
fn parse_analysis(text: &str, language: &str) -> AnalysisOutput {
    let body = strip_code_fence(text);
    let parsed: Option<AnalysisWire> = serde_json::from_str(body).ok();

    match parsed {
        Some(wire) => {
            let items = wire
                .items
                .into_iter()
                .filter(|item| !item.title.trim().is_empty())
                .filter(|item| match (item.start_line, item.end_line) {
                    (Some(start), Some(end)) => start <= end,
                    _ => true,
                })
                .map(|item| NewAnalysisItem {
                    title: item.title,
                    description: item.description,
                    source: None,
                    language: Some(language.to_string()),
                    code: item.code,
                    start_line: item.start_line,
                    end_line: item.end_line,
                })
                .collect();

            let summary = if wire.summary.trim().is_empty() {
                text.trim().to_string()
            } else {
                wire.summary
            };

            AnalysisOutput {
                summary,
                dependencies: wire.dependencies,
                items,
            }
        }
        None => AnalysisOutput {
            summary: text.trim().to_string(),
            dependencies: Vec::new(),
            items: Vec::new(),
        },
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structured_reply() {
        let text = r#"{"summary": "CLI entry point.", "dependencies": ["clap"], "items": [{"title": "main", "start_line": 1, "end_line": 10}]}"#;
        let out = parse_analysis(text, "rust");
        assert_eq!(out.summary, "CLI entry point.");
        assert_eq!(out.dependencies, vec!["clap"]);
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].language.as_deref(), Some("rust"));
    }

    #[test]
    fn test_parse_fenced_reply() {
        let text = "```json\n{\"summary\": \"ok\", \"items\": []}\n```";
        let out = parse_analysis(text, "python");
        assert_eq!(out.summary, "ok");
    }

    #[test]
    fn test_parse_prose_reply_falls_back() {
        let text = "This file implements a parser.";
        let out = parse_analysis(text, "python");
        assert_eq!(out.summary, text);
        assert!(out.items.is_empty());
    }

    #[test]
    fn test_invalid_spans_are_dropped() {
        let text = r#"{"summary": "x", "items": [
            {"title": "good", "start_line": 3, "end_line": 9},
            {"title": "inverted", "start_line": 9, "end_line": 3},
            {"title": "", "start_line": 1, "end_line": 2}
        ]}"#;
        let out = parse_analysis(text, "go");
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].title, "good");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "héllo wörld";
        let t = truncate_utf8(s, 2);
        assert!(t.len() <= 2);
        assert!(s.starts_with(t));
    }

    #[test]
    fn test_format_context_excludes_self() {
        use crate::adapters::IndexDocument;
        let hits = vec![ScoredChunk {
            score: 0.9,
            document: IndexDocument {
                title: "a.py".into(),
                file: "a.py".into(),
                content: "print()".into(),
                category: "code".into(),
                language: "python".into(),
                start_line: 1,
                end_line: 1,
            },
        }];
        assert!(format_context(&hits, "a.py").is_empty());
        assert!(format_context(&hits, "b.py").contains("a.py"));
    }
}
