//! Candidate-file rules: skip set, language inference, line counting,
//! and lightweight dependency extraction.

use std::collections::BTreeSet;
use std::path::Path;

/// Extensions that are never analyzed: images, archives, office documents,
/// media, binaries, fonts, and lock/log/tmp/cache files.
const SKIP_EXTENSIONS: &[&str] = &[
    // images
    "jpg", "jpeg", "png", "gif", "bmp", "svg", "ico", "webp",
    // archives
    "zip", "rar", "7z", "tar", "gz", "bz2", "xz",
    // office documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    // media
    "mp3", "mp4", "avi", "mov", "wmv", "flv", "mkv",
    // binaries
    "exe", "dll", "so", "dylib", "bin",
    // fonts
    "woff", "woff2", "ttf", "eot",
    // transient files
    "lock", "log", "tmp", "cache",
];

fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether a file participates in analysis at all.
pub fn is_candidate(path: &str) -> bool {
    match extension_of(path) {
        Some(ext) => !SKIP_EXTENSIONS.contains(&ext.as_str()),
        // Extensionless files (Makefile, Dockerfile, ...) are candidates.
        None => true,
    }
}

/// Infer a language label from the file extension. Unknown extensions map
/// to "text" so every candidate row carries a usable label.
pub fn language_for_path(path: &str) -> &'static str {
    let ext = match extension_of(path) {
        Some(e) => e,
        None => return "text",
    };

    match ext.as_str() {
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "cs" => "csharp",
        "go" => "go",
        "rs" => "rust",
        "php" => "php",
        "rb" => "ruby",
        "swift" => "swift",
        "kt" => "kotlin",
        "scala" => "scala",
        "r" => "r",
        "clj" => "clojure",
        "hs" => "haskell",
        "elm" => "elm",
        "dart" => "dart",
        "sh" | "bash" | "zsh" => "shell",
        "bat" | "cmd" => "batch",
        "ps1" => "powershell",
        "sql" => "sql",
        "md" | "mdx" => "markdown",
        "rst" | "adoc" | "asciidoc" => "text",
        "json" => "json",
        "xml" => "xml",
        "yml" | "yaml" => "yaml",
        "toml" => "toml",
        "ini" => "ini",
        "cfg" | "conf" => "config",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "sass" => "sass",
        "less" => "less",
        "vue" => "vue",
        "svelte" => "svelte",
        "graphql" | "gql" => "graphql",
        "proto" => "protobuf",
        _ => "text",
    }
}

/// Count non-blank lines.
pub fn count_code_lines(content: &str) -> usize {
    content.lines().filter(|l| !l.trim().is_empty()).count()
}

/// Extract top-level imported module names for the languages where a cheap
/// line scan is reliable. Names are sorted, deduplicated, and joined with
/// `|` for storage on the FileAnalysis row.
pub fn extract_dependencies(content: &str, language: &str) -> String {
    let mut deps: BTreeSet<String> = BTreeSet::new();

    match language {
        "python" => {
            for line in content.lines() {
                let line = line.trim_start();
                if let Some(rest) = line.strip_prefix("from ") {
                    if let Some(module) = rest.split_whitespace().next() {
                        push_root(&mut deps, module, '.');
                    }
                } else if let Some(rest) = line.strip_prefix("import ") {
                    for part in rest.split(',') {
                        if let Some(module) = part.split_whitespace().next() {
                            push_root(&mut deps, module, '.');
                        }
                    }
                }
            }
        }
        "javascript" | "typescript" => {
            for line in content.lines() {
                if let Some(module) = js_import_target(line) {
                    if !module.starts_with('.') {
                        push_root(&mut deps, &module, '/');
                    }
                }
            }
        }
        "rust" => {
            for line in content.lines() {
                let line = line.trim_start();
                if let Some(rest) = line.strip_prefix("use ") {
                    let root = rest
                        .split("::")
                        .next()
                        .unwrap_or("")
                        .trim_end_matches(';')
                        .trim();
                    if !root.is_empty()
                        && root != "crate"
                        && root != "super"
                        && root != "self"
                        && root != "std"
                    {
                        deps.insert(root.to_string());
                    }
                }
            }
        }
        "java" => {
            for line in content.lines() {
                let line = line.trim_start();
                if let Some(rest) = line.strip_prefix("import ") {
                    let path = rest.trim_end_matches(';').trim();
                    let mut parts = path.split('.');
                    if let (Some(a), Some(b)) = (parts.next(), parts.next()) {
                        deps.insert(format!("{}.{}", a, b));
                    }
                }
            }
        }
        "go" => {
            for line in content.lines() {
                let line = line.trim();
                if let Some(rest) = line.strip_prefix("import ") {
                    let target = rest.trim().trim_matches('"');
                    if !target.is_empty() && !target.contains(' ') {
                        deps.insert(target.to_string());
                    }
                } else if line.starts_with('"') && line.ends_with('"') && line.contains('/') {
                    deps.insert(line.trim_matches('"').to_string());
                }
            }
        }
        _ => {}
    }

    deps.into_iter().collect::<Vec<_>>().join("|")
}

fn push_root(deps: &mut BTreeSet<String>, module: &str, sep: char) {
    let root = module.split(sep).next().unwrap_or("").trim();
    if !root.is_empty() && !root.starts_with('.') {
        deps.insert(root.to_string());
    }
}

fn js_import_target(line: &str) -> Option<String> {
    let line = line.trim();
    let after = if line.starts_with("import ") || line.starts_with("export ") {
        line.split(" from ").nth(1)?
    } else if let Some(idx) = line.find("require(") {
        &line[idx + "require(".len()..]
    } else {
        return None;
    };

    let after = after.trim_start();
    let quote = after.chars().next()?;
    if quote != '"' && quote != '\'' && quote != '`' {
        return None;
    }
    let rest = &after[1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_set() {
        assert!(!is_candidate("assets/logo.png"));
        assert!(!is_candidate("dist/bundle.tar.gz"));
        assert!(!is_candidate("Cargo.lock"));
        assert!(!is_candidate("server.log"));
        assert!(is_candidate("src/main.rs"));
        assert!(is_candidate("README.md"));
        assert!(is_candidate("Makefile"));
    }

    #[test]
    fn test_language_inference() {
        assert_eq!(language_for_path("a/b/c.py"), "python");
        assert_eq!(language_for_path("component.TSX"), "typescript");
        assert_eq!(language_for_path("query.sql"), "sql");
        assert_eq!(language_for_path("weird.xyz"), "text");
        assert_eq!(language_for_path("Dockerfile"), "text");
    }

    #[test]
    fn test_count_code_lines() {
        assert_eq!(count_code_lines(""), 0);
        assert_eq!(count_code_lines("a\n\n  \nb\n"), 2);
        assert_eq!(count_code_lines("one line"), 1);
    }

    #[test]
    fn test_python_dependencies() {
        let src = "import os\nimport sys, re\nfrom collections.abc import Mapping\nfrom . import sibling\n";
        assert_eq!(extract_dependencies(src, "python"), "collections|os|re|sys");
    }

    #[test]
    fn test_js_dependencies() {
        let src = "import fs from 'fs';\nimport { x } from \"@scope/pkg/sub\";\nconst y = require('lodash');\nimport local from './local';\n";
        assert_eq!(extract_dependencies(src, "javascript"), "@scope|fs|lodash");
    }

    #[test]
    fn test_rust_dependencies() {
        let src = "use std::fmt;\nuse serde::Serialize;\nuse crate::config;\nuse tokio::sync::Mutex;\n";
        assert_eq!(extract_dependencies(src, "rust"), "serde|tokio");
    }

    #[test]
    fn test_unsupported_language_is_empty() {
        assert_eq!(extract_dependencies("SELECT 1;", "sql"), "");
    }
}
