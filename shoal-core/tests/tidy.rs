//! Shoal Style Consistency Enforcement
//!
//! Scans the workspace library sources for patterns the codebase avoids.
//! Test modules are exempt; only code before `#[cfg(test)]` is checked.

use std::fs;
use std::path::{Path, PathBuf};

// --- Configuration ---

/// Largest non-test module body, in lines
const MAX_MODULE_LINES: usize = 600;

/// Anti-pattern module names
const BANNED_MODULE_NAMES: &[&str] = &[
    "utils", "util", "helpers", "helper", "common", "shared", "misc", "tools",
];

/// Library crates held to the no-panic rule
const LIBRARY_CRATES: &[&str] = &["shoal-core", "shoal-sim"];

/// Macros and calls that must not appear in library code
const BANNED_PATTERNS: &[(&str, &str)] = &[
    (".unwrap()", "propagate the error instead of unwrapping"),
    (".expect(", "propagate the error instead of expecting"),
    ("println!", "use tracing instead of printing"),
    ("eprintln!", "use tracing instead of printing"),
    ("dbg!", "remove debugging output"),
    ("todo!", "finish the implementation"),
    ("unimplemented!", "finish the implementation"),
];

// --- Violation Tracking ---

#[derive(Debug, Clone)]
struct StyleViolation {
    file: String,
    line: usize,
    message: String,
}

impl StyleViolation {
    fn new(file: &Path, line: usize, message: &str) -> Self {
        Self {
            file: file.to_string_lossy().to_string(),
            line,
            message: message.to_string(),
        }
    }
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn rust_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            rust_files(&path, files);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            files.push(path);
        }
    }
}

fn library_sources() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for krate in LIBRARY_CRATES {
        rust_files(&root.join(krate).join("src"), &mut files);
    }
    files.sort();
    files
}

/// Lines of `content` before its test module.
fn non_test_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .map(|(index, line)| (index + 1, line))
        .collect()
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//")
}

fn check_banned_patterns(path: &Path, content: &str) -> Vec<StyleViolation> {
    non_test_lines(content)
        .into_iter()
        .filter(|(_, line)| !is_comment(line))
        .flat_map(|(number, line)| {
            BANNED_PATTERNS
                .iter()
                .filter(move |(pattern, _)| line.contains(pattern))
                .map(move |(pattern, advice)| {
                    StyleViolation::new(path, number, &format!("found `{pattern}`: {advice}"))
                })
        })
        .collect()
}

fn check_module_size(path: &Path, content: &str) -> Option<StyleViolation> {
    let lines = non_test_lines(content).len();
    (lines > MAX_MODULE_LINES).then(|| {
        StyleViolation::new(
            path,
            lines,
            &format!("module has {lines} non-test lines, limit is {MAX_MODULE_LINES}"),
        )
    })
}

fn check_module_name(path: &Path) -> Option<StyleViolation> {
    let stem = path.file_stem()?.to_str()?;
    let name = if stem == "mod" {
        path.parent()?.file_name()?.to_str()?
    } else {
        stem
    };
    BANNED_MODULE_NAMES
        .contains(&name)
        .then(|| StyleViolation::new(path, 1, &format!("module name `{name}` says nothing")))
}

fn report(violations: &[StyleViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}:{}: {}", v.file, v.line, v.message))
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn test_library_code_does_not_panic_or_print() {
    let mut violations = Vec::new();
    for path in library_sources() {
        let content = fs::read_to_string(&path).unwrap();
        violations.extend(check_banned_patterns(&path, &content));
    }
    assert!(violations.is_empty(), "\n{}", report(&violations));
}

#[test]
fn test_modules_stay_focused() {
    let mut violations = Vec::new();
    for path in library_sources() {
        let content = fs::read_to_string(&path).unwrap();
        violations.extend(check_module_size(&path, &content));
        violations.extend(check_module_name(&path));
    }
    assert!(violations.is_empty(), "\n{}", report(&violations));
}

#[test]
fn test_checks_catch_known_violations() {
    let path = Path::new("shoal-core/src/utils.rs");
    let content = "fn f() {\n    let x = y.unwrap();\n    // z.unwrap()\n}\n#[cfg(test)]\nmod tests { fn g() { a.unwrap(); } }\n";

    let violations = check_banned_patterns(path, content);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].line, 2);
    assert!(check_module_name(path).is_some());
    assert!(check_module_size(path, content).is_none());
}
