//! Deterministic file selection used when a corpus has no completed index.

pub const MAX_FALLBACK_FILES: usize = 10;
pub const EXCERPT_CHARS: usize = 500;
pub const ELLIPSIS: &str = "...";

/// Base names tried first, in priority order.
pub const PRIORITY_FILES: &[&str] = &[
    "readme",
    "package.json",
    "package.swift",
    "cargo.toml",
    "go.mod",
    "requirements.txt",
    "pom.xml",
    "build.gradle",
];

/// Extensions recognised as source code for the second pass.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "swift", "rs", "go", "py", "js", "ts", "jsx", "tsx", "java", "kt", "rb", "c", "cpp", "h",
    "hpp", "cs", "m", "php", "scala",
];

fn base_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase()
}

/// Lowercased extension of the last path segment, if any.
pub fn extension(path: &str) -> Option<String> {
    let name = base_name(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        None
    } else {
        Some(ext.to_string())
    }
}

/// Extension-less patterns (`readme`) also match with any extension.
fn matches_priority(name: &str, pattern: &str) -> bool {
    name == pattern
        || (!pattern.contains('.')
            && name
                .strip_prefix(pattern)
                .map(|rest| rest.starts_with('.'))
                .unwrap_or(false))
}

pub fn is_source_file(path: &str) -> bool {
    extension(path)
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Two-pass selection capped at [`MAX_FALLBACK_FILES`].
///
/// Pass 1 walks [`PRIORITY_FILES`] in order and takes every listed file whose
/// base name matches the pattern (`README.md` matches `readme`). Pass 2 runs only if slots remain and takes source files in
/// listing order, skipping anything already chosen.
pub fn select_files(listing: &[String]) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();

    'priority: for pattern in PRIORITY_FILES {
        for path in listing {
            if selected.len() >= MAX_FALLBACK_FILES {
                break 'priority;
            }
            if matches_priority(&base_name(path), pattern) && !selected.contains(path) {
                selected.push(path.clone());
            }
        }
    }

    if selected.len() < MAX_FALLBACK_FILES {
        for path in listing {
            if selected.len() >= MAX_FALLBACK_FILES {
                break;
            }
            if is_source_file(path) && !selected.contains(path) {
                selected.push(path.clone());
            }
        }
    }

    selected
}

/// Truncate to [`EXCERPT_CHARS`] characters, appending [`ELLIPSIS`] when cut.
pub fn excerpt(content: &str) -> String {
    match content.char_indices().nth(EXCERPT_CHARS) {
        Some((byte_idx, _)) => format!("{}{}", &content[..byte_idx], ELLIPSIS),
        None => content.to_string(),
    }
}

/// Languages and ecosystems suggested by a file listing, sorted and deduped.
pub fn detect_tech_stack(listing: &[String]) -> Vec<String> {
    let mut stack = std::collections::BTreeSet::new();
    for path in listing {
        let name = base_name(path);
        let manifest = match name.as_str() {
            "cargo.toml" => Some("Cargo"),
            "package.json" => Some("npm"),
            "package.swift" => Some("Swift Package Manager"),
            "go.mod" => Some("Go modules"),
            "requirements.txt" | "pyproject.toml" => Some("pip"),
            "pom.xml" => Some("Maven"),
            "build.gradle" | "build.gradle.kts" => Some("Gradle"),
            _ => None,
        };
        if let Some(manifest) = manifest {
            stack.insert(manifest.to_string());
        }
        if let Some(language) = extension(path).as_deref().and_then(language_for_extension) {
            stack.insert(language.to_string());
        }
    }
    stack.into_iter().collect()
}

pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "swift" => "Swift",
        "rs" => "Rust",
        "go" => "Go",
        "py" => "Python",
        "js" | "jsx" => "JavaScript",
        "ts" | "tsx" => "TypeScript",
        "java" => "Java",
        "kt" => "Kotlin",
        "rb" => "Ruby",
        "c" | "h" => "C",
        "cpp" | "hpp" => "C++",
        "cs" => "C#",
        "m" => "Objective-C",
        "php" => "PHP",
        "scala" => "Scala",
        _ => return None,
    })
}
