//! Built-in code graders.

use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;

use super::{Applicability, CodeGrader, GradeInput, GradeResult};

/// Task categories that never require tests.
const TESTLESS_CATEGORIES: &[&str] = &["chore", "spike", "docs"];

/// Extensions treated as source code by `tests-exist`.
const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "go", "py", "ts", "tsx", "js", "jsx", "java", "kt", "rb", "c", "cc", "cpp", "h", "hpp",
    "cs", "swift",
];

const TODO_MARKERS: &[&str] = &["TODO", "FIXME", "XXX"];

/// `file-exists(path)`: the given path exists in the working directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileExistsGrader;

impl CodeGrader for FileExistsGrader {
    fn name(&self) -> &str {
        "file-exists"
    }

    fn grade(&self, input: &GradeInput) -> GradeResult {
        let Some(path) = input.argument.as_deref() else {
            return GradeResult::fail(self.name(), "file-exists requires a path argument");
        };

        let full = match resolve_in_context(&input.working_dir, path) {
            Ok(full) => full,
            Err(reason) => return GradeResult::fail(self.name(), reason),
        };
        if full.exists() {
            GradeResult::pass(self.name(), format!("{path} exists"))
        } else {
            GradeResult::fail(self.name(), format!("{path} does not exist"))
        }
    }
}

/// `tests-exist`: a change touching source files also touches tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestsExistGrader;

impl TestsExistGrader {
    fn source_files(input: &GradeInput) -> Vec<&str> {
        input
            .changed_files
            .iter()
            .map(String::as_str)
            .filter(|f| is_source_file(f))
            .collect()
    }
}

impl CodeGrader for TestsExistGrader {
    fn name(&self) -> &str {
        "tests-exist"
    }

    fn is_applicable(&self, input: &GradeInput) -> Applicability {
        let category = input.task_category.to_ascii_lowercase();
        if TESTLESS_CATEGORIES.contains(&category.as_str()) {
            return Applicability::not_applicable(format!(
                "tests are not required for {category} tasks"
            ));
        }
        if Self::source_files(input).is_empty() {
            return Applicability::not_applicable("no source files changed");
        }
        Applicability::Applicable
    }

    fn grade(&self, input: &GradeInput) -> GradeResult {
        let sources = Self::source_files(input);
        let tests: Vec<&str> = sources.iter().copied().filter(|f| is_test_file(f)).collect();

        if tests.is_empty() {
            GradeResult::fail(
                self.name(),
                format!(
                    "no test files among {} changed source file(s)",
                    sources.len()
                ),
            )
        } else {
            GradeResult::pass(self.name(), format!("test files changed: {}", tests.join(", ")))
        }
    }
}

/// `file-contains(path:pattern)`: the file's content matches a regex.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileContainsGrader;

impl CodeGrader for FileContainsGrader {
    fn name(&self) -> &str {
        "file-contains"
    }

    fn grade(&self, input: &GradeInput) -> GradeResult {
        let Some((path, pattern)) = input.argument.as_deref().and_then(|a| a.split_once(':'))
        else {
            return GradeResult::fail(
                self.name(),
                "file-contains requires a `path:pattern` argument",
            );
        };

        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(e) => return GradeResult::fail(self.name(), format!("invalid pattern: {e}")),
        };

        let full = match resolve_in_context(&input.working_dir, path) {
            Ok(full) => full,
            Err(reason) => return GradeResult::fail(self.name(), reason),
        };
        match fs::read_to_string(full) {
            Ok(content) if regex.is_match(&content) => {
                GradeResult::pass(self.name(), format!("{path} matches /{pattern}/"))
            }
            Ok(_) => GradeResult::fail(
                self.name(),
                format!("{path} does not match /{pattern}/"),
            ),
            Err(e) => GradeResult::fail(self.name(), format!("cannot read {path}: {e}")),
        }
    }
}

/// `no-todo-markers`: changed files carry no TODO/FIXME/XXX markers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTodoMarkersGrader;

impl CodeGrader for NoTodoMarkersGrader {
    fn name(&self) -> &str {
        "no-todo-markers"
    }

    fn is_applicable(&self, input: &GradeInput) -> Applicability {
        if input.changed_files.is_empty() {
            Applicability::not_applicable("no files changed")
        } else {
            Applicability::Applicable
        }
    }

    fn grade(&self, input: &GradeInput) -> GradeResult {
        let mut hits = Vec::new();
        let mut checked = 0usize;

        for file in &input.changed_files {
            let full = match resolve_in_context(&input.working_dir, file) {
                Ok(full) => full,
                Err(reason) => return GradeResult::fail(self.name(), reason),
            };
            // Deleted or binary files have nothing to scan.
            let Ok(content) = fs::read_to_string(full) else {
                continue;
            };
            checked += 1;
            for (idx, line) in content.lines().enumerate() {
                if TODO_MARKERS.iter().any(|m| line.contains(m)) {
                    hits.push(format!("{file}:{}", idx + 1));
                }
            }
        }

        if hits.is_empty() {
            GradeResult::pass(
                self.name(),
                format!("{checked} changed file(s) free of markers"),
            )
        } else {
            GradeResult::fail(
                self.name(),
                format!("{} marker(s) found: {}", hits.len(), hits.join(", ")),
            )
        }
    }
}

/// Join a criterion path onto the working directory, refusing paths that
/// would leave it.
fn resolve_in_context(working_dir: &Path, path: &str) -> Result<PathBuf, String> {
    let relative = Path::new(path);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || path.trim().is_empty() {
        return Err(format!("{path:?} is not a path inside the working directory"));
    }
    Ok(working_dir.join(relative))
}

fn extension(path: &str) -> Option<&str> {
    Path::new(path).extension().and_then(|e| e.to_str())
}

fn is_source_file(path: &str) -> bool {
    extension(path).is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

fn is_test_file(path: &str) -> bool {
    let normalized = path.replace('\\', "/").to_ascii_lowercase();
    let file_name = normalized.rsplit('/').next().unwrap_or(&normalized);

    normalized.starts_with("tests/")
        || normalized.contains("/tests/")
        || normalized.starts_with("test/")
        || normalized.contains("/test/")
        || normalized.contains("__tests__/")
        || file_name.starts_with("test_")
        || file_name.contains("_test.")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
        || file_name.contains("_spec.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grader::grade_code;
    use std::path::PathBuf;

    fn input(dir: &Path, category: &str, changed: &[&str], argument: Option<&str>) -> GradeInput {
        GradeInput {
            task_id: "task-1".to_string(),
            task_category: category.to_string(),
            changed_files: changed.iter().map(|s| s.to_string()).collect(),
            working_dir: dir.to_path_buf(),
            argument: argument.map(str::to_string),
        }
    }

    #[test]
    fn test_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("test.txt"), "hi").unwrap();

        let ok = grade_code(
            &FileExistsGrader,
            &input(dir.path(), "feature", &[], Some("test.txt")),
        );
        assert!(ok.passed);
        assert_eq!(ok.score, 100.0);

        let missing =
            grade_code(&FileExistsGrader, &input(dir.path(), "feature", &[], Some("nope.txt")));
        assert!(!missing.passed);
        assert!(missing.details.contains("nope.txt"));
    }

    #[test]
    fn test_paths_outside_the_working_dir_fail() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("ctx");
        fs::create_dir(&inner).unwrap();
        fs::write(dir.path().join("outside.txt"), "TODO").unwrap();

        for path in ["/etc/passwd", "../outside.txt", "sub/../../outside.txt", ""] {
            let exists = grade_code(&FileExistsGrader, &input(&inner, "feature", &[], Some(path)));
            assert!(!exists.passed, "{path} should not resolve");
            assert!(exists.details.contains("inside the working directory"));
        }

        let contains = grade_code(
            &FileContainsGrader,
            &input(&inner, "feature", &[], Some("../outside.txt:TODO")),
        );
        assert!(!contains.passed);
        assert!(contains.details.contains("inside the working directory"));

        let markers = grade_code(
            &NoTodoMarkersGrader,
            &input(&inner, "feature", &["../outside.txt"], None),
        );
        assert!(!markers.passed);
        assert!(markers.details.contains("../outside.txt"));
    }

    #[test]
    fn test_nested_relative_paths_resolve() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "").unwrap();

        let result = grade_code(
            &FileExistsGrader,
            &input(dir.path(), "feature", &[], Some("./src/lib.rs")),
        );
        assert!(result.passed, "{}", result.details);
    }

    #[test]
    fn test_file_exists_without_argument_fails() {
        let result = grade_code(
            &FileExistsGrader,
            &input(&PathBuf::from("."), "feature", &[], None),
        );
        assert!(!result.passed);
        assert!(!result.skipped);
        assert!(result.details.contains("requires a path"));
    }

    #[test]
    fn test_tests_exist_skips_chore_and_spike() {
        for category in ["chore", "Spike", "docs"] {
            let result = grade_code(
                &TestsExistGrader,
                &input(&PathBuf::from("."), category, &["src/lib.rs"], None),
            );
            assert!(result.skipped, "{category} should be skipped");
            assert!(result.skip_reason.unwrap().contains("not required"));
        }
    }

    #[test]
    fn test_tests_exist_skips_without_source_changes() {
        let result = grade_code(
            &TestsExistGrader,
            &input(&PathBuf::from("."), "feature", &["README.md"], None),
        );
        assert!(result.skipped);
        assert_eq!(result.skip_reason.as_deref(), Some("no source files changed"));
    }

    #[test]
    fn test_tests_exist_pass_and_fail() {
        let with_tests = grade_code(
            &TestsExistGrader,
            &input(
                &PathBuf::from("."),
                "feature",
                &["src/parser.rs", "tests/parser.rs"],
                None,
            ),
        );
        assert!(with_tests.passed);
        assert!(with_tests.details.contains("tests/parser.rs"));

        let without = grade_code(
            &TestsExistGrader,
            &input(&PathBuf::from("."), "bugfix", &["src/parser.rs"], None),
        );
        assert!(!without.passed);
        assert!(!without.skipped);
    }

    #[test]
    fn test_is_test_file_patterns() {
        assert!(is_test_file("pkg/server_test.go"));
        assert!(is_test_file("test_utils.py"));
        assert!(is_test_file("web/app.spec.ts"));
        assert!(is_test_file("web/__tests__/app.js"));
        assert!(is_test_file("crates/core/tests/it.rs"));
        assert!(!is_test_file("src/attestation.rs"));
    }

    #[test]
    fn test_file_contains() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.rs"), "pub fn greet() -> &'static str { \"hi\" }").unwrap();

        let hit = grade_code(
            &FileContainsGrader,
            &input(dir.path(), "feature", &[], Some("lib.rs:fn\\s+greet")),
        );
        assert!(hit.passed, "{}", hit.details);

        let miss = grade_code(
            &FileContainsGrader,
            &input(dir.path(), "feature", &[], Some("lib.rs:fn farewell")),
        );
        assert!(!miss.passed);

        let bad_regex = grade_code(
            &FileContainsGrader,
            &input(dir.path(), "feature", &[], Some("lib.rs:(unclosed")),
        );
        assert!(!bad_regex.passed);
        assert!(bad_regex.details.contains("invalid pattern"));

        let no_arg = grade_code(&FileContainsGrader, &input(dir.path(), "feature", &[], None));
        assert!(!no_arg.passed);
    }

    #[test]
    fn test_no_todo_markers() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("clean.rs"), "fn a() {}\n").unwrap();
        fs::write(dir.path().join("dirty.rs"), "fn a() {}\n// FIXME: later\n").unwrap();

        let clean = grade_code(
            &NoTodoMarkersGrader,
            &input(dir.path(), "feature", &["clean.rs", "deleted.rs"], None),
        );
        assert!(clean.passed, "{}", clean.details);

        let dirty = grade_code(
            &NoTodoMarkersGrader,
            &input(dir.path(), "feature", &["clean.rs", "dirty.rs"], None),
        );
        assert!(!dirty.passed);
        assert!(dirty.details.contains("dirty.rs:2"));

        let none = grade_code(&NoTodoMarkersGrader, &input(dir.path(), "feature", &[], None));
        assert!(none.skipped);
    }
}
