//! Project pattern discovery over in-memory sources.
//!
//! Detects the stack from manifest text, catalogs recurring Go code shapes
//! (handlers, DTO structs, service interfaces, error wrapping), and renders
//! the markdown the manager keeps in its knowledge file.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::types::ProjectType;

/// Examples listed per pattern document.
const MAX_EXAMPLES: usize = 5;
/// Files listed per pattern document.
const MAX_FILES: usize = 10;

pub const PATTERNS_START: &str = "<!-- crew:project-patterns:start -->";
pub const PATTERNS_END: &str = "<!-- crew:project-patterns:end -->";

/// Manifest files, read before any source is scanned.
#[derive(Debug, Clone, Copy, Default)]
pub struct Manifests<'a> {
    pub go_mod: Option<&'a str>,
    pub package_json: Option<&'a str>,
    pub requirements_txt: Option<&'a str>,
    pub pyproject_toml: Option<&'a str>,
}

/// Language, toolchain and framework of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stack {
    pub project_type: ProjectType,
    /// `go`, `javascript`, `typescript` or `python`.
    pub language: &'static str,
    pub framework: Option<&'static str>,
}

/// First match wins, in the order Go, Node, Python.
pub fn detect_stack(manifests: &Manifests<'_>) -> Option<Stack> {
    if let Some(go_mod) = manifests.go_mod {
        return Some(Stack {
            project_type: ProjectType::Go,
            language: "go",
            framework: first_marker(
                go_mod,
                &[
                    ("github.com/gofiber/fiber", "fiber"),
                    ("github.com/gin-gonic/gin", "gin"),
                    ("github.com/gorilla/mux", "gorilla"),
                    ("net/http", "stdlib"),
                ],
            ),
        });
    }
    if let Some(package) = manifests.package_json {
        let language = if package.contains("typescript") {
            "typescript"
        } else {
            "javascript"
        };
        return Some(Stack {
            project_type: ProjectType::TypeScript,
            language,
            framework: first_marker(
                package,
                &[
                    ("express", "express"),
                    ("fastify", "fastify"),
                    ("next", "nextjs"),
                    ("react", "react"),
                ],
            ),
        });
    }
    if let Some(requirements) = manifests.requirements_txt {
        return Some(Stack {
            project_type: ProjectType::Python,
            language: "python",
            framework: first_marker(
                requirements,
                &[("fastapi", "fastapi"), ("flask", "flask"), ("django", "django")],
            ),
        });
    }
    manifests.pyproject_toml.map(|_| Stack {
        project_type: ProjectType::Python,
        language: "python",
        framework: None,
    })
}

fn first_marker(text: &str, markers: &[(&str, &'static str)]) -> Option<&'static str> {
    markers
        .iter()
        .find(|(needle, _)| text.contains(needle))
        .map(|&(_, name)| name)
}

/// `layered` with handlers, services and models; `mvc` with handlers or
/// controllers only; otherwise `simple`.
pub fn architecture_style<S: AsRef<str>>(dirs: &[S]) -> &'static str {
    let has = |needles: &[&str]| {
        dirs.iter().any(|d| {
            let d = d.as_ref().to_ascii_lowercase();
            needles.iter().any(|n| d.contains(n))
        })
    };
    let handlers = has(&["handler", "controller"]);
    if handlers && has(&["service"]) && has(&["model", "entity"]) {
        "layered"
    } else if handlers {
        "mvc"
    } else {
        "simple"
    }
}

/// Module paths required by a `go.mod`, in file order.
pub fn go_dependencies(go_mod: &str) -> Vec<String> {
    go_mod
        .lines()
        .map(str::trim)
        .map(|line| line.strip_prefix("require ").unwrap_or(line).trim())
        .filter(|line| line.starts_with("github.com/") || line.starts_with("golang.org/"))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Non-comment lines of a `requirements.txt`.
pub fn python_dependencies(requirements: &str) -> Vec<String> {
    requirements
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Keys of `dependencies` and `devDependencies`; unparseable JSON yields nothing.
pub fn node_dependencies(package_json: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(package_json) else {
        return Vec::new();
    };
    ["dependencies", "devDependencies"]
        .iter()
        .filter_map(|section| value.get(section)?.as_object())
        .flat_map(|deps| deps.keys().cloned())
        .collect()
}

/// Test framework named by the manifests. Go reports `go test` only when a
/// `_test.go` file exists.
pub fn testing_framework(
    stack: &Stack,
    manifests: &Manifests<'_>,
    has_go_tests: bool,
) -> Option<&'static str> {
    match stack.project_type {
        ProjectType::Go if has_go_tests => Some(
            first_marker(
                manifests.go_mod.unwrap_or_default(),
                &[
                    ("github.com/stretchr/testify", "testify"),
                    ("github.com/onsi/ginkgo", "ginkgo"),
                ],
            )
            .unwrap_or("go test"),
        ),
        ProjectType::Go => None,
        ProjectType::TypeScript => first_marker(
            manifests.package_json.unwrap_or_default(),
            &[("jest", "jest"), ("mocha", "mocha"), ("vitest", "vitest")],
        ),
        ProjectType::Python => first_marker(
            manifests.requirements_txt.unwrap_or_default(),
            &[("pytest", "pytest"), ("unittest", "unittest")],
        ),
    }
}

/// A recurring code shape and where it was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pattern {
    /// Stable identifier, also the document file stem.
    pub key: &'static str,
    pub name: &'static str,
    pub kind: &'static str,
    pub description: &'static str,
    pub examples: Vec<String>,
    pub files: Vec<String>,
    pub frequency: usize,
}

struct Shape {
    key: &'static str,
    name: &'static str,
    kind: &'static str,
    description: &'static str,
    regex: &'static LazyLock<Regex>,
    example: fn(&str) -> String,
}

static FIBER_HANDLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"func\s+(\w+)\s*\([^)]*\*fiber\.Ctx[^)]*\)\s*error")
        .expect("fiber handler regex should be valid")
});
static HTTP_HANDLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"func\s+(\w+)\s*\([^)]*http\.ResponseWriter[^)]*\*http\.Request[^)]*\)")
        .expect("http handler regex should be valid")
});
static DTO_STRUCT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"type\s+(\w+(?:Request|Response|DTO|Model))\s+struct\s*\{")
        .expect("dto struct regex should be valid")
});
static SERVICE_INTERFACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"type\s+(\w+(?:Service|Repository|Client|Interface))\s+interface\s*\{")
        .expect("service interface regex should be valid")
});

static GO_SHAPES: [Shape; 4] = [
    Shape {
        key: "fiber_handlers",
        name: "Fiber HTTP Handlers",
        kind: "handler",
        description: "Standard Fiber HTTP handler functions",
        regex: &FIBER_HANDLER,
        example: |name| format!("func {name}(c *fiber.Ctx) error"),
    },
    Shape {
        key: "http_handlers",
        name: "Standard HTTP Handlers",
        kind: "handler",
        description: "Standard library HTTP handler functions",
        regex: &HTTP_HANDLER,
        example: |name| format!("func {name}(w http.ResponseWriter, r *http.Request)"),
    },
    Shape {
        key: "dto_structs",
        name: "Data Transfer Objects",
        kind: "model",
        description: "Request/Response/DTO struct definitions",
        regex: &DTO_STRUCT,
        example: |name| format!("type {name} struct"),
    },
    Shape {
        key: "service_interfaces",
        name: "Service Interfaces",
        kind: "interface",
        description: "Service and repository interface definitions",
        regex: &SERVICE_INTERFACE,
        example: |name| format!("type {name} interface"),
    },
];

/// Patterns accumulated across files, keyed for stable output order.
#[derive(Debug, Default)]
pub struct PatternCatalog {
    patterns: BTreeMap<&'static str, Pattern>,
}

impl PatternCatalog {
    /// Record the Go shapes found in one file.
    pub fn scan_go(&mut self, file: &str, source: &str) {
        for shape in &GO_SHAPES {
            let names: Vec<&str> = shape
                .regex
                .captures_iter(source)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str())
                .collect();
            if names.is_empty() {
                continue;
            }
            let pattern = self.entry(shape.key, shape.name, shape.kind, shape.description);
            pattern.frequency += names.len();
            pattern
                .examples
                .extend(names.into_iter().map(|name| (shape.example)(name)));
            pattern.files.push(file.to_string());
        }

        if source.contains("fmt.Errorf") || source.contains("errors.Wrap") {
            let pattern = self.entry(
                "error_wrapping",
                "Error Wrapping",
                "error_handling",
                "Error wrapping and context preservation patterns",
            );
            if pattern.examples.is_empty() {
                pattern.examples = vec![
                    "fmt.Errorf(\"failed to process: %w\", err)".to_string(),
                    "errors.Wrap(err, \"context\")".to_string(),
                ];
            }
            pattern.frequency += 1;
            pattern.files.push(file.to_string());
        }
    }

    fn entry(
        &mut self,
        key: &'static str,
        name: &'static str,
        kind: &'static str,
        description: &'static str,
    ) -> &mut Pattern {
        self.patterns.entry(key).or_insert_with(|| Pattern {
            key,
            name,
            kind,
            description,
            examples: Vec::new(),
            files: Vec::new(),
            frequency: 0,
        })
    }

    pub fn into_patterns(self) -> Vec<Pattern> {
        self.patterns.into_values().collect()
    }
}

/// Everything learned about a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectAnalysis {
    pub stack: Stack,
    pub architecture: &'static str,
    pub directories: Vec<String>,
    pub entry_points: Vec<String>,
    pub patterns: Vec<Pattern>,
    pub dependencies: Vec<String>,
    pub testing_framework: Option<&'static str>,
}

fn or_unknown(value: Option<&str>) -> &str {
    value.unwrap_or("unknown")
}

/// Project overview markdown.
pub fn render_overview(analysis: &ProjectAnalysis) -> String {
    let mut out = String::from("# Project Patterns\n\n## Project Overview\n\n");
    out.push_str(&format!("- **Language**: {}\n", analysis.stack.language));
    out.push_str(&format!(
        "- **Framework**: {}\n",
        or_unknown(analysis.stack.framework)
    ));
    out.push_str(&format!("- **Architecture**: {}\n", analysis.architecture));
    out.push_str(&format!(
        "- **Testing Framework**: {}\n\n",
        or_unknown(analysis.testing_framework)
    ));

    out.push_str("## Entry Points\n\n");
    for entry in &analysis.entry_points {
        out.push_str(&format!("- {entry}\n"));
    }
    out.push_str("\n## Discovered Patterns\n\n");
    for pattern in &analysis.patterns {
        out.push_str(&format!("### {}\n", pattern.name));
        out.push_str(&format!("- **Type**: {}\n", pattern.kind));
        out.push_str(&format!("- **Frequency**: {} occurrences\n", pattern.frequency));
        out.push_str(&format!("- **Files**: {} files\n", pattern.files.len()));
        out.push_str(&format!("- **Description**: {}\n\n", pattern.description));
    }
    out.push_str("## Dependencies\n\n");
    for dep in &analysis.dependencies {
        out.push_str(&format!("- {dep}\n"));
    }
    out
}

/// Detail page for one pattern; long example and file lists are elided.
pub fn render_pattern(pattern: &Pattern) -> String {
    let mut out = format!("# {}\n\n", pattern.name);
    out.push_str(&format!("**Type**: {}\n\n", pattern.kind));
    out.push_str(&format!("**Description**: {}\n\n", pattern.description));
    out.push_str(&format!(
        "**Frequency**: {} occurrences in {} files\n\n",
        pattern.frequency,
        pattern.files.len()
    ));
    if !pattern.examples.is_empty() {
        out.push_str("## Examples\n\n");
        for example in pattern.examples.iter().take(MAX_EXAMPLES) {
            out.push_str(&format!("```\n{example}\n```\n\n"));
        }
        if pattern.examples.len() > MAX_EXAMPLES {
            out.push_str("...\n");
        }
    }
    if !pattern.files.is_empty() {
        out.push_str("## Files\n\n");
        for file in pattern.files.iter().take(MAX_FILES) {
            out.push_str(&format!("- {file}\n"));
        }
        if pattern.files.len() > MAX_FILES {
            out.push_str("...\n");
        }
        out.push('\n');
    }
    out
}

/// Replace the marked pattern section of `knowledge`, or append one.
pub fn splice_into_knowledge(knowledge: &str, overview: &str) -> String {
    let section = format!("{PATTERNS_START}\n{}\n{PATTERNS_END}", overview.trim_end());
    if let Some(start) = knowledge.find(PATTERNS_START)
        && let Some(end) = knowledge[start..].find(PATTERNS_END)
    {
        let end = start + end + PATTERNS_END.len();
        return format!("{}{section}{}", &knowledge[..start], &knowledge[end..]);
    }
    let mut out = knowledge.trim_end().to_string();
    out.push_str("\n\n");
    out.push_str(&section);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const HANDLERS: &str = r#"package main

type HealthResponse struct {
	Status string
}

type UserService interface {
	Get(id string) error
}

func health(w http.ResponseWriter, r *http.Request) {}
func users(w http.ResponseWriter, r *http.Request) {
	if err != nil {
		return fmt.Errorf("load users: %w", err)
	}
}
"#;

    #[test]
    fn go_mod_wins_and_names_the_framework() {
        let stack = detect_stack(&Manifests {
            go_mod: Some("module x\n\nrequire github.com/gin-gonic/gin v1.9.1\n"),
            package_json: Some("{}"),
            ..Manifests::default()
        })
        .expect("stack");
        assert_eq!(stack.project_type, ProjectType::Go);
        assert_eq!(stack.framework, Some("gin"));
    }

    #[test]
    fn package_json_with_typescript_is_typescript() {
        let stack = detect_stack(&Manifests {
            package_json: Some(r#"{"devDependencies": {"typescript": "5", "vitest": "1"}}"#),
            ..Manifests::default()
        })
        .expect("stack");
        assert_eq!(stack.language, "typescript");
        assert_eq!(stack.framework, None);
    }

    #[test]
    fn nothing_recognizable_is_none() {
        assert_eq!(detect_stack(&Manifests::default()), None);
    }

    #[test]
    fn architecture_styles() {
        assert_eq!(
            architecture_style(&["internal/handlers", "internal/service", "internal/models"]),
            "layered"
        );
        assert_eq!(architecture_style(&["app/controllers"]), "mvc");
        assert_eq!(architecture_style(&["cmd", "pkg"]), "simple");
    }

    #[test]
    fn go_dependencies_cover_block_and_single_line_requires() {
        let go_mod = "module x\n\nrequire github.com/a/b v1.0.0\n\nrequire (\n\tgolang.org/x/sync v0.7.0\n\tgopkg.in/yaml.v3 v3.0.1\n)\n";
        assert_eq!(
            go_dependencies(go_mod),
            vec!["github.com/a/b", "golang.org/x/sync"]
        );
    }

    #[test]
    fn node_dependencies_read_both_sections() {
        let deps = node_dependencies(r#"{"dependencies": {"express": "4"}, "devDependencies": {"jest": "29"}}"#);
        assert_eq!(deps, vec!["express", "jest"]);
        assert!(node_dependencies("not json").is_empty());
    }

    #[test]
    fn go_testing_framework_needs_test_files() {
        let manifests = Manifests {
            go_mod: Some("require github.com/stretchr/testify v1.9.0"),
            ..Manifests::default()
        };
        let stack = detect_stack(&manifests).expect("stack");
        assert_eq!(testing_framework(&stack, &manifests, true), Some("testify"));
        assert_eq!(testing_framework(&stack, &manifests, false), None);
    }

    #[test]
    fn catalog_finds_go_shapes() {
        let mut catalog = PatternCatalog::default();
        catalog.scan_go("main.go", HANDLERS);
        let patterns = catalog.into_patterns();
        let keys: Vec<&str> = patterns.iter().map(|p| p.key).collect();
        assert_eq!(
            keys,
            vec!["dto_structs", "error_wrapping", "http_handlers", "service_interfaces"]
        );
        let handlers = patterns.iter().find(|p| p.key == "http_handlers").expect("handlers");
        assert_eq!(handlers.frequency, 2);
        assert_eq!(
            handlers.examples[0],
            "func health(w http.ResponseWriter, r *http.Request)"
        );
        assert_eq!(handlers.files, vec!["main.go"]);
    }

    #[test]
    fn pattern_page_elides_long_lists() {
        let pattern = Pattern {
            key: "dto_structs",
            name: "Data Transfer Objects",
            kind: "model",
            description: "d",
            examples: (0..7).map(|i| format!("type T{i}Request struct")).collect(),
            files: vec!["a.go".to_string()],
            frequency: 7,
        };
        let page = render_pattern(&pattern);
        assert!(page.contains("**Frequency**: 7 occurrences in 1 files"));
        assert!(page.contains("type T4Request struct"));
        assert!(!page.contains("type T5Request struct"));
        assert!(page.contains("...\n"));
    }

    #[test]
    fn splice_replaces_an_existing_section() {
        let first = splice_into_knowledge("# Agent Knowledge Base\n", "# Project Patterns\nold\n");
        assert!(first.starts_with("# Agent Knowledge Base\n\n<!-- crew:project-patterns:start -->"));

        let mut edited = first.clone();
        edited.push_str("\n## Learnings\n- keep handlers small\n");
        let second = splice_into_knowledge(&edited, "# Project Patterns\nnew\n");
        assert!(second.contains("new"));
        assert!(!second.contains("old"));
        assert!(second.ends_with("## Learnings\n- keep handlers small\n"));
        assert_eq!(second.matches(PATTERNS_START).count(), 1);
    }
}
