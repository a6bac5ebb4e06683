//! Project knowledge on disk: the agents' knowledge file and the pattern
//! documents written by `crew init-project`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::core::patterns::{
    Manifests, PatternCatalog, ProjectAnalysis, architecture_style, detect_stack, go_dependencies,
    node_dependencies, python_dependencies, render_overview, render_pattern, splice_into_knowledge,
    testing_framework,
};
use crate::core::types::ProjectType;
use crate::io::workspace::Capabilities;

pub const KNOWLEDGE_PATH: &str = "agents/AGENTS.md";
pub const LEGACY_KNOWLEDGE_PATH: &str = "AGENTS.md";
pub const KNOWLEDGE_SEED: &str = "# Agent Knowledge Base\n\nMaintained by the engineering manager to carry context and learnings between tasks.\n";
pub const PATTERNS_PATH: &str = "agents/PROJECT_PATTERNS.md";
pub const PATTERNS_DIR: &str = "agents/patterns";

/// The knowledge file and its path, preferring `agents/AGENTS.md`.
pub fn read_knowledge(workspace: &dyn Capabilities) -> Option<(&'static str, String)> {
    [KNOWLEDGE_PATH, LEGACY_KNOWLEDGE_PATH]
        .into_iter()
        .find_map(|path| workspace.read_file(path).ok().map(|text| (path, text)))
}

/// Result of `crew init-project`.
#[derive(Debug, Serialize)]
pub struct Initialized {
    pub analysis: ProjectAnalysis,
    pub files_written: Vec<String>,
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0 && {
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || name == "vendor" || name == "node_modules"
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Detect the stack, layout and recurring code shapes of the working directory.
#[instrument(skip_all, fields(workdir = %workspace.workdir().display()))]
pub fn analyze(workspace: &dyn Capabilities) -> Result<ProjectAnalysis> {
    let go_mod = workspace.read_file("go.mod").ok();
    let package_json = workspace.read_file("package.json").ok();
    let requirements_txt = workspace.read_file("requirements.txt").ok();
    let pyproject_toml = workspace.read_file("pyproject.toml").ok();
    let manifests = Manifests {
        go_mod: go_mod.as_deref(),
        package_json: package_json.as_deref(),
        requirements_txt: requirements_txt.as_deref(),
        pyproject_toml: pyproject_toml.as_deref(),
    };
    let Some(stack) = detect_stack(&manifests) else {
        bail!(
            "unable to detect project type: no go.mod, package.json, requirements.txt or pyproject.toml"
        );
    };
    debug!(language = stack.language, framework = ?stack.framework, "stack detected");

    let root = workspace.workdir();
    let mut directories = Vec::new();
    let mut catalog = PatternCatalog::default();
    let mut has_go_tests = false;
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e));
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if entry.depth() == 0 {
            continue;
        }
        let path = relative(root, entry.path());
        if entry.file_type().is_dir() {
            directories.push(path);
            continue;
        }
        if stack.project_type != ProjectType::Go || !path.ends_with(".go") {
            continue;
        }
        has_go_tests |= path.ends_with("_test.go");
        match workspace.read_file(&path) {
            Ok(source) => catalog.scan_go(&path, &source),
            Err(e) => debug!(path = %path, err = %format!("{e:#}"), "skipping unreadable source"),
        }
    }

    let entry_points = match stack.project_type {
        ProjectType::Go => ["main.go", "cmd/main.go"]
            .into_iter()
            .filter(|p| workspace.read_file(p).is_ok())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    let mut dependencies = manifests.go_mod.map(go_dependencies).unwrap_or_default();
    dependencies.extend(manifests.package_json.map(node_dependencies).unwrap_or_default());
    dependencies.extend(
        manifests
            .requirements_txt
            .map(python_dependencies)
            .unwrap_or_default(),
    );

    Ok(ProjectAnalysis {
        testing_framework: testing_framework(&stack, &manifests, has_go_tests),
        architecture: architecture_style(&directories),
        stack,
        directories,
        entry_points,
        patterns: catalog.into_patterns(),
        dependencies,
    })
}

/// Analyze the project and record what was found: the overview, one page
/// per pattern, and a marked overview section in the knowledge file.
#[instrument(skip_all)]
pub fn initialize(workspace: &dyn Capabilities) -> Result<Initialized> {
    let analysis = analyze(workspace)?;
    let overview = render_overview(&analysis);
    let mut files_written = Vec::new();

    workspace.write_file(PATTERNS_PATH, &overview)?;
    files_written.push(PATTERNS_PATH.to_string());
    for pattern in &analysis.patterns {
        let path = format!("{PATTERNS_DIR}/{}.md", pattern.key);
        workspace.write_file(&path, &render_pattern(pattern))?;
        files_written.push(path);
    }

    let (path, knowledge) =
        read_knowledge(workspace).unwrap_or((KNOWLEDGE_PATH, KNOWLEDGE_SEED.to_string()));
    workspace.write_file(path, &splice_into_knowledge(&knowledge, &overview))?;
    files_written.push(path.to_string());

    info!(
        patterns = analysis.patterns.len(),
        files = files_written.len(),
        "project patterns recorded"
    );
    Ok(Initialized {
        analysis,
        files_written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::patterns::PATTERNS_START;
    use crate::io::workspace::Workspace;
    use crate::test_support::temp_workspace;

    fn go_project(workspace: &Workspace) {
        let files = [
            (
                "go.mod",
                "module example.com/shop\n\ngo 1.22\n\nrequire (\n\tgithub.com/gorilla/mux v1.8.1\n\tgithub.com/stretchr/testify v1.9.0\n)\n",
            ),
            (
                "main.go",
                "package main\n\nimport \"net/http\"\n\nfunc main() {}\n",
            ),
            (
                "internal/handlers/orders.go",
                "package handlers\n\nfunc ListOrders(w http.ResponseWriter, r *http.Request) {}\n\nfunc GetOrder(w http.ResponseWriter, r *http.Request) {\n\treturn fmt.Errorf(\"get order: %w\", err)\n}\n",
            ),
            (
                "internal/service/orders.go",
                "package service\n\ntype OrderService interface {\n\tList() error\n}\n",
            ),
            (
                "internal/models/order.go",
                "package models\n\ntype OrderResponse struct {\n\tID string\n}\n",
            ),
            (
                "internal/handlers/orders_test.go",
                "package handlers\n",
            ),
            (
                "vendor/github.com/x/y/y.go",
                "package y\n\ntype VendoredService interface {}\n",
            ),
        ];
        for (path, content) in files {
            workspace.write_file(path, content).expect("write");
        }
    }

    #[test]
    fn analyze_reads_a_layered_go_project() {
        let (_temp, workspace) = temp_workspace();
        go_project(&workspace);

        let analysis = analyze(&workspace).expect("analyze");
        assert_eq!(analysis.stack.project_type, ProjectType::Go);
        assert_eq!(analysis.stack.framework, Some("gorilla"));
        assert_eq!(analysis.architecture, "layered");
        assert_eq!(analysis.testing_framework, Some("testify"));
        assert_eq!(analysis.entry_points, vec!["main.go"]);
        assert_eq!(
            analysis.dependencies,
            vec!["github.com/gorilla/mux", "github.com/stretchr/testify"]
        );
        assert!(!analysis.directories.iter().any(|d| d.starts_with("vendor")));

        let handlers = analysis
            .patterns
            .iter()
            .find(|p| p.key == "http_handlers")
            .expect("handlers");
        assert_eq!(handlers.frequency, 2);
        assert_eq!(handlers.files, vec!["internal/handlers/orders.go"]);
        let services = analysis
            .patterns
            .iter()
            .find(|p| p.key == "service_interfaces")
            .expect("services");
        assert_eq!(services.files, vec!["internal/service/orders.go"]);
    }

    #[test]
    fn directory_without_manifest_is_an_error() {
        let (_temp, workspace) = temp_workspace();
        workspace.write_file("notes.txt", "hi").expect("write");
        let err = analyze(&workspace).expect_err("no manifest");
        assert!(err.to_string().contains("unable to detect project type"));
    }

    #[test]
    fn initialize_writes_documents_and_keeps_existing_knowledge() {
        let (_temp, workspace) = temp_workspace();
        go_project(&workspace);
        workspace
            .write_file(KNOWLEDGE_PATH, "# Agent Knowledge Base\n\n- orders are paginated\n")
            .expect("knowledge");

        let first = initialize(&workspace).expect("initialize");
        assert_eq!(first.files_written[0], PATTERNS_PATH);
        assert!(
            first
                .files_written
                .contains(&"agents/patterns/dto_structs.md".to_string())
        );
        assert_eq!(first.files_written.last().map(String::as_str), Some(KNOWLEDGE_PATH));

        let overview = workspace.read_file(PATTERNS_PATH).expect("overview");
        assert!(overview.contains("- **Architecture**: layered"));
        assert!(overview.contains("### Standard HTTP Handlers"));
        let page = workspace
            .read_file("agents/patterns/http_handlers.md")
            .expect("page");
        assert!(page.contains("func ListOrders(w http.ResponseWriter, r *http.Request)"));

        initialize(&workspace).expect("initialize again");
        let knowledge = workspace.read_file(KNOWLEDGE_PATH).expect("knowledge");
        assert!(knowledge.contains("- orders are paginated"));
        assert_eq!(knowledge.matches(PATTERNS_START).count(), 1);
        assert!(knowledge.contains("- **Framework**: gorilla"));
    }

    #[test]
    fn read_knowledge_falls_back_to_the_legacy_file() {
        let (_temp, workspace) = temp_workspace();
        assert!(read_knowledge(&workspace).is_none());
        workspace
            .write_file(LEGACY_KNOWLEDGE_PATH, "# Notes\n")
            .expect("write");
        assert_eq!(
            read_knowledge(&workspace),
            Some((LEGACY_KNOWLEDGE_PATH, "# Notes\n".to_string()))
        );
    }
}
