//! Project-type inference
//!
//! Rules scoped to a project type need a tag to match against. Two sources
//! exist: marker files in the project directory, and free-text heuristics
//! over the task's own fields. Directory signals win whenever a path is
//! available; the two sources are never merged.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;

/// Infer a project-type tag from marker files in `path`.
///
/// Returns `None` when the directory carries no recognizable signal, which
/// callers treat as "no project-type rules apply".
pub fn infer_project_type(path: &Path) -> Option<String> {
    if !path.is_dir() {
        return None;
    }
    if path.join("Cargo.toml").is_file() {
        return Some("rust-crate".to_string());
    }
    if path.join("go.mod").is_file() {
        return Some("go-service".to_string());
    }
    if path.join("pyproject.toml").is_file() || path.join("requirements.txt").is_file() {
        return Some("python".to_string());
    }
    let package_json = path.join("package.json");
    if package_json.is_file() {
        return Some(classify_package_json(&package_json));
    }
    // A bare index.html with no package manifest is the single-page site case.
    if path.join("index.html").is_file() {
        return Some("landing-page".to_string());
    }
    None
}

/// Split a node project into finer tags by its dependency names. An
/// unreadable or unparseable manifest still counts as a node project.
fn classify_package_json(path: &Path) -> String {
    const FRONTEND: &[&str] = &["react", "next", "vue", "svelte", "@angular/core", "solid-js"];
    const SERVER: &[&str] = &["express", "fastify", "koa", "hono", "@nestjs/core"];
    const STATIC_SITE: &[&str] = &["astro", "@11ty/eleventy", "vitepress", "gatsby", "hugo-bin"];

    let Ok(contents) = std::fs::read_to_string(path) else {
        return "node".to_string();
    };
    let Ok(manifest) = serde_json::from_str::<Value>(&contents) else {
        return "node".to_string();
    };

    let mut dependencies: Vec<String> = Vec::new();
    for section in ["dependencies", "devDependencies"] {
        if let Some(Value::Object(map)) = manifest.get(section) {
            dependencies.extend(map.keys().cloned());
        }
    }

    let has_any = |names: &[&str]| dependencies.iter().any(|dep| names.contains(&dep.as_str()));
    if has_any(STATIC_SITE) {
        "static-site".to_string()
    } else if has_any(FRONTEND) {
        "web-app".to_string()
    } else if has_any(SERVER) {
        "api".to_string()
    } else {
        "node".to_string()
    }
}

/// Infer a project-type tag from a task's title and description. Used only
/// when the task carries no project path.
pub fn infer_project_type_from_text(title: &str, description: &str) -> Option<String> {
    let text = format!("{title} {description}").to_lowercase();
    let has = |needle: &str| text.contains(needle);

    // Most specific phrases first so "landing page for my python course"
    // lands on the page, not the language.
    if has("landing page") || has("landing-page") {
        return Some("landing-page".to_string());
    }
    if has("static site") || has("blog") || has("docs site") {
        return Some("static-site".to_string());
    }
    if has("web app") || has("webapp") || has("frontend") || has("react") || has("next.js") {
        return Some("web-app".to_string());
    }
    if has("api") || has("endpoint") || has("backend") {
        return Some("api".to_string());
    }
    if has("rust") || has("crate") || has("cargo") {
        return Some("rust-crate".to_string());
    }
    if has("golang") || has(" go ") {
        return Some("go-service".to_string());
    }
    if has("python") || has("django") || has("flask") {
        return Some("python".to_string());
    }
    None
}

/// Memoized directory inference. Marker files do not change under the daemon
/// mid-run, so one stat pass per directory is enough; negative results are
/// cached too.
#[derive(Default)]
pub struct ProjectTypeCache {
    inner: RwLock<HashMap<PathBuf, Option<String>>>,
}

impl ProjectTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_infer(&self, path: &Path) -> Option<String> {
        if let Some(cached) = self.inner.read().get(path) {
            return cached.clone();
        }
        let inferred = infer_project_type(path);
        self.inner
            .write()
            .insert(path.to_path_buf(), inferred.clone());
        inferred
    }
}
