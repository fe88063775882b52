//! Call-site string patterns (`app/models/user.rb:12:in 'posts'`, gem paths, ...).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static CONTROLLER_ACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"app/controllers/(.+?)#(.+)").expect("valid controller action regex"));
static CONTROLLER_METHOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"app/controllers/(.+?)\.rb.*in [`'](.+?)'").expect("valid controller method regex")
});
static MODEL_METHOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"app/models/(.+?)\.rb.*in [`'](.+?)'").expect("valid model method regex")
});
static APP_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(app/[^:]+)").expect("valid app file regex"));
static GEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"/gems/([^/]+)/").expect("valid gem regex"));
static METHOD: Lazy<Regex> = Lazy::new(|| Regex::new(r"in [`'](.+?)'").expect("valid method regex"));

/// Application directory a call site belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppLayer {
    Controllers,
    Models,
    Services,
    Jobs,
    Mailers,
    Helpers,
    Views,
    Lib,
    Other,
}

impl AppLayer {
    pub fn of(location: &str) -> Self {
        [
            ("app/controllers", AppLayer::Controllers),
            ("app/models", AppLayer::Models),
            ("app/services", AppLayer::Services),
            ("app/jobs", AppLayer::Jobs),
            ("app/mailers", AppLayer::Mailers),
            ("app/helpers", AppLayer::Helpers),
            ("app/views", AppLayer::Views),
            ("app/lib", AppLayer::Lib),
        ]
        .into_iter()
        .find(|(dir, _)| location.contains(dir))
        .map_or(AppLayer::Other, |(_, layer)| layer)
    }
}

/// `users_controller#index` style tag from an `app/controllers/...#action` location.
pub fn controller_action(location: &str) -> Option<String> {
    CONTROLLER_ACTION
        .captures(location)
        .map(|caps| format!("{}#{}", &caps[1], &caps[2]))
}

/// `(controller path, method)` from a controller frame.
pub fn controller_method(location: &str) -> Option<(&str, &str)> {
    let caps = CONTROLLER_METHOD.captures(location)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

/// `(model path, method)` from a model frame.
pub fn model_method(location: &str) -> Option<(&str, &str)> {
    let caps = MODEL_METHOD.captures(location)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

pub fn app_file(location: &str) -> Option<&str> {
    APP_FILE.captures(location)?.get(1).map(|m| m.as_str())
}

/// Library name from a `/gems/<name>-<version>/` path segment.
pub fn gem_name(location: &str) -> Option<&str> {
    let segment = GEM.captures(location)?.get(1)?.as_str();
    segment.split('-').next()
}

pub fn method_name(location: &str) -> Option<&str> {
    METHOD.captures(location)?.get(1).map(|m| m.as_str())
}

/// `admin/user_sessions` -> `Admin/user sessions`.
pub fn humanize(text: &str) -> String {
    let spaced = text.replace('_', " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
