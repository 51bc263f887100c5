//! Merges the persisted app registry of a bottle with the latest executable scan.

use std::collections::{HashMap, HashSet};

use shared::domain::{DetectedApp, RegisteredApp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppSource {
    Registry,
    Scan,
    Both,
}

/// One row of the view-ready app list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEntry {
    pub exe_path: String,
    pub name: String,
    pub pinned: bool,
    pub is_priority: bool,
    pub source: AppSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciledApps {
    pub priority: Vec<AppEntry>,
    pub secondary: Vec<AppEntry>,
}

impl ReconciledApps {
    pub fn len(&self) -> usize {
        self.priority.len() + self.secondary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priority.is_empty() && self.secondary.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppEntry> {
        self.priority.iter().chain(self.secondary.iter())
    }

    pub fn find(&self, exe_path: &str) -> Option<&AppEntry> {
        self.iter().find(|entry| entry.exe_path == exe_path)
    }

    pub fn in_priority(&self, exe_path: &str) -> bool {
        self.priority.iter().any(|entry| entry.exe_path == exe_path)
    }
}

/// Builds the priority and secondary views.
///
/// Paths are compared verbatim. A path present in both sources shows up once,
/// named and flagged by its registry entry.
pub fn reconcile(registry: &[RegisteredApp], detected: &[DetectedApp]) -> ReconciledApps {
    let mut registered: HashMap<&str, &RegisteredApp> = HashMap::with_capacity(registry.len());
    for app in registry {
        registered.entry(app.exe_path.as_str()).or_insert(app);
    }
    let scan_priority: HashSet<&str> = detected
        .iter()
        .filter(|app| app.is_priority)
        .map(|app| app.exe_path.as_str())
        .collect();
    let scanned: HashSet<&str> = detected.iter().map(|app| app.exe_path.as_str()).collect();

    let mut placed: HashSet<&str> = HashSet::new();
    let mut views = ReconciledApps::default();

    for app in registry.iter().filter(|app| app.pinned) {
        if !placed.insert(app.exe_path.as_str()) {
            continue;
        }
        let path = app.exe_path.as_str();
        views.priority.push(AppEntry {
            exe_path: app.exe_path.clone(),
            name: app.name.clone(),
            pinned: true,
            is_priority: app.priority || scan_priority.contains(path),
            source: if scanned.contains(path) {
                AppSource::Both
            } else {
                AppSource::Registry
            },
        });
    }

    for app in detected.iter().filter(|app| app.is_priority) {
        if !placed.insert(app.exe_path.as_str()) {
            continue;
        }
        views
            .priority
            .push(entry_from_scan(app, registered.get(app.exe_path.as_str()).copied()));
    }

    for app in detected {
        if !placed.insert(app.exe_path.as_str()) {
            continue;
        }
        views
            .secondary
            .push(entry_from_scan(app, registered.get(app.exe_path.as_str()).copied()));
    }

    for app in registry {
        if !placed.insert(app.exe_path.as_str()) {
            continue;
        }
        views.secondary.push(AppEntry {
            exe_path: app.exe_path.clone(),
            name: app.name.clone(),
            pinned: false,
            is_priority: app.priority,
            source: AppSource::Registry,
        });
    }

    views
}

fn entry_from_scan(app: &DetectedApp, registered: Option<&RegisteredApp>) -> AppEntry {
    match registered {
        Some(entry) => AppEntry {
            exe_path: app.exe_path.clone(),
            name: entry.name.clone(),
            pinned: entry.pinned,
            is_priority: app.is_priority || entry.priority,
            source: AppSource::Both,
        },
        None => AppEntry {
            exe_path: app.exe_path.clone(),
            name: app.name.clone(),
            pinned: false,
            is_priority: app.is_priority,
            source: AppSource::Scan,
        },
    }
}

/// Latest-known registry and scan for the selected bottle, plus the merged views.
///
/// Either source can be replaced independently; the views are rebuilt from
/// whatever the other source last reported.
#[derive(Debug, Clone, Default)]
pub struct AppLibrary {
    registry: Vec<RegisteredApp>,
    detected: Vec<DetectedApp>,
    scanned: bool,
    views: ReconciledApps,
}

impl AppLibrary {
    pub fn with_registry(registry: Vec<RegisteredApp>) -> Self {
        let mut library = Self::default();
        library.apply_registry(registry);
        library
    }

    pub fn apply_registry(&mut self, registry: Vec<RegisteredApp>) {
        self.registry = registry;
        self.rebuild();
    }

    pub fn apply_scan(&mut self, detected: Vec<DetectedApp>) {
        self.detected = detected;
        self.scanned = true;
        self.rebuild();
    }

    pub fn registry(&self) -> &[RegisteredApp] {
        &self.registry
    }

    pub fn detected(&self) -> &[DetectedApp] {
        &self.detected
    }

    /// Whether at least one scan has been applied since the library was created.
    pub fn has_scan(&self) -> bool {
        self.scanned
    }

    pub fn views(&self) -> &ReconciledApps {
        &self.views
    }

    fn rebuild(&mut self) {
        self.views = reconcile(&self.registry, &self.detected);
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
