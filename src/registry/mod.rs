//! Manager wiring guards to process types.
//!
//! A resource is supervised while both its guard and its process type are
//! registered. Removing either closes the supervisor; re-adding the missing
//! half opens a new one, which reattaches to a watcher left running by a
//! detach-on-close.
//!
//! Layout under the root:
//! - `types/<type>/` storage private to a process type
//! - `processes/<id>/` one working directory per resource

mod types;

pub use types::{
    ProcessType, ShellType, DESCRIPTION_PROPERTY, START_PROPERTY, STATUS_PROPERTY, STOP_PROPERTY,
};

use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::fs::WorkDir;
use crate::supervisor::{Guard, State, Supervisor, SupervisorConfig};
use crate::validation::validate_id;

const TYPES_DIR: &str = "types";
const PROCESSES_DIR: &str = "processes";

struct Entry {
    type_name: String,
    guard: Arc<dyn Guard>,
    detach_on_close: bool,
    supervisor: Option<Arc<Supervisor>>,
}

#[derive(Default)]
struct Inner {
    types: HashMap<String, Arc<dyn ProcessType>>,
    entries: BTreeMap<String, Entry>,
}

pub struct Manager {
    root: PathBuf,
    config: SupervisorConfig,
    inner: Mutex<Inner>,
}

impl Manager {
    pub fn new(root: impl Into<PathBuf>, config: SupervisorConfig) -> Result<Self> {
        let root = root.into();
        for dir in [TYPES_DIR, PROCESSES_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
        }
        Ok(Self {
            root,
            config,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register a process type and open every resource waiting for it
    pub fn register_type(&self, name: &str, process_type: Arc<dyn ProcessType>) -> Result<()> {
        validate_id(name)?;
        let mut inner = self.lock();
        if inner.types.contains_key(name) {
            bail!("process type '{name}' is already registered");
        }
        inner.types.insert(name.to_string(), process_type);

        let waiting: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.type_name == name && e.supervisor.is_none())
            .map(|(id, _)| id.clone())
            .collect();
        for id in waiting {
            self.open(&mut inner, &id);
        }
        Ok(())
    }

    /// Remove a process type and close every resource using it
    pub fn unregister_type(&self, name: &str) -> Result<()> {
        let closing = {
            let mut inner = self.lock();
            if inner.types.remove(name).is_none() {
                bail!("process type '{name}' is not registered");
            }
            inner
                .entries
                .values_mut()
                .filter(|e| e.type_name == name)
                .filter_map(|e| e.supervisor.take().map(|s| (s, Arc::clone(&e.guard))))
                .collect::<Vec<_>>()
        };

        let mut failures = Vec::new();
        for (supervisor, guard) in closing {
            if let Err(e) = supervisor.close() {
                failures.push(format!("{e:#}"));
            }
            if let Err(e) = guard.report_state(State::WaitingForType) {
                tracing::warn!(error = %e, "guard rejected state report");
            }
        }
        join_failures(failures)
    }

    /// Add a resource. It starts as soon as its type is registered.
    pub fn add_guard(
        &self,
        id: &str,
        type_name: &str,
        guard: Arc<dyn Guard>,
        detach_on_close: bool,
    ) -> Result<()> {
        validate_id(id)?;
        validate_id(type_name)?;

        let mut inner = self.lock();
        if inner.entries.contains_key(id) {
            bail!("resource '{id}' is already managed");
        }
        inner.entries.insert(
            id.to_string(),
            Entry {
                type_name: type_name.to_string(),
                guard: Arc::clone(&guard),
                detach_on_close,
                supervisor: None,
            },
        );

        if inner.types.contains_key(type_name) {
            self.open(&mut inner, id);
        } else {
            tracing::info!(id, type_name, "waiting for process type");
            if let Err(e) = guard.report_state(State::WaitingForType) {
                tracing::warn!(id, error = %e, "guard rejected state report");
            }
        }
        Ok(())
    }

    /// Remove a resource, closing its supervisor
    pub fn remove_guard(&self, id: &str) -> Result<()> {
        let entry = self
            .lock()
            .entries
            .remove(id)
            .with_context(|| format!("resource '{id}' is not managed"))?;
        match entry.supervisor {
            Some(supervisor) => supervisor.close(),
            None => Ok(()),
        }
    }

    /// Close every supervisor. Resources stay registered but idle.
    pub fn close_all(&self) -> Result<()> {
        let closing: Vec<Arc<Supervisor>> = self
            .lock()
            .entries
            .values_mut()
            .filter_map(|e| e.supervisor.take())
            .collect();

        let failures = closing
            .iter()
            .filter_map(|s| s.close().err())
            .map(|e| format!("{e:#}"))
            .collect();
        join_failures(failures)
    }

    pub fn supervisor(&self, id: &str) -> Option<Arc<Supervisor>> {
        self.lock()
            .entries
            .get(id)
            .and_then(|e| e.supervisor.clone())
    }

    /// Ids of all managed resources with their current state, if running
    pub fn resources(&self) -> Vec<(String, Option<State>)> {
        self.lock()
            .entries
            .iter()
            .map(|(id, e)| (id.clone(), e.supervisor.as_ref().map(|s| s.state())))
            .collect()
    }

    pub fn process_dir(&self, id: &str) -> PathBuf {
        self.root.join(PROCESSES_DIR).join(id)
    }

    fn open(&self, inner: &mut Inner, id: &str) {
        let Some(entry) = inner.entries.get(id) else {
            return;
        };
        let Some(process_type) = inner.types.get(&entry.type_name).cloned() else {
            return;
        };
        let guard = Arc::clone(&entry.guard);

        match self.build(id, entry, process_type.as_ref()) {
            Ok(supervisor) => {
                tracing::info!(id, type_name = %entry.type_name, "supervising resource");
                if let Some(entry) = inner.entries.get_mut(id) {
                    entry.supervisor = Some(supervisor);
                }
            }
            Err(e) => {
                tracing::error!(id, error = %format!("{e:#}"), "failed to open resource");
                if let Err(e) = guard.report_state(State::Failed) {
                    tracing::warn!(id, error = %e, "guard rejected state report");
                }
            }
        }
    }

    fn build(&self, id: &str, entry: &Entry, process_type: &dyn ProcessType) -> Result<Arc<Supervisor>> {
        let storage = self.root.join(TYPES_DIR).join(&entry.type_name);
        fs::create_dir_all(&storage)
            .with_context(|| format!("Failed to create {}", storage.display()))?;

        let properties = entry.guard.config_properties();
        let descriptor = process_type
            .create(&properties, &storage)
            .with_context(|| format!("Process type '{}' rejected '{id}'", entry.type_name))?;

        let work_dir = WorkDir::create(self.process_dir(id))?;
        let supervisor = Supervisor::new(
            work_dir,
            descriptor,
            Arc::clone(&entry.guard),
            self.config.clone(),
        );
        supervisor.set_detach_on_close(entry.detach_on_close);
        supervisor.start()?;
        Ok(Arc::new(supervisor))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn join_failures(failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        bail!("failed to close: {}", failures.join("; "))
    }
}
