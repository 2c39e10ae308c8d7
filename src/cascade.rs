use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};

use crate::domain::LoadError;
use crate::filters::SelectOption;
use crate::search::OptionLoader;

type Children = Arc<Vec<SelectOption>>;
type ChildrenResult = Result<Children, LoadError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    NotLoaded,
    Loading,
    Loaded,
    Failed,
}

// Result slot shared by the loading caller and everyone waiting on it.
#[derive(Default)]
struct InFlight {
    result: Mutex<Option<ChildrenResult>>,
    ready: Condvar,
}

impl InFlight {
    fn finish(&self, result: ChildrenResult) {
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(result);
        self.ready.notify_all();
    }

    fn wait(&self) -> ChildrenResult {
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

enum Entry {
    Loading(Arc<InFlight>),
    Loaded(Children),
    Failed,
}

/// Lazily loads and caches the children of each parent of one cascade field.
///
/// At most one `load_children` call runs per parent; concurrent selections of
/// a loading parent wait for that call. Failures are handed to all waiters but
/// never cached, so the next selection retries.
pub struct CascadeResolver {
    field: String,
    loader: Arc<dyn OptionLoader>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl CascadeResolver {
    pub fn new(field: impl Into<String>, loader: Arc<dyn OptionLoader>) -> Self {
        Self {
            field: field.into(),
            loader,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self, parent: &str) -> EntryState {
        match self.entries().get(parent) {
            None => EntryState::NotLoaded,
            Some(Entry::Loading(_)) => EntryState::Loading,
            Some(Entry::Loaded(_)) => EntryState::Loaded,
            Some(Entry::Failed) => EntryState::Failed,
        }
    }

    pub fn cached(&self, parent: &str) -> Option<Children> {
        match self.entries().get(parent) {
            Some(Entry::Loaded(children)) => Some(Arc::clone(children)),
            _ => None,
        }
    }

    /// Children of `parent`, loading them on first use.
    pub fn select(&self, parent: &str) -> ChildrenResult {
        let flight = {
            let mut entries = self.entries();
            let in_flight = match entries.get(parent) {
                Some(Entry::Loaded(children)) => return Ok(Arc::clone(children)),
                Some(Entry::Loading(flight)) => Some(Arc::clone(flight)),
                None | Some(Entry::Failed) => None,
            };
            if let Some(flight) = in_flight {
                drop(entries);
                trace!("Waiting for in-flight children of {}", parent);
                return flight.wait();
            }
            let flight = Arc::new(InFlight::default());
            entries.insert(parent.to_string(), Entry::Loading(Arc::clone(&flight)));
            flight
        };

        debug!("Loading children of {} for {}", parent, self.field);
        let result = self
            .loader
            .load_children(&self.field, parent)
            .map(Arc::new);

        {
            let mut entries = self.entries();
            let entry = match &result {
                Ok(children) => Entry::Loaded(Arc::clone(children)),
                Err(e) => {
                    warn!("Loading children of {} failed: {}", parent, e);
                    Entry::Failed
                }
            };
            entries.insert(parent.to_string(), entry);
        }
        flight.finish(result.clone());
        result
    }
}
