//! Runtime backend registry for selecting backends by device name.
//!
//! Backend crates contribute a registrar function to [`BACKEND_REGISTRARS`]; the registrars run
//! the first time the registry is queried. Backends can also be registered explicitly with
//! [`register_backend`], e.g. from a test harness.
//!
//! Device names follow `FAMILY` or `FAMILY:<index>`. Family lookup is case-insensitive.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::{Arc, Once, OnceLock, PoisonError, RwLock};

use crate::backend::interface::{Backend, BackendOptions};
use crate::error::{Error, Result};

/// Factory invoked for every `create_backend` call on its family.
pub type BackendFactory = Arc<dyn Fn(&BackendOptions) -> Result<Arc<dyn Backend>> + Send + Sync>;

/// Registrar functions contributed by backend crates at link time.
#[linkme::distributed_slice]
pub static BACKEND_REGISTRARS: [fn()] = [..];

/// Parsed `FAMILY[:index]` device name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceName {
    pub family: String,
    pub index: Option<usize>,
}

impl DeviceName {
    pub fn parse(name: &str) -> Result<Self> {
        let (family, index) = match name.split_once(':') {
            Some((family, index)) => {
                let index = index
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| Error::NotFound(format!("backend `{name}`")))?;
                (family, Some(index))
            }
            None => (name, None),
        };
        let family = family.trim();
        if family.is_empty() {
            return Err(Error::NotFound(format!("backend `{name}`")));
        }
        Ok(DeviceName {
            family: family.to_ascii_uppercase(),
            index,
        })
    }
}

struct BackendRegistry {
    factories: RwLock<HashMap<String, BackendFactory>>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, family: String, factory: BackendFactory) {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(family, factory);
    }

    fn factory(&self, family: &str) -> Option<BackendFactory> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(family)
            .cloned()
    }

    fn families(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn contains(&self, family: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(family)
    }
}

static GLOBAL_REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();
static RUN_REGISTRARS: Once = Once::new();

fn raw_registry() -> &'static BackendRegistry {
    GLOBAL_REGISTRY.get_or_init(BackendRegistry::new)
}

thread_local! {
    static RUNNING_REGISTRARS: Cell<bool> = const { Cell::new(false) };
}

fn global_registry() -> &'static BackendRegistry {
    let registry = raw_registry();
    // Registrars call back into `register_backend`, which must not re-enter the `Once`.
    if !RUNNING_REGISTRARS.with(Cell::get) {
        RUN_REGISTRARS.call_once(|| {
            RUNNING_REGISTRARS.with(|running| running.set(true));
            for registrar in BACKEND_REGISTRARS {
                registrar();
            }
            RUNNING_REGISTRARS.with(|running| running.set(false));
        });
    }
    registry
}

/// Registers `factory` under `family`, replacing any previous factory for that family.
///
/// Link-time registrars run before the first explicit registration, so an explicit factory
/// always wins over a built-in one for the same family.
pub fn register_backend<F>(family: &str, factory: F)
where
    F: Fn(&BackendOptions) -> Result<Arc<dyn Backend>> + Send + Sync + 'static,
{
    let family = family.trim().to_ascii_uppercase();
    tracing::debug!(family = %family, "registering backend");
    global_registry().register(family, Arc::new(factory));
}

/// Creates a backend from a device name with options taken from the environment.
pub fn create_backend(name: &str) -> Result<Arc<dyn Backend>> {
    create_backend_with_options(name, BackendOptions::from_env())
}

/// Creates a backend from a device name. The index suffix of `name` overrides
/// `options.device_index`.
pub fn create_backend_with_options(
    name: &str,
    mut options: BackendOptions,
) -> Result<Arc<dyn Backend>> {
    let device = DeviceName::parse(name)?;
    if let Some(index) = device.index {
        options.device_index = index;
    }
    let factory = global_registry()
        .factory(&device.family)
        .ok_or_else(|| Error::NotFound(format!("backend `{name}`")))?;
    factory(&options).map_err(|err| {
        tracing::warn!(device = name, error = %err, "backend factory failed");
        err
    })
}

/// Registered family names, sorted.
pub fn get_registered_devices() -> Vec<String> {
    global_registry().families()
}

pub fn has_backend(name: &str) -> bool {
    DeviceName::parse(name)
        .map(|device| global_registry().contains(&device.family))
        .unwrap_or(false)
}
