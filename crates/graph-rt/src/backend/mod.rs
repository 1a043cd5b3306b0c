//! Backend contract, handle bookkeeping, and the device registry.

pub mod handle;
pub mod hashing;
mod interface;
pub mod perf;
pub mod persist;
pub mod registry;
pub mod validate;

pub use handle::{BackendId, Handle, HandleTable};
pub use interface::{Backend, BackendExt, BackendOptions};
pub use perf::{PerfRecorder, PerformanceCounter};
pub use registry::{
    create_backend, create_backend_with_options, get_registered_devices, has_backend,
    register_backend,
};
