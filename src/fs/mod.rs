//! Working directory layout, the lock file handshake, and setup locking.

pub mod lock_file;
pub mod locking;
pub mod work_dir;

pub use lock_file::{LockError, LockRecord};
pub use work_dir::{ScriptKind, WorkDir};
