//! Concrete adapters for ports that this crate chooses to implement directly (currently
//! just the checkpoint store; chat backend and spawner are left to the enclosing
//! repository).

pub mod file_checkpoint_store;

pub use file_checkpoint_store::FileCheckpointStore;
