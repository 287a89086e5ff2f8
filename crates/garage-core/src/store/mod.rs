// # Entity Store Implementations
//
// In-process implementations of the external collaborator traits, used by
// the daemon in standalone mode and by tests.

pub mod memory;

pub use memory::{MemoryEntityStore, StoreSeed};
