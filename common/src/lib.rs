// Obelisk common library - main library exports

pub mod associations;
pub mod chain;
pub mod chain_state;
pub mod checkpoint;
pub mod crypto;
pub mod hash;
pub mod messages;
pub mod settings;
pub mod types;
pub mod work;

// Flattened re-exports
pub use self::hash::Hash;
pub use self::types::*;
