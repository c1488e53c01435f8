//! Miscellaneous common structs used throughout the library.

mod bit_string;
mod change_set;
mod id;
pub mod messages;
mod node;

pub use bit_string::*;
pub use change_set::*;
pub use id::*;
pub use messages::*;
pub use node::*;
