mod key;
pub use key::*;

mod address;
pub use address::*;
