mod encoded;
pub use encoded::*;

mod encoder;
pub use encoder::*;

mod decoder;
pub use decoder::*;

mod lazy;
pub use lazy::*;
