/*!
    register-level access to a remote microcontroller over a uart link.

    - [mask] translates between right-aligned values and arbitrary bit subsets of a register word
    - [command] is the wire codec: request framing, response validation and checksum
    - [session] owns the link and exposes typed register accesses
    - [recorder] captures a trace of accesses and compiles it to plain C memory operations
*/

mod utils;
mod error;

pub mod mask;
pub mod command;
pub mod registers;
pub mod recorder;
pub mod session;

pub use error::Error;
