pub mod cancel;
pub mod io;
pub mod limits;
pub mod varint;
