pub mod ident;
pub mod logging;
