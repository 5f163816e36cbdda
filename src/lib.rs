pub mod backup;
pub mod command;
pub mod constants;
pub mod error;
pub mod fs;
pub mod interface;
pub mod logger;
pub mod mutation;
pub mod restore;
pub mod system;
#[cfg(test)]
pub(crate) mod testing;
pub mod validate;
