pub mod capture;
pub mod config;
pub mod convert;
pub mod encode;
pub mod outputs;
pub mod session;

#[cfg(test)]
mod testing;
