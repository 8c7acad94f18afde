// Linux platform implementations

#[cfg(target_os = "linux")]
pub mod shm;

#[cfg(target_os = "linux")]
pub mod screencopy;

#[cfg(target_os = "linux")]
pub mod screen;
