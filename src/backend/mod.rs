#[cfg(feature = "hardware-gpio")]
pub mod sysfs;
pub mod mock;

#[cfg(feature = "hardware-gpio")]
pub use sysfs::KernelSysfs;
pub use mock::{MockSysfs, SysfsWrite};
