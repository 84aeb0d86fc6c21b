#[cfg(feature = "gpiod")]
pub mod gpiod;
pub mod mock;
pub mod sysfs;

#[cfg(feature = "gpiod")]
pub use self::gpiod::LibgpiodBackend;
pub use mock::MockGpioBackend;
pub use sysfs::SysfsBackend;
