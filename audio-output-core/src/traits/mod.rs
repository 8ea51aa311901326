pub mod device;
pub mod output_driver;
