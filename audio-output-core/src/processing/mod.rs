pub mod format_map;
pub mod staging_buffer;
