pub mod config_loader;
pub mod input_map;
pub mod scene;
pub mod time;
pub mod vulkan;
