pub mod data;
pub mod params;
pub mod plugin;

pub use data::{DataError, DataItem, FieldKind, FieldValue};
pub use params::PluginParams;
pub use plugin::{InputPlugin, LogLevel, OutputPlugin, Plugin, PluginDescriptor, PluginError, PluginType, ProcessPlugin};
