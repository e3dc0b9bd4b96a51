/*
┌──────────── flow file ────────────┐
│ input / process[] / output        │
└────────────────┬──────────────────┘
                 │ (type, plugin name, params)
                 ▼
┌──────────── PluginRegistry ───────┐
│ name → constructor, per type      │
│ builds Box<dyn *Plugin>           │
└────────────────┬──────────────────┘
                 ▼
        Flow { input, process, output }
*/

pub mod log_output;
pub mod manager;
pub mod regexpmatch;
pub mod static_input;

pub use log_output::LogOutput;
pub use manager::{PluginContext, PluginRegistry};
pub use regexpmatch::RegexpMatch;
pub use static_input::StaticInput;
