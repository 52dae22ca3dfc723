pub mod driver;
pub mod parser;
pub mod report;
pub mod runner;
pub mod smoke;
pub mod utils;

// Re-export common items
pub use parser::types::FlowDefinition;
pub use report::generate_report;
pub use runner::{run_flows, FlowRunner, RunOptions, RunResult};
