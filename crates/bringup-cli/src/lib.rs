pub mod output;
pub mod prompt;
pub mod telemetry;
