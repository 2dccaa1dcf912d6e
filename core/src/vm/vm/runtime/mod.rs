mod exec;
mod frame;

pub use exec::CallOutcome;
