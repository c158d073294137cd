// Controller loop
pub mod run;

// Offline diagnostics
pub mod resolve;
