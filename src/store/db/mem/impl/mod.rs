mod execution;
mod log;
mod workflow;
