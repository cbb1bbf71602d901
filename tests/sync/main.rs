//! Integration tests for the sync engine, scheduler and write path.


mod scheduler;
mod write_path;
