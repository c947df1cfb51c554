pub mod config;
pub mod gateway;
pub mod phase;
pub mod recovery;
pub mod report;
pub mod sequencer;
pub mod step;
pub mod vault;
