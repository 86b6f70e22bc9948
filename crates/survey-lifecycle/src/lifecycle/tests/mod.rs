mod common;
mod processor;
mod scheduler;
