mod common;
mod report;
mod tracker;
