mod common;
mod contention;
