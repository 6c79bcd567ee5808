mod common;

mod concurrency;
mod load;
