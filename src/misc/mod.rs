pub mod blocking_queue;
mod hashmap;

pub use hashmap::*;
