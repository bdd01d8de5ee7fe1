mod support;

mod concurrency;
mod durability;
mod facilities;
mod nesting;
