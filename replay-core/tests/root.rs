mod common;

mod frame;
mod logging;
mod memory;
