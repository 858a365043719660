mod shared;

mod delayed;
mod stats;
mod status;
mod worker;
