pub mod fixtures;
pub mod observer;
pub mod temp;
