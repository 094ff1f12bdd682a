pub mod cdn;
pub mod config;
pub mod feed;
pub mod net;
pub mod scenario;
pub mod sim;
pub mod stats;
pub mod topo;

#[cfg(test)]
mod test;
