pub mod layers;
pub mod network;

pub use layers::{Linear, LinearGrad};
pub use network::*;
