pub mod loss;
pub mod optim;
pub mod scheduler;
pub mod trainer;

pub use loss::HuberLoss;
pub use optim::Adam;
pub use scheduler::ReduceLrOnPlateau;
pub use trainer::*;
