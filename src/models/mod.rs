pub mod category;
pub mod worker;
pub mod engagement;
pub mod review;

pub use category::*;
pub use worker::*;
pub use engagement::*;
pub use review::*;
