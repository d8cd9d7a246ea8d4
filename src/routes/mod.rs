pub mod engagement;
pub mod matching;
pub mod quote;
pub mod review;
pub mod worker;
