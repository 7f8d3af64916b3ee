pub mod core;
pub mod pow;
pub mod storage;
