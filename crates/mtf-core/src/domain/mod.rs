//! 동기화 도메인 모델.

mod sample;

pub use sample::*;
