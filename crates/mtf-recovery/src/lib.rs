//! # MTF Recovery
//!
//! Fault 분류와 복구 엔진:
//! - 종류/심각도 기반 Fault 레코드
//! - 종류별 재시도 전략 (지수 백오프)
//! - 백그라운드 복구 워커와 에스컬레이션
//! - 주기적 스윕 기반 헬스 판정

pub mod actions;
pub mod engine;
pub mod error;
pub mod fault;
pub mod health;
mod registry;
pub mod report;
pub mod strategy;

pub use actions::*;
pub use engine::*;
pub use error::*;
pub use fault::*;
pub use health::*;
pub use report::*;
pub use strategy::*;
