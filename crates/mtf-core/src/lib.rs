//! # MTF Core
//!
//! 멀티 타임프레임 동기화 시스템의 핵심 타입을 제공합니다:
//! - 타임프레임 및 시리즈 식별자
//! - 샘플 / 동기화 스냅샷
//! - 타입 설정 및 검증된 변경 적용
//! - 로깅 초기화
//! - 시계 및 주기 스케줄러

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use clock::*;
pub use self::config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
