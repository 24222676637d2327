//! Fault 분류 체계.
//!
//! 모든 감지된 실패는 종류(`FaultKind`)와 심각도(`FaultSeverity`)를 가진
//! `Fault` 레코드가 됩니다. 상태 전이는 다음과 같습니다.
//!
//! ```text
//! Reported ──> Recovering (재시도 ⇄ 백오프 대기) ──> Resolved
//!                                                └─> Escalated
//! ```
//!
//! `Resolved`/`Escalated`는 해당 발생 건의 종착 상태이며, 이후 실패는 새 ID로 기록됩니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Fault 종류 (닫힌 집합).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultKind {
    /// 업스트림 연결 불가
    Connection,
    /// 잘못되었거나 누락된 샘플
    Data,
    /// 부분/손상 전송
    Transmission,
    /// 업스트림 플랫폼 오동작
    Platform,
    /// 네트워크 장애
    Network,
    /// 잘못된 입력
    Validation,
    /// 내부 자원 고갈
    System,
}

impl FaultKind {
    /// 전체 종류.
    pub const ALL: [FaultKind; 7] = [
        FaultKind::Connection,
        FaultKind::Data,
        FaultKind::Transmission,
        FaultKind::Platform,
        FaultKind::Network,
        FaultKind::Validation,
        FaultKind::System,
    ];

    /// 전략 테이블 인덱스.
    pub(crate) const fn index(&self) -> usize {
        match self {
            FaultKind::Connection => 0,
            FaultKind::Data => 1,
            FaultKind::Transmission => 2,
            FaultKind::Platform => 3,
            FaultKind::Network => 4,
            FaultKind::Validation => 5,
            FaultKind::System => 6,
        }
    }

    /// 표시 이름.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Connection => "CONNECTION",
            FaultKind::Data => "DATA",
            FaultKind::Transmission => "TRANSMISSION",
            FaultKind::Platform => "PLATFORM",
            FaultKind::Network => "NETWORK",
            FaultKind::Validation => "VALIDATION",
            FaultKind::System => "SYSTEM",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fault 심각도. `LOW < MEDIUM < HIGH < CRITICAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FaultSeverity {
    /// 즉시 백그라운드 복구 대상인지 확인합니다.
    pub fn is_urgent(&self) -> bool {
        *self >= FaultSeverity::High
    }

    /// 표시 이름.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FaultSeverity::Low => "LOW",
            FaultSeverity::Medium => "MEDIUM",
            FaultSeverity::High => "HIGH",
            FaultSeverity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for FaultSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fault 식별자.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaultId(Uuid);

impl FaultId {
    /// 새 ID를 생성합니다.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// 내부 UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FaultId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Fault 처리 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultStatus {
    /// 보고됨, 복구 대기
    Reported,
    /// 복구 워커가 처리 중
    Recovering,
    /// 해결됨
    Resolved,
    /// 에스컬레이션됨 (운영자 조치 대기)
    Escalated,
}

impl FaultStatus {
    /// 종착 상태인지 확인합니다.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FaultStatus::Resolved | FaultStatus::Escalated)
    }
}

/// Fault 컨텍스트 키-값.
pub type FaultContext = BTreeMap<String, String>;

/// Fault 레코드.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    /// 고유 ID
    pub id: FaultId,
    /// 종류
    pub kind: FaultKind,
    /// 심각도
    pub severity: FaultSeverity,
    /// 메시지
    pub message: String,
    /// 상세 컨텍스트 (symbol, timeframe 등)
    pub context: FaultContext,
    /// 원본 에러 또는 스택 트레이스
    pub detail: Option<String>,
    /// 발생 시각
    pub created_at: DateTime<Utc>,
    /// 처리 상태
    pub status: FaultStatus,
    /// 해결 여부
    pub resolved: bool,
    /// 해결 시각
    pub resolved_at: Option<DateTime<Utc>>,
    /// 해결 메모
    pub resolution: Option<String>,
    /// 복구 시도 횟수
    pub retry_count: u32,
}

impl Fault {
    /// 컨텍스트 값 조회.
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// 요약본.
    pub fn summary(&self) -> FaultSummary {
        FaultSummary {
            id: self.id,
            kind: self.kind,
            severity: self.severity,
            message: self.message.clone(),
            created_at: self.created_at,
            status: self.status,
            retry_count: self.retry_count,
        }
    }
}

/// 보고할 Fault 명세 (빌더).
#[derive(Debug, Clone)]
pub struct NewFault {
    pub(crate) kind: FaultKind,
    pub(crate) severity: FaultSeverity,
    pub(crate) message: String,
    pub(crate) context: FaultContext,
    pub(crate) detail: Option<String>,
}

impl NewFault {
    /// 기본 심각도 MEDIUM으로 생성합니다.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: FaultSeverity::Medium,
            message: message.into(),
            context: FaultContext::new(),
            detail: None,
        }
    }

    /// 심각도 설정.
    pub fn severity(mut self, severity: FaultSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// 컨텍스트 추가.
    pub fn with_context(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// 컨텍스트 일괄 추가.
    pub fn with_contexts(mut self, context: FaultContext) -> Self {
        self.context.extend(context);
        self
    }

    /// 원본 에러 설정.
    pub fn detail(mut self, detail: impl fmt::Display) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    pub(crate) fn into_fault(self, created_at: DateTime<Utc>) -> Fault {
        Fault {
            id: FaultId::new(),
            kind: self.kind,
            severity: self.severity,
            message: self.message,
            context: self.context,
            detail: self.detail,
            created_at,
            status: FaultStatus::Reported,
            resolved: false,
            resolved_at: None,
            resolution: None,
            retry_count: 0,
        }
    }
}

/// Fault 요약 (알림/헬스 보고용).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultSummary {
    pub id: FaultId,
    pub kind: FaultKind,
    pub severity: FaultSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub status: FaultStatus,
    pub retry_count: u32,
}

/// 구독자에게 전달되는 Fault 이벤트.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FaultEvent {
    /// 새 Fault 보고
    Reported(FaultSummary),
    /// 해결
    Resolved { id: FaultId, note: String },
    /// 에스컬레이션
    Escalated(FaultSummary),
}
