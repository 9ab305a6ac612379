//! # CFP (Chunk Fetch Protocol)
//!
//! UDP 기반 요청/응답형 파일 다운로드 프로토콜
//!
//! ## 핵심 특징
//! - **텍스트 메시지**: 공백 구분 한 줄 데이터그램, 데이터는 base64
//! - **요청/응답 재전송**: 응답이 없으면 타임아웃을 두 배로 늘려 재전송
//! - **범위 요청**: 클라이언트가 `[start, end]` 범위를 순서대로 하나씩 요청
//! - **세션별 포트**: 다운로드마다 워커가 전용 임시 포트를 독점
//! - **세션 한도**: 동시 세션 수 제한, 유휴 워커 자동 종료

pub mod chunk;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod ports;
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;
pub mod worker;

pub use chunk::{ByteRange, Chunk, RangePlan};
pub use client::{Client, DownloadReport};
pub use config::Config;
pub use error::{Error, Result};
pub use message::{Message, MessageType};
pub use ports::{PortLease, PortPool};
pub use server::{ControlOutcome, Server};
pub use session::{SessionState, TransferSession};
pub use stats::TransferStats;
pub use transport::{Reply, Requester, RetryPolicy};
pub use worker::{TransferWorker, WorkerOutcome};

/// 기본 청크 크기 (원본 바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// 기본 초기 타임아웃 (밀리초)
pub const DEFAULT_INITIAL_TIMEOUT_MS: u64 = 1000;

/// 기본 최대 시도 횟수
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// 컨트롤 메시지 버퍼 크기
pub const CONTROL_BUFFER_SIZE: usize = 1024;

/// 데이터 메시지 버퍼 크기
pub const DATA_BUFFER_SIZE: usize = 2048;

/// 최대 파일명 길이 (바이트)
pub const MAX_FILENAME_LEN: usize = 255;
