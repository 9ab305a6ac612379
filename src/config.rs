//! 프로토콜 설정

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::message::ChunkReply;
use crate::{
    Error, Result, CONTROL_BUFFER_SIZE, DATA_BUFFER_SIZE, DEFAULT_CHUNK_SIZE,
    DEFAULT_INITIAL_TIMEOUT_MS, DEFAULT_MAX_RETRIES, MAX_FILENAME_LEN,
};

/// CFP 프로토콜 설정
///
/// 서버와 클라이언트가 같은 구조체를 공유한다.
/// 각 쪽은 자신에게 필요한 필드만 읽는다.
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 크기 (원본 바이트)
    pub chunk_size: usize,

    /// 첫 요청의 응답 대기 시간 (밀리초)
    /// 재전송마다 두 배로 늘어남
    pub initial_timeout_ms: u64,

    /// 최대 시도 횟수
    pub max_retries: u32,

    /// 데이터 포트 할당 범위
    pub data_port_start: u16,
    pub data_port_end: u16,

    /// 컨트롤 메시지 수신 버퍼 크기
    pub control_buffer_size: usize,

    /// 데이터 메시지 수신 버퍼 크기
    pub data_buffer_size: usize,

    /// 동시에 진행 가능한 최대 세션 수
    pub max_sessions: usize,

    /// 워커 유휴 타임아웃 (초, 0이면 비활성화)
    pub worker_idle_timeout_secs: u64,

    /// 진행 상황 로그 간격 (청크 수)
    pub progress_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            initial_timeout_ms: DEFAULT_INITIAL_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            data_port_start: 50000,
            data_port_end: 51000,
            control_buffer_size: CONTROL_BUFFER_SIZE,
            data_buffer_size: DATA_BUFFER_SIZE,
            max_sessions: 64,
            worker_idle_timeout_secs: 30,
            progress_interval: 100,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_timeout_ms)
    }

    /// 워커 유휴 타임아웃 (비활성화 시 None)
    pub fn worker_idle_timeout(&self) -> Option<Duration> {
        if self.worker_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.worker_idle_timeout_secs))
        }
    }

    pub fn data_ports(&self) -> RangeInclusive<u16> {
        self.data_port_start..=self.data_port_end
    }

    /// 파일 크기에 대한 GET 요청 수
    pub fn chunks_for(&self, file_size: u64) -> u64 {
        let chunk = self.chunk_size as u64;
        (file_size + chunk - 1) / chunk
    }

    /// 설정 검증
    ///
    /// 최대 길이 파일명을 가진 데이터 응답이 데이터 버퍼에 들어가야 한다.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size는 0보다 커야 함".into()));
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidConfig("max_retries는 0보다 커야 함".into()));
        }
        if self.initial_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "initial_timeout_ms는 0보다 커야 함".into(),
            ));
        }
        if self.data_port_start == 0 || self.data_port_start > self.data_port_end {
            return Err(Error::InvalidConfig(format!(
                "잘못된 데이터 포트 범위: {}-{}",
                self.data_port_start, self.data_port_end
            )));
        }
        if self.max_sessions == 0 {
            return Err(Error::InvalidConfig("max_sessions는 0보다 커야 함".into()));
        }

        let worst_case = ChunkReply::wire_len(MAX_FILENAME_LEN, u64::MAX, u64::MAX, self.chunk_size);
        if worst_case > self.data_buffer_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_size {} 는 데이터 버퍼 {} bytes에 들어가지 않음 (필요: {} bytes)",
                self.chunk_size, self.data_buffer_size, worst_case
            )));
        }

        Ok(())
    }

    /// 로컬 네트워크용 설정
    pub fn lan() -> Self {
        Self {
            initial_timeout_ms: 200,
            max_retries: 5,
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            chunk_size: 512,                  // 작은 청크
            initial_timeout_ms: 1500,
            max_retries: 8,
            worker_idle_timeout_secs: 120,
            progress_interval: 50,
            ..Self::default()
        }
    }
}
