//! 에러 타입 정의

use thiserror::Error;

/// CFP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("base64 디코딩 에러: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("파일 없음: {filename}")]
    NotFound { filename: String },

    #[error("응답 없음: {attempts}회 시도 후 타임아웃")]
    Timeout { attempts: u32 },

    #[error("잘못된 메시지: {0}")]
    Malformed(String),

    #[error("유효하지 않은 범위: start={start}, end={end}, file_size={file_size}")]
    RangeInvalid { start: u64, end: u64, file_size: u64 },

    #[error("응답이 데이터그램 한도 초과: range={range_len} bytes, max={max} bytes")]
    ReplyTooLarge { range_len: u64, max: usize },

    #[error("사용 가능한 데이터 포트 없음")]
    PortsExhausted,

    #[error("동시 세션 한도 초과: max={max}")]
    SessionLimit { max: usize },

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// 재전송 없이 즉시 실패해야 하는 전송 계층 에러인지
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
