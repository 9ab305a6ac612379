//! 프로토콜 메시지 정의
//!
//! 모든 메시지는 공백으로 구분된 한 줄짜리 텍스트 데이터그램이다.
//! 토큰은 대소문자를 구분하고 필드 위치는 고정이다.
//!
//! | 방향 | 형식 |
//! |---|---|
//! | 클라이언트 → 컨트롤 | `DOWNLOAD <filename>` |
//! | 컨트롤 → 클라이언트 | `OK <filename> SIZE <bytes> PORT <port>` |
//! | 컨트롤 → 클라이언트 | `ERR <filename> NOT_FOUND` |
//! | 클라이언트 → 워커 | `FILE <filename> GET START <start> END <end>` |
//! | 워커 → 클라이언트 | `FILE <filename> OK START <start> END <end> DATA <base64>` |
//! | 클라이언트 → 워커 | `FILE <filename> CLOSE` |
//! | 워커 → 클라이언트 | `FILE <filename> CLOSE_OK` |

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;

use crate::chunk::ByteRange;
use crate::{Error, Result};

/// 거절 사유 토큰
pub const REASON_NOT_FOUND: &str = "NOT_FOUND";

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// 다운로드 요청
    Download,

    /// 다운로드 허가
    Grant,

    /// 다운로드 거절
    Reject,

    /// 범위 요청
    Get,

    /// 범위 응답 (데이터)
    Data,

    /// 세션 종료 요청
    Close,

    /// 세션 종료 응답
    CloseOk,
}

/// 다운로드 요청 (클라이언트 → 컨트롤)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub filename: String,
}

/// 다운로드 허가 (컨트롤 → 클라이언트)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadGrant {
    pub filename: String,
    pub file_size: u64,
    pub data_port: u16,
}

/// 다운로드 거절 (컨트롤 → 클라이언트)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadError {
    pub filename: String,
    pub reason: String,
}

/// 범위 요청 (클라이언트 → 워커)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub filename: String,
    pub range: ByteRange,
}

/// 범위 응답 (워커 → 클라이언트)
///
/// 데이터는 디코딩된 원본 바이트로 보관하고
/// 직렬화할 때만 base64로 인코딩한다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReply {
    pub filename: String,
    pub range: ByteRange,
    pub data: Bytes,
}

impl ChunkReply {
    /// 직렬화된 응답의 길이 (바이트)
    ///
    /// 데이터 버퍼 크기 검증에 사용
    pub fn wire_len(filename_len: usize, start: u64, end: u64, payload_len: usize) -> usize {
        "FILE ".len()
            + filename_len
            + " OK START ".len()
            + decimal_len(start)
            + " END ".len()
            + decimal_len(end)
            + " DATA ".len()
            + base64_len(payload_len)
    }
}

/// 세션 종료 요청 (클라이언트 → 워커)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub filename: String,
}

/// 세션 종료 응답 (워커 → 클라이언트)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseAck {
    pub filename: String,
}

/// 통합 메시지 enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Download(DownloadRequest),
    Grant(DownloadGrant),
    Reject(DownloadError),
    Get(ChunkRequest),
    Data(ChunkReply),
    Close(CloseRequest),
    CloseOk(CloseAck),
}

impl Message {
    /// 메시지 타입 반환
    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::Download(_) => MessageType::Download,
            Message::Grant(_) => MessageType::Grant,
            Message::Reject(_) => MessageType::Reject,
            Message::Get(_) => MessageType::Get,
            Message::Data(_) => MessageType::Data,
            Message::Close(_) => MessageType::Close,
            Message::CloseOk(_) => MessageType::CloseOk,
        }
    }

    /// 메시지가 가리키는 파일명
    pub fn filename(&self) -> &str {
        match self {
            Message::Download(m) => &m.filename,
            Message::Grant(m) => &m.filename,
            Message::Reject(m) => &m.filename,
            Message::Get(m) => &m.filename,
            Message::Data(m) => &m.filename,
            Message::Close(m) => &m.filename,
            Message::CloseOk(m) => &m.filename,
        }
    }

    /// 이 요청에 대한 응답으로 볼 수 있는 데이터그램인지
    ///
    /// 파일명과 (GET 의 경우) 범위까지 접두어로 비교한다.
    /// 이전 요청에 대한 늦은 응답을 걸러내는 데 쓰인다.
    pub fn accepts_reply(&self, payload: &[u8]) -> bool {
        match self {
            Message::Download(m) => {
                payload.starts_with(format!("OK {} ", m.filename).as_bytes())
                    || payload.starts_with(format!("ERR {} ", m.filename).as_bytes())
            }
            Message::Get(m) => payload.starts_with(
                format!(
                    "FILE {} OK START {} END {} ",
                    m.filename, m.range.start, m.range.end
                )
                .as_bytes(),
            ),
            Message::Close(m) => std::str::from_utf8(payload)
                .map_or(false, |text| text.trim_end() == format!("FILE {} CLOSE_OK", m.filename)),
            _ => false,
        }
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// 데이터그램 파싱
    ///
    /// 토큰 수, 키워드, 숫자 필드, base64 데이터가 모두 맞아야 한다.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::Malformed("UTF-8이 아닌 데이터그램".into()))?;
        let tokens: Vec<&str> = text.split_ascii_whitespace().collect();

        match tokens.as_slice() {
            ["DOWNLOAD", filename] => Ok(Message::Download(DownloadRequest {
                filename: filename.to_string(),
            })),
            ["OK", filename, "SIZE", size, "PORT", port] => Ok(Message::Grant(DownloadGrant {
                filename: filename.to_string(),
                file_size: parse_number(size, "SIZE")?,
                data_port: parse_number(port, "PORT")?,
            })),
            ["ERR", filename, reason] => Ok(Message::Reject(DownloadError {
                filename: filename.to_string(),
                reason: reason.to_string(),
            })),
            ["FILE", filename, "GET", "START", start, "END", end] => {
                Ok(Message::Get(ChunkRequest {
                    filename: filename.to_string(),
                    range: ByteRange::new(parse_number(start, "START")?, parse_number(end, "END")?),
                }))
            }
            ["FILE", filename, "OK", "START", start, "END", end, "DATA", payload] => {
                Ok(Message::Data(ChunkReply {
                    filename: filename.to_string(),
                    range: ByteRange::new(parse_number(start, "START")?, parse_number(end, "END")?),
                    data: Bytes::from(STANDARD.decode(payload)?),
                }))
            }
            ["FILE", filename, "CLOSE"] => Ok(Message::Close(CloseRequest {
                filename: filename.to_string(),
            })),
            ["FILE", filename, "CLOSE_OK"] => Ok(Message::CloseOk(CloseAck {
                filename: filename.to_string(),
            })),
            [] => Err(Error::Malformed("빈 메시지".into())),
            [verb, ..] => Err(Error::Malformed(format!(
                "알 수 없는 형식: verb={verb}, tokens={}",
                tokens.len()
            ))),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Download(m) => write!(f, "DOWNLOAD {}", m.filename),
            Message::Grant(m) => write!(
                f,
                "OK {} SIZE {} PORT {}",
                m.filename, m.file_size, m.data_port
            ),
            Message::Reject(m) => write!(f, "ERR {} {}", m.filename, m.reason),
            Message::Get(m) => write!(
                f,
                "FILE {} GET START {} END {}",
                m.filename, m.range.start, m.range.end
            ),
            Message::Data(m) => write!(
                f,
                "FILE {} OK START {} END {} DATA {}",
                m.filename,
                m.range.start,
                m.range.end,
                STANDARD.encode(&m.data)
            ),
            Message::Close(m) => write!(f, "FILE {} CLOSE", m.filename),
            Message::CloseOk(m) => write!(f, "FILE {} CLOSE_OK", m.filename),
        }
    }
}

// 메시지별 생성자

impl DownloadRequest {
    pub fn new(filename: impl Into<String>) -> Message {
        Message::Download(Self {
            filename: filename.into(),
        })
    }
}

impl DownloadGrant {
    pub fn new(filename: impl Into<String>, file_size: u64, data_port: u16) -> Message {
        Message::Grant(Self {
            filename: filename.into(),
            file_size,
            data_port,
        })
    }
}

impl DownloadError {
    pub fn not_found(filename: impl Into<String>) -> Message {
        Message::Reject(Self {
            filename: filename.into(),
            reason: REASON_NOT_FOUND.to_string(),
        })
    }
}

impl ChunkRequest {
    pub fn new(filename: impl Into<String>, range: ByteRange) -> Message {
        Message::Get(Self {
            filename: filename.into(),
            range,
        })
    }
}

impl ChunkReply {
    pub fn new(filename: impl Into<String>, range: ByteRange, data: Bytes) -> Message {
        Message::Data(Self {
            filename: filename.into(),
            range,
            data,
        })
    }
}

impl CloseRequest {
    pub fn new(filename: impl Into<String>) -> Message {
        Message::Close(Self {
            filename: filename.into(),
        })
    }
}

impl CloseAck {
    pub fn new(filename: impl Into<String>) -> Message {
        Message::CloseOk(Self {
            filename: filename.into(),
        })
    }
}

/// 프로토콜로 주고받을 수 있는 파일명인지
///
/// 공백 없는 단일 토큰이어야 하고 경로 구분자나 `..` 를 포함할 수 없다.
pub fn is_valid_filename(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= crate::MAX_FILENAME_LEN
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}

fn parse_number<T: std::str::FromStr>(token: &str, field: &str) -> Result<T> {
    token
        .parse()
        .map_err(|_| Error::Malformed(format!("{field} 필드가 숫자가 아님: {token}")))
}

fn decimal_len(mut n: u64) -> usize {
    let mut len = 1;
    while n >= 10 {
        n /= 10;
        len += 1;
    }
    len
}

fn base64_len(n: usize) -> usize {
    (n + 2) / 3 * 4
}
