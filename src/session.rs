//! 전송 세션 상태 머신 (클라이언트측)
//!
//! NEGOTIATING → TRANSFERRING → CLOSING → CLOSED
//! 어느 상태에서든 FAILED 로 갈 수 있다.
//!
//! 네트워크 IO 는 하지 않는다. 클라이언트 루프가 요청/응답을 주고받고
//! 받은 메시지를 이 상태 머신에 넣어 다음 행동을 결정한다.

use std::fmt;
use std::net::SocketAddr;

use tracing::debug;

use crate::chunk::{ByteRange, Chunk};
use crate::message::Message;
use crate::{Error, Result};

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Negotiating,
    Transferring,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Negotiating => "NEGOTIATING",
            SessionState::Transferring => "TRANSFERRING",
            SessionState::Closing => "CLOSING",
            SessionState::Closed => "CLOSED",
            SessionState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// 파일 하나의 전송 세션
#[derive(Debug)]
pub struct TransferSession {
    filename: String,
    chunk_size: usize,
    file_size: u64,
    cursor: u64,
    data_addr: Option<SocketAddr>,
    state: SessionState,
}

impl TransferSession {
    pub fn new(filename: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            filename: filename.into(),
            chunk_size,
            file_size: 0,
            cursor: 0,
            data_addr: None,
            state: SessionState::Negotiating,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// 워커의 데이터 엔드포인트 (허가 후에만 존재)
    pub fn data_addr(&self) -> Option<SocketAddr> {
        self.data_addr
    }

    /// 모든 바이트를 받았는지
    ///
    /// CLOSE 가 실패해도 데이터가 다 왔으면 완료로 본다.
    pub fn is_complete(&self) -> bool {
        self.data_addr.is_some() && self.cursor == self.file_size
    }

    fn transition(&mut self, to: SessionState) {
        debug!("{}: {} -> {}", self.filename, self.state, to);
        self.state = to;
    }

    /// 에러와 함께 FAILED 로 전이
    pub fn fail(&mut self, error: Error) -> Error {
        self.transition(SessionState::Failed);
        error
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state != expected {
            return Err(Error::Malformed(format!(
                "{}: 현재 상태 {}, 필요한 상태 {}",
                self.filename, self.state, expected
            )));
        }
        Ok(())
    }

    /// 협상 응답 처리
    ///
    /// 허가를 받으면 크기와 데이터 엔드포인트를 기록한다.
    /// 데이터 포트는 컨트롤 서버와 같은 호스트에 있다.
    pub fn on_negotiation(&mut self, reply: Message, control_addr: SocketAddr) -> Result<()> {
        self.expect_state(SessionState::Negotiating)?;

        match reply {
            Message::Grant(grant) if grant.filename == self.filename => {
                self.file_size = grant.file_size;
                self.data_addr = Some(SocketAddr::new(control_addr.ip(), grant.data_port));
                if grant.file_size == 0 {
                    self.transition(SessionState::Closing);
                } else {
                    self.transition(SessionState::Transferring);
                }
                Ok(())
            }
            Message::Reject(reject) if reject.filename == self.filename => {
                Err(self.fail(Error::NotFound {
                    filename: reject.filename,
                }))
            }
            other => Err(self.fail(Error::Malformed(format!(
                "{}: 예상하지 못한 협상 응답: {}",
                self.filename,
                describe(&other)
            )))),
        }
    }

    /// 다음에 요청할 범위
    pub fn next_range(&self) -> Option<ByteRange> {
        if self.state != SessionState::Transferring {
            return None;
        }
        ByteRange::next(self.cursor, self.chunk_size, self.file_size)
    }

    /// 청크 응답 처리
    ///
    /// 파일명, 시작/끝 오프셋, 데이터 길이가 요청과 정확히 일치해야 한다.
    pub fn on_chunk(&mut self, requested: ByteRange, reply: Message) -> Result<Chunk> {
        self.expect_state(SessionState::Transferring)?;

        let reply = match reply {
            Message::Data(reply) => reply,
            other => {
                return Err(self.fail(Error::Malformed(format!(
                    "{}: 데이터 응답이 아님: {}",
                    self.filename,
                    describe(&other)
                ))))
            }
        };

        if reply.filename != self.filename {
            return Err(self.fail(Error::Malformed(format!(
                "파일명 불일치: expected {}, got {}",
                self.filename, reply.filename
            ))));
        }
        if reply.range != requested || requested.start != self.cursor {
            return Err(self.fail(Error::Malformed(format!(
                "{}: 범위 불일치: requested {}-{}, got {}-{}",
                self.filename, requested.start, requested.end, reply.range.start, reply.range.end
            ))));
        }
        if let Err(e) = reply.range.validate(self.file_size) {
            return Err(self.fail(e));
        }

        let chunk = Chunk::new(reply.range, reply.data);
        if !chunk.is_consistent() {
            return Err(self.fail(Error::Malformed(format!(
                "{}: 데이터 길이 불일치: range={} bytes, data={} bytes",
                self.filename,
                chunk.range.len(),
                chunk.data.len()
            ))));
        }

        self.cursor += chunk.data.len() as u64;
        if self.cursor == self.file_size {
            self.transition(SessionState::Closing);
        }
        Ok(chunk)
    }

    /// CLOSE 응답 처리
    pub fn on_close(&mut self, reply: Message) -> Result<()> {
        self.expect_state(SessionState::Closing)?;

        match reply {
            Message::CloseOk(ack) if ack.filename == self.filename => {
                self.transition(SessionState::Closed);
                Ok(())
            }
            other => Err(self.fail(Error::Malformed(format!(
                "{}: 예상하지 못한 종료 응답: {}",
                self.filename,
                describe(&other)
            )))),
        }
    }
}

fn describe(message: &Message) -> String {
    format!("{:?} ({})", message.msg_type(), message.filename())
}
