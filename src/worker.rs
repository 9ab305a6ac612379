//! 전송 워커 (서버측)
//!
//! - 파일 하나, 임시 포트 하나를 세션 동안 독점
//! - GET 요청마다 실제 파일 길이로 범위 검증 후 해당 범위만 읽어 응답
//! - 응답이 데이터 버퍼 크기를 넘는 범위는 읽기 전에 버림
//! - 잘못된 요청은 응답 없이 버림 (내부적으로는 Dropped 로 기록)
//! - CLOSE 를 받으면 CLOSE_OK 응답 후 종료
//! - 유휴 타임아웃이 지나면 스스로 종료

use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::chunk::ByteRange;
use crate::message::{ChunkReply, CloseAck, Message};
use crate::ports::PortLease;
use crate::{Config, Error, Result};

/// 요청 하나의 처리 결과
#[derive(Debug)]
pub enum WorkerOutcome {
    /// 범위를 읽어 응답함
    Served { range: ByteRange, reply: Message },

    /// CLOSE 처리, 워커 종료
    Closed { reply: Message },

    /// 응답 없이 버림
    Dropped(Error),
}

impl WorkerOutcome {
    /// 클라이언트에 보낼 응답
    pub fn reply(&self) -> Option<&Message> {
        match self {
            WorkerOutcome::Served { reply, .. } | WorkerOutcome::Closed { reply } => Some(reply),
            WorkerOutcome::Dropped(_) => None,
        }
    }
}

/// 워커 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Closed,
    IdleTimeout,
}

/// 워커 종료 시 요약
#[derive(Debug, Clone)]
pub struct WorkerSummary {
    pub filename: String,
    pub port: u16,
    pub chunks_served: u64,
    pub bytes_served: u64,
    pub dropped: u64,

    /// 응답 전송에 실패한 횟수
    pub send_failures: u64,

    /// 무시하고 넘어간 수신 에러 횟수
    pub recv_errors: u64,

    pub exit: WorkerExit,
}

/// 전송 워커
pub struct TransferWorker {
    filename: String,
    file: File,
    socket: UdpSocket,
    idle_timeout: Option<Duration>,
    recv_buffer_size: usize,

    /// 응답 데이터그램 최대 크기
    max_reply_len: usize,

    chunks_served: u64,
    bytes_served: u64,
    dropped: u64,
    send_failures: u64,
    recv_errors: u64,

    /// 워커가 끝날 때 포트 반납
    lease: Option<PortLease>,
}

impl TransferWorker {
    /// 바인딩된 소켓과 파일로 워커 생성
    pub async fn open(
        path: &Path,
        filename: impl Into<String>,
        socket: UdpSocket,
        config: &Config,
    ) -> Result<Self> {
        let file = File::open(path).await?;

        Ok(Self {
            filename: filename.into(),
            file,
            socket,
            idle_timeout: config.worker_idle_timeout(),
            recv_buffer_size: config.data_buffer_size,
            max_reply_len: config.data_buffer_size,
            chunks_served: 0,
            bytes_served: 0,
            dropped: 0,
            send_failures: 0,
            recv_errors: 0,
            lease: None,
        })
    }

    /// 점유한 포트를 워커 수명에 묶음
    pub fn with_lease(mut self, lease: PortLease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 현재 파일 길이
    pub async fn file_size(&self) -> Result<u64> {
        Ok(self.file.metadata().await?.len())
    }

    /// 데이터그램 하나 처리
    pub async fn handle(&mut self, datagram: &[u8]) -> WorkerOutcome {
        let message = match Message::parse(datagram) {
            Ok(message) => message,
            Err(e) => return WorkerOutcome::Dropped(e),
        };

        if message.filename() != self.filename {
            return WorkerOutcome::Dropped(Error::Malformed(format!(
                "다른 파일에 대한 요청: {} (serving {})",
                message.filename(),
                self.filename
            )));
        }

        match message {
            Message::Get(request) => match self.read_range(request.range).await {
                Ok(data) => WorkerOutcome::Served {
                    range: request.range,
                    reply: ChunkReply::new(self.filename.clone(), request.range, data),
                },
                Err(e) => WorkerOutcome::Dropped(e),
            },
            Message::Close(_) => WorkerOutcome::Closed {
                reply: CloseAck::new(self.filename.clone()),
            },
            other => WorkerOutcome::Dropped(Error::Malformed(format!(
                "워커가 처리하지 않는 메시지: {:?}",
                other.msg_type()
            ))),
        }
    }

    /// 검증된 범위를 파일에서 정확히 읽음
    async fn read_range(&mut self, range: ByteRange) -> Result<Bytes> {
        let file_size = self.file_size().await?;
        range.validate(file_size)?;
        self.check_reply_fits(range)?;

        let mut buf = vec![0u8; range.len() as usize];
        self.file.seek(SeekFrom::Start(range.start)).await?;
        self.file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// 인코딩된 응답이 데이터그램 하나에 들어가는지 (버퍼 할당 전에 확인)
    fn check_reply_fits(&self, range: ByteRange) -> Result<()> {
        let reply_len = match usize::try_from(range.len()) {
            Ok(len) if len <= self.max_reply_len => {
                ChunkReply::wire_len(self.filename.len(), range.start, range.end, len)
            }
            _ => usize::MAX,
        };

        if reply_len > self.max_reply_len {
            return Err(Error::ReplyTooLarge {
                range_len: range.len(),
                max: self.max_reply_len,
            });
        }
        Ok(())
    }

    /// 요청 처리 루프
    ///
    /// CLOSE 또는 유휴 타임아웃까지 실행된다.
    /// 수신 에러는 컨트롤 루프와 마찬가지로 로그만 남기고 계속한다.
    pub async fn run(mut self) -> Result<WorkerSummary> {
        let port = self.local_addr()?.port();
        let mut buf = vec![0u8; self.recv_buffer_size];

        debug!("Worker for {} serving on port {}", self.filename, port);

        let exit = loop {
            let received = match self.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, self.socket.recv_from(&mut buf)).await {
                    Ok(result) => result,
                    Err(_) => {
                        info!(
                            "Worker for {} idle for {:?}, shutting down port {}",
                            self.filename, idle, port
                        );
                        break WorkerExit::IdleTimeout;
                    }
                },
                None => self.socket.recv_from(&mut buf).await,
            };
            let (len, from) = match received {
                Ok(received) => received,
                Err(e) => {
                    self.recv_errors += 1;
                    warn!("수신 에러 (port {}): {}", port, e);
                    continue;
                }
            };

            let outcome = self.handle(&buf[..len]).await;

            let delivered = match outcome.reply() {
                Some(reply) => match self.socket.send_to(&reply.to_bytes(), from).await {
                    Ok(_) => true,
                    Err(e) => {
                        self.send_failures += 1;
                        warn!("응답 전송 실패 ({}): {}", from, e);
                        false
                    }
                },
                None => false,
            };

            match outcome {
                WorkerOutcome::Served { range, .. } => {
                    if delivered {
                        self.chunks_served += 1;
                        self.bytes_served += range.len();
                    }
                }
                WorkerOutcome::Closed { .. } => break WorkerExit::Closed,
                WorkerOutcome::Dropped(reason) => {
                    self.dropped += 1;
                    debug!("Dropped request from {} on port {}: {}", from, port, reason);
                }
            }
        };

        Ok(WorkerSummary {
            filename: self.filename,
            port,
            chunks_served: self.chunks_served,
            bytes_served: self.bytes_served,
            dropped: self.dropped,
            send_failures: self.send_failures,
            recv_errors: self.recv_errors,
            exit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn worker_for(content: &[u8], idle_secs: u64) -> (tempfile::NamedTempFile, TransferWorker) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            worker_idle_timeout_secs: idle_secs,
            ..Config::default()
        };
        let worker = TransferWorker::open(file.path(), "greeting.txt", socket, &config)
            .await
            .unwrap();
        (file, worker)
    }

    const GREETING: &[u8] = b"Hello, this is a test file.";

    #[tokio::test]
    async fn test_serves_exact_range() {
        let (_file, mut worker) = worker_for(GREETING, 0).await;

        let outcome = worker.handle(b"FILE greeting.txt GET START 7 END 10").await;
        match outcome {
            WorkerOutcome::Served { range, reply } => {
                assert_eq!(range, ByteRange::new(7, 10));
                match reply {
                    Message::Data(data) => assert_eq!(data.data.as_ref(), b"this"),
                    other => panic!("unexpected reply: {other:?}"),
                }
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_drops_invalid_ranges() {
        let (_file, mut worker) = worker_for(GREETING, 0).await;
        let size = GREETING.len();

        let requests = [
            format!("FILE greeting.txt GET START 10 END 5"),
            format!("FILE greeting.txt GET START 0 END {size}"),
            format!("FILE greeting.txt GET START {size} END {size}"),
            format!("FILE greeting.txt GET START -1 END 5"),
            format!("FILE other.txt GET START 0 END 5"),
            format!("FILE greeting.txt PUT START 0 END 5"),
            format!("DOWNLOAD greeting.txt"),
        ];

        for request in &requests {
            let outcome = worker.handle(request.as_bytes()).await;
            assert!(
                matches!(outcome, WorkerOutcome::Dropped(_)),
                "should drop: {request}"
            );
            assert!(outcome.reply().is_none());
        }

        match worker.handle(b"FILE greeting.txt GET START 10 END 5").await {
            WorkerOutcome::Dropped(Error::RangeInvalid { file_size, .. }) => {
                assert_eq!(file_size, size as u64)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_replies_and_ends_loop() {
        let (_file, worker) = worker_for(GREETING, 0).await;
        let worker_addr = worker.local_addr().unwrap();
        let task = tokio::spawn(worker.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 2048];

        // 잘못된 범위는 응답 없음
        client
            .send_to(b"FILE greeting.txt GET START 0 END 99", worker_addr)
            .await
            .unwrap();
        let silent = tokio::time::timeout(Duration::from_millis(100), client.recv_from(&mut buf)).await;
        assert!(silent.is_err());

        client
            .send_to(b"FILE greeting.txt GET START 0 END 26", worker_addr)
            .await
            .unwrap();
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        match Message::parse(&buf[..len]).unwrap() {
            Message::Data(reply) => assert_eq!(reply.data.as_ref(), GREETING),
            other => panic!("unexpected reply: {other:?}"),
        }

        client
            .send_to(b"FILE greeting.txt CLOSE", worker_addr)
            .await
            .unwrap();
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"FILE greeting.txt CLOSE_OK");

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.exit, WorkerExit::Closed);
        assert_eq!(summary.chunks_served, 1);
        assert_eq!(summary.bytes_served, GREETING.len() as u64);
        assert_eq!(summary.dropped, 1);
    }

    #[tokio::test]
    async fn test_drops_range_larger_than_datagram() {
        let content = vec![0x5Au8; 5_000_000];
        let (_file, mut worker) = worker_for(&content, 0).await;

        match worker.handle(b"FILE greeting.txt GET START 0 END 4999999").await {
            WorkerOutcome::Dropped(Error::ReplyTooLarge { range_len, max }) => {
                assert_eq!(range_len, 5_000_000);
                assert_eq!(max, 2048);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        // 원본은 버퍼보다 작지만 base64 로 인코딩하면 넘치는 범위
        let outcome = worker.handle(b"FILE greeting.txt GET START 0 END 1599").await;
        assert!(matches!(outcome, WorkerOutcome::Dropped(Error::ReplyTooLarge { .. })));

        let outcome = worker.handle(b"FILE greeting.txt GET START 0 END 999").await;
        assert!(matches!(outcome, WorkerOutcome::Served { .. }));
        assert!(outcome.reply().unwrap().to_bytes().len() <= 2048);
    }

    #[tokio::test]
    async fn test_oversized_range_gets_no_reply_and_is_not_counted() {
        let content = vec![0x5Au8; 5_000_000];
        let (_file, worker) = worker_for(&content, 0).await;
        let worker_addr = worker.local_addr().unwrap();
        let task = tokio::spawn(worker.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 2048];

        client
            .send_to(b"FILE greeting.txt GET START 0 END 4999999", worker_addr)
            .await
            .unwrap();
        let silent = tokio::time::timeout(Duration::from_millis(300), client.recv_from(&mut buf)).await;
        assert!(silent.is_err());

        client
            .send_to(b"FILE greeting.txt CLOSE", worker_addr)
            .await
            .unwrap();
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"FILE greeting.txt CLOSE_OK");

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.chunks_served, 0);
        assert_eq!(summary.bytes_served, 0);
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.send_failures, 0);
    }

    #[tokio::test]
    async fn test_vanished_client_does_not_stop_worker() {
        let (_file, worker) = worker_for(GREETING, 0).await;
        let worker_addr = worker.local_addr().unwrap();
        let task = tokio::spawn(worker.run());

        // 요청만 보내고 응답을 받기 전에 사라지는 클라이언트
        {
            let gone = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            gone.send_to(b"FILE greeting.txt GET START 0 END 4", worker_addr)
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 2048];
        client
            .send_to(b"FILE greeting.txt GET START 7 END 10", worker_addr)
            .await
            .unwrap();
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("worker should still answer")
            .unwrap();
        match Message::parse(&buf[..len]).unwrap() {
            Message::Data(reply) => assert_eq!(reply.data.as_ref(), b"this"),
            other => panic!("unexpected reply: {other:?}"),
        }

        client
            .send_to(b"FILE greeting.txt CLOSE", worker_addr)
            .await
            .unwrap();
        let summary = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("worker should close")
            .unwrap()
            .unwrap();
        assert_eq!(summary.exit, WorkerExit::Closed);
        assert!(summary.chunks_served >= 1);
    }

    #[tokio::test]
    async fn test_idle_timeout_ends_worker() {
        let (_file, mut worker) = worker_for(GREETING, 0).await;
        worker.idle_timeout = Some(Duration::from_millis(50));

        let summary = tokio::time::timeout(Duration::from_secs(2), worker.run())
            .await
            .expect("worker should stop on its own")
            .unwrap();
        assert_eq!(summary.exit, WorkerExit::IdleTimeout);
        assert_eq!(summary.chunks_served, 0);
    }
}
