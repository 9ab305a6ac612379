//! 다운로드 클라이언트
//!
//! - 파일 목록을 한 번에 하나씩 처리
//! - 파일 안에서는 한 번에 한 청크만 요청 (파이프라이닝 없음)
//! - 파일 하나의 실패가 전체 배치를 중단시키지 않음

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::message::{is_valid_filename, ChunkRequest, CloseRequest, DownloadRequest, Message};
use crate::session::{SessionState, TransferSession};
use crate::stats::TransferStats;
use crate::transport::{Reply, Requester, RetryPolicy};
use crate::{Config, Error, Result};

/// 완료된 다운로드 결과
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub filename: String,
    pub path: PathBuf,
    pub file_size: u64,

    /// 세션에 할당된 데이터 포트
    pub data_port: u16,

    /// 받은 데이터의 CRC32 (진단용)
    pub crc32: u32,

    /// CLOSE_OK 를 받았는지
    pub closed: bool,

    pub stats: TransferStats,
}

/// 다운로드 클라이언트
pub struct Client {
    requester: Requester,
    server_addr: SocketAddr,
    config: Config,
    output_dir: PathBuf,
}

impl Client {
    /// 로컬 소켓을 바인딩하고 클라이언트 생성
    pub async fn connect(
        server_addr: SocketAddr,
        config: Config,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        config.validate()?;

        let bind_ip = if server_addr.is_ipv4() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        };
        let bind_addr = SocketAddr::new(bind_ip, 0);
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        info!("Bound to local address: {}", socket.local_addr()?);

        Ok(Self {
            requester: Requester::new(socket, RetryPolicy::from_config(&config), config.data_buffer_size),
            server_addr,
            config,
            output_dir: output_dir.into(),
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// 목록의 모든 파일을 순서대로 다운로드
    ///
    /// 파일별 결과를 돌려주며 실패해도 다음 파일로 넘어간다.
    pub async fn download_all<I, S>(&self, filenames: I) -> Vec<(String, Result<DownloadReport>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut results = Vec::new();
        for filename in filenames {
            let filename = filename.into();
            let result = self.download(&filename).await;
            match &result {
                Ok(report) => info!(
                    "Download completed: {} ({}, crc32={:08x}{})",
                    filename,
                    report.stats.summary(),
                    report.crc32,
                    if report.closed { "" } else { ", close failed" }
                ),
                Err(e) => warn!("다운로드 실패: {}: {}", filename, e),
            }
            results.push((filename, result));
        }
        results
    }

    /// 파일 하나 다운로드
    pub async fn download(&self, filename: &str) -> Result<DownloadReport> {
        if !is_valid_filename(filename) {
            return Err(Error::Malformed(format!("요청할 수 없는 파일명: {filename:?}")));
        }

        info!("Downloading {}", filename);
        let mut session = TransferSession::new(filename, self.config.chunk_size);
        let mut stats = TransferStats::new();

        // NEGOTIATING
        let reply = self
            .exchange(&mut session, &mut stats, self.server_addr, DownloadRequest::new(filename))
            .await?;
        session.on_negotiation(reply, self.server_addr)?;

        let data_addr = session
            .data_addr()
            .ok_or_else(|| Error::Malformed("허가에 데이터 포트 없음".into()))?;
        info!(
            "{} size: {} bytes, data port: {}",
            filename,
            session.file_size(),
            data_addr.port()
        );

        // TRANSFERRING
        let path = self.output_dir.join(filename);
        let crc32 = match self.transfer(&mut session, &mut stats, data_addr, &path).await {
            Ok(crc32) => crc32,
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    debug!("Failed to remove partial file {:?}: {}", path, remove_err);
                }
                return Err(e);
            }
        };

        // CLOSING
        let closed = match self
            .exchange(&mut session, &mut stats, data_addr, CloseRequest::new(filename))
            .await
            .and_then(|reply| session.on_close(reply))
        {
            Ok(()) => {
                info!("File closed: {}", filename);
                true
            }
            Err(e) => {
                warn!("Close failed for {}: {}", filename, e);
                false
            }
        };

        stats.finish();
        Ok(DownloadReport {
            filename: filename.to_string(),
            path,
            file_size: session.file_size(),
            data_port: data_addr.port(),
            crc32,
            closed,
            stats,
        })
    }

    /// 모든 범위를 순서대로 받아 파일에 기록
    async fn transfer(
        &self,
        session: &mut TransferSession,
        stats: &mut TransferStats,
        data_addr: SocketAddr,
        path: &Path,
    ) -> Result<u32> {
        let mut file = File::create(path).await?;
        file.set_len(session.file_size()).await?;

        let mut hasher = crc32fast::Hasher::new();
        let filename = session.filename().to_string();

        while let Some(range) = session.next_range() {
            let reply = self
                .exchange(session, stats, data_addr, ChunkRequest::new(filename.clone(), range))
                .await?;
            let chunk = session.on_chunk(range, reply)?;

            file.write_all(&chunk.data).await?;
            hasher.update(&chunk.data);
            stats.record_chunk(chunk.data.len());

            if stats.chunks % self.config.progress_interval.max(1) == 0 {
                debug!(
                    "{}: {}/{} bytes",
                    filename,
                    session.cursor(),
                    session.file_size()
                );
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        debug_assert!(session.is_complete());
        Ok(hasher.finalize())
    }

    /// 요청 하나를 보내고 응답을 파싱
    ///
    /// 요청과 짝이 맞지 않는 응답은 엔진에서 버려지므로 타임아웃으로 이어진다.
    /// 타임아웃, 전송 에러, 파싱 에러 모두 세션을 FAILED 로 만든다.
    async fn exchange(
        &self,
        session: &mut TransferSession,
        stats: &mut TransferStats,
        destination: SocketAddr,
        message: Message,
    ) -> Result<Message> {
        let Reply {
            payload,
            attempts,
            rtt,
        } = match self
            .requester
            .request_matching(destination, &message.to_bytes(), |payload| {
                message.accepts_reply(payload)
            })
            .await
        {
            Ok(reply) => reply,
            Err(e) => return Err(self.abandon(session, e)),
        };
        stats.record_exchange(attempts.saturating_sub(1), rtt);

        Message::parse(&payload).map_err(|e| self.abandon(session, e))
    }

    fn abandon(&self, session: &mut TransferSession, error: Error) -> Error {
        if session.state() != SessionState::Failed {
            debug!("{}: abandoning in {} state: {}", session.filename(), session.state(), error);
        }
        session.fail(error)
    }
}

/// 파일 목록 텍스트 파싱
///
/// 한 줄에 파일명 하나, 앞뒤 공백 제거, 빈 줄 무시
pub fn parse_file_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// 파일 목록 읽기
pub async fn read_file_list(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(parse_file_list(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_list() {
        let list = parse_file_list("greeting.txt\n\n  other.bin  \r\n\t\nlast.txt");
        assert_eq!(list, vec!["greeting.txt", "other.bin", "last.txt"]);
        assert!(parse_file_list("\n\n").is_empty());
    }

    #[tokio::test]
    async fn test_read_file_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("files.txt");
        std::fs::write(&path, "a.txt\nb.txt\n").unwrap();

        let list = read_file_list(&path).await.unwrap();
        assert_eq!(list, vec!["a.txt", "b.txt"]);

        assert!(read_file_list(dir.path().join("missing.txt")).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_filename_not_sent() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            initial_timeout_ms: 10,
            max_retries: 1,
            ..Config::default()
        };
        let client = Client::connect("127.0.0.1:9".parse().unwrap(), config, dir.path())
            .await
            .unwrap();

        let result = client.download("../secret").await;
        assert!(matches!(result, Err(Error::Malformed(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            initial_timeout_ms: 10,
            max_retries: 2,
            ..Config::default()
        };
        let client = Client::connect(silent.local_addr().unwrap(), config, dir.path())
            .await
            .unwrap();

        let results = client.download_all(["a.txt", "b.txt"]).await;
        assert_eq!(results.len(), 2);
        for (_, result) in &results {
            assert!(matches!(result, Err(Error::Timeout { attempts: 2 })));
        }
        // 실패한 파일은 남기지 않음
        assert!(!dir.path().join("a.txt").exists());
    }
}
