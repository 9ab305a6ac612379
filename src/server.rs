//! 컨트롤 디스패처 (서버측)
//!
//! - 잘 알려진 컨트롤 포트에서 DOWNLOAD 요청 수신
//! - 파일이 있으면 데이터 포트를 점유하고 워커를 띄운 뒤 OK 응답
//! - 파일이 없으면 ERR ... NOT_FOUND 응답, 워커 없음
//! - 잘못된 요청은 응답 없이 무시 (로그만 남김)
//! - 워커를 기다리지 않고 바로 다음 요청으로 돌아감

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::message::{is_valid_filename, DownloadError, DownloadGrant, Message};
use crate::ports::{PortLease, PortPool};
use crate::worker::TransferWorker;
use crate::{Config, Error, Result};

/// 포트 바인딩 재시도 한도 (다른 프로세스가 쓰는 포트를 건너뜀)
const MAX_BIND_ATTEMPTS: usize = 16;

/// 컨트롤 요청 하나의 처리 결과
#[derive(Debug)]
pub enum ControlOutcome {
    /// 워커를 띄우고 허가함
    Granted {
        filename: String,
        file_size: u64,
        port: u16,
    },

    /// 파일 없음으로 거절함
    Rejected { filename: String },

    /// 응답 없이 무시함
    Ignored(Error),
}

impl ControlOutcome {
    /// 클라이언트에 보낼 응답
    pub fn reply(&self) -> Option<Message> {
        match self {
            ControlOutcome::Granted {
                filename,
                file_size,
                port,
            } => Some(DownloadGrant::new(filename.clone(), *file_size, *port)),
            ControlOutcome::Rejected { filename } => Some(DownloadError::not_found(filename.clone())),
            ControlOutcome::Ignored(_) => None,
        }
    }
}

/// 진행 중인 세션 정보
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub filename: String,
    pub client: SocketAddr,
    pub file_size: u64,
    pub started_at: Instant,
}

/// 세션 레지스트리 (데이터 포트 → 세션)
pub type SessionRegistry = Arc<DashMap<u16, SessionInfo>>;

/// CFP 서버
pub struct Server {
    config: Config,
    root: PathBuf,
    socket: UdpSocket,
    data_ip: IpAddr,
    ports: Arc<PortPool>,
    sessions: SessionRegistry,
    permits: Arc<Semaphore>,
}

impl Server {
    /// 컨트롤 포트 바인딩
    ///
    /// 데이터 포트는 컨트롤 소켓과 같은 IP 에 바인딩된다.
    /// 클라이언트는 요청한 주소에서 온 응답만 받으므로, 여러 인터페이스를
    /// 가진 호스트에서는 미지정 주소 대신 구체적인 IP 를 지정해야 한다.
    pub async fn bind(addr: SocketAddr, root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        config.validate()?;

        let socket = UdpSocket::bind(addr).await?;
        let root = root.into();

        info!("CFP server listening on {}", socket.local_addr()?);
        info!("Serving files from {:?}", root);
        info!(
            "Data ports: {}-{}, max sessions: {}",
            config.data_port_start, config.data_port_end, config.max_sessions
        );

        Ok(Self {
            ports: PortPool::new(config.data_ports()),
            sessions: Arc::new(DashMap::new()),
            permits: Arc::new(Semaphore::new(config.max_sessions)),
            data_ip: addr.ip(),
            root,
            socket,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 진행 중인 세션 수
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// 세션 레지스트리 핸들 (모니터링용)
    pub fn sessions(&self) -> SessionRegistry {
        self.sessions.clone()
    }

    /// 컨트롤 루프
    ///
    /// 요청별 에러는 로그만 남기고 루프는 계속된다.
    pub async fn run(self) -> Result<()> {
        let mut buf = vec![0u8; self.config.control_buffer_size];

        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("수신 에러: {}", e);
                    continue;
                }
            };

            let outcome = self.handle_control(&buf[..len], from).await;

            if let Some(reply) = outcome.reply() {
                if let Err(e) = self.socket.send_to(&reply.to_bytes(), from).await {
                    warn!("응답 전송 실패 ({}): {}", from, e);
                }
            }

            match &outcome {
                ControlOutcome::Granted {
                    filename,
                    file_size,
                    port,
                } => info!(
                    "Granted {} ({} bytes) to {} on port {}",
                    filename, file_size, from, port
                ),
                ControlOutcome::Rejected { filename } => {
                    info!("Rejected {} from {}: not found", filename, from)
                }
                ControlOutcome::Ignored(reason) => {
                    warn!("요청 무시 ({}): {}", from, reason)
                }
            }
        }
    }

    /// 컨트롤 데이터그램 하나 처리
    pub async fn handle_control(&self, datagram: &[u8], from: SocketAddr) -> ControlOutcome {
        let filename = match Message::parse(datagram) {
            Ok(Message::Download(request)) => request.filename,
            Ok(other) => {
                return ControlOutcome::Ignored(Error::Malformed(format!(
                    "컨트롤 포트에 온 {:?} 메시지",
                    other.msg_type()
                )))
            }
            Err(e) => return ControlOutcome::Ignored(e),
        };

        let Some((path, file_size)) = self.resolve(&filename).await else {
            return ControlOutcome::Rejected { filename };
        };

        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                return ControlOutcome::Ignored(Error::SessionLimit {
                    max: self.config.max_sessions,
                })
            }
        };

        let (lease, socket) = match self.bind_data_socket().await {
            Ok(bound) => bound,
            Err(e) => return ControlOutcome::Ignored(e),
        };
        let port = lease.port();

        let worker = match TransferWorker::open(&path, filename.clone(), socket, &self.config).await {
            Ok(worker) => worker.with_lease(lease),
            Err(e) => {
                // 확인 직후 파일이 사라지거나 읽을 수 없게 된 경우
                debug!("Failed to open {:?}: {}", path, e);
                return ControlOutcome::Rejected { filename };
            }
        };

        self.sessions.insert(
            port,
            SessionInfo {
                filename: filename.clone(),
                client: from,
                file_size,
                started_at: Instant::now(),
            },
        );

        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            match worker.run().await {
                Ok(summary) => info!(
                    "Session on port {} ended ({:?}): {} chunks, {} bytes served, {} dropped, {} send failures",
                    summary.port,
                    summary.exit,
                    summary.chunks_served,
                    summary.bytes_served,
                    summary.dropped,
                    summary.send_failures
                ),
                Err(e) => warn!("워커 에러 (port {}): {}", port, e),
            }
            if let Some((_, info)) = sessions.remove(&port) {
                debug!(
                    "Session {} for {} lasted {:?}",
                    info.filename,
                    info.client,
                    info.started_at.elapsed()
                );
            }
            drop(permit);
        });

        ControlOutcome::Granted {
            filename,
            file_size,
            port,
        }
    }

    /// 파일명을 서버 루트 안의 읽을 수 있는 일반 파일로 해석
    async fn resolve(&self, filename: &str) -> Option<(PathBuf, u64)> {
        if !is_valid_filename(filename) {
            return None;
        }

        let path = self.root.join(filename);
        let metadata = tokio::fs::metadata(&path).await.ok()?;
        if !metadata.is_file() || !is_readable(&path).await {
            return None;
        }
        Some((path, metadata.len()))
    }

    /// 데이터 포트 점유 후 바인딩
    ///
    /// 다른 프로세스가 이미 쓰는 포트는 점유한 채로 건너뛰고,
    /// 성공하면 건너뛴 포트를 모두 반납한다.
    async fn bind_data_socket(&self) -> Result<(PortLease, UdpSocket)> {
        let mut skipped = Vec::new();

        for _ in 0..MAX_BIND_ATTEMPTS {
            let lease = self.ports.claim().ok_or(Error::PortsExhausted)?;
            match UdpSocket::bind(SocketAddr::new(self.data_ip, lease.port())).await {
                Ok(socket) => return Ok((lease, socket)),
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    debug!("Data port {} in use, trying another", lease.port());
                    skipped.push(lease);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::PortsExhausted)
    }
}

async fn is_readable(path: &Path) -> bool {
    tokio::fs::File::open(path).await.is_ok()
}
