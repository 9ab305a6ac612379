//! 신뢰성 있는 요청/응답 엔진
//!
//! - 요청 하나를 데이터그램 하나로 전송
//! - 응답이 없으면 타임아웃을 두 배로 늘려 같은 요청을 재전송
//! - 최대 시도 횟수를 넘으면 Timeout
//! - 타임아웃이 아닌 IO 에러는 재시도 없이 즉시 실패

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::{Config, Error, Result};

/// 재전송 정책
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 첫 시도의 응답 대기 시간
    pub initial_timeout: Duration,

    /// 최대 시도 횟수
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(initial_timeout: Duration, max_retries: u32) -> Self {
        Self {
            initial_timeout,
            max_retries,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.initial_timeout(), config.max_retries)
    }

    /// 시도별 대기 시간: T0, 2·T0, 4·T0, ...
    pub fn timeouts(&self) -> impl Iterator<Item = Duration> {
        let initial = self.initial_timeout;
        (0..self.max_retries).map(move |attempt| initial.saturating_mul(1u32 << attempt.min(31)))
    }

    /// 모든 시도가 실패할 때까지 걸리는 총 대기 시간
    pub fn total_wait(&self) -> Duration {
        self.timeouts().fold(Duration::ZERO, |acc, t| acc.saturating_add(t))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 성공한 교환의 결과
#[derive(Debug, Clone)]
pub struct Reply {
    /// 응답 데이터그램
    pub payload: Bytes,

    /// 사용한 시도 횟수 (1이면 재전송 없음)
    pub attempts: u32,

    /// 마지막 시도의 왕복 시간
    pub rtt: Duration,
}

impl Reply {
    /// 재전송 횟수
    pub fn retransmits(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// 요청/응답 엔진
///
/// 호출 사이에 상태를 유지하지 않는다.
/// 같은 목적지에 대해 동시에 두 개 이상의 요청을 보내면 안 된다.
///
/// 응답의 출발 주소는 요청을 보낸 주소와 IP, 포트 모두 같아야 한다.
/// 여러 인터페이스를 가진 서버가 `0.0.0.0` 에 바인딩되어 있으면 커널이
/// 다른 출발 IP 를 고를 수 있고, 그 응답은 버려져 타임아웃으로 끝난다.
/// 그런 호스트에서는 서버를 클라이언트가 접속할 IP 에 바인딩해야 한다
/// (`cfp-server --bind`).
pub struct Requester {
    socket: Arc<UdpSocket>,
    policy: RetryPolicy,
    recv_buffer_size: usize,
}

impl Requester {
    pub fn new(socket: Arc<UdpSocket>, policy: RetryPolicy, recv_buffer_size: usize) -> Self {
        Self {
            socket,
            policy,
            recv_buffer_size,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 요청을 보내고 목적지로부터의 응답을 기다린다
    pub async fn request(&self, destination: SocketAddr, message: &[u8]) -> Result<Reply> {
        self.request_matching(destination, message, |_| true).await
    }

    /// 요청을 보내고 `matches` 를 만족하는 응답을 기다린다
    ///
    /// 다른 주소에서 온 데이터그램이나 조건에 맞지 않는 응답(이전 재전송의
    /// 늦은 응답 등)은 버리고 남은 대기 시간 동안 계속 기다린다.
    pub async fn request_matching<F>(
        &self,
        destination: SocketAddr,
        message: &[u8],
        matches: F,
    ) -> Result<Reply>
    where
        F: Fn(&[u8]) -> bool,
    {
        let mut buf = vec![0u8; self.recv_buffer_size];
        let mut attempts = 0;

        for timeout in self.policy.timeouts() {
            attempts += 1;
            self.socket.send_to(message, destination).await?;
            let sent_at = Instant::now();
            let deadline = sent_at + timeout;

            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match tokio::time::timeout(remaining, self.socket.recv_from(&mut buf)).await {
                    Ok(Ok((len, from))) if from == destination && matches(&buf[..len]) => {
                        return Ok(Reply {
                            payload: Bytes::copy_from_slice(&buf[..len]),
                            attempts,
                            rtt: sent_at.elapsed(),
                        });
                    }
                    Ok(Ok((len, from))) => {
                        debug!("Discarding unmatched datagram from {} ({} bytes)", from, len);
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => break,
                }
            }

            debug!(
                "Timeout after {:?} waiting for {} (attempt {}/{})",
                timeout, destination, attempts, self.policy.max_retries
            );
        }

        warn!("최대 재시도 횟수 도달: {} ({}회)", destination, attempts);
        Err(Error::Timeout { attempts })
    }
}
