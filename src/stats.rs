//! 전송 통계

use std::time::{Duration, Instant};

/// 파일 하나의 다운로드 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 수신한 청크 수
    pub chunks: u64,

    /// 수신한 바이트
    pub bytes: u64,

    /// 재전송 횟수 (모든 단계 합계)
    pub retransmits: u64,

    /// 최소/최대 RTT
    pub min_rtt: Option<Duration>,
    pub max_rtt: Option<Duration>,

    /// RTT 합계 (평균 계산용)
    rtt_total: Duration,
    rtt_samples: u64,

    /// 시작 시간
    started_at: Instant,

    /// 종료 시간
    finished_at: Option<Instant>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            chunks: 0,
            bytes: 0,
            retransmits: 0,
            min_rtt: None,
            max_rtt: None,
            rtt_total: Duration::ZERO,
            rtt_samples: 0,
            started_at: Instant::now(),
            finished_at: None,
        }
    }

    /// 청크 수신 기록
    pub fn record_chunk(&mut self, size: usize) {
        self.chunks += 1;
        self.bytes += size as u64;
    }

    /// 한 번의 교환 결과 기록
    pub fn record_exchange(&mut self, retransmits: u32, rtt: Duration) {
        self.retransmits += retransmits as u64;
        self.rtt_total += rtt;
        self.rtt_samples += 1;
        self.min_rtt = Some(self.min_rtt.map_or(rtt, |m| m.min(rtt)));
        self.max_rtt = Some(self.max_rtt.map_or(rtt, |m| m.max(rtt)));
    }

    /// 평균 RTT
    pub fn avg_rtt(&self) -> Option<Duration> {
        if self.rtt_samples == 0 {
            None
        } else {
            Some(self.rtt_total / self.rtt_samples as u32)
        }
    }

    pub fn finish(&mut self) {
        self.finished_at.get_or_insert_with(Instant::now);
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .unwrap_or_else(Instant::now)
            .duration_since(self.started_at)
    }

    /// 바이트 처리율 계산 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes as f64 / secs
    }

    /// 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "{} bytes in {} chunks, {:.2}s, {:.1} KB/s, retransmits={}, avg_rtt={:.2}ms",
            self.bytes,
            self.chunks,
            self.elapsed().as_secs_f64(),
            self.throughput() / 1024.0,
            self.retransmits,
            self.avg_rtt().map_or(0.0, |d| d.as_secs_f64() * 1000.0),
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_chunks() {
        let mut stats = TransferStats::new();
        stats.record_chunk(1000);
        stats.record_chunk(28);
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.bytes, 1028);
    }

    #[test]
    fn test_rtt_tracking() {
        let mut stats = TransferStats::new();
        assert!(stats.avg_rtt().is_none());

        stats.record_exchange(0, Duration::from_millis(10));
        stats.record_exchange(2, Duration::from_millis(30));

        assert_eq!(stats.retransmits, 2);
        assert_eq!(stats.min_rtt, Some(Duration::from_millis(10)));
        assert_eq!(stats.max_rtt, Some(Duration::from_millis(30)));
        assert_eq!(stats.avg_rtt(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_finish_freezes_elapsed() {
        let mut stats = TransferStats::new();
        stats.finish();
        let first = stats.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(stats.elapsed(), first);
        assert!(stats.summary().contains("0 bytes"));
    }
}
