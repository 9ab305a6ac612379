//! 데이터 포트 풀
//!
//! - 설정된 범위 안에서 무작위로 포트 선택
//! - 바인딩 전에 먼저 점유 (claim-before-bind)
//! - 세션이 끝나면 PortLease drop 시 자동 반납

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;

/// 데이터 포트 풀
#[derive(Debug)]
pub struct PortPool {
    /// 할당 범위
    range: RangeInclusive<u16>,

    /// 현재 점유 중인 포트
    claimed: Mutex<HashSet<u16>>,
}

impl PortPool {
    pub fn new(range: RangeInclusive<u16>) -> Arc<Self> {
        Arc::new(Self {
            range,
            claimed: Mutex::new(HashSet::new()),
        })
    }

    /// 범위 내 전체 포트 수
    pub fn capacity(&self) -> usize {
        if self.range.is_empty() {
            0
        } else {
            (*self.range.end() - *self.range.start()) as usize + 1
        }
    }

    /// 점유 중인 포트 수
    pub fn claimed_count(&self) -> usize {
        self.claimed.lock().len()
    }

    pub fn is_claimed(&self, port: u16) -> bool {
        self.claimed.lock().contains(&port)
    }

    /// 빈 포트 하나 점유
    ///
    /// 무작위 위치에서 시작해 순환 탐색한다. 모두 점유 중이면 None.
    pub fn claim(self: &Arc<Self>) -> Option<PortLease> {
        let capacity = self.capacity();
        if capacity == 0 {
            return None;
        }

        let base = *self.range.start() as usize;
        let offset = rand::thread_rng().gen_range(0..capacity);

        let mut claimed = self.claimed.lock();
        for i in 0..capacity {
            let port = (base + (offset + i) % capacity) as u16;
            if claimed.insert(port) {
                return Some(PortLease {
                    port,
                    pool: Arc::clone(self),
                });
            }
        }
        None
    }

    fn release(&self, port: u16) {
        self.claimed.lock().remove(&port);
    }
}

/// 점유된 포트
///
/// drop 되면 풀에 반납된다.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    pool: Arc<PortPool>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.pool.release(self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_are_distinct() {
        let pool = PortPool::new(40000..=40009);
        let leases: Vec<PortLease> = (0..10).map(|_| pool.claim().unwrap()).collect();

        let ports: HashSet<u16> = leases.iter().map(|l| l.port()).collect();
        assert_eq!(ports.len(), 10);
        assert!(ports.iter().all(|p| (40000..=40009).contains(p)));

        // 모두 점유됨
        assert!(pool.claim().is_none());
        assert_eq!(pool.claimed_count(), 10);
    }

    #[test]
    fn test_release_on_drop() {
        let pool = PortPool::new(40000..=40000);
        let lease = pool.claim().unwrap();
        assert_eq!(lease.port(), 40000);
        assert!(pool.is_claimed(40000));
        assert!(pool.claim().is_none());

        drop(lease);
        assert!(!pool.is_claimed(40000));
        assert!(pool.claim().is_some());
    }

    #[test]
    fn test_concurrent_claims() {
        let pool = PortPool::new(41000..=41099);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    (0..25).map(|_| pool.claim().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let leases: Vec<PortLease> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let ports: HashSet<u16> = leases.iter().map(|l| l.port()).collect();
        assert_eq!(ports.len(), 100);
    }

    #[test]
    fn test_capacity() {
        assert_eq!(PortPool::new(50000..=51000).capacity(), 1001);
        #[allow(clippy::reversed_empty_ranges)]
        let empty = PortPool::new(10..=5);
        assert_eq!(empty.capacity(), 0);
        assert!(empty.claim().is_none());
    }
}
