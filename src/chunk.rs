//! 바이트 범위와 청크 정의
//!
//! - ByteRange: 파일 내 양끝 포함 범위 [start, end]
//! - Chunk: 한 번의 요청/응답으로 전달되는 범위와 데이터

use bytes::Bytes;

use crate::{Error, Result};

/// 양끝 포함 바이트 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// 범위 길이 (바이트)
    ///
    /// start > end 인 범위는 길이 0으로 취급
    pub fn len(&self) -> u64 {
        if self.start > self.end {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 파일 크기 기준 검증
    ///
    /// `start <= end < file_size` 를 만족해야 함
    pub fn validate(&self, file_size: u64) -> Result<()> {
        if self.start > self.end || self.end >= file_size {
            return Err(Error::RangeInvalid {
                start: self.start,
                end: self.end,
                file_size,
            });
        }
        Ok(())
    }

    /// 커서 위치에서 다음에 요청할 범위
    ///
    /// 파일 끝에 도달했으면 None
    pub fn next(cursor: u64, chunk_size: usize, file_size: u64) -> Option<Self> {
        if cursor >= file_size || chunk_size == 0 {
            return None;
        }
        let end = (cursor + chunk_size as u64 - 1).min(file_size - 1);
        Some(Self::new(cursor, end))
    }
}

/// 청크 (범위 + 실제 데이터)
#[derive(Debug, Clone)]
pub struct Chunk {
    pub range: ByteRange,
    pub data: Bytes,
}

impl Chunk {
    pub fn new(range: ByteRange, data: Bytes) -> Self {
        Self { range, data }
    }

    /// 선언된 범위와 데이터 길이가 일치하는지
    pub fn is_consistent(&self) -> bool {
        self.range.len() == self.data.len() as u64
    }
}

/// 파일 전체를 청크 범위로 나누는 반복자
///
/// 클라이언트가 순서대로 요청할 범위를 그대로 생성한다.
pub struct RangePlan {
    cursor: u64,
    chunk_size: usize,
    file_size: u64,
}

impl RangePlan {
    pub fn new(file_size: u64, chunk_size: usize) -> Self {
        Self {
            cursor: 0,
            chunk_size,
            file_size,
        }
    }
}

impl Iterator for RangePlan {
    type Item = ByteRange;

    fn next(&mut self) -> Option<Self::Item> {
        let range = ByteRange::next(self.cursor, self.chunk_size, self.file_size)?;
        self.cursor = range.end + 1;
        Some(range)
    }
}
