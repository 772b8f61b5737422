//! Chunked transfer: partition a file across source nodes, fetch ranges in
//! order, reassemble on disk. Used for client downloads and replication pulls.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::OpError;
use crate::file::FileId;
use crate::peer::{CallPolicy, PeerClient};
use crate::protocol::Request;

/// Partition unit in bytes.
pub const CHUNK_SIZE: u64 = 4096;

/// Most bytes one range read asks for. Larger shares are fetched as several
/// consecutive reads so each reply stays well under the frame limit.
pub const MAX_RANGE_READ: u64 = 256 * CHUNK_SIZE;

/// Byte range requested from one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub offset: u64,
    pub count: u64,
}

/// Split `size` bytes into one contiguous range per source, in source order.
///
/// Each source gets `floor(total_chunks / k)` whole chunks, where
/// `total_chunks = size / chunk_size` is fractional. The `ceil(total_chunks mod k)`
/// leftover chunks go one each to the last sources in the list. The final
/// range may overshoot the file end by less than one chunk; the serving side
/// clamps it. Sizes whose ranges would not fit in a `u64` are rejected.
pub fn partition(size: u64, chunk_size: u64, sources: usize) -> Result<Vec<Range>, OpError> {
    if sources == 0 {
        return Ok(vec![]);
    }
    let chunk = if chunk_size == 0 { CHUNK_SIZE } else { chunk_size };
    let k = sources as u64;
    let whole = size / chunk;
    let base = whole / k;
    let extra = whole % k + u64::from(size % chunk != 0);
    let overflow = || OpError::validation(format!("file size {} is too large to partition", size));

    let mut ranges = Vec::with_capacity(sources);
    let mut offset = 0u64;
    for i in 0..k {
        // base * chunk never exceeds size.
        let mut count = base * chunk;
        if k - i <= extra {
            count = count.checked_add(chunk).ok_or_else(overflow)?;
        }
        ranges.push(Range { offset, count });
        offset = offset.checked_add(count).ok_or_else(overflow)?;
    }
    Ok(ranges)
}

/// Where range reads are served from.
#[async_trait]
pub trait RangeSource: Send {
    async fn read_range(
        &mut self,
        source: Ipv4Addr,
        file_id: &FileId,
        range: Range,
    ) -> Result<Vec<u8>, OpError>;
}

/// Range reads over the network against seeders on a shared port.
pub struct NetworkSource {
    port: u16,
    policy: CallPolicy,
}

impl NetworkSource {
    pub fn new(port: u16, policy: CallPolicy) -> Self {
        Self { port, policy }
    }
}

#[async_trait]
impl RangeSource for NetworkSource {
    async fn read_range(
        &mut self,
        source: Ipv4Addr,
        file_id: &FileId,
        range: Range,
    ) -> Result<Vec<u8>, OpError> {
        let request = Request::read_range(file_id, range.offset, range.count)?;
        let mut client = PeerClient::new(SocketAddr::from((source, self.port)), self.policy);
        client.call_ok(&request).await?.into_chunk()
    }
}

/// Fetch `size` bytes of `file_id` from `sources` into a new file at `dest`.
///
/// Ranges are fetched one source at a time and appended in offset order. A
/// source's share larger than [`MAX_RANGE_READ`] is read in consecutive
/// pieces from that same source. The first failing read aborts the transfer;
/// whatever was written so far stays on disk and must be treated as invalid
/// by the caller.
pub async fn fetch_file<S: RangeSource>(
    source: &mut S,
    file_id: &FileId,
    size: u64,
    sources: &[Ipv4Addr],
    dest: &Path,
) -> Result<u64, OpError> {
    fetch_in_pieces(source, file_id, size, sources, dest, MAX_RANGE_READ).await
}

async fn fetch_in_pieces<S: RangeSource>(
    source: &mut S,
    file_id: &FileId,
    size: u64,
    sources: &[Ipv4Addr],
    dest: &Path,
    piece_limit: u64,
) -> Result<u64, OpError> {
    if sources.is_empty() {
        return Err(OpError::validation("no sources to fetch from"));
    }
    let ranges = partition(size, CHUNK_SIZE, sources.len())?;
    let piece_limit = piece_limit.max(1);
    let mut out = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .await?;

    let mut written = 0u64;
    for (&addr, range) in sources.iter().zip(ranges) {
        if range.count == 0 {
            continue;
        }
        let end = range.offset.saturating_add(range.count);
        let available = range.offset + range.count.min(size.saturating_sub(range.offset));
        let mut offset = range.offset;
        loop {
            let piece = Range {
                offset,
                count: piece_limit.min(end - offset),
            };
            let data = match source.read_range(addr, file_id, piece).await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(file = %file_id, source = %addr, offset, error = %e, "range fetch failed");
                    out.flush().await?;
                    return Err(e);
                }
            };
            let expected = piece.count.min(size.saturating_sub(offset));
            if data.len() as u64 != expected {
                out.flush().await?;
                return Err(OpError::Internal(format!(
                    "{} returned {} bytes at offset {}, expected {}",
                    addr,
                    data.len(),
                    offset,
                    expected
                )));
            }
            out.write_all(&data).await?;
            written += expected;
            offset += expected;
            tracing::debug!(file = %file_id, source = %addr, offset = piece.offset, bytes = expected, "range fetched");
            if offset >= available {
                break;
            }
        }
    }
    out.flush().await?;

    if written != size {
        return Err(OpError::Internal(format!(
            "short transfer: got {} of {} bytes",
            written, size
        )));
    }
    Ok(written)
}

/// Check a fetched file hashes to the identifier it was requested under.
pub async fn verify_file(path: &Path, file_id: &FileId) -> Result<(), OpError> {
    let data = tokio::fs::read(path).await?;
    if file_id.matches(&data) {
        Ok(())
    } else {
        Err(OpError::Internal(format!(
            "{} does not hash to {}",
            path.display(),
            file_id
        )))
    }
}

/// Non-clobbering destination for `name` inside `dir`: `name`, then
/// `stem(1).ext`, `stem(2).ext`, ... until a free path is found.
/// Only the final path component of `name` is used.
pub fn unique_destination(dir: &Path, name: &str) -> Result<PathBuf, OpError> {
    let file_name = Path::new(name)
        .file_name()
        .ok_or_else(|| OpError::validation(format!("invalid file name '{}'", name)))?;
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return Ok(candidate);
    }
    let as_path = Path::new(file_name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{}({}){}", stem, n, ext));
        if !candidate.exists() {
            return Ok(candidate);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::clamp_range;
    use std::collections::HashMap;

    /// In-memory seeders that serve ranges with the same clamp as real storage.
    struct FakeSeeders {
        files: HashMap<Ipv4Addr, (FileId, Vec<u8>)>,
        calls: Vec<(Ipv4Addr, Range)>,
    }

    impl FakeSeeders {
        fn new() -> Self {
            Self {
                files: HashMap::new(),
                calls: Vec::new(),
            }
        }

        fn with(mut self, addr: Ipv4Addr, data: Vec<u8>) -> Self {
            self.files.insert(addr, (FileId::of_content(&data), data));
            self
        }
    }

    #[async_trait]
    impl RangeSource for FakeSeeders {
        async fn read_range(
            &mut self,
            source: Ipv4Addr,
            file_id: &FileId,
            range: Range,
        ) -> Result<Vec<u8>, OpError> {
            self.calls.push((source, range));
            let (id, data) = self
                .files
                .get(&source)
                .ok_or_else(|| OpError::Remote {
                    status: crate::protocol::Status::InternalError,
                    message: "unreachable".into(),
                })?;
            if id != file_id {
                return Err(OpError::not_found("file not found"));
            }
            let count = clamp_range(data.len() as u64, range.offset, range.count)?;
            let start = range.offset as usize;
            Ok(data[start..start + count as usize].to_vec())
        }
    }

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn bytes(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn partition_example_three_sources() {
        let ranges = partition(10_000, 4096, 3).unwrap();
        assert_eq!(
            ranges,
            vec![
                Range { offset: 0, count: 4096 },
                Range { offset: 4096, count: 4096 },
                Range { offset: 8192, count: 4096 },
            ]
        );
        let clamped: Vec<u64> = ranges
            .iter()
            .map(|r| clamp_range(10_000, r.offset, r.count).unwrap())
            .collect();
        assert_eq!(clamped, vec![4096, 4096, 1808]);
    }

    #[test]
    fn partition_extra_chunks_go_to_the_end() {
        // 5 whole chunks over 2 sources: base 2, one extra for the last source.
        let ranges = partition(5 * 4096, 4096, 2).unwrap();
        assert_eq!(ranges[0], Range { offset: 0, count: 2 * 4096 });
        assert_eq!(ranges[1], Range { offset: 2 * 4096, count: 3 * 4096 });
    }

    #[test]
    fn partition_single_source_spans_file() {
        assert_eq!(partition(5000, 4096, 1).unwrap(), vec![Range { offset: 0, count: 8192 }]);
        assert_eq!(partition(8192, 4096, 1).unwrap(), vec![Range { offset: 0, count: 8192 }]);
    }

    #[test]
    fn partition_more_sources_than_chunks() {
        let ranges = partition(100, 4096, 3).unwrap();
        assert_eq!(ranges.iter().filter(|r| r.count > 0).count(), 1);
        assert_eq!(ranges[2], Range { offset: 0, count: 4096 });
    }

    #[test]
    fn partition_no_sources() {
        assert!(partition(100, 4096, 0).unwrap().is_empty());
    }

    #[test]
    fn partition_always_covers_file_exactly() {
        for k in 1..=7usize {
            for size in [0u64, 1, 4095, 4096, 4097, 10_000, 12_288, 40_000, 65_537] {
                let ranges = partition(size, 4096, k).unwrap();
                assert_eq!(ranges.len(), k);
                let mut expected_offset = 0;
                let mut total = 0;
                for r in &ranges {
                    assert_eq!(r.offset, expected_offset, "size={} k={}", size, k);
                    expected_offset += r.count;
                    total += clamp_range(size, r.offset, r.count).unwrap();
                }
                assert_eq!(total, size, "size={} k={}", size, k);
            }
        }
    }

    #[test]
    fn partition_rejects_sizes_that_overflow() {
        let err = partition(u64::MAX, 4096, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(partition(u64::MAX - 1, 4096, 3).is_err());

        let largest = crate::file::MAX_FILE_SIZE;
        let ranges = partition(largest, 4096, 3).unwrap();
        assert_eq!(ranges.iter().map(|r| r.count).sum::<u64>(), largest);
    }

    #[tokio::test]
    async fn overflowing_size_fails_before_creating_the_file() {
        let mut seeders = FakeSeeders::new().with(addr(1), bytes(10, 0));
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("huge.bin");
        let id = FileId::of_content(&bytes(10, 0));
        let err = fetch_file(&mut seeders, &id, u64::MAX, &[addr(1)], &dest)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(seeders.calls.is_empty());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn single_owner_download_is_one_request() {
        let a = bytes(5000, 1);
        let mut seeders = FakeSeeders::new()
            .with(addr(1), a.clone())
            .with(addr(2), bytes(3000, 2))
            .with(addr(3), bytes(1000, 3));
        let id = FileId::of_content(&a);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.bin");

        let n = fetch_file(&mut seeders, &id, 5000, &[addr(1)], &dest).await.unwrap();
        assert_eq!(n, 5000);
        assert_eq!(seeders.calls, vec![(addr(1), Range { offset: 0, count: 8192 })]);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), a);
        verify_file(&dest, &id).await.unwrap();
    }

    #[tokio::test]
    async fn multi_source_download_reassembles_in_order() {
        let data = bytes(10_000, 7);
        let mut seeders = FakeSeeders::new()
            .with(addr(1), data.clone())
            .with(addr(2), data.clone())
            .with(addr(3), data.clone());
        let id = FileId::of_content(&data);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("f.bin");

        fetch_file(&mut seeders, &id, 10_000, &[addr(1), addr(2), addr(3)], &dest)
            .await
            .unwrap();
        let sources: Vec<_> = seeders.calls.iter().map(|(a, _)| *a).collect();
        assert_eq!(sources, vec![addr(1), addr(2), addr(3)]);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    }

    #[tokio::test]
    async fn failing_source_aborts_and_leaves_partial_file() {
        let data = bytes(10_000, 9);
        let mut seeders = FakeSeeders::new().with(addr(1), data.clone());
        let id = FileId::of_content(&data);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("partial.bin");

        let err = fetch_file(&mut seeders, &id, 10_000, &[addr(1), addr(2), addr(3)], &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, OpError::Remote { .. }));
        // Third source never asked.
        assert_eq!(seeders.calls.len(), 2);
        let partial = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(partial, data[..4096]);
    }

    #[tokio::test]
    async fn large_share_is_read_in_consecutive_pieces() {
        let data = bytes(10_000, 4);
        let mut seeders = FakeSeeders::new().with(addr(1), data.clone());
        let id = FileId::of_content(&data);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pieces.bin");

        let n = fetch_in_pieces(&mut seeders, &id, 10_000, &[addr(1)], &dest, 4096)
            .await
            .unwrap();
        assert_eq!(n, 10_000);
        assert_eq!(
            seeders.calls,
            vec![
                (addr(1), Range { offset: 0, count: 4096 }),
                (addr(1), Range { offset: 4096, count: 4096 }),
                (addr(1), Range { offset: 8192, count: 4096 }),
            ]
        );
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    }

    #[tokio::test]
    async fn pieces_keep_source_order_across_owners() {
        // 30 000 bytes over three sources: 8192, 12288 and 12288 byte shares.
        let data = bytes(30_000, 5);
        let mut seeders = FakeSeeders::new()
            .with(addr(1), data.clone())
            .with(addr(2), data.clone())
            .with(addr(3), data.clone());
        let id = FileId::of_content(&data);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("spread.bin");

        fetch_in_pieces(&mut seeders, &id, 30_000, &[addr(1), addr(2), addr(3)], &dest, 4096)
            .await
            .unwrap();
        let order: Vec<_> = seeders.calls.iter().map(|(a, r)| (*a, r.offset)).collect();
        assert_eq!(
            order,
            vec![
                (addr(1), 0),
                (addr(1), 4096),
                (addr(2), 8192),
                (addr(2), 12_288),
                (addr(2), 16_384),
                (addr(3), 20_480),
                (addr(3), 24_576),
                (addr(3), 28_672),
            ]
        );
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    }

    #[tokio::test]
    async fn failing_piece_stops_the_transfer() {
        let data = bytes(10_000, 6);
        let mut seeders = FakeSeeders::new().with(addr(1), data.clone());
        let id = FileId::of_content(&data);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("cut.bin");

        // addr(2) is down: its first piece fails and nothing after it is asked.
        let err = fetch_in_pieces(&mut seeders, &id, 10_000, &[addr(1), addr(2)], &dest, 2048)
            .await
            .unwrap_err();
        assert!(matches!(err, OpError::Remote { .. }));
        let asked: Vec<_> = seeders.calls.iter().map(|(a, r)| (*a, r.offset)).collect();
        assert_eq!(asked, vec![(addr(1), 0), (addr(1), 2048), (addr(2), 4096)]);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data[..4096]);
    }

    #[tokio::test]
    async fn missing_file_on_source_is_not_found() {
        let mut seeders = FakeSeeders::new().with(addr(1), bytes(10, 0));
        let dir = tempfile::tempdir().unwrap();
        let other = FileId::of_content(b"something else");
        let err = fetch_file(&mut seeders, &other, 10, &[addr(1)], &dir.path().join("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn existing_destination_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("taken.bin");
        std::fs::write(&dest, b"keep me").unwrap();
        let data = bytes(10, 0);
        let mut seeders = FakeSeeders::new().with(addr(1), data.clone());
        let id = FileId::of_content(&data);
        assert!(fetch_file(&mut seeders, &id, 10, &[addr(1)], &dest).await.is_err());
        assert_eq!(std::fs::read(&dest).unwrap(), b"keep me");
    }

    #[test]
    fn unique_destination_counts_up() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_destination(dir.path(), "report.pdf").unwrap();
        assert_eq!(first, dir.path().join("report.pdf"));
        std::fs::write(&first, b"").unwrap();

        let second = unique_destination(dir.path(), "report.pdf").unwrap();
        assert_eq!(second, dir.path().join("report(1).pdf"));
        std::fs::write(&second, b"").unwrap();

        let third = unique_destination(dir.path(), "report.pdf").unwrap();
        assert_eq!(third, dir.path().join("report(2).pdf"));
    }

    #[test]
    fn unique_destination_without_extension_and_with_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes"), b"").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "notes").unwrap(),
            dir.path().join("notes(1)")
        );
        assert_eq!(
            unique_destination(dir.path(), "../../etc/passwd").unwrap(),
            dir.path().join("passwd")
        );
        assert!(unique_destination(dir.path(), "..").is_err());
    }
}
