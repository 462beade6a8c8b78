//! Hand-rolled Annex-B access-unit scanner for the H.265 elementary stream.
//!
//! Grounded on `examples/other_examples/374eebf3_dummyx-rtpar__src-reassemble.rs.rs`'s
//! HEVC NAL-unit parsing: this crate has no transcoding/decoding dependency
//! (Non-goal), so turning "segmented seek of the input file" into something a
//! pure-Rust reader can do means indexing access-unit byte ranges up front
//! instead of asking a demuxer to seek for us.

use bytes::Bytes;

const NAL_TYPE_VPS: u8 = 32;
const NAL_TYPE_SPS: u8 = 33;
const NAL_TYPE_PPS: u8 = 34;
const NAL_TYPE_AUD: u8 = 35;

fn is_vcl(nal_type: u8) -> bool {
    nal_type <= 31
}

fn is_parameter_set(nal_type: u8) -> bool {
    matches!(nal_type, NAL_TYPE_VPS | NAL_TYPE_SPS | NAL_TYPE_PPS)
}

struct Nal {
    /// Offset of the first byte after the start code (the 2-byte NAL header).
    start: usize,
    nal_type: u8,
    first_slice_segment_in_pic: bool,
}

/// Scans `data` for Annex-B start codes and returns each NAL's header info.
fn scan_nals(data: &[u8]) -> Vec<Nal> {
    let mut starts = Vec::new();
    let mut i = 0usize;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                starts.push(i + 3);
                i += 3;
                continue;
            }
            if i + 3 < data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                starts.push(i + 4);
                i += 4;
                continue;
            }
        }
        i += 1;
    }

    starts
        .into_iter()
        .filter_map(|start| {
            if start + 2 > data.len() {
                return None;
            }
            let nal_type = (data[start] >> 1) & 0x3f;
            let first_slice_segment_in_pic = is_vcl(nal_type) && start + 2 < data.len() && (data[start + 2] & 0x80) != 0;
            Some(Nal { start, nal_type, first_slice_segment_in_pic })
        })
        .collect()
}

/// A byte range in the source file spanning one access unit (parameter sets
/// that immediately precede it are folded in, so the configuration-interval
/// requirement is satisfied without special-casing the RTP sender).
#[derive(Debug, Clone, Copy)]
pub struct AccessUnit {
    pub offset: usize,
    pub len: usize,
}

/// The whole elementary stream, loaded once, sliced by access unit on demand.
pub struct SourceFile {
    data: Bytes,
    access_units: Vec<AccessUnit>,
}

impl SourceFile {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("failed to read '{}': {e}", path.display()))?;
        Ok(Self::from_bytes(Bytes::from(raw)))
    }

    pub fn from_bytes(data: Bytes) -> Self {
        let nals = scan_nals(&data);
        if nals.is_empty() {
            return Self { data, access_units: Vec::new() };
        }

        // A boundary NAL starts a new access unit. Parameter sets immediately
        // preceding a boundary NAL belong to the access unit they introduce,
        // so a boundary is walked backward over any contiguous run of
        // VPS/SPS/PPS NALs before it.
        let mut is_split = vec![false; nals.len()];
        is_split[0] = true;
        // Tracks whether a VCL NAL has already been seen since the AU-in-progress
        // started, so a later first-slice VCL is recognized as a new picture
        // rather than the same one an AUD just introduced.
        let mut seen_vcl_since_split = false;
        for i in 0..nals.len() {
            let nal = &nals[i];
            let boundary = nal.nal_type == NAL_TYPE_AUD
                || (is_vcl(nal.nal_type) && nal.first_slice_segment_in_pic && seen_vcl_since_split);
            if boundary {
                let mut j = i;
                while j > 0 && is_parameter_set(nals[j - 1].nal_type) && !is_split[j - 1] {
                    j -= 1;
                }
                is_split[j] = true;
                seen_vcl_since_split = false;
            }
            if is_vcl(nal.nal_type) {
                seen_vcl_since_split = true;
            }
        }

        let split_indices: Vec<usize> = (0..nals.len()).filter(|&i| is_split[i]).collect();
        let mut access_units = Vec::with_capacity(split_indices.len());
        for (n, &idx) in split_indices.iter().enumerate() {
            let offset = start_code_offset(&data, nals[idx].start);
            let end = match split_indices.get(n + 1) {
                Some(&next_idx) => start_code_offset(&data, nals[next_idx].start),
                None => data.len(),
            };
            access_units.push(AccessUnit { offset, len: end.saturating_sub(offset) });
        }

        Self { data, access_units }
    }

    pub fn access_unit_count(&self) -> usize {
        self.access_units.len()
    }

    /// Byte slice for access unit `idx`, zero-copy (`Bytes::slice`).
    pub fn access_unit(&self, idx: usize) -> Bytes {
        let au = self.access_units[idx];
        self.data.slice(au.offset..au.offset + au.len)
    }
}

/// Finds the start-code prefix immediately before a NAL header offset, so an
/// access unit's byte range includes its own start code.
fn start_code_offset(data: &[u8], nal_header_offset: usize) -> usize {
    if nal_header_offset >= 4
        && data[nal_header_offset - 4] == 0
        && data[nal_header_offset - 3] == 0
        && data[nal_header_offset - 2] == 0
        && data[nal_header_offset - 1] == 1
    {
        return nal_header_offset - 4;
    }
    nal_header_offset.saturating_sub(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nal(start_code: &[u8], nal_type: u8, first_slice: bool, payload: &[u8]) -> Vec<u8> {
        let mut v = start_code.to_vec();
        v.push(nal_type << 1);
        let mut second = 0u8;
        if first_slice {
            second |= 0x80;
        }
        v.push(second);
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn splits_two_access_units_on_first_slice_flag() {
        let sc = [0u8, 0, 0, 1];
        let mut data = Vec::new();
        data.extend(nal(&sc, NAL_TYPE_VPS, false, &[0xAA]));
        data.extend(nal(&sc, 0, true, &[0xBB, 0xBB])); // AU 0 slice
        data.extend(nal(&sc, 0, true, &[0xCC])); // AU 1 slice
        let src = SourceFile::from_bytes(Bytes::from(data));
        assert_eq!(src.access_unit_count(), 2);
    }

    #[test]
    fn aud_forces_a_new_access_unit() {
        let sc = [0u8, 0, 0, 1];
        let mut data = Vec::new();
        data.extend(nal(&sc, NAL_TYPE_AUD, false, &[]));
        data.extend(nal(&sc, 0, true, &[0xAA]));
        data.extend(nal(&sc, NAL_TYPE_AUD, false, &[]));
        data.extend(nal(&sc, 0, true, &[0xBB]));
        let src = SourceFile::from_bytes(Bytes::from(data));
        assert_eq!(src.access_unit_count(), 2);
    }
}
