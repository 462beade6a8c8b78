//! RTP/H.265 sender: wraps the `rtp` crate's packetizer machinery with a
//! hand-rolled RFC 7798 payloader and a UDP socket.
//!
//! Grounded on `examples/other_examples/41c204e4_webrtc-rs-webrtc__...
//! track_local_static_sample.rs.rs`'s use of `rtp::packetizer::Packetizer`/
//! `rtp::sequence::Sequencer`/`rtp::packetizer::Payloader` for the RTP envelope,
//! and on `examples/other_examples/374eebf3_dummyx-rtpar__src-reassemble.rs.rs`
//! for hand-rolled HEVC NAL-unit handling (the `rtp` crate ships payloaders for
//! H264/VP8/VP9/Opus but not H.265, so the fragmentation logic itself is
//! hand-rolled here the same way that file hand-rolls HEVC parsing).

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use rtp::packetizer::{new_packetizer, Packetizer, Payloader};
use rtp::sequence::new_random_sequencer;
use tokio::net::UdpSocket;
use webrtc_util::marshal::Marshal;

pub const RTP_PAYLOAD_TYPE: u8 = 97;
pub const RTP_MTU: usize = 1200;
/// H.265/HEVC is conventionally clocked at 90kHz for RTP regardless of frame rate.
const RTP_CLOCK_RATE: u32 = 90_000;

/// RFC 7798 payloader: single-NAL-unit packets when a NAL fits the MTU,
/// fragmentation units (FU) otherwise. `b` is one access unit's Annex-B bytes
/// (possibly several NAL units back to back); each is split out and payloaded
/// independently.
#[derive(Default, Clone, Debug)]
pub struct H265Payloader;

impl H265Payloader {
    fn split_nals(b: &[u8]) -> Vec<&[u8]> {
        let mut starts = Vec::new();
        let mut i = 0;
        while i + 2 < b.len() {
            if b[i] == 0 && b[i + 1] == 0 && b[i + 2] == 1 {
                starts.push(i + 3);
                i += 3;
                continue;
            }
            if i + 3 < b.len() && b[i] == 0 && b[i + 1] == 0 && b[i + 2] == 0 && b[i + 3] == 1 {
                starts.push(i + 4);
                i += 4;
                continue;
            }
            i += 1;
        }
        let mut nals = Vec::with_capacity(starts.len());
        for (idx, &s) in starts.iter().enumerate() {
            let end = starts.get(idx + 1).map(|&next| next - 3).unwrap_or(b.len());
            nals.push(&b[s..end.max(s)]);
        }
        nals
    }
}

impl Payloader for H265Payloader {
    fn payload(&mut self, mtu: usize, b: &Bytes) -> Result<Vec<Bytes>, rtp::Error> {
        if b.len() < 2 {
            return Ok(vec![]);
        }
        let mut out = Vec::new();
        for nal in Self::split_nals(b) {
            if nal.len() < 2 {
                continue;
            }
            if nal.len() <= mtu {
                out.push(Bytes::copy_from_slice(nal));
                continue;
            }

            // FU-A style fragmentation per RFC 7798 section 4.4.3.
            let nal_header = [nal[0], nal[1]];
            let nal_type = (nal_header[0] >> 1) & 0x3f;
            let layer_id = ((nal_header[0] & 0x01) << 5) | (nal_header[1] >> 3);
            let tid = nal_header[1] & 0x07;
            let payload = &nal[2..];
            const FU_TYPE: u8 = 49;
            let fu_indicator_byte0 = (nal_header[0] & 0x81) | (FU_TYPE << 1);
            let fu_indicator_byte1 = (layer_id << 3) | tid;

            let max_fragment = mtu.saturating_sub(3).max(1);
            let mut offset = 0usize;
            let mut first = true;
            while offset < payload.len() {
                let end = (offset + max_fragment).min(payload.len());
                let is_last = end == payload.len();
                let mut fu_header = nal_type;
                if first {
                    fu_header |= 0x80;
                }
                if is_last {
                    fu_header |= 0x40;
                }
                let mut packet = BytesMut::with_capacity(3 + (end - offset));
                packet.extend_from_slice(&[fu_indicator_byte0, fu_indicator_byte1, fu_header]);
                packet.extend_from_slice(&payload[offset..end]);
                out.push(packet.freeze());
                offset = end;
                first = false;
            }
        }
        Ok(out)
    }

    fn clone_to(&self) -> Box<dyn Payloader + Send + Sync> {
        Box::new(self.clone())
    }
}

pub struct RtpSender {
    socket: UdpSocket,
    dest: SocketAddr,
    packetizer: Box<dyn Packetizer + Send>,
}

impl RtpSender {
    pub async fn bind(dest: SocketAddr) -> anyhow::Result<Self> {
        let bind_addr: SocketAddr = if dest.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }.parse()?;
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(dest).await?;
        let ssrc = rand_ssrc();
        let packetizer = new_packetizer(
            RTP_MTU,
            RTP_PAYLOAD_TYPE,
            ssrc,
            Box::new(H265Payloader),
            Box::new(new_random_sequencer()),
            RTP_CLOCK_RATE,
        );
        Ok(Self { socket, dest, packetizer: Box::new(packetizer) })
    }

    pub fn dest(&self) -> SocketAddr {
        self.dest
    }

    /// Packetizes one access unit and writes the resulting RTP packets to the
    /// socket. `pts_ns` is the pipeline's own `next_pts_ns` (zeroed at every
    /// start/reconfigure, per §6) converted to the 90kHz RTP clock and written
    /// onto every packet of this access unit; the packetizer's own internal
    /// timestamp counter (seeded randomly by `new_packetizer`) is never read.
    /// `frame_duration_ns` only sizes the `samples` argument `packetize` wants
    /// for marker-bit bookkeeping.
    pub async fn send_access_unit(&mut self, payload: Bytes, pts_ns: u64, frame_duration_ns: u64) -> anyhow::Result<()> {
        let samples = ((frame_duration_ns as f64 / 1_000_000_000.0) * RTP_CLOCK_RATE as f64).round() as u32;
        let rtp_timestamp = ((pts_ns as u128 * RTP_CLOCK_RATE as u128) / 1_000_000_000u128) as u32;
        let mut packets = self.packetizer.packetize(&payload, samples)?;
        for packet in &mut packets {
            packet.header.timestamp = rtp_timestamp;
            let raw = packet.marshal()?;
            self.socket.send(&raw).await?;
        }
        Ok(())
    }
}

fn rand_ssrc() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.subsec_nanos()).unwrap_or(0);
    nanos ^ 0x5bd1_e995
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_nal_under_mtu_passes_through_unfragmented() {
        let mut p = H265Payloader;
        let mut data = vec![0u8, 0, 0, 1];
        data.push(0x02); // nal header byte0, type 1
        data.push(0x01); // nal header byte1
        data.extend_from_slice(&[1, 2, 3, 4]);
        let packets = p.payload(1200, &Bytes::from(data)).unwrap();
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn oversized_nal_fragments_into_multiple_fu_packets() {
        let mut p = H265Payloader;
        let mut data = vec![0u8, 0, 0, 1, 0x02, 0x01];
        data.extend(std::iter::repeat(0xABu8).take(4000));
        let packets = p.payload(1200, &Bytes::from(data)).unwrap();
        assert!(packets.len() > 1);
        // First FU packet's FU header must have the start bit set.
        assert_eq!(packets[0][2] & 0x80, 0x80);
        // Last FU packet's FU header must have the end bit set.
        assert_eq!(packets.last().unwrap()[2] & 0x40, 0x40);
    }
}
