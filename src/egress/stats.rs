use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::SystemTime;

/// Seconds between the NTP epoch (1900) and the unix epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Shared counters for one egress stream, written by the forwarder and
/// read by the report sender and the adaptive-bitrate loop.
#[derive(Debug, Default)]
pub struct EgressStats {
    send_count: AtomicU64,
    send_bytes: AtomicU64,
    nack_count: AtomicU64,
    last_rtp_time: AtomicU32,
    last_ntp_time: AtomicU64,
}

impl EgressStats {
    pub fn record_send(&self, rtp_time: u32, bytes: usize) {
        self.send_count.fetch_add(1, Ordering::Relaxed);
        self.send_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.last_rtp_time.store(rtp_time, Ordering::Relaxed);
        self.last_ntp_time.store(ntp_now(), Ordering::Relaxed);
    }

    pub fn record_nack(&self, lost: usize) {
        self.nack_count.fetch_add(lost as u64, Ordering::Relaxed);
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::Relaxed)
    }

    pub fn send_bytes(&self) -> u64 {
        self.send_bytes.load(Ordering::Relaxed)
    }

    pub fn nack_count(&self) -> u64 {
        self.nack_count.load(Ordering::Relaxed)
    }

    pub fn last_rtp_time(&self) -> u32 {
        self.last_rtp_time.load(Ordering::Relaxed)
    }

    pub fn last_ntp_time(&self) -> u64 {
        self.last_ntp_time.load(Ordering::Relaxed)
    }
}

/// Current wall clock as a 64-bit NTP timestamp (32.32 fixed point).
pub fn ntp_now() -> u64 {
    let since_unix = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();

    let seconds = since_unix.as_secs() + NTP_UNIX_OFFSET;
    let fraction = (u64::from(since_unix.subsec_nanos()) << 32) / 1_000_000_000;

    (seconds << 32) | fraction
}
