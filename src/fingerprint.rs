//! Machine fingerprint. Identifies the host the worker runs on, hashed to
//! the lowercase hex digest the license blob's `ServerUniqID` is compared
//! against directly (`ServerUniqID == sha256(machineFingerprint)`).

use sha2::{Digest, Sha256};
use std::fs;

/// Prefers a bind-mounted host identity (`/host-machine-id`, for workers
/// running in a container next to the real `/etc/machine-id`), then the
/// container's own `/etc/machine-id`, then falls back to a synthetic
/// identity built from hostname, platform, arch, and CPU model.
pub fn machine_fingerprint() -> String {
    let identity = read_trimmed("/host-machine-id")
        .or_else(|| read_trimmed("/etc/machine-id"))
        .unwrap_or_else(synthetic_identity);
    hex_sha256(identity.as_bytes())
}

fn read_trimmed(path: &str) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn synthetic_identity() -> String {
    let hostname = fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string());
    let platform = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    let cpu_model = first_cpu_model().unwrap_or_else(|| "unknown-cpu".to_string());
    format!("{hostname}|{platform}|{arch}|{cpu_model}")
}

fn first_cpu_model() -> Option<String> {
    let contents = fs::read_to_string("/proc/cpuinfo").ok()?;
    contents.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim() == "model name" {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

fn hex_sha256(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
